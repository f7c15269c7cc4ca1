//! Progress Storage
//!
//! The persistence port for profiles and progress records, plus an in-memory
//! document store keyed by session code.
//!
//! Writes are field-group granular: a tutorial save never touches game
//! fields and vice versa. A [`Commit`] bundles any number of group updates
//! and is applied atomically.

use async_trait::async_trait;
use chrono::NaiveDate;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

use codequest_common::{ActivityKind, Difficulty, ProgressKey, QuestError, SessionId};

use crate::domain::profile::{Preferences, UserProfile};
use crate::domain::progress::{
    ExerciseProgress, GameProgress, LanguageProgressRecord, ProgressMap, TutorialProgress,
};

/// Errors from progress store operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("No profile for session code: {0}")]
    NotFound(String),

    #[error("A profile already exists for session code: {0}")]
    AlreadyExists(String),

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<StoreError> for QuestError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(code) => {
                QuestError::Session(codequest_common::SessionError::NotFound(code))
            }
            StoreError::AlreadyExists(code) => {
                QuestError::Conflict(format!("a profile already exists for {code}"))
            }
            StoreError::Serialization(msg) => QuestError::Serialization(msg),
            other => QuestError::Storage(other.to_string()),
        }
    }
}

/// Profile field groups
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "group", rename_all = "snake_case")]
pub enum ProfileUpdate {
    /// XP total and level, written together
    Experience { total_xp: u64, level: u32 },
    /// Streak transition together with its bonus XP
    Activity {
        streak: u32,
        last_active: NaiveDate,
        total_xp: u64,
        level: u32,
    },
    /// Latest achievement evaluation
    Achievements { ids: BTreeSet<String> },
    Preferences { preferences: Preferences },
}

impl ProfileUpdate {
    /// Apply to a stored profile; XP and level only ever move up
    pub fn apply(self, profile: &mut UserProfile) {
        match self {
            ProfileUpdate::Experience { total_xp, level } => {
                profile.total_xp = profile.total_xp.max(total_xp);
                profile.level = profile.level.max(level);
            }
            ProfileUpdate::Activity {
                streak,
                last_active,
                total_xp,
                level,
            } => {
                profile.streak = streak;
                profile.last_active = Some(last_active);
                profile.total_xp = profile.total_xp.max(total_xp);
                profile.level = profile.level.max(level);
            }
            ProfileUpdate::Achievements { ids } => profile.achievements = ids,
            ProfileUpdate::Preferences { preferences } => profile.preferences = preferences,
        }
    }
}

/// Progress record field groups
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "group", rename_all = "snake_case")]
pub enum ProgressUpdate {
    Tutorial { progress: TutorialProgress },
    Game { progress: GameProgress },
    Sandbox {
        difficulty: Difficulty,
        progress: ExerciseProgress,
    },
    /// Mastered tiers; merged, never removed
    Completed {
        kind: ActivityKind,
        difficulties: BTreeSet<Difficulty>,
    },
}

impl ProgressUpdate {
    pub fn apply(self, record: &mut LanguageProgressRecord) {
        match self {
            ProgressUpdate::Tutorial { progress } => record.tutorial = progress,
            ProgressUpdate::Game { progress } => record.game = progress,
            ProgressUpdate::Sandbox {
                difficulty,
                progress,
            } => {
                record.sandbox.insert(difficulty, progress);
            }
            ProgressUpdate::Completed { kind, difficulties } => {
                record
                    .completed_difficulties
                    .entry(kind)
                    .or_default()
                    .extend(difficulties);
            }
        }
        record.touch();
    }
}

/// A set of field-group updates applied as one write
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Commit {
    pub profile: Option<ProfileUpdate>,
    pub progress: Vec<(ProgressKey, ProgressUpdate)>,
}

impl Commit {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_profile(mut self, update: ProfileUpdate) -> Self {
        self.profile = Some(update);
        self
    }

    pub fn with_progress(mut self, key: ProgressKey, update: ProgressUpdate) -> Self {
        self.progress.push((key, update));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.profile.is_none() && self.progress.is_empty()
    }
}

/// Trait for progress storage backends
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ProgressStore: Send + Sync {
    /// Get the profile for a session code
    async fn get_profile(&self, session: &SessionId) -> Result<Option<UserProfile>, StoreError>;

    /// Store a new profile (onboarding)
    async fn create_profile(&self, profile: UserProfile) -> Result<(), StoreError>;

    /// Get one progress record
    async fn get_language_progress(
        &self,
        session: &SessionId,
        key: &ProgressKey,
    ) -> Result<Option<LanguageProgressRecord>, StoreError>;

    /// Get every progress record of a session
    async fn list_language_progress(&self, session: &SessionId) -> Result<ProgressMap, StoreError>;

    /// Apply all updates of `commit` atomically
    ///
    /// Updates to an absent record create it from defaults first.
    async fn commit(&self, session: &SessionId, commit: Commit) -> Result<(), StoreError>;

    /// Save a single profile field group
    async fn save_profile(&self, session: &SessionId, update: ProfileUpdate) -> Result<(), StoreError> {
        self.commit(session, Commit::new().with_profile(update)).await
    }

    /// Save a single progress field group
    async fn save_language_progress(
        &self,
        session: &SessionId,
        key: &ProgressKey,
        update: ProgressUpdate,
    ) -> Result<(), StoreError> {
        self.commit(session, Commit::new().with_progress(key.clone(), update))
            .await
    }
}

/// Everything stored under one session code
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionDocument {
    pub profile: UserProfile,
    #[serde(default)]
    pub records: HashMap<ProgressKey, LanguageProgressRecord>,
}

/// In-memory document store
///
/// One DashMap entry per session; a commit holds that entry's lock for its
/// whole duration.
pub struct InMemoryStore {
    documents: DashMap<SessionId, SessionDocument>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            documents: DashMap::new(),
        }
    }

    /// Serialize every document to JSON
    pub fn export_json(&self) -> Result<String, StoreError> {
        let documents: Vec<SessionDocument> = self
            .documents
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        serde_json::to_string_pretty(&documents)
            .map_err(|e| StoreError::Serialization(e.to_string()))
    }

    /// Load documents from JSON, replacing any with the same session code
    pub fn import_json(&self, json: &str) -> Result<usize, StoreError> {
        let documents: Vec<SessionDocument> =
            serde_json::from_str(json).map_err(|e| StoreError::Serialization(e.to_string()))?;
        let count = documents.len();
        for document in documents {
            self.documents
                .insert(document.profile.session_id.clone(), document);
        }
        Ok(count)
    }
}

#[async_trait]
impl ProgressStore for InMemoryStore {
    async fn get_profile(&self, session: &SessionId) -> Result<Option<UserProfile>, StoreError> {
        Ok(self.documents.get(session).map(|doc| doc.profile.clone()))
    }

    async fn create_profile(&self, profile: UserProfile) -> Result<(), StoreError> {
        let session = profile.session_id.clone();
        match self.documents.entry(session) {
            dashmap::mapref::entry::Entry::Occupied(entry) => {
                Err(StoreError::AlreadyExists(entry.key().to_string()))
            }
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                entry.insert(SessionDocument {
                    profile,
                    records: HashMap::new(),
                });
                Ok(())
            }
        }
    }

    async fn get_language_progress(
        &self,
        session: &SessionId,
        key: &ProgressKey,
    ) -> Result<Option<LanguageProgressRecord>, StoreError> {
        let doc = self
            .documents
            .get(session)
            .ok_or_else(|| StoreError::NotFound(session.to_string()))?;
        Ok(doc.records.get(key).cloned())
    }

    async fn list_language_progress(&self, session: &SessionId) -> Result<ProgressMap, StoreError> {
        let doc = self
            .documents
            .get(session)
            .ok_or_else(|| StoreError::NotFound(session.to_string()))?;
        Ok(doc.records.clone())
    }

    async fn commit(&self, session: &SessionId, commit: Commit) -> Result<(), StoreError> {
        let mut doc = self
            .documents
            .get_mut(session)
            .ok_or_else(|| StoreError::NotFound(session.to_string()))?;

        if let Some(update) = commit.profile {
            update.apply(&mut doc.profile);
        }
        for (key, update) in commit.progress {
            update.apply(doc.records.entry(key).or_default());
        }
        Ok(())
    }
}

/// Statistics about the store
#[derive(Debug, Clone, Serialize)]
pub struct StoreStats {
    pub sessions: usize,
    pub records: usize,
}

impl InMemoryStore {
    pub fn stats(&self) -> StoreStats {
        StoreStats {
            sessions: self.documents.len(),
            records: self.documents.iter().map(|doc| doc.records.len()).sum(),
        }
    }
}
