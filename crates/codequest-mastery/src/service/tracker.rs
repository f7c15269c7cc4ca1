//! Progress Tracker
//!
//! The state container in front of a [`ProgressStore`]. It validates the
//! session, loads the affected record, runs the domain engines, persists the
//! result as one [`Commit`], re-evaluates achievements and notifies
//! subscribers.
//!
//! Persistence failures never block the learner: the in-memory state is kept,
//! the unsent commit is queued and replayed ahead of the next write, and the
//! result is returned with `synced = false`. A store that no longer knows the
//! session ends it.

use std::collections::{BTreeSet, VecDeque};
use std::sync::Arc;

use chrono::{Local, NaiveDate};
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, info, instrument, warn};

use codequest_common::{
    ActivityKind, Difficulty, ProgressKey, QuestError, Result, SessionError, SessionId,
};

use crate::config::MasteryConfig;
use crate::domain::achievements::{Achievement, AchievementEvaluator};
use crate::domain::difficulty::{assess_run, next_difficulty, MasteryOutcome};
use crate::domain::leveling::{LevelChange, XpLedger};
use crate::domain::profile::{AgeBand, Preferences, UserProfile};
use crate::domain::progress::{
    AnswerEffect, ExerciseProgress, GameProgress, LanguageProgressRecord, ProgressMap,
    TutorialProgress,
};
use crate::domain::similarity::{MatchVerdict, SimilarityMatcher};
use crate::domain::streak::{StreakTracker, StreakUpdate};
use crate::infra::progress_store::{
    Commit, ProfileUpdate, ProgressStore, ProgressUpdate, StoreError,
};
use crate::service::session::SessionGuard;

/// A result plus whether it reached the store
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Synced<T> {
    pub value: T,
    /// `false` when the store could not be read or written
    pub synced: bool,
}

impl<T> Synced<T> {
    fn new(value: T, synced: bool) -> Self {
        Self { value, synced }
    }
}

/// Refresh notifications for views
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TrackerEvent {
    ProfileRefreshed,
    ProgressRefreshed { key: ProgressKey },
    LevelUp { level: u32 },
    StreakExtended { streak: u32, is_new: bool },
    /// A tier was mastered for the first time
    MasteryAchieved {
        key: ProgressKey,
        kind: ActivityKind,
        difficulty: Difficulty,
    },
    /// Every tier of an activity is now mastered
    CertificateEarned { key: ProgressKey, kind: ActivityKind },
    AchievementsUnlocked { ids: Vec<String> },
    SessionCleared,
}

/// Result of signing in
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SignIn {
    pub profile: UserProfile,
    pub streak: StreakUpdate,
    /// Streak bonus, when the streak moved
    pub bonus: Option<LevelChange>,
    pub synced: bool,
}

/// Result of answering a game level
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GameTurn {
    pub effect: AnswerEffect,
    pub progress: GameProgress,
    /// Set when the answer finished the run
    pub mastery: Option<MasteryOutcome>,
    pub level_change: Option<LevelChange>,
}

/// Result of submitting a sandbox exercise
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Submission {
    pub verdict: MatchVerdict,
    pub progress: ExerciseProgress,
    /// Set when the submission finished the sequence
    pub mastery: Option<MasteryOutcome>,
    pub level_change: Option<LevelChange>,
}

#[derive(Debug, Default)]
struct TrackerCache {
    profile: Option<UserProfile>,
    progress: ProgressMap,
    /// Commits the store has not accepted yet, oldest first
    pending: VecDeque<Commit>,
}

/// Explicit state container for one learner
pub struct ProgressTracker {
    store: Arc<dyn ProgressStore>,
    config: MasteryConfig,
    guard: SessionGuard,
    matcher: SimilarityMatcher,
    ledger: XpLedger,
    evaluator: AchievementEvaluator,
    cache: RwLock<TrackerCache>,
    events: broadcast::Sender<TrackerEvent>,
}

impl ProgressTracker {
    /// Create a tracker with the built-in achievement catalog
    pub fn new(store: Arc<dyn ProgressStore>, config: MasteryConfig) -> Self {
        Self::with_catalog(store, config, crate::domain::achievements::default_catalog())
    }

    /// Create a tracker with a custom achievement catalog
    pub fn with_catalog(
        store: Arc<dyn ProgressStore>,
        config: MasteryConfig,
        catalog: Vec<Achievement>,
    ) -> Self {
        let (events, _) = broadcast::channel(crate::EVENT_CHANNEL_CAPACITY);
        Self {
            store,
            matcher: SimilarityMatcher::new(config.mastery.similarity_threshold),
            ledger: XpLedger::new(config.xp.level_base_xp),
            evaluator: AchievementEvaluator::new(catalog),
            config,
            guard: SessionGuard::new(),
            cache: RwLock::new(TrackerCache::default()),
            events,
        }
    }

    pub fn config(&self) -> &MasteryConfig {
        &self.config
    }

    pub fn achievements(&self) -> &[Achievement] {
        self.evaluator.catalog()
    }

    /// Subscribe to refresh events
    pub fn subscribe(&self) -> broadcast::Receiver<TrackerEvent> {
        self.events.subscribe()
    }

    /// Refresh events as a stream
    pub fn events(&self) -> BroadcastStream<TrackerEvent> {
        BroadcastStream::new(self.events.subscribe())
    }

    /// The signed-in learner's profile
    pub fn profile(&self) -> Option<UserProfile> {
        self.cache.read().profile.clone()
    }

    pub fn session(&self) -> Option<SessionId> {
        self.guard.current()
    }

    // ------------------------------------------------------------------
    // Session
    // ------------------------------------------------------------------

    /// Create a profile for a new code and sign in with it
    #[instrument(skip(self, display_name))]
    pub async fn onboard(
        &self,
        code: &str,
        display_name: &str,
        age_band: AgeBand,
        today: NaiveDate,
    ) -> Result<SignIn> {
        let session = SessionId::parse(code)?;
        self.store
            .create_profile(UserProfile::new(session, display_name, age_band))
            .await?;
        info!("Profile created");
        self.sign_in(code, today).await
    }

    /// Sign in using today's local calendar date
    pub async fn sign_in_today(&self, code: &str) -> Result<SignIn> {
        self.sign_in(code, Local::now().date_naive()).await
    }

    /// Validate the code, load the profile and apply the daily streak
    #[instrument(skip(self))]
    pub async fn sign_in(&self, code: &str, today: NaiveDate) -> Result<SignIn> {
        let session = match self.guard.establish(code) {
            Ok(session) => session,
            Err(err) => {
                self.forget();
                return Err(err.into());
            }
        };

        if self.cached_session().as_ref() != Some(&session) {
            *self.cache.write() = TrackerCache::default();
        }

        // The stored profile is stale while earlier writes are still queued
        let flushed = self.persist(&session, Commit::new()).await?;
        let cached = self.cache.read().profile.clone();
        let (mut profile, mut synced) = match cached {
            Some(profile) if !flushed => (profile, false),
            cached => match self.store.get_profile(&session).await {
                Ok(Some(profile)) => (profile, true),
                Ok(None) => return Err(self.lose_session(&session)),
                Err(err) => {
                    warn!(error = %err, "Failed to load profile");
                    match cached {
                        Some(profile) => (profile, false),
                        None => return Err(err.into()),
                    }
                }
            },
        };

        let streak = StreakTracker::check(profile.last_active, profile.streak, today);
        let mut bonus = None;
        if streak.increased {
            let change = self
                .ledger
                .award(profile.total_xp, profile.level, self.config.xp.streak_bonus);
            profile.streak = streak.streak;
            profile.last_active = Some(streak.last_active);
            profile.total_xp = change.total_xp;
            profile.level = change.level;

            let commit = Commit::new().with_profile(ProfileUpdate::Activity {
                streak: streak.streak,
                last_active: streak.last_active,
                total_xp: change.total_xp,
                level: change.level,
            });
            synced &= self.persist(&session, commit).await?;
            info!(streak = streak.streak, is_new = streak.is_new, "Streak updated");
            bonus = Some(change);
        }

        match self.store.list_language_progress(&session).await {
            Ok(progress) => self.merge_progress(progress),
            Err(StoreError::NotFound(_)) => return Err(self.lose_session(&session)),
            Err(err) => {
                warn!(error = %err, "Failed to load progress records");
                synced = false;
            }
        }
        self.cache.write().profile = Some(profile);

        if streak.increased {
            self.emit(TrackerEvent::StreakExtended {
                streak: streak.streak,
                is_new: streak.is_new,
            });
        }
        if let Some(change) = &bonus {
            self.after_xp(change);
        } else {
            self.emit(TrackerEvent::ProfileRefreshed);
        }

        synced &= self.refresh_achievements(&session).await?;
        let profile = self.require_profile()?;

        Ok(SignIn {
            profile,
            streak,
            bonus,
            synced,
        })
    }

    /// Forget the session and all cached state
    pub fn sign_out(&self) {
        self.guard.clear();
        self.forget();
    }

    /// Re-read profile and progress from the store
    ///
    /// Used when another tab may have written; last write wins. Queued
    /// writes are sent first, and while any remain local state is kept.
    #[instrument(skip(self))]
    pub async fn reload(&self) -> Result<Synced<UserProfile>> {
        let session = self.require_session()?;

        if !self.persist(&session, Commit::new()).await? {
            return Ok(Synced::new(self.require_profile()?, false));
        }

        let profile = match self.store.get_profile(&session).await {
            Ok(Some(profile)) => profile,
            Ok(None) => return Err(self.lose_session(&session)),
            Err(err) => {
                warn!(error = %err, "Reload failed, keeping local state");
                return Ok(Synced::new(self.require_profile()?, false));
            }
        };

        let synced = match self.store.list_language_progress(&session).await {
            Ok(progress) => {
                self.cache.write().progress = progress;
                true
            }
            Err(StoreError::NotFound(_)) => return Err(self.lose_session(&session)),
            Err(err) => {
                warn!(error = %err, "Reload of progress records failed");
                false
            }
        };
        self.cache.write().profile = Some(profile.clone());
        self.emit(TrackerEvent::ProfileRefreshed);

        Ok(Synced::new(profile, synced))
    }

    // ------------------------------------------------------------------
    // Profile
    // ------------------------------------------------------------------

    /// Add `amount` XP and persist total and level in one write
    #[instrument(skip(self))]
    pub async fn award_xp(&self, amount: u64) -> Result<Synced<LevelChange>> {
        let session = self.require_session()?;
        let (change, update) = self.stage_xp(amount)?;

        let synced = self.persist(&session, Commit::new().with_profile(update)).await?;
        self.after_xp(&change);
        let synced = synced & self.refresh_achievements(&session).await?;

        Ok(Synced::new(change, synced))
    }

    pub async fn update_preferences(&self, preferences: Preferences) -> Result<Synced<Preferences>> {
        let session = self.require_session()?;
        {
            let mut cache = self.cache.write();
            let profile = cache.profile.as_mut().ok_or(SessionError::Missing)?;
            profile.preferences = preferences.clone();
        }

        let commit = Commit::new().with_profile(ProfileUpdate::Preferences {
            preferences: preferences.clone(),
        });
        let synced = self.persist(&session, commit).await?;
        self.emit(TrackerEvent::ProfileRefreshed);

        Ok(Synced::new(preferences, synced))
    }

    /// Evaluate the catalog against the current state
    pub async fn evaluate_achievements(&self) -> Result<Synced<Vec<String>>> {
        let session = self.require_session()?;
        let synced = self.refresh_achievements(&session).await?;
        let profile = self.require_profile()?;
        Ok(Synced::new(profile.achievements.into_iter().collect(), synced))
    }

    // ------------------------------------------------------------------
    // Tutorial
    // ------------------------------------------------------------------

    /// Load or initialize the tutorial, clamped to `total_sections`
    #[instrument(skip(self, key), fields(key = %key))]
    pub async fn open_tutorial(
        &self,
        key: &ProgressKey,
        total_sections: usize,
    ) -> Result<Synced<TutorialProgress>> {
        let session = self.require_session()?;
        let (mut record, mut synced) = self.load_record(&session, key).await?;

        let first_visit =
            record.tutorial.total_sections == 0 && record.tutorial.completed_sections.is_empty();
        record.tutorial.resume(total_sections);

        if first_visit {
            let commit = Commit::new().with_progress(
                key.clone(),
                ProgressUpdate::Tutorial {
                    progress: record.tutorial.clone(),
                },
            );
            synced &= self.persist(&session, commit).await?;
        }

        let tutorial = record.tutorial.clone();
        self.cache_record(key, record);
        self.emit(TrackerEvent::ProgressRefreshed { key: key.clone() });
        synced &= self.refresh_achievements(&session).await?;

        Ok(Synced::new(tutorial, synced))
    }

    /// Complete a section and advance; section XP is awarded once
    #[instrument(skip(self, key), fields(key = %key))]
    pub async fn complete_section(
        &self,
        key: &ProgressKey,
        section: usize,
        total_sections: usize,
    ) -> Result<Synced<TutorialProgress>> {
        let session = self.require_session()?;
        let (mut record, mut synced) = self.load_record(&session, key).await?;

        record.tutorial.resume(total_sections);
        let newly = record.tutorial.complete_section(section);

        let mut commit = Commit::new().with_progress(
            key.clone(),
            ProgressUpdate::Tutorial {
                progress: record.tutorial.clone(),
            },
        );
        let change = self.stage_reward(newly.then_some(self.config.xp.section_completed), &mut commit)?;

        synced &= self.persist(&session, commit).await?;
        let tutorial = record.tutorial.clone();
        self.cache_record(key, record);
        self.emit(TrackerEvent::ProgressRefreshed { key: key.clone() });
        if let Some(change) = &change {
            self.after_xp(change);
        }
        synced &= self.refresh_achievements(&session).await?;

        debug!(section, newly, "Section completed");
        Ok(Synced::new(tutorial, synced))
    }

    // ------------------------------------------------------------------
    // Game
    // ------------------------------------------------------------------

    /// Resume the run at `difficulty`, or start a fresh one
    #[instrument(skip(self, key), fields(key = %key))]
    pub async fn start_game(
        &self,
        key: &ProgressKey,
        difficulty: Difficulty,
        total_levels: usize,
    ) -> Result<Synced<GameProgress>> {
        let session = self.require_session()?;
        let (mut record, mut synced) = self.load_record(&session, key).await?;

        if record.game.is_resumable(difficulty) {
            record.game.resume(total_levels);
        } else {
            record.game.restart(
                difficulty,
                total_levels,
                self.config.mastery.starting_lives,
                self.config.mastery.starting_hints,
            );
        }

        let commit = Commit::new().with_progress(
            key.clone(),
            ProgressUpdate::Game {
                progress: record.game.clone(),
            },
        );
        synced &= self.persist(&session, commit).await?;

        let game = record.game.clone();
        self.cache_record(key, record);
        self.emit(TrackerEvent::ProgressRefreshed { key: key.clone() });
        synced &= self.refresh_achievements(&session).await?;

        Ok(Synced::new(game, synced))
    }

    /// Answer a level of the current run
    #[instrument(skip(self, key), fields(key = %key))]
    pub async fn answer_level(
        &self,
        key: &ProgressKey,
        level: usize,
        correct: bool,
    ) -> Result<Synced<GameTurn>> {
        let session = self.require_session()?;
        let (mut record, mut synced) = self.load_record(&session, key).await?;

        let effect = record
            .game
            .answer(level, correct, self.config.mastery.points_per_level);
        let mut commit = Commit::new().with_progress(
            key.clone(),
            ProgressUpdate::Game {
                progress: record.game.clone(),
            },
        );

        let mut reward = if effect.first_completion {
            self.config.xp.game_level_completed
        } else {
            0
        };
        let mut events = Vec::new();
        let mut mastery = None;
        if effect.run_finished {
            let outcome = assess_run(
                record.game.difficulty,
                record.game.correct_count(),
                record.game.total_levels,
                self.config.mastery.threshold,
            );
            reward += self.settle_run(key, &mut record, ActivityKind::Game, outcome, &mut commit, &mut events);
            mastery = Some(outcome);
        }
        let change = self.stage_reward((reward > 0).then_some(reward), &mut commit)?;

        synced &= self.persist(&session, commit).await?;
        let progress = record.game.clone();
        self.cache_record(key, record);
        self.emit(TrackerEvent::ProgressRefreshed { key: key.clone() });
        events.into_iter().for_each(|event| self.emit(event));
        if let Some(change) = &change {
            self.after_xp(change);
        }
        synced &= self.refresh_achievements(&session).await?;

        Ok(Synced::new(
            GameTurn {
                effect,
                progress,
                mastery,
                level_change: change,
            },
            synced,
        ))
    }

    /// Spend a hint if one is left
    #[instrument(skip(self, key), fields(key = %key))]
    pub async fn use_hint(&self, key: &ProgressKey) -> Result<Synced<bool>> {
        let session = self.require_session()?;
        let (mut record, mut synced) = self.load_record(&session, key).await?;

        let used = record.game.use_hint();
        if used {
            let commit = Commit::new().with_progress(
                key.clone(),
                ProgressUpdate::Game {
                    progress: record.game.clone(),
                },
            );
            synced &= self.persist(&session, commit).await?;
            self.cache_record(key, record);
            self.emit(TrackerEvent::ProgressRefreshed { key: key.clone() });
            synced &= self.refresh_achievements(&session).await?;
        }

        Ok(Synced::new(used, synced))
    }

    // ------------------------------------------------------------------
    // Sandbox
    // ------------------------------------------------------------------

    /// Load or initialize the exercise sequence for `difficulty`
    #[instrument(skip(self, key), fields(key = %key))]
    pub async fn enter_sandbox(
        &self,
        key: &ProgressKey,
        difficulty: Difficulty,
        total_exercises: usize,
    ) -> Result<Synced<ExerciseProgress>> {
        let session = self.require_session()?;
        let (mut record, mut synced) = self.load_record(&session, key).await?;

        let first_visit = !record.sandbox.contains_key(&difficulty);
        let progress = record.sandbox_mut(difficulty, total_exercises);
        progress.resume(total_exercises);
        let progress = progress.clone();

        if first_visit {
            let commit = Commit::new().with_progress(
                key.clone(),
                ProgressUpdate::Sandbox {
                    difficulty,
                    progress: progress.clone(),
                },
            );
            synced &= self.persist(&session, commit).await?;
        }

        self.cache_record(key, record);
        self.emit(TrackerEvent::ProgressRefreshed { key: key.clone() });
        synced &= self.refresh_achievements(&session).await?;

        Ok(Synced::new(progress, synced))
    }

    /// Match a submission against the reference and record the result
    ///
    /// Submitting the final exercise ends the sequence and assesses mastery.
    /// Text longer than `max_submission_chars` is rejected before matching.
    #[instrument(skip(self, key, submission, reference), fields(key = %key))]
    pub async fn submit_exercise(
        &self,
        key: &ProgressKey,
        difficulty: Difficulty,
        exercise: usize,
        submission: &str,
        reference: &str,
    ) -> Result<Synced<Submission>> {
        let session = self.require_session()?;
        let limit = self.config.mastery.max_submission_chars;
        for (field, text) in [("submission", submission), ("reference", reference)] {
            let chars = text.chars().count();
            if chars > limit {
                return Err(QuestError::Validation(format!(
                    "{field} is {chars} characters, the limit is {limit}"
                )));
            }
        }
        let (mut record, mut synced) = self.load_record(&session, key).await?;
        let verdict = self.matcher.check(submission, reference);

        let Some(progress) = record.sandbox.get_mut(&difficulty) else {
            warn!(%difficulty, "Submission for a sandbox tier that was never entered");
            return Ok(Synced::new(
                Submission {
                    verdict,
                    progress: ExerciseProgress::default(),
                    mastery: None,
                    level_change: None,
                },
                synced,
            ));
        };

        let is_final = progress.is_final(exercise);
        let newly = verdict.accepted && progress.complete(exercise);
        let (correct, total) = (progress.correct_count(), progress.total_exercises);

        let mut commit = Commit::new().with_progress(
            key.clone(),
            ProgressUpdate::Sandbox {
                difficulty,
                progress: progress.clone(),
            },
        );
        let mut reward = if newly {
            self.config.xp.exercise_accepted
        } else {
            0
        };
        let mut events = Vec::new();
        let mut mastery = None;
        if is_final {
            let outcome = assess_run(difficulty, correct, total, self.config.mastery.threshold);
            reward += self.settle_run(key, &mut record, ActivityKind::Sandbox, outcome, &mut commit, &mut events);
            mastery = Some(outcome);
        }
        let change = self.stage_reward((reward > 0).then_some(reward), &mut commit)?;

        synced &= self.persist(&session, commit).await?;
        let progress = record.sandbox.get(&difficulty).cloned().unwrap_or_default();
        self.cache_record(key, record);
        self.emit(TrackerEvent::ProgressRefreshed { key: key.clone() });
        events.into_iter().for_each(|event| self.emit(event));
        if let Some(change) = &change {
            self.after_xp(change);
        }
        synced &= self.refresh_achievements(&session).await?;

        debug!(exercise, accepted = verdict.accepted, similarity = verdict.similarity, "Exercise submitted");
        Ok(Synced::new(
            Submission {
                verdict,
                progress,
                mastery,
                level_change: change,
            },
            synced,
        ))
    }

    /// Start a tier's exercise sequence over
    #[instrument(skip(self, key), fields(key = %key))]
    pub async fn retry_sandbox(
        &self,
        key: &ProgressKey,
        difficulty: Difficulty,
    ) -> Result<Synced<ExerciseProgress>> {
        let session = self.require_session()?;
        let (mut record, mut synced) = self.load_record(&session, key).await?;

        let Some(progress) = record.sandbox.get_mut(&difficulty) else {
            return Ok(Synced::new(ExerciseProgress::default(), synced));
        };
        progress.reset();
        let progress = progress.clone();

        let commit = Commit::new().with_progress(
            key.clone(),
            ProgressUpdate::Sandbox {
                difficulty,
                progress: progress.clone(),
            },
        );
        synced &= self.persist(&session, commit).await?;
        self.cache_record(key, record);
        self.emit(TrackerEvent::ProgressRefreshed { key: key.clone() });
        synced &= self.refresh_achievements(&session).await?;

        Ok(Synced::new(progress, synced))
    }

    /// Next tier to offer for an activity, `None` once all are mastered
    pub async fn next_difficulty(
        &self,
        key: &ProgressKey,
        kind: ActivityKind,
    ) -> Result<Synced<Option<Difficulty>>> {
        let session = self.require_session()?;
        let (record, synced) = self.load_record(&session, key).await?;
        Ok(Synced::new(next_difficulty(&record.completed_for(kind)), synced))
    }

    /// Progress record as last seen (cache first, then store)
    pub async fn progress(&self, key: &ProgressKey) -> Result<Synced<LanguageProgressRecord>> {
        let session = self.require_session()?;
        let (record, synced) = self.load_record(&session, key).await?;
        Ok(Synced::new(record, synced))
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn require_session(&self) -> Result<SessionId> {
        Ok(self.guard.require()?)
    }

    fn require_profile(&self) -> Result<UserProfile> {
        self.profile()
            .ok_or_else(|| QuestError::Session(SessionError::Missing))
    }

    fn cached_session(&self) -> Option<SessionId> {
        self.cache
            .read()
            .profile
            .as_ref()
            .map(|profile| profile.session_id.clone())
    }

    fn forget(&self) {
        *self.cache.write() = TrackerCache::default();
        self.emit(TrackerEvent::SessionCleared);
    }

    /// The store no longer knows `session`: drop it and require onboarding
    fn lose_session(&self, session: &SessionId) -> QuestError {
        warn!(session = %session, "Session unknown to the store, signing out");
        self.forget();
        self.guard.reject(session).into()
    }

    fn emit(&self, event: TrackerEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    /// Store record, or the cached one when it is newer or the store failed
    async fn load_record(
        &self,
        session: &SessionId,
        key: &ProgressKey,
    ) -> Result<(LanguageProgressRecord, bool)> {
        let cached = self.cache.read().progress.get(key).cloned();

        match self.store.get_language_progress(session, key).await {
            Ok(Some(stored)) => match cached {
                Some(cached) if cached.updated_at > stored.updated_at => Ok((cached, true)),
                _ => Ok((stored, true)),
            },
            Ok(None) => Ok((cached.unwrap_or_default(), true)),
            Err(StoreError::NotFound(_)) => Err(self.lose_session(session)),
            Err(err) => {
                warn!(key = %key, error = %err, "Failed to load progress, continuing with local state");
                Ok((cached.unwrap_or_default(), false))
            }
        }
    }

    fn cache_record(&self, key: &ProgressKey, mut record: LanguageProgressRecord) {
        record.touch();
        self.cache.write().progress.insert(key.clone(), record);
    }

    fn merge_progress(&self, stored: ProgressMap) {
        let mut cache = self.cache.write();
        for (key, record) in stored {
            let keep_cached = cache
                .progress
                .get(&key)
                .is_some_and(|cached| cached.updated_at > record.updated_at);
            if !keep_cached {
                cache.progress.insert(key, record);
            }
        }
    }

    /// Send queued commits in order, then `commit`
    ///
    /// On a transient failure the unsent commits stay queued for the next
    /// call and `Ok(false)` is returned.
    async fn persist(&self, session: &SessionId, commit: Commit) -> Result<bool> {
        let mut queue = std::mem::take(&mut self.cache.write().pending);
        if !commit.is_empty() {
            queue.push_back(commit);
        }

        while let Some(next) = queue.front() {
            match self.store.commit(session, next.clone()).await {
                Ok(()) => {
                    queue.pop_front();
                }
                Err(StoreError::NotFound(_)) => return Err(self.lose_session(session)),
                Err(err) => {
                    warn!(error = %err, queued = queue.len(), "Failed to persist progress, keeping local state");
                    let mut cache = self.cache.write();
                    queue.extend(cache.pending.drain(..));
                    cache.pending = queue;
                    return Ok(false);
                }
            }
        }
        Ok(true)
    }

    /// Apply an award to the cached profile and return the matching update
    fn stage_xp(&self, amount: u64) -> Result<(LevelChange, ProfileUpdate)> {
        let mut cache = self.cache.write();
        let profile = cache.profile.as_mut().ok_or(SessionError::Missing)?;

        let change = self.ledger.award(profile.total_xp, profile.level, amount);
        profile.total_xp = change.total_xp;
        profile.level = change.level;

        Ok((
            change,
            ProfileUpdate::Experience {
                total_xp: change.total_xp,
                level: change.level,
            },
        ))
    }

    /// Stage an optional reward into `commit` so XP and progress land together
    fn stage_reward(&self, amount: Option<u64>, commit: &mut Commit) -> Result<Option<LevelChange>> {
        let Some(amount) = amount.filter(|amount| *amount > 0) else {
            return Ok(None);
        };
        let (change, update) = self.stage_xp(amount)?;
        commit.profile = Some(update);
        Ok(Some(change))
    }

    /// Record a finished run's outcome; returns the mastery bonus owed
    ///
    /// The bonus is only owed when the tier was not mastered before.
    fn settle_run(
        &self,
        key: &ProgressKey,
        record: &mut LanguageProgressRecord,
        kind: ActivityKind,
        outcome: MasteryOutcome,
        commit: &mut Commit,
        events: &mut Vec<TrackerEvent>,
    ) -> u64 {
        let MasteryOutcome::Mastered { difficulty, score } = outcome else {
            info!(key = %key, %kind, difficulty = %outcome.difficulty(), score = outcome.score(), "Threshold missed, tier stays open");
            return 0;
        };

        if !record.mark_mastered(kind, difficulty) {
            return 0;
        }

        info!(key = %key, %kind, %difficulty, score, "Tier mastered");
        commit.progress.push((
            key.clone(),
            ProgressUpdate::Completed {
                kind,
                difficulties: BTreeSet::from([difficulty]),
            },
        ));
        events.push(TrackerEvent::MasteryAchieved {
            key: key.clone(),
            kind,
            difficulty,
        });
        if record.has_mastered_all(kind) {
            events.push(TrackerEvent::CertificateEarned {
                key: key.clone(),
                kind,
            });
        }

        self.config.xp.difficulty_mastered
    }

    fn after_xp(&self, change: &LevelChange) {
        if change.leveled_up() {
            info!(level = change.level, "Level up");
            self.emit(TrackerEvent::LevelUp {
                level: change.level,
            });
        }
        self.emit(TrackerEvent::ProfileRefreshed);
    }

    /// Re-run the catalog over cached state and persist the set if it changed
    async fn refresh_achievements(&self, session: &SessionId) -> Result<bool> {
        let (unlocked, newly) = {
            let cache = self.cache.read();
            let Some(profile) = cache.profile.as_ref() else {
                return Ok(true);
            };
            let unlocked: BTreeSet<String> = self
                .evaluator
                .evaluate(profile, &cache.progress)
                .into_iter()
                .collect();
            if unlocked == profile.achievements {
                return Ok(true);
            }
            let newly: Vec<String> = unlocked.difference(&profile.achievements).cloned().collect();
            (unlocked, newly)
        };

        if let Some(profile) = self.cache.write().profile.as_mut() {
            profile.achievements = unlocked.clone();
        }
        if !newly.is_empty() {
            info!(ids = ?newly, "Achievements unlocked");
            self.emit(TrackerEvent::AchievementsUnlocked { ids: newly });
        }

        let commit = Commit::new().with_profile(ProfileUpdate::Achievements { ids: unlocked });
        self.persist(session, commit).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::progress_store::{InMemoryStore, MockProgressStore, StoreError};
    use chrono::Duration;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, 20).unwrap()
    }

    fn key() -> ProgressKey {
        ProgressKey::new("intro", "python").unwrap()
    }

    async fn onboarded() -> (Arc<InMemoryStore>, ProgressTracker) {
        let store = Arc::new(InMemoryStore::new());
        let tracker = ProgressTracker::new(store.clone(), MasteryConfig::default());
        tracker
            .onboard("PY2024", "Grace", AgeBand::Teen, today())
            .await
            .unwrap();
        (store, tracker)
    }

    #[tokio::test]
    async fn test_operations_require_session() {
        let tracker = ProgressTracker::new(Arc::new(InMemoryStore::new()), MasteryConfig::default());
        let err = tracker.open_tutorial(&key(), 5).await.unwrap_err();
        assert!(err.requires_onboarding());
    }

    #[tokio::test]
    async fn test_unknown_code_forces_onboarding() {
        let tracker = ProgressTracker::new(Arc::new(InMemoryStore::new()), MasteryConfig::default());
        let mut events = tracker.subscribe();

        let err = tracker.sign_in("NOBODY", today()).await.unwrap_err();
        assert!(matches!(err, QuestError::Session(SessionError::NotFound(_))));
        assert!(tracker.session().is_none());
        assert_eq!(events.try_recv().unwrap(), TrackerEvent::SessionCleared);
    }

    #[tokio::test]
    async fn test_first_sign_in_awards_streak_bonus_once() {
        let (store, tracker) = onboarded().await;
        let profile = tracker.profile().unwrap();
        assert_eq!(profile.streak, 1);
        assert_eq!(profile.total_xp, 25);

        let again = tracker.sign_in("PY2024", today()).await.unwrap();
        assert!(!again.streak.increased);
        assert!(again.bonus.is_none());
        assert_eq!(again.profile.total_xp, 25);

        let stored = store
            .get_profile(&SessionId::parse("PY2024").unwrap())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.total_xp, 25);
        assert_eq!(stored.last_active, Some(today()));
    }

    #[tokio::test]
    async fn test_next_day_extends_streak() {
        let (_store, tracker) = onboarded().await;
        let sign_in = tracker
            .sign_in("PY2024", today() + Duration::days(1))
            .await
            .unwrap();
        assert_eq!(sign_in.profile.streak, 2);
        assert!(sign_in.streak.increased && !sign_in.streak.is_new);
    }

    #[tokio::test]
    async fn test_section_xp_awarded_once() {
        let (_store, tracker) = onboarded().await;
        tracker.open_tutorial(&key(), 4).await.unwrap();

        tracker.complete_section(&key(), 0, 4).await.unwrap();
        let xp_after_first = tracker.profile().unwrap().total_xp;
        tracker.complete_section(&key(), 0, 4).await.unwrap();

        assert_eq!(tracker.profile().unwrap().total_xp, xp_after_first);
        assert_eq!(xp_after_first, 25 + 10);
    }

    #[tokio::test]
    async fn test_game_run_mastery() {
        let (_store, tracker) = onboarded().await;
        tracker.start_game(&key(), Difficulty::Easy, 4).await.unwrap();

        for (level, correct) in [(0, true), (1, true), (2, false), (3, true)] {
            tracker.answer_level(&key(), level, correct).await.unwrap();
        }
        let record = tracker.progress(&key()).await.unwrap().value;
        assert!(record.has_mastered(ActivityKind::Game, Difficulty::Easy));

        let next = tracker.next_difficulty(&key(), ActivityKind::Game).await.unwrap();
        assert_eq!(next.value, Some(Difficulty::Medium));
    }

    #[tokio::test]
    async fn test_start_game_resumes_unfinished_run() {
        let (_store, tracker) = onboarded().await;
        tracker.start_game(&key(), Difficulty::Medium, 5).await.unwrap();
        tracker.answer_level(&key(), 0, true).await.unwrap();

        let resumed = tracker.start_game(&key(), Difficulty::Medium, 5).await.unwrap();
        assert_eq!(resumed.value.current_level, 1);

        let fresh = tracker.start_game(&key(), Difficulty::Hard, 5).await.unwrap();
        assert_eq!(fresh.value.current_level, 0);
        assert_eq!(fresh.value.lives, 3);
    }

    #[tokio::test]
    async fn test_hints_run_out() {
        let (_store, tracker) = onboarded().await;
        tracker.start_game(&key(), Difficulty::Easy, 3).await.unwrap();
        for _ in 0..3 {
            assert!(tracker.use_hint(&key()).await.unwrap().value);
        }
        assert!(!tracker.use_hint(&key()).await.unwrap().value);
    }

    #[tokio::test]
    async fn test_save_failure_keeps_local_state() {
        let mut mock = MockProgressStore::new();
        let session = SessionId::parse("OFFLINE").unwrap();
        let mut profile = UserProfile::new(session, "Kai", AgeBand::Child);
        profile.last_active = Some(today());
        profile.streak = 2;

        let returned = profile.clone();
        mock.expect_get_profile()
            .returning(move |_| Ok(Some(returned.clone())));
        mock.expect_list_language_progress()
            .returning(|_| Ok(ProgressMap::new()));
        mock.expect_get_language_progress()
            .returning(|_, _| Err(StoreError::Unavailable("network down".into())));
        mock.expect_commit()
            .returning(|_, _| Err(StoreError::Unavailable("network down".into())));

        let tracker = ProgressTracker::new(Arc::new(mock), MasteryConfig::default());
        let sign_in = tracker.sign_in("OFFLINE", today()).await.unwrap();
        assert!(sign_in.synced);

        let opened = tracker.open_tutorial(&key(), 3).await.unwrap();
        assert!(!opened.synced);

        let completed = tracker.complete_section(&key(), 0, 3).await.unwrap();
        assert!(!completed.synced);
        assert!(completed.value.completed_sections.contains(&0));

        // Local state survives and keeps accumulating
        let completed = tracker.complete_section(&key(), 1, 3).await.unwrap();
        assert_eq!(completed.value.completed_sections.len(), 2);
        assert_eq!(tracker.profile().unwrap().total_xp, 20);
    }

    fn signed_in_mock() -> MockProgressStore {
        let mut mock = MockProgressStore::new();
        let mut profile = UserProfile::new(SessionId::parse("GONE01").unwrap(), "Noor", AgeBand::Adult);
        profile.last_active = Some(today());
        profile.streak = 1;
        mock.expect_get_profile()
            .returning(move |_| Ok(Some(profile.clone())));
        mock.expect_list_language_progress()
            .returning(|_| Ok(ProgressMap::new()));
        mock
    }

    #[tokio::test]
    async fn test_record_read_for_unknown_session_ends_it() {
        let mut mock = signed_in_mock();
        mock.expect_get_language_progress()
            .returning(|session, _| Err(StoreError::NotFound(session.to_string())));

        let tracker = ProgressTracker::new(Arc::new(mock), MasteryConfig::default());
        tracker.sign_in("GONE01", today()).await.unwrap();
        let mut events = tracker.subscribe();

        let err = tracker.open_tutorial(&key(), 3).await.unwrap_err();
        assert!(matches!(err, QuestError::Session(SessionError::NotFound(_))));
        assert!(tracker.session().is_none());
        assert!(tracker.profile().is_none());
        assert_eq!(events.try_recv().unwrap(), TrackerEvent::SessionCleared);
    }

    #[tokio::test]
    async fn test_write_for_unknown_session_ends_it() {
        let mut mock = signed_in_mock();
        mock.expect_get_language_progress()
            .returning(|_, _| Ok(None));
        mock.expect_commit()
            .returning(|session, _| Err(StoreError::NotFound(session.to_string())));

        let tracker = ProgressTracker::new(Arc::new(mock), MasteryConfig::default());
        tracker.sign_in("GONE01", today()).await.unwrap();

        let err = tracker.start_game(&key(), Difficulty::Easy, 3).await.unwrap_err();
        assert!(err.requires_onboarding());
        assert!(tracker.session().is_none());
    }

    #[tokio::test]
    async fn test_failed_write_is_replayed_first() {
        let mut mock = signed_in_mock();
        mock.expect_get_language_progress()
            .returning(|_, _| Ok(None));

        let sent = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let log = sent.clone();
        let mut calls = 0;
        mock.expect_commit().returning(move |_, commit| {
            calls += 1;
            if calls == 1 {
                return Err(StoreError::Unavailable("timeout".into()));
            }
            log.lock().push(commit);
            Ok(())
        });

        let tracker = ProgressTracker::new(Arc::new(mock), MasteryConfig::default());
        tracker.sign_in("GONE01", today()).await.unwrap();

        let opened = tracker.open_tutorial(&key(), 3).await.unwrap();
        assert!(!opened.synced);

        let completed = tracker.complete_section(&key(), 0, 3).await.unwrap();
        assert!(completed.synced);

        let sent = sent.lock();
        assert!(sent[0].profile.is_none());
        assert!(matches!(
            &sent[0].progress[..],
            [(k, ProgressUpdate::Tutorial { progress })] if *k == key() && progress.completed_sections.is_empty()
        ));
        assert_eq!(
            sent[1].profile,
            Some(ProfileUpdate::Experience { total_xp: 10, level: 1 })
        );
    }

    #[tokio::test]
    async fn test_oversized_submission_is_rejected() {
        let store = Arc::new(InMemoryStore::new());
        let mut config = MasteryConfig::default();
        config.mastery.max_submission_chars = 16;
        let tracker = ProgressTracker::new(store, config);
        tracker
            .onboard("PY2024", "Grace", AgeBand::Teen, today())
            .await
            .unwrap();
        tracker.enter_sandbox(&key(), Difficulty::Easy, 2).await.unwrap();

        let long = "x".repeat(17);
        let err = tracker
            .submit_exercise(&key(), Difficulty::Easy, 0, &long, "print(1)")
            .await
            .unwrap_err();
        assert!(matches!(err, QuestError::Validation(_)));
        let err = tracker
            .submit_exercise(&key(), Difficulty::Easy, 0, "print(1)", &long)
            .await
            .unwrap_err();
        assert!(matches!(err, QuestError::Validation(_)));

        let record = tracker.progress(&key()).await.unwrap().value;
        assert!(record.sandbox[&Difficulty::Easy].completed_exercises.is_empty());

        // Exactly at the limit is matched
        let at_limit = "y".repeat(16);
        let ok = tracker
            .submit_exercise(&key(), Difficulty::Easy, 0, &at_limit, &at_limit)
            .await
            .unwrap();
        assert!(ok.value.verdict.accepted);
    }

    #[tokio::test]
    async fn test_profile_load_failure_without_cache_is_an_error() {
        let mut mock = MockProgressStore::new();
        mock.expect_get_profile()
            .returning(|_| Err(StoreError::Unavailable("timeout".into())));

        let tracker = ProgressTracker::new(Arc::new(mock), MasteryConfig::default());
        let err = tracker.sign_in("ANY", today()).await.unwrap_err();
        assert!(matches!(err, QuestError::Storage(_)));
        // Transient failures keep the code
        assert!(tracker.session().is_some());
    }
}
