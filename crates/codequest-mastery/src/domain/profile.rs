//! Learner Profile

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use codequest_common::SessionId;

/// Age band chosen at onboarding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgeBand {
    Child,
    Teen,
    Adult,
}

/// Optional presentation preferences
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Preferences {
    pub sound_enabled: bool,
    pub reduced_motion: bool,
    pub assistant_enabled: bool,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            sound_enabled: true,
            reduced_motion: false,
            assistant_enabled: true,
        }
    }
}

/// Identity and aggregate stats of one learner
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    /// Code the learner signs in with
    pub session_id: SessionId,

    pub display_name: String,

    pub age_band: AgeBand,

    /// Running XP total, never decreases
    pub total_xp: u64,

    /// Level derived from `total_xp`
    pub level: u32,

    /// Consecutive days with a sign-in
    pub streak: u32,

    /// Local calendar day of the last sign-in
    pub last_active: Option<NaiveDate>,

    /// Result of the last achievement evaluation
    #[serde(default)]
    pub achievements: BTreeSet<String>,

    #[serde(default)]
    pub preferences: Preferences,

    pub created_at: DateTime<Utc>,
}

impl UserProfile {
    /// Fresh profile as created at onboarding
    pub fn new(session_id: SessionId, display_name: impl Into<String>, age_band: AgeBand) -> Self {
        Self {
            session_id,
            display_name: display_name.into(),
            age_band,
            total_xp: 0,
            level: 1,
            streak: 0,
            last_active: None,
            achievements: BTreeSet::new(),
            preferences: Preferences::default(),
            created_at: Utc::now(),
        }
    }

    pub fn has_achievement(&self, id: &str) -> bool {
        self.achievements.contains(id)
    }
}
