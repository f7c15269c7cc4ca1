//! # CodeQuest Mastery
//!
//! Progress & mastery tracking for CodeQuest learners.
//!
//! The engine records what a learner has done per (module, language) pair,
//! turns it into experience and levels, keeps a daily streak, gates difficulty
//! tiers behind a mastery threshold, fuzzy-matches code submissions and
//! derives achievements from the aggregate state.
//!
//! ## Key Concepts
//!
//! - **Progress record**: tutorial, game and sandbox state for one `module-language` key
//! - **Field group**: the unit a save replaces; saving one group never clobbers another
//! - **Mastery**: a tier is complete once ≥ 75% of its sequence is correct at the final item
//! - **Achievements**: declarative rules recomputed from current data on every evaluation
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                   ProgressTracker                       │
//! │  ┌─────────────┐  ┌─────────────┐  ┌─────────────┐      │
//! │  │  Session    │  │  Activity   │  │ Subscribers │      │
//! │  │  Guard      │  │  Operations │  │ (events)    │      │
//! │  └──────┬──────┘  └──────┬──────┘  └──────┬──────┘      │
//! │         │                │                │             │
//! │  ┌──────┴────────────────┴────────────────┴──────┐      │
//! │  │  Similarity · Difficulty · Leveling · Streak  │      │
//! │  │              Achievement rules                 │      │
//! │  └──────────────────────┬────────────────────────┘      │
//! │                         │                               │
//! │  ┌──────────────────────┴────────────────────────┐      │
//! │  │              ProgressStore                     │      │
//! │  │  (atomic field-group commits per session)     │      │
//! │  └───────────────────────────────────────────────┘      │
//! └─────────────────────────────────────────────────────────┘
//! ```

pub mod api;
pub mod config;
pub mod domain;
pub mod infra;
pub mod service;

// Re-export core types
pub use domain::achievements::{
    default_catalog, Achievement, AchievementEvaluator, AchievementRule, RecordCondition,
};
pub use domain::difficulty::{assess_run, next_difficulty, MasteryOutcome};
pub use domain::leveling::{level_for_xp, xp_for_level, LevelChange, XpLedger};
pub use domain::profile::{AgeBand, Preferences, UserProfile};
pub use domain::progress::{
    ExerciseProgress, GameProgress, LanguageProgressRecord, ProgressMap, TutorialProgress,
};
pub use domain::similarity::{similarity, MatchKind, MatchVerdict, SimilarityMatcher};
pub use domain::streak::{StreakTracker, StreakUpdate};

// Re-export infrastructure
pub use infra::progress_store::{
    Commit, InMemoryStore, ProfileUpdate, ProgressStore, ProgressUpdate, StoreError,
};

// Re-export the state container
pub use service::session::SessionGuard;
pub use service::tracker::{
    GameTurn, ProgressTracker, SignIn, Submission, Synced, TrackerEvent,
};

/// Engine version
pub const MASTERY_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default XP needed for level 2; later levels scale quadratically
pub const DEFAULT_LEVEL_BASE_XP: u64 = 100;

/// Default lives at the start of a game run
pub const DEFAULT_STARTING_LIVES: u32 = 3;

/// Default hints at the start of a game run
pub const DEFAULT_STARTING_HINTS: u32 = 3;

/// Default cap on submission and reference length, in characters
pub const DEFAULT_MAX_SUBMISSION_CHARS: usize = 10_000;

/// Capacity of the refresh event channel
pub const EVENT_CHANNEL_CAPACITY: usize = 64;
