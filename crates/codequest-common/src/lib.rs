//! # CodeQuest Common
//!
//! Shared vocabulary for the CodeQuest progress and mastery engine.
//!
//! ## Core Types
//!
//! - [`SessionId`]: opaque learner code used as the persistence key
//! - [`ProgressKey`]: `module-language` identifier of a progress record
//! - [`Difficulty`]: easy / medium / hard tiers, unlocked strictly in order
//! - [`ActivityKind`]: activities that track difficulty mastery
//!
//! ## Errors
//!
//! - [`QuestError`]: unified error type
//! - [`SessionError`] / [`KeyError`]: identifier validation failures

pub mod error;
pub mod types;

// Re-export commonly used types at crate root
pub use error::{KeyError, QuestError, Result, SessionError};
pub use types::{
    activity::ActivityKind,
    difficulty::Difficulty,
    progress_key::ProgressKey,
    session::SessionId,
};

/// CodeQuest version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Fraction of correct items required to master a difficulty tier
pub const MASTERY_THRESHOLD: f64 = 0.75;

/// Similarity a submission must exceed to be accepted
pub const SIMILARITY_ACCEPT_THRESHOLD: f64 = 0.7;

/// Separator between module and language in a progress key
pub const PROGRESS_KEY_SEPARATOR: char = '-';
