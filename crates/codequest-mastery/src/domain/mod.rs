//! Mastery domain logic
//!
//! Pure data types and algorithms: similarity matching, difficulty gating,
//! leveling, streaks and achievement rules.

pub mod achievements;
pub mod difficulty;
pub mod leveling;
pub mod profile;
pub mod progress;
pub mod similarity;
pub mod streak;
