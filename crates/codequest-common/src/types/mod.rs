//! Core identifiers for CodeQuest progress tracking

pub mod activity;
pub mod difficulty;
pub mod progress_key;
pub mod session;
