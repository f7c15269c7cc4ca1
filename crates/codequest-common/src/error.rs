//! Error types for CodeQuest
//!
//! Provides a unified error type and the identifier validation errors

use thiserror::Error;

/// Result type alias using QuestError
pub type Result<T> = std::result::Result<T, QuestError>;

/// Unified error type for CodeQuest operations
#[derive(Debug, Error)]
pub enum QuestError {
    // Session errors
    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    // Progress key errors
    #[error("Progress key error: {0}")]
    Key(#[from] KeyError),

    // Storage errors
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    // Request validation errors
    #[error("Invalid input: {0}")]
    Validation(String),

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    // Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    // Generic internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl QuestError {
    /// Whether the learner has to go back through onboarding
    pub fn requires_onboarding(&self) -> bool {
        matches!(self, QuestError::Session(_))
    }
}

/// Session identifier errors
///
/// Either variant means the client must return to onboarding.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("No session code provided")]
    Missing,

    #[error("Session code not found: {0}")]
    NotFound(String),
}

/// Progress key errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyError {
    #[error("Module id must not be empty")]
    EmptyModule,

    #[error("Language id must not be empty")]
    EmptyLanguage,

    #[error("Malformed progress key: {0}")]
    Malformed(String),

    #[error("Unknown difficulty: {0}")]
    UnknownDifficulty(String),

    #[error("Unknown activity: {0}")]
    UnknownActivity(String),
}

impl From<serde_json::Error> for QuestError {
    fn from(err: serde_json::Error) -> Self {
        QuestError::Serialization(err.to_string())
    }
}

impl From<anyhow::Error> for QuestError {
    fn from(err: anyhow::Error) -> Self {
        QuestError::Internal(err.to_string())
    }
}
