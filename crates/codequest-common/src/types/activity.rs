//! Activity kinds that gate on difficulty mastery

use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::KeyError;

/// Activity whose difficulty tiers are tracked in `completed_difficulties`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityKind {
    /// Quiz / drag-and-drop game levels
    Game,
    /// Free-form code exercises
    Sandbox,
}

impl ActivityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityKind::Game => "game",
            ActivityKind::Sandbox => "sandbox",
        }
    }
}

impl std::fmt::Display for ActivityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActivityKind {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "game" => Ok(ActivityKind::Game),
            "sandbox" => Ok(ActivityKind::Sandbox),
            other => Err(KeyError::UnknownActivity(other.to_string())),
        }
    }
}
