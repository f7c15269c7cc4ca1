//! Mastery engine configuration

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Engine and HTTP surface configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MasteryConfig {
    /// Service host
    pub host: String,
    /// Service port
    pub port: u16,
    /// XP rewards and level curve
    pub xp: XpSettings,
    /// Mastery gating and game settings
    pub mastery: MasterySettings,
    /// Storage configuration
    pub storage: StorageSettings,
}

impl Default for MasteryConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8086,
            xp: XpSettings::default(),
            mastery: MasterySettings::default(),
            storage: StorageSettings::default(),
        }
    }
}

impl MasteryConfig {
    /// Load configuration from `.env`, an optional `codequest.toml` and the environment
    ///
    /// Nested keys use a double underscore, e.g. `CODEQUEST__XP__STREAK_BONUS=50`.
    pub fn load() -> Result<Self> {
        // Try to load .env file
        let _ = dotenvy::dotenv();

        let mut cfg: Self = config::Config::builder()
            .add_source(config::File::with_name("codequest").required(false))
            .add_source(
                config::Environment::with_prefix("CODEQUEST")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("failed to assemble configuration sources")?
            .try_deserialize()
            .context("invalid CodeQuest configuration")?;

        // Platform-assigned PORT takes priority
        if let Ok(port) = std::env::var("PORT") {
            if let Ok(p) = port.parse::<u16>() {
                cfg.port = p;
            }
        }

        cfg.validate()?;
        Ok(cfg)
    }

    /// Reject settings the engine cannot honour
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.mastery.threshold) {
            anyhow::bail!("mastery.threshold must be within [0, 1], got {}", self.mastery.threshold);
        }
        if !(0.0..=1.0).contains(&self.mastery.similarity_threshold) {
            anyhow::bail!(
                "mastery.similarity_threshold must be within [0, 1], got {}",
                self.mastery.similarity_threshold
            );
        }
        if self.xp.level_base_xp == 0 {
            anyhow::bail!("xp.level_base_xp must be positive");
        }
        if self.mastery.max_submission_chars == 0 {
            anyhow::bail!("mastery.max_submission_chars must be positive");
        }
        Ok(())
    }
}

/// XP rewards and level curve
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct XpSettings {
    /// XP needed for level 2 (level n needs base * (n-1)^2)
    pub level_base_xp: u64,
    /// Tutorial section completed for the first time
    pub section_completed: u64,
    /// Game level completed for the first time
    pub game_level_completed: u64,
    /// Sandbox exercise accepted for the first time
    pub exercise_accepted: u64,
    /// Difficulty tier mastered for the first time
    pub difficulty_mastered: u64,
    /// Streak extended on a new day
    pub streak_bonus: u64,
}

impl Default for XpSettings {
    fn default() -> Self {
        Self {
            level_base_xp: crate::DEFAULT_LEVEL_BASE_XP,
            section_completed: 10,
            game_level_completed: 15,
            exercise_accepted: 20,
            difficulty_mastered: 100,
            streak_bonus: 25,
        }
    }
}

/// Mastery gating and game settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MasterySettings {
    /// Fraction of a sequence that must be correct to master a tier
    pub threshold: f64,
    /// Similarity a code submission must exceed
    pub similarity_threshold: f64,
    /// Lives at the start of a game run
    pub starting_lives: u32,
    /// Hints at the start of a game run
    pub starting_hints: u32,
    /// Score for each correctly answered game level
    pub points_per_level: u64,
    /// Longest submission or reference snippet, in characters, that is matched
    pub max_submission_chars: usize,
}

impl Default for MasterySettings {
    fn default() -> Self {
        Self {
            threshold: codequest_common::MASTERY_THRESHOLD,
            similarity_threshold: codequest_common::SIMILARITY_ACCEPT_THRESHOLD,
            starting_lives: crate::DEFAULT_STARTING_LIVES,
            starting_hints: crate::DEFAULT_STARTING_HINTS,
            points_per_level: 10,
            max_submission_chars: crate::DEFAULT_MAX_SUBMISSION_CHARS,
        }
    }
}

/// Storage settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    /// JSON snapshot restored on start and written on shutdown (optional)
    pub snapshot_path: Option<String>,
}
