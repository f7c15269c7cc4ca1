//! Difficulty Progression
//!
//! Tiers unlock strictly in order (easy → medium → hard). A tier is mastered
//! only when its whole sequence is finished with at least the mastery
//! threshold correct; falling short keeps the learner on the same tier.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use codequest_common::Difficulty;

/// Next tier to play given the tiers already mastered, `None` once all are mastered
pub fn next_difficulty(completed: &BTreeSet<Difficulty>) -> Option<Difficulty> {
    Difficulty::ALL
        .into_iter()
        .find(|tier| !completed.contains(tier))
}

/// Whether `correct` out of `total` reaches the threshold
pub fn meets_threshold(correct: usize, total: usize, threshold: f64) -> bool {
    if total == 0 {
        return false;
    }
    correct.min(total) as f64 / total as f64 >= threshold
}

/// Result of finishing a tier's sequence
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum MasteryOutcome {
    /// Threshold met; the tier joins the completed set
    Mastered { difficulty: Difficulty, score: f64 },
    /// Threshold missed; the same tier is offered again
    Retry { difficulty: Difficulty, score: f64 },
}

impl MasteryOutcome {
    pub fn is_mastered(&self) -> bool {
        matches!(self, MasteryOutcome::Mastered { .. })
    }

    pub fn difficulty(&self) -> Difficulty {
        match self {
            MasteryOutcome::Mastered { difficulty, .. } | MasteryOutcome::Retry { difficulty, .. } => {
                *difficulty
            }
        }
    }

    pub fn score(&self) -> f64 {
        match self {
            MasteryOutcome::Mastered { score, .. } | MasteryOutcome::Retry { score, .. } => *score,
        }
    }
}

/// Assess a finished run of `total` items with `correct` passed
pub fn assess_run(
    difficulty: Difficulty,
    correct: usize,
    total: usize,
    threshold: f64,
) -> MasteryOutcome {
    let score = if total == 0 {
        0.0
    } else {
        correct.min(total) as f64 / total as f64
    };

    if meets_threshold(correct, total, threshold) {
        MasteryOutcome::Mastered { difficulty, score }
    } else {
        MasteryOutcome::Retry { difficulty, score }
    }
}
