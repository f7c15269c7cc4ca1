//! Daily Streaks
//!
//! A streak counts consecutive local calendar days with at least one sign-in.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Streak state after a sign-in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreakUpdate {
    /// Streak length after this sign-in
    pub streak: u32,
    /// The streak changed and the bonus applies
    pub increased: bool,
    /// A fresh streak started (first sign-in or gap of more than a day)
    pub is_new: bool,
    /// Date to store as last active
    pub last_active: NaiveDate,
}

/// Computes streak transitions from the last active date
#[derive(Debug, Clone, Copy, Default)]
pub struct StreakTracker;

impl StreakTracker {
    /// Compare `last_active` with `today`
    ///
    /// A `last_active` later than today (clock skew) counts as today.
    pub fn check(last_active: Option<NaiveDate>, streak: u32, today: NaiveDate) -> StreakUpdate {
        let Some(last) = last_active else {
            return StreakUpdate {
                streak: 1,
                increased: true,
                is_new: true,
                last_active: today,
            };
        };

        let gap_days = (today - last).num_days();

        match gap_days {
            d if d <= 0 => StreakUpdate {
                streak,
                increased: false,
                is_new: false,
                last_active: last,
            },
            1 => StreakUpdate {
                streak: streak.saturating_add(1),
                increased: true,
                is_new: false,
                last_active: today,
            },
            _ => StreakUpdate {
                streak: 1,
                increased: true,
                is_new: true,
                last_active: today,
            },
        }
    }
}
