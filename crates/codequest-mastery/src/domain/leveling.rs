//! Experience & Levels
//!
//! Level curve:
//!
//! ```text
//! xp_for_level(n) = base × (n - 1)²
//! level(xp)       = ⌊√(xp / base)⌋ + 1
//! ```
//!
//! With the default base of 100: level 2 at 100 XP, level 3 at 400,
//! level 4 at 900. XP only ever grows, so levels never drop.

use serde::{Deserialize, Serialize};

/// Minimum total XP for `level` (levels start at 1)
pub fn xp_for_level(level: u32, base: u64) -> u64 {
    let steps = u64::from(level.saturating_sub(1));
    base.saturating_mul(steps.saturating_mul(steps))
}

/// Level reached with `total_xp`
pub fn level_for_xp(total_xp: u64, base: u64) -> u32 {
    let base = base.max(1);
    let mut steps = ((total_xp / base) as f64).sqrt() as u64;

    // Correct float rounding at perfect squares
    while steps > 0 && base.saturating_mul(steps.saturating_mul(steps)) > total_xp {
        steps -= 1;
    }
    while steps < u64::from(u32::MAX)
        && base.saturating_mul((steps + 1).saturating_mul(steps + 1)) <= total_xp
    {
        steps += 1;
    }

    u32::try_from(steps + 1).unwrap_or(u32::MAX)
}

/// Result of an XP award
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelChange {
    pub awarded: u64,
    pub previous_xp: u64,
    pub total_xp: u64,
    pub previous_level: u32,
    pub level: u32,
}

impl LevelChange {
    pub fn leveled_up(&self) -> bool {
        self.level > self.previous_level
    }
}

/// Applies awards to a running total
///
/// The ledger does not deduplicate; callers check completion sets before
/// awarding one-off bonuses.
#[derive(Debug, Clone, Copy)]
pub struct XpLedger {
    level_base_xp: u64,
}

impl Default for XpLedger {
    fn default() -> Self {
        Self::new(crate::DEFAULT_LEVEL_BASE_XP)
    }
}

impl XpLedger {
    pub fn new(level_base_xp: u64) -> Self {
        Self {
            level_base_xp: level_base_xp.max(1),
        }
    }

    pub fn level_for(&self, total_xp: u64) -> u32 {
        level_for_xp(total_xp, self.level_base_xp)
    }

    /// XP still needed to reach the next level
    pub fn xp_to_next_level(&self, total_xp: u64) -> u64 {
        let next = self.level_for(total_xp).saturating_add(1);
        xp_for_level(next, self.level_base_xp).saturating_sub(total_xp)
    }

    /// Add `amount` to a total currently at `total_xp` / `level`
    pub fn award(&self, total_xp: u64, level: u32, amount: u64) -> LevelChange {
        let new_total = total_xp.saturating_add(amount);
        LevelChange {
            awarded: amount,
            previous_xp: total_xp,
            total_xp: new_total,
            previous_level: level,
            level: self.level_for(new_total).max(level),
        }
    }
}
