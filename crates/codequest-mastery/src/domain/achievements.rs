//! Achievement Rules
//!
//! Achievements are plain data: an id, a label and a declarative rule. The
//! evaluator interprets every rule against the current profile and progress
//! records, so the unlocked set is always a pure function of current data.
//! Nothing is stored per achievement that could drift out of sync.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use codequest_common::{ActivityKind, Difficulty};

use super::profile::UserProfile;
use super::progress::{LanguageProgressRecord, ProgressMap};

/// Condition checked against a single progress record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum RecordCondition {
    /// Any activity was opened
    Started,
    /// Every tutorial section is completed
    TutorialCompleted,
    /// A given tier is mastered for an activity
    DifficultyMastered {
        kind: ActivityKind,
        difficulty: Difficulty,
    },
    /// All three tiers are mastered for an activity
    AllDifficultiesMastered { kind: ActivityKind },
    /// At least this many game levels completed
    GameLevelsCompleted(usize),
    /// At least this many sandbox exercises completed (all tiers)
    ExercisesCompleted(usize),
    /// Every nested condition holds for the same record
    All(Vec<RecordCondition>),
}

impl RecordCondition {
    pub fn holds(&self, record: &LanguageProgressRecord) -> bool {
        match self {
            RecordCondition::Started => record.is_started(),
            RecordCondition::TutorialCompleted => record.tutorial.completed,
            RecordCondition::DifficultyMastered { kind, difficulty } => {
                record.has_mastered(*kind, *difficulty)
            }
            RecordCondition::AllDifficultiesMastered { kind } => record.has_mastered_all(*kind),
            RecordCondition::GameLevelsCompleted(n) => record.game.completed_levels.len() >= *n,
            RecordCondition::ExercisesCompleted(n) => record.exercises_completed() >= *n,
            RecordCondition::All(conditions) => {
                conditions.iter().all(|condition| condition.holds(record))
            }
        }
    }
}

/// Declarative unlock rule over aggregate state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum AchievementRule {
    TotalXpAtLeast(u64),
    LevelAtLeast(u32),
    StreakAtLeast(u32),
    /// At least `at_least` records satisfy `condition`
    RecordsMatching {
        condition: RecordCondition,
        at_least: usize,
    },
    /// Every nested rule holds
    AllOf(Vec<AchievementRule>),
}

impl AchievementRule {
    pub fn holds(&self, profile: &UserProfile, progress: &ProgressMap) -> bool {
        match self {
            AchievementRule::TotalXpAtLeast(xp) => profile.total_xp >= *xp,
            AchievementRule::LevelAtLeast(level) => profile.level >= *level,
            AchievementRule::StreakAtLeast(days) => profile.streak >= *days,
            AchievementRule::RecordsMatching {
                condition,
                at_least,
            } => {
                progress
                    .values()
                    .filter(|record| condition.holds(record))
                    .count()
                    >= *at_least
            }
            AchievementRule::AllOf(rules) => rules.iter().all(|rule| rule.holds(profile, progress)),
        }
    }
}

/// A named milestone
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Achievement {
    pub id: String,
    pub label: String,
    pub description: String,
    pub rule: AchievementRule,
}

impl Achievement {
    pub fn new(
        id: impl Into<String>,
        label: impl Into<String>,
        description: impl Into<String>,
        rule: AchievementRule,
    ) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            description: description.into(),
            rule,
        }
    }
}

/// Built-in achievement list
pub fn default_catalog() -> Vec<Achievement> {
    use AchievementRule::*;
    use RecordCondition::*;

    vec![
        Achievement::new("first-steps", "First Steps", "Earn your first XP", TotalXpAtLeast(1)),
        Achievement::new("rising-star", "Rising Star", "Reach 500 XP", TotalXpAtLeast(500)),
        Achievement::new("code-wizard", "Code Wizard", "Reach 2,000 XP", TotalXpAtLeast(2_000)),
        Achievement::new("level-5", "Level Up", "Reach level 5", LevelAtLeast(5)),
        Achievement::new("on-fire", "On Fire", "Keep a 3-day streak", StreakAtLeast(3)),
        Achievement::new("week-warrior", "Week Warrior", "Keep a 7-day streak", StreakAtLeast(7)),
        Achievement::new(
            "tutorial-graduate",
            "Tutorial Graduate",
            "Finish every section of a tutorial",
            RecordsMatching {
                condition: TutorialCompleted,
                at_least: 1,
            },
        ),
        Achievement::new(
            "polyglot",
            "Polyglot",
            "Start learning three different languages",
            RecordsMatching {
                condition: Started,
                at_least: 3,
            },
        ),
        Achievement::new(
            "sandbox-explorer",
            "Sandbox Explorer",
            "Master the easy sandbox exercises",
            RecordsMatching {
                condition: DifficultyMastered {
                    kind: ActivityKind::Sandbox,
                    difficulty: Difficulty::Easy,
                },
                at_least: 1,
            },
        ),
        Achievement::new(
            "sandbox-master",
            "Sandbox Master",
            "Master every sandbox tier for one language",
            RecordsMatching {
                condition: AllDifficultiesMastered {
                    kind: ActivityKind::Sandbox,
                },
                at_least: 1,
            },
        ),
        Achievement::new(
            "game-champion",
            "Game Champion",
            "Master a hard game",
            RecordsMatching {
                condition: DifficultyMastered {
                    kind: ActivityKind::Game,
                    difficulty: Difficulty::Hard,
                },
                at_least: 1,
            },
        ),
        Achievement::new(
            "completionist",
            "Completionist",
            "Finish a tutorial and master every game and sandbox tier in one language",
            RecordsMatching {
                condition: All(vec![
                    TutorialCompleted,
                    AllDifficultiesMastered {
                        kind: ActivityKind::Game,
                    },
                    AllDifficultiesMastered {
                        kind: ActivityKind::Sandbox,
                    },
                ]),
                at_least: 1,
            },
        ),
    ]
}

/// Interprets a catalog of achievements
#[derive(Debug, Clone)]
pub struct AchievementEvaluator {
    catalog: Vec<Achievement>,
}

impl Default for AchievementEvaluator {
    fn default() -> Self {
        Self::new(default_catalog())
    }
}

impl AchievementEvaluator {
    pub fn new(catalog: Vec<Achievement>) -> Self {
        Self { catalog }
    }

    pub fn catalog(&self) -> &[Achievement] {
        &self.catalog
    }

    /// Ids of every achievement whose rule currently holds, in catalog order
    pub fn evaluate(&self, profile: &UserProfile, progress: &ProgressMap) -> Vec<String> {
        self.catalog
            .iter()
            .filter(|achievement| achievement.rule.holds(profile, progress))
            .map(|achievement| achievement.id.clone())
            .collect()
    }

    /// Ids unlocked now that were not in `previous`
    pub fn newly_unlocked(
        &self,
        previous: &BTreeSet<String>,
        profile: &UserProfile,
        progress: &ProgressMap,
    ) -> Vec<String> {
        self.evaluate(profile, progress)
            .into_iter()
            .filter(|id| !previous.contains(id))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use codequest_common::{ProgressKey, SessionId};
    use crate::domain::profile::AgeBand;

    fn profile() -> UserProfile {
        UserProfile::new(SessionId::parse("ACH001").unwrap(), "Ada", AgeBand::Teen)
    }

    fn key(language: &str) -> ProgressKey {
        ProgressKey::new("intro", language).unwrap()
    }

    #[test]
    fn test_empty_state_unlocks_nothing() {
        let evaluator = AchievementEvaluator::default();
        assert!(evaluator.evaluate(&profile(), &ProgressMap::new()).is_empty());
    }

    #[test]
    fn test_aggregate_thresholds() {
        let evaluator = AchievementEvaluator::default();
        let mut p = profile();
        p.total_xp = 600;
        p.level = 3;
        p.streak = 7;

        let unlocked = evaluator.evaluate(&p, &ProgressMap::new());
        assert_eq!(unlocked, vec!["first-steps", "rising-star", "on-fire", "week-warrior"]);
    }

    #[test]
    fn test_record_counting() {
        let evaluator = AchievementEvaluator::default();
        let mut progress = ProgressMap::new();
        for language in ["python", "rust", "go"] {
            let mut record = LanguageProgressRecord::default();
            record.tutorial.resume(4);
            progress.insert(key(language), record);
        }
        progress
            .get_mut(&key("rust"))
            .unwrap()
            .mark_mastered(ActivityKind::Sandbox, Difficulty::Easy);

        let unlocked = evaluator.evaluate(&profile(), &progress);
        assert!(unlocked.contains(&"polyglot".to_string()));
        assert!(unlocked.contains(&"sandbox-explorer".to_string()));
        assert!(!unlocked.contains(&"sandbox-master".to_string()));
    }

    fn finished_everything(record: &mut LanguageProgressRecord) {
        record.tutorial.resume(1);
        record.tutorial.complete_section(0);
        for difficulty in Difficulty::ALL {
            record.mark_mastered(ActivityKind::Game, difficulty);
            record.mark_mastered(ActivityKind::Sandbox, difficulty);
        }
    }

    #[test]
    fn test_completionist_needs_one_language() {
        let evaluator = AchievementEvaluator::default();
        let mut progress = ProgressMap::new();

        let mut tutorial = LanguageProgressRecord::default();
        tutorial.tutorial.resume(1);
        tutorial.tutorial.complete_section(0);
        let mut game = LanguageProgressRecord::default();
        let mut sandbox = LanguageProgressRecord::default();
        for difficulty in Difficulty::ALL {
            game.mark_mastered(ActivityKind::Game, difficulty);
            sandbox.mark_mastered(ActivityKind::Sandbox, difficulty);
        }
        progress.insert(key("python"), tutorial);
        progress.insert(key("rust"), game);
        progress.insert(key("go"), sandbox);

        let unlocked = evaluator.evaluate(&profile(), &progress);
        assert!(unlocked.contains(&"tutorial-graduate".to_string()));
        assert!(!unlocked.contains(&"completionist".to_string()));

        let mut all = LanguageProgressRecord::default();
        finished_everything(&mut all);
        progress.insert(key("js"), all);
        let unlocked = evaluator.evaluate(&profile(), &progress);
        assert!(unlocked.contains(&"completionist".to_string()));
    }

    #[test]
    fn test_all_of_combines_aggregates() {
        let evaluator = AchievementEvaluator::new(vec![Achievement::new(
            "dedicated",
            "Dedicated",
            "Reach level 3 on a 5-day streak",
            AchievementRule::AllOf(vec![
                AchievementRule::LevelAtLeast(3),
                AchievementRule::StreakAtLeast(5),
            ]),
        )]);
        let mut p = profile();
        p.level = 3;
        assert!(evaluator.evaluate(&p, &ProgressMap::new()).is_empty());
        p.streak = 5;
        assert_eq!(evaluator.evaluate(&p, &ProgressMap::new()), vec!["dedicated"]);
    }

    #[test]
    fn test_evaluation_is_idempotent() {
        let evaluator = AchievementEvaluator::default();
        let mut p = profile();
        p.total_xp = 2_500;
        p.level = 6;
        let mut progress = ProgressMap::new();
        let mut record = LanguageProgressRecord::default();
        for difficulty in Difficulty::ALL {
            record.mark_mastered(ActivityKind::Game, difficulty);
        }
        progress.insert(key("js"), record);

        let before = (p.clone(), progress.clone());
        let first = evaluator.evaluate(&p, &progress);
        let second = evaluator.evaluate(&p, &progress);
        assert_eq!(first, second);
        assert_eq!((p, progress), before);
        assert!(first.contains(&"game-champion".to_string()));
    }

    #[test]
    fn test_newly_unlocked_diff() {
        let evaluator = AchievementEvaluator::default();
        let mut p = profile();
        p.total_xp = 10;
        let previous: BTreeSet<String> = ["first-steps".to_string()].into_iter().collect();
        assert!(evaluator
            .newly_unlocked(&previous, &p, &ProgressMap::new())
            .is_empty());

        p.streak = 3;
        assert_eq!(
            evaluator.newly_unlocked(&previous, &p, &ProgressMap::new()),
            vec!["on-fire"]
        );
    }

    #[test]
    fn test_rules_serialize_as_documentation() {
        let json = serde_json::to_value(&default_catalog()[6]).unwrap();
        assert_eq!(json["rule"]["type"], "records_matching");
        assert_eq!(json["rule"]["value"]["condition"]["type"], "tutorial_completed");
    }
}
