//! Language Progress Records
//!
//! One record per `module-language` key, holding tutorial, game and sandbox
//! state plus the difficulty tiers mastered per activity.
//!
//! Every cursor is clamped into `[0, total - 1]`. Content can shrink between
//! sessions, so a stored cursor is re-clamped on resume rather than trusted.
//! A sequence with `total = 0` is never advanced.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};

use codequest_common::{ActivityKind, Difficulty, ProgressKey};

/// All records of one learner
pub type ProgressMap = HashMap<ProgressKey, LanguageProgressRecord>;

/// Clamp `index` into a sequence of `total` items
pub fn clamp_index(index: usize, total: usize) -> usize {
    if total == 0 {
        0
    } else {
        index.min(total - 1)
    }
}

/// Tutorial section cursor and completion
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TutorialProgress {
    pub current_section: usize,
    pub completed_sections: BTreeSet<usize>,
    pub total_sections: usize,
    pub completed: bool,
}

impl TutorialProgress {
    pub fn new(total_sections: usize) -> Self {
        Self {
            total_sections,
            ..Self::default()
        }
    }

    /// Adopt the current section count and clamp the cursor
    pub fn resume(&mut self, total_sections: usize) {
        self.total_sections = total_sections;
        self.current_section = clamp_index(self.current_section, total_sections);
        self.refresh_completed();
    }

    /// Mark `section` done and move the cursor past it
    ///
    /// Returns `true` only the first time a section is completed.
    pub fn complete_section(&mut self, section: usize) -> bool {
        if section >= self.total_sections {
            return false;
        }
        let newly = self.completed_sections.insert(section);
        self.current_section = clamp_index(section + 1, self.total_sections);
        self.refresh_completed();
        newly
    }

    /// Jump to a section (clamped)
    pub fn go_to(&mut self, section: usize) {
        self.current_section = clamp_index(section, self.total_sections);
    }

    fn refresh_completed(&mut self) {
        self.completed =
            self.total_sections > 0 && self.completed_sections.len() >= self.total_sections;
    }
}

/// What an answered game level did to the run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnswerEffect {
    /// First correct answer for this level in this run
    pub newly_completed: bool,
    /// First correct answer for this level at this difficulty, ever
    pub first_completion: bool,
    pub life_lost: bool,
    /// The final level was answered
    pub run_finished: bool,
    /// The last life was lost before the final level
    pub game_over: bool,
}

/// Game run state
///
/// Quiz-style: every answer moves to the next level, correct answers
/// complete it, wrong answers cost a life.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameProgress {
    pub current_level: usize,
    pub completed_levels: BTreeSet<usize>,
    pub total_levels: usize,
    pub lives: u32,
    pub hints: u32,
    pub score: u64,
    pub difficulty: Difficulty,
    /// The final level has been answered
    #[serde(default)]
    pub finished: bool,
    /// Levels ever answered correctly, per difficulty; survives restarts
    #[serde(default)]
    pub rewarded_levels: BTreeMap<Difficulty, BTreeSet<usize>>,
}

impl Default for GameProgress {
    fn default() -> Self {
        Self::new(
            Difficulty::Easy,
            0,
            crate::DEFAULT_STARTING_LIVES,
            crate::DEFAULT_STARTING_HINTS,
        )
    }
}

impl GameProgress {
    pub fn new(difficulty: Difficulty, total_levels: usize, lives: u32, hints: u32) -> Self {
        Self {
            current_level: 0,
            completed_levels: BTreeSet::new(),
            total_levels,
            lives,
            hints,
            score: 0,
            difficulty,
            finished: false,
            rewarded_levels: BTreeMap::new(),
        }
    }

    /// Start a fresh run, keeping the record of rewarded levels
    pub fn restart(&mut self, difficulty: Difficulty, total_levels: usize, lives: u32, hints: u32) {
        let rewarded = std::mem::take(&mut self.rewarded_levels);
        *self = Self::new(difficulty, total_levels, lives, hints);
        self.rewarded_levels = rewarded;
    }

    pub fn resume(&mut self, total_levels: usize) {
        self.total_levels = total_levels;
        self.current_level = clamp_index(self.current_level, total_levels);
    }

    pub fn is_game_over(&self) -> bool {
        self.lives == 0
    }

    /// Whether `start` should pick this run up again
    pub fn is_resumable(&self, difficulty: Difficulty) -> bool {
        self.difficulty == difficulty
            && self.total_levels > 0
            && !self.finished
            && !self.is_game_over()
    }

    /// Correct levels that still exist in the current content
    pub fn correct_count(&self) -> usize {
        self.completed_levels.range(..self.total_levels).count()
    }

    /// Apply an answer to `level`
    ///
    /// Answers outside the sequence, after the last life is gone, or after
    /// the run finished change nothing.
    pub fn answer(&mut self, level: usize, correct: bool, points: u64) -> AnswerEffect {
        if level >= self.total_levels || self.is_game_over() || self.finished {
            return AnswerEffect::default();
        }

        let mut effect = AnswerEffect::default();
        if correct {
            effect.newly_completed = self.completed_levels.insert(level);
            if effect.newly_completed {
                self.score = self.score.saturating_add(points);
            }
            effect.first_completion = self
                .rewarded_levels
                .entry(self.difficulty)
                .or_default()
                .insert(level);
        } else {
            self.lives = self.lives.saturating_sub(1);
            effect.life_lost = true;
        }
        self.current_level = clamp_index(level + 1, self.total_levels);

        effect.run_finished = level + 1 == self.total_levels;
        self.finished = effect.run_finished;
        effect.game_over = !effect.run_finished && self.is_game_over();
        effect
    }

    /// Consume a hint if one is left
    pub fn use_hint(&mut self) -> bool {
        if self.hints == 0 {
            return false;
        }
        self.hints -= 1;
        true
    }
}

/// Sandbox exercise cursor for one difficulty
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExerciseProgress {
    pub current_exercise: usize,
    pub completed_exercises: BTreeSet<usize>,
    pub total_exercises: usize,
    /// Exercises ever passed; kept across retries
    #[serde(default)]
    pub rewarded_exercises: BTreeSet<usize>,
}

impl ExerciseProgress {
    pub fn new(total_exercises: usize) -> Self {
        Self {
            total_exercises,
            ..Self::default()
        }
    }

    pub fn resume(&mut self, total_exercises: usize) {
        self.total_exercises = total_exercises;
        self.current_exercise = clamp_index(self.current_exercise, total_exercises);
    }

    pub fn is_final(&self, exercise: usize) -> bool {
        self.total_exercises > 0 && exercise + 1 == self.total_exercises
    }

    /// Mark `exercise` passed and advance
    ///
    /// Returns `true` only the first time the exercise is ever passed, so a
    /// retry does not pay out again.
    pub fn complete(&mut self, exercise: usize) -> bool {
        if exercise >= self.total_exercises {
            return false;
        }
        self.completed_exercises.insert(exercise);
        self.current_exercise = clamp_index(exercise + 1, self.total_exercises);
        self.rewarded_exercises.insert(exercise)
    }

    /// Completed exercises that still exist in the current content
    pub fn correct_count(&self) -> usize {
        self.completed_exercises
            .range(..self.total_exercises)
            .count()
    }

    /// Start the sequence over for a retry; rewarded exercises are kept
    pub fn reset(&mut self) {
        self.current_exercise = 0;
        self.completed_exercises.clear();
    }
}

/// Persisted state for one `module-language` pairing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LanguageProgressRecord {
    #[serde(default)]
    pub tutorial: TutorialProgress,

    #[serde(default)]
    pub game: GameProgress,

    #[serde(default)]
    pub sandbox: BTreeMap<Difficulty, ExerciseProgress>,

    /// Tiers mastered at the threshold, per activity
    #[serde(default)]
    pub completed_difficulties: BTreeMap<ActivityKind, BTreeSet<Difficulty>>,

    pub updated_at: DateTime<Utc>,
}

impl Default for LanguageProgressRecord {
    fn default() -> Self {
        Self {
            tutorial: TutorialProgress::default(),
            game: GameProgress::default(),
            sandbox: BTreeMap::new(),
            completed_difficulties: BTreeMap::new(),
            updated_at: Utc::now(),
        }
    }
}

impl LanguageProgressRecord {
    /// Tiers mastered for `kind` (empty when none)
    pub fn completed_for(&self, kind: ActivityKind) -> BTreeSet<Difficulty> {
        self.completed_difficulties
            .get(&kind)
            .cloned()
            .unwrap_or_default()
    }

    pub fn has_mastered(&self, kind: ActivityKind, difficulty: Difficulty) -> bool {
        self.completed_difficulties
            .get(&kind)
            .is_some_and(|set| set.contains(&difficulty))
    }

    pub fn has_mastered_all(&self, kind: ActivityKind) -> bool {
        Difficulty::ALL
            .iter()
            .all(|difficulty| self.has_mastered(kind, *difficulty))
    }

    /// Add a mastered tier; `true` if it was not already present
    pub fn mark_mastered(&mut self, kind: ActivityKind, difficulty: Difficulty) -> bool {
        self.completed_difficulties
            .entry(kind)
            .or_default()
            .insert(difficulty)
    }

    /// Sandbox state for `difficulty`, created with `total_exercises` if absent
    pub fn sandbox_mut(&mut self, difficulty: Difficulty, total_exercises: usize) -> &mut ExerciseProgress {
        self.sandbox
            .entry(difficulty)
            .or_insert_with(|| ExerciseProgress::new(total_exercises))
    }

    /// Whether the learner ever opened any activity of this pairing
    pub fn is_started(&self) -> bool {
        self.tutorial.total_sections > 0
            || !self.tutorial.completed_sections.is_empty()
            || self.game.total_levels > 0
            || !self.sandbox.is_empty()
    }

    pub fn exercises_completed(&self) -> usize {
        self.sandbox.values().map(ExerciseProgress::correct_count).sum()
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resume_clamps_after_content_shrinks() {
        let mut tutorial = TutorialProgress::new(10);
        tutorial.current_section = 8;

        tutorial.resume(6);
        assert_eq!(tutorial.current_section, 5);
        assert_eq!(tutorial.total_sections, 6);
    }

    #[test]
    fn test_empty_sequence_never_advances() {
        let mut tutorial = TutorialProgress::new(0);
        assert!(!tutorial.complete_section(0));
        assert_eq!(tutorial.current_section, 0);
        assert!(!tutorial.completed);

        let mut exercises = ExerciseProgress::new(0);
        assert!(!exercises.complete(0));
        assert!(!exercises.is_final(0));
    }

    #[test]
    fn test_tutorial_completion_flag() {
        let mut tutorial = TutorialProgress::new(3);
        assert!(tutorial.complete_section(0));
        assert!(tutorial.complete_section(1));
        assert!(!tutorial.complete_section(1));
        assert!(!tutorial.completed);

        assert!(tutorial.complete_section(2));
        assert!(tutorial.completed);
        assert_eq!(tutorial.current_section, 2);
    }

    #[test]
    fn test_game_wrong_answer_costs_a_life() {
        let mut game = GameProgress::new(Difficulty::Easy, 4, 2, 1);
        let effect = game.answer(0, false, 10);
        assert!(effect.life_lost);
        assert_eq!(game.lives, 1);
        assert_eq!(game.current_level, 1);

        let effect = game.answer(1, false, 10);
        assert!(effect.game_over);
        assert!(game.is_game_over());
        assert_eq!(game.answer(2, true, 10), AnswerEffect::default());
    }

    #[test]
    fn test_game_correct_answers_score_once() {
        let mut game = GameProgress::new(Difficulty::Medium, 2, 3, 0);
        assert!(game.answer(0, true, 10).newly_completed);
        assert!(!game.answer(0, true, 10).newly_completed);
        assert_eq!(game.score, 10);
        assert!(game.is_resumable(Difficulty::Medium));
        assert!(!game.is_resumable(Difficulty::Hard));

        let effect = game.answer(1, true, 10);
        assert!(effect.run_finished);
        assert!(!effect.game_over);
        assert_eq!(game.current_level, 1);
        assert_eq!(game.correct_count(), 2);
        assert!(game.finished);
        assert_eq!(game.answer(1, true, 10), AnswerEffect::default());
        assert!(!game.use_hint());
    }

    #[test]
    fn test_exercise_correct_count_ignores_removed_content() {
        let mut exercises = ExerciseProgress::new(5);
        for i in 0..5 {
            exercises.complete(i);
        }
        exercises.resume(3);
        assert_eq!(exercises.correct_count(), 3);
        assert_eq!(exercises.current_exercise, 2);
    }

    #[test]
    fn test_retry_keeps_rewarded_exercises() {
        let mut exercises = ExerciseProgress::new(2);
        assert!(exercises.complete(0));
        assert!(!exercises.complete(0));

        exercises.reset();
        assert!(exercises.completed_exercises.is_empty());
        assert_eq!(exercises.current_exercise, 0);
        assert!(!exercises.complete(0));
        assert!(exercises.complete(1));
        assert_eq!(exercises.correct_count(), 2);
    }

    #[test]
    fn test_restart_keeps_rewarded_levels() {
        let mut game = GameProgress::new(Difficulty::Easy, 2, 3, 3);
        assert!(game.answer(0, true, 10).first_completion);

        game.restart(Difficulty::Easy, 2, 3, 3);
        assert_eq!(game.score, 0);
        assert!(game.completed_levels.is_empty());
        let effect = game.answer(0, true, 10);
        assert!(effect.newly_completed);
        assert!(!effect.first_completion);
        assert_eq!(game.score, 10);

        // Tiers are tracked separately
        game.restart(Difficulty::Hard, 2, 3, 3);
        assert!(game.answer(0, true, 10).first_completion);
    }

    #[test]
    fn test_exercises_completed_ignores_removed_content() {
        let mut record = LanguageProgressRecord::default();
        let sandbox = record.sandbox_mut(Difficulty::Easy, 4);
        for i in 0..4 {
            sandbox.complete(i);
        }
        sandbox.resume(2);
        assert_eq!(record.exercises_completed(), 2);
    }

    #[test]
    fn test_mark_mastered_is_idempotent() {
        let mut record = LanguageProgressRecord::default();
        assert!(record.mark_mastered(ActivityKind::Sandbox, Difficulty::Easy));
        assert!(!record.mark_mastered(ActivityKind::Sandbox, Difficulty::Easy));
        assert!(record.has_mastered(ActivityKind::Sandbox, Difficulty::Easy));
        assert!(!record.has_mastered(ActivityKind::Game, Difficulty::Easy));
        assert!(!record.has_mastered_all(ActivityKind::Sandbox));
    }

    #[test]
    fn test_record_json_roundtrip_with_enum_keys() {
        let mut record = LanguageProgressRecord::default();
        record.mark_mastered(ActivityKind::Game, Difficulty::Hard);
        record.sandbox_mut(Difficulty::Medium, 4).complete(0);

        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("\"game\":[\"hard\"]"));

        let back: LanguageProgressRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, record);
    }
}
