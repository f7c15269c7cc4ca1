//! Code Submission Matching
//!
//! Compares a learner's free-text submission against a reference solution.
//!
//! Both strings are whitespace-normalized, then scored by normalized edit
//! distance:
//!
//! ```text
//! similarity = (max(len_a, len_b) - distance) / max(len_a, len_b)
//! ```
//!
//! A submission is accepted when the similarity exceeds the threshold, or
//! when the normalized reference appears verbatim inside the normalized
//! submission (extra code around a correct core).

use serde::{Deserialize, Serialize};

/// Collapse whitespace runs to a single space and trim both ends
pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Levenshtein distance over chars (unit cost insert / delete / substitute)
pub fn edit_distance(a: &str, b: &str) -> usize {
    let a_chars: Vec<char> = a.chars().collect();
    let b_chars: Vec<char> = b.chars().collect();
    let a_len = a_chars.len();
    let b_len = b_chars.len();

    if a_len == 0 {
        return b_len;
    }
    if b_len == 0 {
        return a_len;
    }

    // Two rolling rows of the matrix
    let mut previous: Vec<usize> = (0..=b_len).collect();
    let mut current = vec![0usize; b_len + 1];

    for i in 1..=a_len {
        current[0] = i;
        for j in 1..=b_len {
            let cost = usize::from(a_chars[i - 1] != b_chars[j - 1]);
            current[j] = (previous[j] + 1)
                .min(current[j - 1] + 1)
                .min(previous[j - 1] + cost);
        }
        std::mem::swap(&mut previous, &mut current);
    }

    previous[b_len]
}

/// Normalized similarity in `[0, 1]`; two empty strings are identical
pub fn similarity(a: &str, b: &str) -> f64 {
    let a = normalize_whitespace(a);
    let b = normalize_whitespace(b);
    normalized_similarity(&a, &b)
}

fn normalized_similarity(a: &str, b: &str) -> f64 {
    let max_len = a.chars().count().max(b.chars().count());
    if max_len == 0 {
        return 1.0;
    }
    let distance = edit_distance(a, b);
    (max_len - distance) as f64 / max_len as f64
}

/// Which rule accepted a submission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchKind {
    /// Similarity above the threshold
    Similarity,
    /// Reference found inside the submission
    Containment,
    /// Not accepted
    None,
}

/// Outcome of matching one submission
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MatchVerdict {
    pub similarity: f64,
    pub accepted: bool,
    pub matched_by: MatchKind,
}

/// Threshold-based submission matcher
#[derive(Debug, Clone)]
pub struct SimilarityMatcher {
    threshold: f64,
}

impl Default for SimilarityMatcher {
    fn default() -> Self {
        Self::new(codequest_common::SIMILARITY_ACCEPT_THRESHOLD)
    }
}

impl SimilarityMatcher {
    pub fn new(threshold: f64) -> Self {
        Self {
            threshold: threshold.clamp(0.0, 1.0),
        }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Score a submission against the reference solution
    pub fn check(&self, submission: &str, reference: &str) -> MatchVerdict {
        let submission = normalize_whitespace(submission);
        let reference = normalize_whitespace(reference);
        let score = normalized_similarity(&submission, &reference);

        // An empty needle is contained in everything; it must not count.
        let contained = !reference.is_empty() && submission.contains(&reference);

        let matched_by = if score > self.threshold {
            MatchKind::Similarity
        } else if contained {
            MatchKind::Containment
        } else {
            MatchKind::None
        };

        MatchVerdict {
            similarity: score,
            accepted: matched_by != MatchKind::None,
            matched_by,
        }
    }
}
