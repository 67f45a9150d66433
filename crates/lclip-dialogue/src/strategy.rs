//! The four scoring strategies.
//!
//! Each strategy scores a query against the text of one candidate window and
//! returns a value in [0, 1]. Acceptance is decided elsewhere, against one
//! threshold shared by all strategies.

use lclip_models::MatchStrategy;

use crate::similarity::similarity;
use crate::text::{fold, normalize, tokens};

/// Confidence reported for a raw case-folded substring hit.
pub const EXACT_SUBSTRING_SCORE: f64 = 1.0;

/// Confidence reported for a token-boundary hit after normalization.
pub const NORMALIZED_EXACT_SCORE: f64 = 0.98;

/// Two tokens are treated as the same word at or above this similarity.
pub const TOKEN_EQUIVALENCE: f64 = 0.8;

/// Text prepared once per side of the comparison.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedText {
    pub folded: String,
    pub normalized: String,
    pub tokens: Vec<String>,
}

impl PreparedText {
    pub fn new(text: &str) -> Self {
        let normalized = normalize(text);
        Self {
            folded: fold(text),
            tokens: tokens(&normalized),
            normalized,
        }
    }

    /// Join already cleaned lines into one comparable text.
    pub fn joined<'a>(lines: impl IntoIterator<Item = &'a str>) -> Self {
        let text = lines.into_iter().collect::<Vec<_>>().join(" ");
        Self::new(&text)
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

/// Score `query` against `window` with one strategy.
pub fn score(strategy: MatchStrategy, query: &PreparedText, window: &PreparedText) -> f64 {
    if query.is_empty() || window.is_empty() {
        return 0.0;
    }
    let score = match strategy {
        MatchStrategy::ExactSubstring => exact_substring(query, window),
        MatchStrategy::NormalizedExact => normalized_exact(query, window),
        MatchStrategy::TokenOverlap => token_overlap(query, window),
        MatchStrategy::SlidingWindow => sliding_window(query, window),
    };
    score.clamp(0.0, 1.0)
}

fn exact_substring(query: &PreparedText, window: &PreparedText) -> f64 {
    if contains_at_word_boundary(&window.folded, &query.folded) {
        EXACT_SUBSTRING_SCORE
    } else {
        0.0
    }
}

/// Whether `needle` occurs in `haystack` without splitting a word on either side.
fn contains_at_word_boundary(haystack: &str, needle: &str) -> bool {
    if needle.is_empty() {
        return false;
    }
    haystack.match_indices(needle).any(|(at, _)| {
        let before = haystack[..at].chars().next_back();
        let after = haystack[at + needle.len()..].chars().next();
        !before.is_some_and(char::is_alphanumeric) && !after.is_some_and(char::is_alphanumeric)
    })
}

fn normalized_exact(query: &PreparedText, window: &PreparedText) -> f64 {
    let haystack = format!(" {} ", window.normalized);
    let needle = format!(" {} ", query.normalized);
    if haystack.contains(&needle) {
        NORMALIZED_EXACT_SCORE
    } else {
        0.0
    }
}

/// Longest in-order run of equivalent tokens, as a fraction of the query.
fn token_overlap(query: &PreparedText, window: &PreparedText) -> f64 {
    let q = &query.tokens;
    let w = &window.tokens;
    let mut prev = vec![0usize; w.len() + 1];
    let mut curr = vec![0usize; w.len() + 1];

    for qi in q {
        for (j, wj) in w.iter().enumerate() {
            curr[j + 1] = if tokens_equivalent(qi, wj) {
                prev[j] + 1
            } else {
                prev[j + 1].max(curr[j])
            };
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[w.len()] as f64 / q.len() as f64
}

/// Best character similarity between the query and any token-aligned span of
/// the window whose length is within one token of the query's.
fn sliding_window(query: &PreparedText, window: &PreparedText) -> f64 {
    let n = query.tokens.len();
    let w = &window.tokens;
    let min_span = n.saturating_sub(1).max(1);

    if w.len() < min_span {
        return similarity(&query.normalized, &window.normalized);
    }

    let mut best: f64 = 0.0;
    for span in min_span..=(n + 1).min(w.len()) {
        for start in 0..=(w.len() - span) {
            let candidate = w[start..start + span].join(" ");
            best = best.max(similarity(&query.normalized, &candidate));
            if best >= 1.0 {
                return best;
            }
        }
    }
    best
}

fn tokens_equivalent(a: &str, b: &str) -> bool {
    a == b || similarity(a, b) >= TOKEN_EQUIVALENCE
}
