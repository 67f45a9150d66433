//! Dialogue alignment results.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::subtitle::TimeRange;

/// Default acceptance threshold shared by every matching strategy.
pub const DEFAULT_MATCH_THRESHOLD: f64 = 0.65;

/// Strategy that produced a candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum MatchStrategy {
    /// Case-folded substring of the raw subtitle text
    ExactSubstring,
    /// Substring after full punctuation/whitespace normalization
    NormalizedExact,
    /// In-order fuzzy token overlap
    TokenOverlap,
    /// Character-level similarity over token-aligned windows
    SlidingWindow,
}

impl MatchStrategy {
    pub const ALL: [MatchStrategy; 4] = [
        MatchStrategy::ExactSubstring,
        MatchStrategy::NormalizedExact,
        MatchStrategy::TokenOverlap,
        MatchStrategy::SlidingWindow,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MatchStrategy::ExactSubstring => "exact_substring",
            MatchStrategy::NormalizedExact => "normalized_exact",
            MatchStrategy::TokenOverlap => "token_overlap",
            MatchStrategy::SlidingWindow => "sliding_window",
        }
    }
}

impl std::fmt::Display for MatchStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Inclusive index range into the episode's subtitle collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub struct DialogueRange {
    pub first: usize,
    pub last: usize,
}

impl DialogueRange {
    pub fn new(first: usize, last: usize) -> Self {
        Self {
            first: first.min(last),
            last: first.max(last),
        }
    }

    #[allow(clippy::len_without_is_empty)]
    pub fn len(&self) -> usize {
        self.last - self.first + 1
    }

    pub fn contains(&self, index: usize) -> bool {
        (self.first..=self.last).contains(&index)
    }
}

/// Accepted alignment of an expression to subtitle entries.
///
/// Only constructed when `score >= threshold`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct MatchResult {
    /// Entries containing the expression
    pub range: DialogueRange,
    /// Time covered by `range`
    pub time: TimeRange,
    /// Entries used for the long-form context clip
    pub context: DialogueRange,
    /// Time covered by `context`
    pub context_time: TimeRange,
    /// Confidence in [0, 1]
    pub score: f64,
    /// Winning strategy
    pub strategy: MatchStrategy,
}

/// Where the clip timing came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum ResolvedTiming {
    /// Dialogue alignment succeeded
    Matched(MatchResult),
    /// Alignment failed; raw hints from the expression record are used
    HintFallback {
        expression: TimeRange,
        context: TimeRange,
        best_score: f64,
    },
}

impl ResolvedTiming {
    /// Time range of the expression itself.
    pub fn expression_time(&self) -> TimeRange {
        match self {
            ResolvedTiming::Matched(m) => m.time,
            ResolvedTiming::HintFallback { expression, .. } => *expression,
        }
    }

    /// Time range of the surrounding context.
    pub fn context_time(&self) -> TimeRange {
        match self {
            ResolvedTiming::Matched(m) => m.context_time,
            ResolvedTiming::HintFallback { context, .. } => *context,
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, ResolvedTiming::HintFallback { .. })
    }
}
