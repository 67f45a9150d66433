//! Matching outcomes that are not a `MatchResult`.

use lclip_models::{MatchStrategy, TimestampError};
use thiserror::Error;

/// Best score fell below the threshold.
///
/// Recoverable: callers fall back to the record's timing hints.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("No dialogue match (best score {best_score:.3}, threshold {threshold:.2})")]
pub struct NoMatch {
    pub best_score: f64,
    pub best_strategy: Option<MatchStrategy>,
    pub threshold: f64,
}

/// Failure to resolve clip timing at all.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum MatchError {
    #[error("{0}; no timing hints to fall back on")]
    NoMatch(NoMatch),

    #[error("Expression text is empty after normalization")]
    EmptyExpression,

    #[error("Invalid timing hint: {0}")]
    InvalidHint(#[from] TimestampError),
}

pub type MatchOutcome<T> = Result<T, MatchError>;
