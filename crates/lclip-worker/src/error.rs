//! Pipeline error types.

use lclip_dialogue::MatchError;
use lclip_media::MediaError;
use lclip_models::{FailureKind, MediaStage, PipelineStage};
use thiserror::Error;

pub type PipelineResult<T> = Result<T, PipelineError>;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Dialogue alignment failed: {0}")]
    Match(#[from] MatchError),

    #[error("Media error: {0}")]
    Media(#[from] MediaError),

    #[error("Job cancelled before {0}")]
    Cancelled(PipelineStage),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl PipelineError {
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    /// Classify into the status-record taxonomy.
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            PipelineError::Match(MatchError::NoMatch(_)) => FailureKind::NoMatch,
            PipelineError::Match(_) => FailureKind::InvalidInput,
            PipelineError::Media(e) => match e {
                MediaError::MediaUnreadable { .. } | MediaError::JsonParse(_) => {
                    FailureKind::MediaUnreadable
                }
                MediaError::Timeout { .. } => FailureKind::Timeout,
                MediaError::Cancelled => FailureKind::Cancelled,
                MediaError::InvalidInput(_) => FailureKind::InvalidInput,
                MediaError::StageFailed { .. }
                | MediaError::DurationMismatch { .. }
                | MediaError::FfmpegNotFound
                | MediaError::FfprobeNotFound
                | MediaError::Io(_) => FailureKind::CompositionStage,
            },
            PipelineError::Cancelled(_) => FailureKind::Cancelled,
            PipelineError::InvalidInput(_) | PipelineError::ConfigError(_) => {
                FailureKind::InvalidInput
            }
            PipelineError::Io(_) => FailureKind::CompositionStage,
        }
    }

    /// Engine step the error is attributed to, when known.
    pub fn media_stage(&self) -> Option<MediaStage> {
        match self {
            PipelineError::Media(e) => e.stage(),
            _ => None,
        }
    }

    /// Check if an external retry of the same job may succeed.
    pub fn is_retryable(&self) -> bool {
        self.failure_kind().is_retryable()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lclip_dialogue::NoMatch;

    #[test]
    fn test_timeout_is_retryable() {
        let err = PipelineError::from(MediaError::Timeout {
            stage: MediaStage::Concat,
            secs: 600,
        });
        assert_eq!(err.failure_kind(), FailureKind::Timeout);
        assert_eq!(err.media_stage(), Some(MediaStage::Concat));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_unreadable_media_is_not_retryable() {
        let err = PipelineError::from(MediaError::unreadable("/media/missing.mkv", "no such file"));
        assert_eq!(err.failure_kind(), FailureKind::MediaUnreadable);
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_no_match_without_hints() {
        let err = PipelineError::from(MatchError::NoMatch(NoMatch {
            best_score: 0.2,
            best_strategy: None,
            threshold: 0.65,
        }));
        assert_eq!(err.failure_kind(), FailureKind::NoMatch);
        assert_eq!(err.media_stage(), None);
    }

    #[test]
    fn test_cancelled_message_names_stage() {
        let err = PipelineError::Cancelled(PipelineStage::Composed);
        assert_eq!(err.failure_kind(), FailureKind::Cancelled);
        assert_eq!(err.to_string(), "Job cancelled before composed");
    }
}
