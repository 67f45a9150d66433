//! Error types for media operations.

use std::path::PathBuf;

use lclip_models::MediaStage;
use thiserror::Error;

/// Result type for media operations.
pub type MediaResult<T> = Result<T, MediaError>;

/// Errors that can occur while driving the media engine.
#[derive(Debug, Error)]
pub enum MediaError {
    #[error("FFmpeg not found in PATH")]
    FfmpegNotFound,

    #[error("FFprobe not found in PATH")]
    FfprobeNotFound,

    #[error("Media unreadable: {path}: {reason}")]
    MediaUnreadable { path: PathBuf, reason: String },

    #[error("{stage} stage failed: {message}")]
    StageFailed {
        stage: MediaStage,
        message: String,
        stderr: Option<String>,
        exit_code: Option<i32>,
    },

    #[error("{stage} stage timed out after {secs} seconds")]
    Timeout { stage: MediaStage, secs: u64 },

    #[error("{stage} output duration {actual_secs:.3}s differs from expected {expected_secs:.3}s")]
    DurationMismatch {
        stage: MediaStage,
        expected_secs: f64,
        actual_secs: f64,
    },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),
}

impl MediaError {
    pub fn unreadable(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::MediaUnreadable {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn stage_failed(stage: MediaStage, message: impl Into<String>) -> Self {
        Self::StageFailed {
            stage,
            message: message.into(),
            stderr: None,
            exit_code: None,
        }
    }

    /// Engine exited unsuccessfully.
    pub fn engine_failed(
        stage: MediaStage,
        message: impl Into<String>,
        stderr: Option<String>,
        exit_code: Option<i32>,
    ) -> Self {
        Self::StageFailed {
            stage,
            message: message.into(),
            stderr,
            exit_code,
        }
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }

    /// Stage the error is attributed to, when known.
    pub fn stage(&self) -> Option<MediaStage> {
        match self {
            MediaError::StageFailed { stage, .. }
            | MediaError::Timeout { stage, .. }
            | MediaError::DurationMismatch { stage, .. } => Some(*stage),
            MediaError::MediaUnreadable { .. } => Some(MediaStage::Probe),
            _ => None,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, MediaError::Timeout { .. })
    }

    /// Re-attribute stage-less failures to `stage`.
    pub fn in_stage(self, stage: MediaStage) -> Self {
        match self {
            MediaError::Io(e) => MediaError::stage_failed(stage, e.to_string()),
            other => other,
        }
    }
}
