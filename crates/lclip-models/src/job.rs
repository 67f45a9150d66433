//! Job identity, pipeline stages and the per-job status record.

use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::composition::OutputFormat;

/// Deterministic identifier for one (episode, expression) pair.
///
/// Re-invoking the same pair yields the same id and therefore the same output
/// paths, which makes external retries safe.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    /// Derive the id from the episode path and the expression text.
    pub fn derive(episode: &Path, expression: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(episode.to_string_lossy().as_bytes());
        hasher.update([0u8]);
        hasher.update(expression.trim().to_lowercase().as_bytes());
        let digest = hasher.finalize();
        let hex: String = digest.iter().take(8).map(|b| format!("{:02x}", b)).collect();
        Self(hex)
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Coordinator state machine:
/// `received -> matched -> timeline_built -> composed -> finalized`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    #[default]
    Received,
    Matched,
    TimelineBuilt,
    Composed,
    Finalized,
}

impl PipelineStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineStage::Received => "received",
            PipelineStage::Matched => "matched",
            PipelineStage::TimelineBuilt => "timeline_built",
            PipelineStage::Composed => "composed",
            PipelineStage::Finalized => "finalized",
        }
    }

    /// The stage a successful transition from `self` leads to.
    pub fn next(&self) -> Option<PipelineStage> {
        match self {
            PipelineStage::Received => Some(PipelineStage::Matched),
            PipelineStage::Matched => Some(PipelineStage::TimelineBuilt),
            PipelineStage::TimelineBuilt => Some(PipelineStage::Composed),
            PipelineStage::Composed => Some(PipelineStage::Finalized),
            PipelineStage::Finalized => None,
        }
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Individual media-engine step, reported with failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum MediaStage {
    Probe,
    Narration,
    AudioExtract,
    Timeline,
    Detect,
    Extract,
    Loop,
    Concat,
    Overlay,
    Finalize,
}

impl MediaStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaStage::Probe => "probe",
            MediaStage::Narration => "narration",
            MediaStage::AudioExtract => "audio_extract",
            MediaStage::Timeline => "timeline",
            MediaStage::Detect => "detect",
            MediaStage::Extract => "extract",
            MediaStage::Loop => "loop",
            MediaStage::Concat => "concat",
            MediaStage::Overlay => "overlay",
            MediaStage::Finalize => "finalize",
        }
    }

    /// Stages owned by clip composition.
    pub fn is_composition(&self) -> bool {
        matches!(
            self,
            MediaStage::Detect
                | MediaStage::Extract
                | MediaStage::Loop
                | MediaStage::Concat
                | MediaStage::Overlay
                | MediaStage::Finalize
        )
    }
}

impl fmt::Display for MediaStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure taxonomy surfaced to the job-queue collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Alignment failed and no usable timing hints exist
    NoMatch,
    /// Media could not be probed or read
    MediaUnreadable,
    /// An engine subprocess or filter failed
    CompositionStage,
    /// An engine subprocess exceeded its timeout
    Timeout,
    /// Cancelled between stages
    Cancelled,
    /// Malformed inputs
    InvalidInput,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::NoMatch => "no_match",
            FailureKind::MediaUnreadable => "media_unreadable",
            FailureKind::CompositionStage => "composition_stage",
            FailureKind::Timeout => "timeout",
            FailureKind::Cancelled => "cancelled",
            FailureKind::InvalidInput => "invalid_input",
        }
    }

    /// Whether an external retry of the same job may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FailureKind::CompositionStage | FailureKind::Timeout | FailureKind::Cancelled
        )
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal outcome of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum JobOutcome {
    Success,
    Failure,
}

/// Final artifact written by a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Artifact {
    pub format: OutputFormat,
    pub path: PathBuf,
}

/// Status record consumed by the job-queue/API collaborator.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct JobStatusRecord {
    pub job_id: JobId,
    /// Last stage completed successfully
    pub stage_reached: PipelineStage,
    pub outcome: JobOutcome,
    /// Stage that was being attempted when the job failed
    pub failed_stage: Option<PipelineStage>,
    pub failure_kind: Option<FailureKind>,
    /// Engine step that failed, when known
    pub media_stage: Option<MediaStage>,
    pub error_message: Option<String>,
    pub artifacts: Vec<Artifact>,
    /// Non-fatal degradations (fallbacks taken)
    pub degradations: Vec<String>,
    /// Paths that could not be removed during cleanup
    pub cleanup_warnings: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl JobStatusRecord {
    /// Start a record for a freshly received job.
    pub fn received(job_id: JobId) -> Self {
        let now = Utc::now();
        Self {
            job_id,
            stage_reached: PipelineStage::Received,
            outcome: JobOutcome::Failure,
            failed_stage: None,
            failure_kind: None,
            media_stage: None,
            error_message: None,
            artifacts: Vec::new(),
            degradations: Vec::new(),
            cleanup_warnings: Vec::new(),
            started_at: now,
            finished_at: now,
        }
    }

    /// Record a successful transition.
    pub fn advance(&mut self, stage: PipelineStage) {
        self.stage_reached = stage;
    }

    /// Mark the job finalized with its artifacts.
    pub fn succeed(&mut self, artifacts: Vec<Artifact>) {
        self.stage_reached = PipelineStage::Finalized;
        self.outcome = JobOutcome::Success;
        self.artifacts = artifacts;
        self.finished_at = Utc::now();
    }

    /// Mark the job failed while attempting the stage after `stage_reached`.
    pub fn fail(
        &mut self,
        kind: FailureKind,
        media_stage: Option<MediaStage>,
        message: impl Into<String>,
    ) {
        self.outcome = JobOutcome::Failure;
        self.failed_stage = self.stage_reached.next();
        self.failure_kind = Some(kind);
        self.media_stage = media_stage;
        self.error_message = Some(message.into());
        self.artifacts.clear();
        self.finished_at = Utc::now();
    }

    pub fn is_success(&self) -> bool {
        self.outcome == JobOutcome::Success
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_id_is_deterministic() {
        let a = JobId::derive(Path::new("/media/s01e02.mkv"), "Cut him loose");
        let b = JobId::derive(Path::new("/media/s01e02.mkv"), " cut him loose ");
        let c = JobId::derive(Path::new("/media/s01e03.mkv"), "cut him loose");

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.as_str().len(), 16);
    }

    #[test]
    fn test_stage_order() {
        assert!(PipelineStage::Received < PipelineStage::Finalized);
        assert_eq!(PipelineStage::Matched.next(), Some(PipelineStage::TimelineBuilt));
        assert_eq!(PipelineStage::Finalized.next(), None);
    }

    #[test]
    fn test_status_record_failure_reports_attempted_stage() {
        let mut record = JobStatusRecord::received(JobId::from_string("job-1"));
        record.advance(PipelineStage::Matched);
        record.advance(PipelineStage::TimelineBuilt);
        record.fail(FailureKind::Timeout, Some(MediaStage::Overlay), "timed out");

        assert_eq!(record.stage_reached, PipelineStage::TimelineBuilt);
        assert_eq!(record.failed_stage, Some(PipelineStage::Composed));
        assert_eq!(record.failure_kind, Some(FailureKind::Timeout));
        assert!(!record.is_success());

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["failure_kind"], "timeout");
        assert_eq!(json["media_stage"], "overlay");
    }

    #[test]
    fn test_status_record_success() {
        let mut record = JobStatusRecord::received(JobId::from_string("job-2"));
        record.succeed(vec![Artifact {
            format: OutputFormat::LongForm,
            path: PathBuf::from("/out/a.mp4"),
        }]);
        assert!(record.is_success());
        assert_eq!(record.stage_reached, PipelineStage::Finalized);
        assert!(record.failed_stage.is_none());
    }

    #[test]
    fn test_failure_kind_retryability() {
        assert!(FailureKind::Timeout.is_retryable());
        assert!(!FailureKind::MediaUnreadable.is_retryable());
    }
}
