//! Structured logging for expression jobs.
//!
//! Jobs of one episode run concurrently, so every event carries the job id
//! and the expression it is cutting.

use std::path::Path;
use std::time::Duration;

use lclip_models::{FailureKind, JobId, PipelineStage};
use tracing::{error, info, warn, Span};

/// Lifecycle logger for one expression job.
#[derive(Debug, Clone)]
pub struct JobLogger {
    job_id: String,
    expression: String,
}

impl JobLogger {
    pub fn new(job_id: &JobId, expression: &str) -> Self {
        Self {
            job_id: job_id.to_string(),
            expression: expression.trim().to_string(),
        }
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// Span every engine invocation of the job runs under.
    pub fn create_span(&self) -> Span {
        tracing::info_span!(
            "expression_job",
            job_id = %self.job_id,
            expression = %self.expression
        )
    }

    pub fn log_start(&self, episode: &Path) {
        info!(
            job_id = %self.job_id,
            expression = %self.expression,
            episode = %episode.display(),
            "Job started"
        );
    }

    /// A completed state transition.
    pub fn log_stage(&self, stage: PipelineStage, detail: &str) {
        info!(
            job_id = %self.job_id,
            stage = %stage,
            "Job reached {}: {}", stage, detail
        );
    }

    pub fn log_progress(&self, message: &str) {
        info!(job_id = %self.job_id, "Job progress: {}", message);
    }

    /// Output will be produced, but with less than was asked for.
    pub fn log_degradation(&self, kind: &str, detail: &str) {
        warn!(
            job_id = %self.job_id,
            degradation = kind,
            "Job degraded: {}", detail
        );
    }

    pub fn log_warning(&self, message: &str) {
        warn!(job_id = %self.job_id, "Job warning: {}", message);
    }

    pub fn log_failure(&self, stage: Option<PipelineStage>, kind: FailureKind, message: &str) {
        error!(
            job_id = %self.job_id,
            expression = %self.expression,
            failed_stage = stage.map_or("unknown", |s| s.as_str()),
            failure_kind = %kind,
            "Job failed: {}", message
        );
    }

    pub fn log_completion(&self, artifacts: usize, elapsed: Duration) {
        info!(
            job_id = %self.job_id,
            expression = %self.expression,
            artifacts,
            duration_ms = elapsed.as_millis() as u64,
            "Job completed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_logger_carries_job_identity() {
        let job_id = JobId::derive(Path::new("/media/s01e01.mkv"), "cut him loose");
        let logger = JobLogger::new(&job_id, "  cut him loose ");

        assert_eq!(logger.job_id(), job_id.as_str());
        assert_eq!(logger.expression(), "cut him loose");
    }
}
