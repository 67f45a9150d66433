//! Pipeline metrics.

use std::net::SocketAddr;
use std::time::Duration;

use lclip_models::{FailureKind, MatchStrategy, PipelineStage};
use metrics::{counter, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::error::{PipelineError, PipelineResult};

/// Metric names as constants for consistency.
pub mod names {
    pub const JOBS_COMPLETED_TOTAL: &str = "lclip_jobs_completed_total";
    pub const JOBS_FAILED_TOTAL: &str = "lclip_jobs_failed_total";
    pub const JOB_DURATION_SECONDS: &str = "lclip_job_duration_seconds";
    pub const MATCH_STRATEGY_WINS: &str = "lclip_match_strategy_wins_total";
    pub const DEGRADATIONS_TOTAL: &str = "lclip_degradations_total";
}

/// Serve Prometheus metrics on `addr`.
pub fn install_prometheus(addr: SocketAddr) -> PipelineResult<()> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| PipelineError::config_error(format!("metrics exporter: {}", e)))
}

pub fn record_job_completed(elapsed: Duration) {
    counter!(names::JOBS_COMPLETED_TOTAL).increment(1);
    histogram!(names::JOB_DURATION_SECONDS, "outcome" => "success").record(elapsed.as_secs_f64());
}

pub fn record_job_failed(stage: Option<PipelineStage>, kind: FailureKind, elapsed: Duration) {
    let labels = [
        ("stage", stage.map_or("unknown", |s| s.as_str()).to_string()),
        ("kind", kind.as_str().to_string()),
    ];
    counter!(names::JOBS_FAILED_TOTAL, &labels).increment(1);
    histogram!(names::JOB_DURATION_SECONDS, "outcome" => "failure").record(elapsed.as_secs_f64());
}

pub fn record_match_strategy(strategy: MatchStrategy) {
    counter!(names::MATCH_STRATEGY_WINS, "strategy" => strategy.as_str()).increment(1);
}

/// Count a fallback taken instead of the preferred path.
pub fn record_degradation(kind: &'static str) {
    counter!(names::DEGRADATIONS_TOTAL, "kind" => kind).increment(1);
}
