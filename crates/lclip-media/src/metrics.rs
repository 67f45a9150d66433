//! Metrics emitted by the media layer.
//!
//! Only the `metrics` facade is used here; installing a recorder is left to
//! the binary.

use std::time::Duration;

use lclip_models::MediaStage;
use metrics::{counter, histogram};

/// Metric names as constants for consistency.
pub mod names {
    pub const ENGINE_INVOCATION_SECONDS: &str = "lclip_engine_invocation_seconds";
    pub const ENGINE_INVOCATIONS_TOTAL: &str = "lclip_engine_invocations_total";
    pub const PROBE_CACHE_HITS: &str = "lclip_probe_cache_hits_total";
    pub const PROBE_CACHE_MISSES: &str = "lclip_probe_cache_misses_total";
    pub const CLEANUP_FAILURES: &str = "lclip_cleanup_failures_total";
}

/// Record one engine invocation.
pub fn record_engine_invocation(stage: MediaStage, outcome: &str, elapsed: Duration) {
    let labels = [
        ("stage", stage.as_str().to_string()),
        ("outcome", outcome.to_string()),
    ];
    counter!(names::ENGINE_INVOCATIONS_TOTAL, &labels).increment(1);
    histogram!(names::ENGINE_INVOCATION_SECONDS, &labels).record(elapsed.as_secs_f64());
}

pub fn record_probe_cache(hit: bool) {
    if hit {
        counter!(names::PROBE_CACHE_HITS).increment(1);
    } else {
        counter!(names::PROBE_CACHE_MISSES).increment(1);
    }
}

pub fn record_cleanup_failures(count: usize) {
    if count > 0 {
        counter!(names::CLEANUP_FAILURES).increment(count as u64);
    }
}
