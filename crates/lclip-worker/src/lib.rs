//! Expression clip pipeline coordination.
//!
//! This crate provides:
//! - Pipeline configuration from the environment
//! - The per-expression coordinator state machine
//! - A bounded concurrent job executor per episode
//! - Narration and overlay planning collaborators
//! - Structured job logging and metrics

pub mod config;
pub mod coordinator;
pub mod error;
pub mod executor;
pub mod logging;
pub mod metrics;
pub mod narration;
pub mod overlays;

pub use config::PipelineConfig;
pub use coordinator::{ExpressionJob, PipelineCoordinator};
pub use error::{PipelineError, PipelineResult};
pub use executor::{EpisodeManifest, JobExecutor};
pub use logging::JobLogger;
pub use narration::{CommandNarration, DisabledNarration, NarrationSource};
