#![deny(unreachable_patterns)]
//! FFmpeg orchestration for expression clips.
//!
//! This crate provides:
//! - Type-safe FFmpeg command building and a pluggable engine seam
//! - Cached media probing
//! - Audio timeline assembly with narration/original/silence fallback
//! - Clip composition: extract, loop, concatenate, overlay, promote
//! - Per-job ownership and cleanup of intermediate files

pub mod clip;
pub mod command;
pub mod composer;
pub mod concat;
pub mod engine;
pub mod error;
pub mod filters;
pub mod fs_utils;
pub mod letterbox;
pub mod metrics;
pub mod overlay;
pub mod probe;
pub mod progress;
pub mod resources;
pub mod timeline;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use command::{FfmpegCommand, FfmpegInput};
pub use composer::{ClipComposer, ComposedOutput, ComposerConfig};
pub use engine::{BoundedEngine, EngineContext, EngineInvocation, EngineOutput, FfmpegEngine, MediaEngine};
pub use error::{MediaError, MediaResult};
pub use probe::{MediaInfo, MediaProbe};
pub use resources::{CleanupPolicy, CleanupReport, JobResourceState, JobResources, ResourceManager, TrackedFile};
pub use timeline::{AudioTimelineBuilder, TimelineConfig, TimelineRequest};
