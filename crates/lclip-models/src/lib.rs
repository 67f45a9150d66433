//! Shared data models for the LangClip composition engine.
//!
//! This crate provides Serde-serializable types for:
//! - Subtitle entries, time ranges and timestamp parsing
//! - Expression records and multi-language dialogue
//! - Alignment results
//! - Audio timeline specifications
//! - Composition jobs, overlays and output formats
//! - Job identity, stages and status records

pub mod composition;
pub mod encoding;
pub mod expression;
pub mod job;
pub mod matching;
pub mod overlay;
pub mod subtitle;
pub mod timeline;
pub mod timestamp;

// Re-export common types
pub use composition::{
    CompositionJob, CropRect, FontSpec, OutputFormat, OutputTarget, OverlayItem, OverlayPosition,
    OverlayRole,
};
pub use encoding::EncodingConfig;
pub use expression::{Dialogue, ExpressionRecord};
pub use job::{
    Artifact, FailureKind, JobId, JobOutcome, JobStatusRecord, MediaStage, PipelineStage,
};
pub use matching::{DialogueRange, MatchResult, MatchStrategy, ResolvedTiming};
pub use overlay::{OverlayConfig, OverlayConfigError, RoleStyle};
pub use subtitle::{SubtitleEntry, SubtitleError, SubtitleTrack, TimeRange};
pub use timeline::{
    AudioSegment, AudioSegmentSpec, AudioTimeline, SpeechSourceKind, TimelineLayout,
};
pub use timestamp::{format_ms, parse_timestamp_ms, TimestampError};
