//! Composition job description.

use std::path::PathBuf;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::subtitle::TimeRange;
use crate::timeline::AudioTimeline;

/// Default short-form canvas (portrait 9:16).
pub const SHORT_FORM_WIDTH: u32 = 1080;
pub const SHORT_FORM_HEIGHT: u32 = 1920;

/// Output layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OutputFormat {
    /// Landscape output at source resolution
    LongForm,
    /// Source scaled and padded (never cropped) into a fixed canvas
    ShortForm { width: u32, height: u32 },
}

impl OutputFormat {
    pub fn short_form() -> Self {
        OutputFormat::ShortForm {
            width: SHORT_FORM_WIDTH,
            height: SHORT_FORM_HEIGHT,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OutputFormat::LongForm => "long",
            OutputFormat::ShortForm { .. } => "short",
        }
    }

    /// Fixed canvas size, if this format has one.
    pub fn canvas(&self) -> Option<(u32, u32)> {
        match self {
            OutputFormat::LongForm => None,
            OutputFormat::ShortForm { width, height } => Some((*width, *height)),
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputFormat::LongForm => write!(f, "long-form"),
            OutputFormat::ShortForm { width, height } => {
                write!(f, "short-form {}x{}", width, height)
            }
        }
    }
}

/// Text role, used to pick font size and default placement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum OverlayRole {
    Title,
    Expression,
    Translation,
    Keyword,
    Dialogue,
}

impl OverlayRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            OverlayRole::Title => "title",
            OverlayRole::Expression => "expression",
            OverlayRole::Translation => "translation",
            OverlayRole::Keyword => "keyword",
            OverlayRole::Dialogue => "dialogue",
        }
    }
}

/// Placement relative to the output canvas.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "anchor", rename_all = "snake_case")]
pub enum OverlayPosition {
    /// Horizontally centered, `y_ratio` of the canvas height from the top
    Centered { y_ratio: f32 },
    /// Absolute pixel offset from the top-left corner
    Absolute { x: u32, y: u32 },
}

impl OverlayPosition {
    pub fn top() -> Self {
        OverlayPosition::Centered { y_ratio: 0.08 }
    }

    pub fn middle() -> Self {
        OverlayPosition::Centered { y_ratio: 0.45 }
    }

    pub fn bottom() -> Self {
        OverlayPosition::Centered { y_ratio: 0.82 }
    }
}

/// Font selection for one overlay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct FontSpec {
    /// Font file; `None` lets the engine pick its default font
    #[serde(default)]
    pub file: Option<PathBuf>,
    pub size: u32,
    #[serde(default = "default_color")]
    pub color: String,
    #[serde(default = "default_border")]
    pub border_width: u32,
}

fn default_color() -> String {
    "white".to_string()
}

fn default_border() -> u32 {
    2
}

impl Default for FontSpec {
    fn default() -> Self {
        Self {
            file: None,
            size: 48,
            color: default_color(),
            border_width: default_border(),
        }
    }
}

/// Timed text drawn over the composed video.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct OverlayItem {
    pub role: OverlayRole,
    pub text: String,
    /// Offset into the composed clip
    pub start_ms: u64,
    pub end_ms: u64,
    pub position: OverlayPosition,
    pub font: FontSpec,
}

/// Crop rectangle (letterbox removal) in source pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub struct CropRect {
    pub width: u32,
    pub height: u32,
    pub x: u32,
    pub y: u32,
}

impl CropRect {
    /// Whether the crop removes anything from a `width`x`height` frame.
    pub fn is_effective(&self, width: u32, height: u32) -> bool {
        self.width > 0 && self.height > 0 && (self.width < width || self.height < height)
    }
}

/// Final artifact requested for a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct OutputTarget {
    pub format: OutputFormat,
    pub path: PathBuf,
}

/// Everything needed to compose the videos for one expression.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CompositionJob {
    /// Job identifier, used for logging and work-file names
    pub job_id: String,
    /// Episode media file
    pub source: PathBuf,
    /// Context window played first with original audio (long-form lead-in)
    pub context: Option<TimeRange>,
    /// Expression window, looped under the audio timeline
    pub expression: TimeRange,
    /// Rendered audio timeline; `None` keeps the clip's own audio
    pub audio: Option<AudioTimeline>,
    /// Timed text overlays, offsets relative to the composed clip
    pub overlays: Vec<OverlayItem>,
    /// Requested outputs; one render pass per target
    pub targets: Vec<OutputTarget>,
    /// Job-private directory for intermediates
    pub work_dir: PathBuf,
}

impl CompositionJob {
    /// Duration of the expression segment after looping.
    pub fn expression_segment_ms(&self) -> u64 {
        self.audio
            .as_ref()
            .map(|a| a.total_ms)
            .unwrap_or_else(|| self.expression.duration_ms())
    }

    /// Duration of the context segment, zero when absent.
    pub fn context_segment_ms(&self) -> u64 {
        self.context.map(|c| c.duration_ms()).unwrap_or(0)
    }

    /// Expected duration of the composed clip.
    pub fn total_ms(&self) -> u64 {
        self.context_segment_ms() + self.expression_segment_ms()
    }
}
