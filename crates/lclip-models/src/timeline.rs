//! Audio timeline specification.
//!
//! Shape: `lead_silence -> [speech -> gap]*n (last gap omitted) -> trail_silence`.
//! All durations are integer milliseconds; the assembled track must measure
//! exactly `total_ms()` (within the engine's container tolerance).

use std::path::PathBuf;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Leading silence before the first repetition.
pub const DEFAULT_LEAD_SILENCE_MS: u64 = 1_000;
/// Silence between repetitions.
pub const DEFAULT_GAP_SILENCE_MS: u64 = 500;
/// Trailing silence after the last repetition.
pub const DEFAULT_TRAIL_SILENCE_MS: u64 = 1_000;
/// Default number of speech repetitions.
pub const DEFAULT_REPEAT_COUNT: u32 = 3;

/// Where speech audio comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum SpeechSourceKind {
    /// Synthesized narration
    Narration,
    /// Audio extracted from the original episode at the dialogue window
    OriginalAudio,
    /// Degraded: no speech could be produced, silence of equal length
    Silence,
}

impl SpeechSourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SpeechSourceKind::Narration => "narration",
            SpeechSourceKind::OriginalAudio => "original_audio",
            SpeechSourceKind::Silence => "silence",
        }
    }

    /// Whether this source is a degraded fallback.
    pub fn is_degraded(&self) -> bool {
        matches!(self, SpeechSourceKind::Silence)
    }
}

/// One element of the timeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AudioSegment {
    Silence {
        duration_ms: u64,
    },
    Speech {
        /// Audio file the speech is cut from
        source: PathBuf,
        /// Measured duration of the speech clip
        duration_ms: u64,
        /// Which repetition this is (0-based)
        repetition: u32,
    },
}

impl AudioSegment {
    pub fn duration_ms(&self) -> u64 {
        match self {
            AudioSegment::Silence { duration_ms } => *duration_ms,
            AudioSegment::Speech { duration_ms, .. } => *duration_ms,
        }
    }

    pub fn is_speech(&self) -> bool {
        matches!(self, AudioSegment::Speech { .. })
    }
}

/// Silence layout around the speech repetitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct TimelineLayout {
    pub lead_silence_ms: u64,
    pub gap_silence_ms: u64,
    pub trail_silence_ms: u64,
}

impl Default for TimelineLayout {
    fn default() -> Self {
        Self {
            lead_silence_ms: DEFAULT_LEAD_SILENCE_MS,
            gap_silence_ms: DEFAULT_GAP_SILENCE_MS,
            trail_silence_ms: DEFAULT_TRAIL_SILENCE_MS,
        }
    }
}

/// Ordered list of silence/speech segments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct AudioSegmentSpec {
    pub segments: Vec<AudioSegment>,
    pub source_kind: SpeechSourceKind,
    pub repeat_count: u32,
}

impl AudioSegmentSpec {
    /// Build the repeated-speech timeline.
    ///
    /// For `Silence` sources `speech` is `None` and the speech slots become
    /// silence of `speech_ms` each, so the total matches the non-degraded shape.
    pub fn repeated(
        layout: TimelineLayout,
        source_kind: SpeechSourceKind,
        speech: Option<PathBuf>,
        speech_ms: u64,
        repeat_count: u32,
    ) -> Self {
        let repeat_count = repeat_count.max(1);
        let mut segments = Vec::with_capacity(repeat_count as usize * 2 + 1);

        segments.push(AudioSegment::Silence {
            duration_ms: layout.lead_silence_ms,
        });

        for repetition in 0..repeat_count {
            if repetition > 0 && layout.gap_silence_ms > 0 {
                segments.push(AudioSegment::Silence {
                    duration_ms: layout.gap_silence_ms,
                });
            }
            match &speech {
                Some(path) => segments.push(AudioSegment::Speech {
                    source: path.clone(),
                    duration_ms: speech_ms,
                    repetition,
                }),
                None => segments.push(AudioSegment::Silence {
                    duration_ms: speech_ms,
                }),
            }
        }

        segments.push(AudioSegment::Silence {
            duration_ms: layout.trail_silence_ms,
        });

        // Zero-length silences carry no information for the renderer.
        segments.retain(|s| s.duration_ms() > 0);

        Self {
            segments,
            source_kind,
            repeat_count,
        }
    }

    /// Sum of all segment durations.
    pub fn total_ms(&self) -> u64 {
        self.segments.iter().map(AudioSegment::duration_ms).sum()
    }

    pub fn speech_segments(&self) -> impl Iterator<Item = &AudioSegment> {
        self.segments.iter().filter(|s| s.is_speech())
    }

    /// Start offset of each segment within the track.
    pub fn offsets_ms(&self) -> Vec<u64> {
        let mut offset = 0;
        self.segments
            .iter()
            .map(|s| {
                let start = offset;
                offset += s.duration_ms();
                start
            })
            .collect()
    }
}

/// Rendered timeline handed to composition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct AudioTimeline {
    pub path: PathBuf,
    pub total_ms: u64,
    pub spec: AudioSegmentSpec,
    /// Duration measured by probing the rendered file
    pub measured_secs: f64,
}

impl AudioTimeline {
    pub fn is_degraded(&self) -> bool {
        self.spec.source_kind.is_degraded()
    }
}
