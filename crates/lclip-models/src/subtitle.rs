//! Timed subtitle entries and time ranges.

use std::sync::Arc;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::timestamp::{format_ms, ms_to_secs_arg};

/// Half-open millisecond range `[start_ms, end_ms)` on the episode timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub struct TimeRange {
    pub start_ms: u64,
    pub end_ms: u64,
}

impl TimeRange {
    /// Create a range, swapping the bounds if they are inverted.
    pub fn new(start_ms: u64, end_ms: u64) -> Self {
        if start_ms <= end_ms {
            Self { start_ms, end_ms }
        } else {
            Self {
                start_ms: end_ms,
                end_ms: start_ms,
            }
        }
    }

    pub fn duration_ms(&self) -> u64 {
        self.end_ms - self.start_ms
    }

    pub fn is_empty(&self) -> bool {
        self.duration_ms() == 0
    }

    /// Engine-ready seek position (`12.345`).
    pub fn start_arg(&self) -> String {
        ms_to_secs_arg(self.start_ms)
    }

    /// Engine-ready duration (`3.500`).
    pub fn duration_arg(&self) -> String {
        ms_to_secs_arg(self.duration_ms())
    }

    pub fn overlaps(&self, other: &TimeRange) -> bool {
        self.start_ms < other.end_ms && other.start_ms < self.end_ms
    }

    /// Smallest range covering both.
    pub fn union(&self, other: &TimeRange) -> TimeRange {
        TimeRange {
            start_ms: self.start_ms.min(other.start_ms),
            end_ms: self.end_ms.max(other.end_ms),
        }
    }

    /// Clamp the end to a known media duration.
    pub fn clamp_to(&self, media_duration_ms: u64) -> TimeRange {
        TimeRange::new(
            self.start_ms.min(media_duration_ms),
            self.end_ms.min(media_duration_ms),
        )
    }
}

impl std::fmt::Display for TimeRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", format_ms(self.start_ms), format_ms(self.end_ms))
    }
}

/// Subtitle validation failure.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SubtitleError {
    #[error("Subtitle entry {index} ends before it starts ({start_ms} > {end_ms})")]
    NegativeDuration { index: u32, start_ms: u64, end_ms: u64 },
}

/// One timed subtitle line. Immutable once parsed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct SubtitleEntry {
    /// Sequence index from the source file
    pub index: u32,
    /// Start time in milliseconds
    pub start_ms: u64,
    /// End time in milliseconds
    pub end_ms: u64,
    /// Raw text, possibly multi-line and with formatting tags
    pub text: String,
}

impl SubtitleEntry {
    pub fn new(
        index: u32,
        start_ms: u64,
        end_ms: u64,
        text: impl Into<String>,
    ) -> Result<Self, SubtitleError> {
        if start_ms > end_ms {
            return Err(SubtitleError::NegativeDuration {
                index,
                start_ms,
                end_ms,
            });
        }
        Ok(Self {
            index,
            start_ms,
            end_ms,
            text: text.into(),
        })
    }

    pub fn range(&self) -> TimeRange {
        TimeRange {
            start_ms: self.start_ms,
            end_ms: self.end_ms,
        }
    }
}

/// Episode subtitle collection, ordered by start time and shared read-only
/// across every job for that episode.
#[derive(Debug, Clone)]
pub struct SubtitleTrack {
    entries: Arc<[SubtitleEntry]>,
}

impl SubtitleTrack {
    /// Validate and order entries. Entries with equal start keep their input order.
    pub fn new(mut entries: Vec<SubtitleEntry>) -> Result<Self, SubtitleError> {
        for entry in &entries {
            if entry.start_ms > entry.end_ms {
                return Err(SubtitleError::NegativeDuration {
                    index: entry.index,
                    start_ms: entry.start_ms,
                    end_ms: entry.end_ms,
                });
            }
        }
        entries.sort_by_key(|e| e.start_ms);
        Ok(Self {
            entries: entries.into(),
        })
    }

    pub fn entries(&self) -> &[SubtitleEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Time covered by the inclusive index range `[first, last]`.
    pub fn span(&self, first: usize, last: usize) -> Option<TimeRange> {
        let first_entry = self.entries.get(first)?;
        let last_entry = self.entries.get(last)?;
        Some(TimeRange::new(
            first_entry.start_ms,
            last_entry.end_ms.max(first_entry.start_ms),
        ))
    }
}
