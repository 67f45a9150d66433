//! Parsing of FFmpeg `-progress pipe:2` output.

use serde::{Deserialize, Serialize};

/// Keys FFmpeg emits in its progress blocks.
const PROGRESS_KEYS: &[&str] = &[
    "frame",
    "fps",
    "stream_0_0_q",
    "bitrate",
    "total_size",
    "out_time_us",
    "out_time_ms",
    "out_time",
    "dup_frames",
    "drop_frames",
    "speed",
    "progress",
];

/// Snapshot of one progress block.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FfmpegProgress {
    pub frame: u64,
    /// Output position in milliseconds
    pub out_time_ms: u64,
    /// Encoding speed relative to realtime
    pub speed: f64,
    pub is_complete: bool,
}

impl FfmpegProgress {
    /// Percentage of `total_ms` written so far.
    pub fn percentage(&self, total_ms: u64) -> f64 {
        if total_ms == 0 {
            return 0.0;
        }
        (self.out_time_ms as f64 / total_ms as f64 * 100.0).min(100.0)
    }
}

/// Accumulates `key=value` lines into progress snapshots.
#[derive(Debug, Default)]
pub struct ProgressParser {
    current: FfmpegProgress,
}

impl ProgressParser {
    /// Whether `line` belongs to a progress block rather than a log message.
    pub fn is_progress_line(line: &str) -> bool {
        line.split_once('=')
            .map(|(key, _)| PROGRESS_KEYS.contains(&key.trim()))
            .unwrap_or(false)
    }

    /// Feed one line; returns a snapshot at the end of each block.
    pub fn feed(&mut self, line: &str) -> Option<FfmpegProgress> {
        let (key, value) = line.trim().split_once('=')?;
        match key {
            // out_time_ms is microseconds despite its name
            "out_time_us" | "out_time_ms" => {
                if let Ok(us) = value.parse::<u64>() {
                    self.current.out_time_ms = us / 1000;
                }
            }
            "frame" => {
                if let Ok(frame) = value.parse() {
                    self.current.frame = frame;
                }
            }
            "speed" => {
                if let Some(speed) = value.strip_suffix('x').and_then(|s| s.trim().parse().ok()) {
                    self.current.speed = speed;
                }
            }
            "progress" => {
                self.current.is_complete = value == "end";
                return Some(self.current.clone());
            }
            _ => {}
        }
        None
    }

    pub fn last(&self) -> &FfmpegProgress {
        &self.current
    }
}
