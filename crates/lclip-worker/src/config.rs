//! Pipeline configuration.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use lclip_dialogue::MatcherConfig;
use lclip_media::{CleanupPolicy, ComposerConfig, TimelineConfig};
use lclip_models::matching::DEFAULT_MATCH_THRESHOLD;
use lclip_models::timeline::DEFAULT_REPEAT_COUNT;
use lclip_models::{EncodingConfig, OutputFormat, OverlayConfig};

use crate::error::{PipelineError, PipelineResult};

/// Pipeline configuration.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Single acceptance threshold shared by every match strategy
    pub match_threshold: f64,
    /// Maximum consecutive subtitle entries joined into one candidate
    pub max_window_entries: usize,
    /// Speech entries added around the matched range for the context window
    pub context_padding_entries: usize,
    /// Root of the per-job work directories
    pub work_dir: PathBuf,
    /// Root of the final artifacts
    pub output_dir: PathBuf,
    /// Maximum concurrent expression jobs
    pub max_concurrent_jobs: usize,
    /// Maximum concurrent FFmpeg processes across all jobs
    pub max_ffmpeg_processes: usize,
    /// Timeout of a single engine invocation
    pub subprocess_timeout: Duration,
    pub narration_enabled: bool,
    /// TTS command with `{text}` and `{output}` placeholders
    pub narration_command: Option<String>,
    /// Speech repetitions in the audio timeline
    pub repeat_count: u32,
    /// Delete intermediates of failed jobs too
    pub cleanup_on_failure: bool,
    pub detect_black_bars: bool,
    /// Short-form canvas (width, height)
    pub short_canvas: (u32, u32),
    pub long_form: bool,
    pub short_form: bool,
    /// One encoding for every re-encode in every format
    pub encoding: EncodingConfig,
    /// JSON overlay configuration; built-in defaults when unset
    pub overlay_config: Option<PathBuf>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            match_threshold: DEFAULT_MATCH_THRESHOLD,
            max_window_entries: 3,
            context_padding_entries: 1,
            work_dir: PathBuf::from("/tmp/lclip/work"),
            output_dir: PathBuf::from("/tmp/lclip/output"),
            max_concurrent_jobs: 2,
            max_ffmpeg_processes: 4,
            subprocess_timeout: Duration::from_secs(600),
            narration_enabled: false,
            narration_command: None,
            repeat_count: DEFAULT_REPEAT_COUNT,
            cleanup_on_failure: false,
            detect_black_bars: true,
            short_canvas: (1080, 1920),
            long_form: true,
            short_form: true,
            encoding: EncodingConfig::default(),
            overlay_config: None,
        }
    }
}

impl PipelineConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let encoding = EncodingConfig {
            codec: env_or("LCLIP_VIDEO_CODEC", defaults.encoding.codec.clone()),
            preset: env_or("LCLIP_PRESET", defaults.encoding.preset.clone()),
            crf: defaults.encoding.crf,
            audio_codec: env_or("LCLIP_AUDIO_CODEC", defaults.encoding.audio_codec.clone()),
            audio_bitrate: env_or("LCLIP_AUDIO_BITRATE", defaults.encoding.audio_bitrate.clone()),
        }
        .with_crf(env_or("LCLIP_CRF", defaults.encoding.crf));

        Self {
            match_threshold: env_or("LCLIP_MATCH_THRESHOLD", defaults.match_threshold),
            max_window_entries: env_or("LCLIP_MAX_WINDOW_ENTRIES", defaults.max_window_entries),
            context_padding_entries: env_or(
                "LCLIP_CONTEXT_PADDING_ENTRIES",
                defaults.context_padding_entries,
            ),
            work_dir: env_or("LCLIP_WORK_DIR", defaults.work_dir),
            output_dir: env_or("LCLIP_OUTPUT_DIR", defaults.output_dir),
            max_concurrent_jobs: env_or("LCLIP_MAX_JOBS", defaults.max_concurrent_jobs),
            max_ffmpeg_processes: env_or("LCLIP_MAX_FFMPEG", defaults.max_ffmpeg_processes),
            subprocess_timeout: Duration::from_secs(env_or("LCLIP_SUBPROCESS_TIMEOUT_SECS", 600)),
            narration_enabled: env_flag("LCLIP_NARRATION_ENABLED", defaults.narration_enabled),
            narration_command: std::env::var("LCLIP_NARRATION_COMMAND")
                .ok()
                .filter(|s| !s.trim().is_empty()),
            repeat_count: env_or("LCLIP_REPEAT_COUNT", defaults.repeat_count),
            cleanup_on_failure: env_flag("LCLIP_CLEANUP_ON_FAILURE", defaults.cleanup_on_failure),
            detect_black_bars: env_flag("LCLIP_DETECT_BLACK_BARS", defaults.detect_black_bars),
            short_canvas: (
                env_or("LCLIP_SHORT_WIDTH", defaults.short_canvas.0),
                env_or("LCLIP_SHORT_HEIGHT", defaults.short_canvas.1),
            ),
            long_form: env_flag("LCLIP_LONG_FORM", defaults.long_form),
            short_form: env_flag("LCLIP_SHORT_FORM", defaults.short_form),
            encoding,
            overlay_config: std::env::var("LCLIP_OVERLAY_CONFIG").ok().map(PathBuf::from),
        }
    }

    /// Reject settings no job could run with.
    pub fn validate(&self) -> PipelineResult<()> {
        if !(0.0..=1.0).contains(&self.match_threshold) {
            return Err(PipelineError::config_error(format!(
                "match threshold {} outside [0, 1]",
                self.match_threshold
            )));
        }
        if !self.long_form && !self.short_form {
            return Err(PipelineError::config_error("both output formats are disabled"));
        }
        if self.repeat_count == 0 {
            return Err(PipelineError::config_error("repeat count must be at least 1"));
        }
        if self.max_concurrent_jobs == 0 || self.max_ffmpeg_processes == 0 {
            return Err(PipelineError::config_error("concurrency limits must be at least 1"));
        }
        let (width, height) = self.short_canvas;
        if width == 0 || height == 0 || width % 2 != 0 || height % 2 != 0 {
            return Err(PipelineError::config_error(format!(
                "short-form canvas {}x{} must be non-zero and even",
                width, height
            )));
        }
        Ok(())
    }

    pub fn matcher_config(&self) -> MatcherConfig {
        MatcherConfig {
            threshold: self.match_threshold,
            max_window_entries: self.max_window_entries,
            context_padding_entries: self.context_padding_entries,
            ..MatcherConfig::default()
        }
    }

    pub fn composer_config(&self) -> ComposerConfig {
        ComposerConfig {
            encoding: self.encoding.clone(),
            detect_black_bars: self.detect_black_bars,
            canvas: self.short_canvas,
            ..ComposerConfig::default()
        }
    }

    pub fn timeline_config(&self) -> TimelineConfig {
        TimelineConfig::default()
    }

    pub fn cleanup_policy(&self) -> CleanupPolicy {
        if self.cleanup_on_failure {
            CleanupPolicy::CleanAlways
        } else {
            CleanupPolicy::RetainOnFailure
        }
    }

    /// Enabled output formats, long-form first.
    pub fn output_formats(&self) -> Vec<OutputFormat> {
        let mut formats = Vec::with_capacity(2);
        if self.long_form {
            formats.push(OutputFormat::LongForm);
        }
        if self.short_form {
            formats.push(OutputFormat::ShortForm {
                width: self.short_canvas.0,
                height: self.short_canvas.1,
            });
        }
        formats
    }

    /// Load the overlay configuration, or the built-in default.
    pub fn load_overlay_config(&self) -> PipelineResult<OverlayConfig> {
        match &self.overlay_config {
            Some(path) => OverlayConfig::from_json_file(path)
                .map_err(|e| PipelineError::config_error(e.to_string())),
            None => Ok(OverlayConfig::default()),
        }
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

fn env_flag(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .map(|v| matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(default)
}
