//! FFmpeg command builder.
//!
//! Commands are plain data: the engine decides how to run them, and tests can
//! inspect inputs, filters and mappings without spawning anything.

use std::path::{Path, PathBuf};

use lclip_models::encoding::{AUDIO_CHANNELS, AUDIO_SAMPLE_RATE};
use lclip_models::timestamp::ms_to_secs_arg;
use lclip_models::EncodingConfig;

/// Output path that discards everything (used with `-f null`).
pub const NULL_OUTPUT: &str = "-";

/// One `-i` input and the arguments that precede it.
#[derive(Debug, Clone, PartialEq)]
pub struct FfmpegInput {
    args: Vec<String>,
    source: String,
}

impl FfmpegInput {
    /// A file input.
    pub fn file(path: impl AsRef<Path>) -> Self {
        Self {
            args: Vec::new(),
            source: path.as_ref().to_string_lossy().to_string(),
        }
    }

    /// A libavfilter virtual input (`-f lavfi -i anullsrc=...`).
    pub fn lavfi(graph: impl Into<String>) -> Self {
        Self {
            args: vec!["-f".to_string(), "lavfi".to_string()],
            source: graph.into(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Input seek in milliseconds (fast, keyframe based for stream copy).
    pub fn seek_ms(self, ms: u64) -> Self {
        self.arg("-ss").arg(ms_to_secs_arg(ms))
    }

    /// Limit how much of the input is read.
    pub fn duration_ms(self, ms: u64) -> Self {
        self.arg("-t").arg(ms_to_secs_arg(ms))
    }

    /// Loop the input `count` extra times.
    pub fn stream_loop(self, count: u32) -> Self {
        self.arg("-stream_loop").arg(count.to_string())
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn is_lavfi(&self) -> bool {
        self.args.windows(2).any(|w| w[0] == "-f" && w[1] == "lavfi")
    }

    /// Value following `flag` in this input's arguments.
    pub fn arg_value(&self, flag: &str) -> Option<&str> {
        value_after(&self.args, flag)
    }
}

/// Builder for FFmpeg commands with any number of inputs.
#[derive(Debug, Clone, PartialEq)]
pub struct FfmpegCommand {
    inputs: Vec<FfmpegInput>,
    output: PathBuf,
    output_args: Vec<String>,
    overwrite: bool,
    log_level: String,
}

impl FfmpegCommand {
    /// Create a command writing to `output`.
    pub fn new(output: impl AsRef<Path>) -> Self {
        Self {
            inputs: Vec::new(),
            output: output.as_ref().to_path_buf(),
            output_args: Vec::new(),
            overwrite: true,
            log_level: "error".to_string(),
        }
    }

    /// Command discarding its output, for analysis filters.
    pub fn null_sink() -> Self {
        Self::new(NULL_OUTPUT).output_args(["-f", "null"])
    }

    pub fn input(mut self, input: FfmpegInput) -> Self {
        self.inputs.push(input);
        self
    }

    /// Add an output argument (after all inputs).
    pub fn output_arg(mut self, arg: impl Into<String>) -> Self {
        self.output_args.push(arg.into());
        self
    }

    pub fn output_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.output_args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Output seek, decoded and frame accurate.
    pub fn output_seek_ms(self, ms: u64) -> Self {
        self.output_arg("-ss").output_arg(ms_to_secs_arg(ms))
    }

    /// Exact output duration.
    pub fn output_duration_ms(self, ms: u64) -> Self {
        self.output_arg("-t").output_arg(ms_to_secs_arg(ms))
    }

    pub fn video_filter(self, filter: impl Into<String>) -> Self {
        self.output_arg("-vf").output_arg(filter)
    }

    pub fn filter_complex(self, filter: impl Into<String>) -> Self {
        self.output_arg("-filter_complex").output_arg(filter)
    }

    /// Map a stream specifier or a filter graph label.
    pub fn map(self, spec: impl Into<String>) -> Self {
        self.output_arg("-map").output_arg(spec)
    }

    /// Stream copy for every mapped stream.
    pub fn codec_copy(self) -> Self {
        self.output_arg("-c").output_arg("copy")
    }

    /// Shift timestamps so stream-copied cuts start at zero.
    pub fn zero_timestamps(self) -> Self {
        self.output_arg("-avoid_negative_ts").output_arg("make_zero")
    }

    pub fn no_video(self) -> Self {
        self.output_arg("-vn")
    }

    pub fn no_audio(self) -> Self {
        self.output_arg("-an")
    }

    /// Full video and audio re-encode settings.
    pub fn encoding(self, encoding: &EncodingConfig) -> Self {
        self.output_args(encoding.to_ffmpeg_args())
    }

    /// Uncompressed PCM audio at the shared sample rate and layout.
    pub fn pcm_audio(self) -> Self {
        self.output_args([
            "-c:a".to_string(),
            "pcm_s16le".to_string(),
            "-ar".to_string(),
            AUDIO_SAMPLE_RATE.to_string(),
            "-ac".to_string(),
            AUDIO_CHANNELS.to_string(),
        ])
    }

    /// Move the moov atom to the front for progressive playback.
    pub fn faststart(self) -> Self {
        self.output_arg("-movflags").output_arg("+faststart")
    }

    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }

    pub fn inputs(&self) -> &[FfmpegInput] {
        &self.inputs
    }

    pub fn output(&self) -> &Path {
        &self.output
    }

    pub fn output_arguments(&self) -> &[String] {
        &self.output_args
    }

    pub fn writes_file(&self) -> bool {
        self.output.as_os_str() != NULL_OUTPUT
    }

    /// Last value following `flag` in the output arguments.
    pub fn output_value(&self, flag: &str) -> Option<&str> {
        self.output_args
            .windows(2)
            .rev()
            .find(|w| w[0] == flag)
            .map(|w| w[1].as_str())
    }

    /// Every value following `flag` in the output arguments.
    pub fn output_values(&self, flag: &str) -> Vec<&str> {
        self.output_args
            .windows(2)
            .filter(|w| w[0] == flag)
            .map(|w| w[1].as_str())
            .collect()
    }

    pub fn has_output_flag(&self, flag: &str) -> bool {
        self.output_args.iter().any(|a| a == flag)
    }

    /// Filter graph text from `-vf` or `-filter_complex`.
    pub fn filter_graph(&self) -> Option<&str> {
        self.output_value("-filter_complex")
            .or_else(|| self.output_value("-vf"))
    }

    /// Build the command arguments.
    pub fn build_args(&self) -> Vec<String> {
        let mut args = Vec::new();

        if self.overwrite {
            args.push("-y".to_string());
        }
        args.push("-hide_banner".to_string());
        args.push("-nostdin".to_string());

        args.push("-v".to_string());
        args.push(self.log_level.clone());

        // Progress output to stderr
        args.push("-progress".to_string());
        args.push("pipe:2".to_string());

        for input in &self.inputs {
            args.extend(input.args.iter().cloned());
            args.push("-i".to_string());
            args.push(input.source.clone());
        }

        args.extend(self.output_args.iter().cloned());
        args.push(self.output.to_string_lossy().to_string());

        args
    }

    /// Single-line rendering for logs.
    pub fn display(&self) -> String {
        format!("ffmpeg {}", self.build_args().join(" "))
    }
}

fn value_after<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.windows(2)
        .rev()
        .find(|w| w[0] == flag)
        .map(|w| w[1].as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_multi_input_ordering() {
        let cmd = FfmpegCommand::new("out.mp4")
            .input(FfmpegInput::file("a.mp4").seek_ms(10_000).duration_ms(2_500))
            .input(FfmpegInput::file("b.wav"))
            .map("0:v:0")
            .map("1:a:0")
            .codec_copy();

        let args = cmd.build_args();
        let i0 = args.iter().position(|a| a == "a.mp4").unwrap();
        let i1 = args.iter().position(|a| a == "b.wav").unwrap();
        let ss = args.iter().position(|a| a == "-ss").unwrap();

        assert!(ss < i0 && i0 < i1);
        assert_eq!(args[ss + 1], "10.000");
        assert_eq!(args.last().unwrap(), "out.mp4");
        assert_eq!(cmd.output_values("-map"), vec!["0:v:0", "1:a:0"]);
        assert_eq!(cmd.inputs()[0].arg_value("-t"), Some("2.500"));
    }

    #[test]
    fn test_null_sink_and_lavfi() {
        let cmd = FfmpegCommand::null_sink()
            .input(FfmpegInput::lavfi("anullsrc=r=44100:cl=stereo"));
        assert!(!cmd.writes_file());
        assert!(cmd.inputs()[0].is_lavfi());
        assert_eq!(cmd.output_value("-f"), Some("null"));
    }

    #[test]
    fn test_encoding_args_are_appended() {
        let cmd = FfmpegCommand::new("o.mp4")
            .input(FfmpegInput::file("i.mp4"))
            .encoding(&EncodingConfig::default());
        assert_eq!(cmd.output_value("-c:v"), Some("libx264"));
        assert_eq!(cmd.output_value("-c:a"), Some("aac"));
    }
}
