//! Recording fake of the media engine.
//!
//! `FakeEngine` never spawns a process. It records every invocation, writes
//! a placeholder file at each output path and registers plausible facts for
//! it (duration, resolution, streams) derived from the command, so a later
//! probe of that output behaves like a probe of real FFmpeg output.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use lclip_models::MediaStage;

use crate::command::{FfmpegCommand, FfmpegInput};
use crate::engine::{EngineInvocation, EngineOutput, MediaEngine};
use crate::error::{MediaError, MediaResult};
use crate::probe::MediaInfo;

/// Facts for a typical episode file.
pub fn video_info(duration_secs: f64, width: u32, height: u32) -> MediaInfo {
    MediaInfo {
        duration_secs,
        width,
        height,
        codec: "h264".to_string(),
        video_streams: 1,
        audio_streams: 1,
    }
}

/// Facts for an audio-only file.
pub fn audio_info(duration_secs: f64) -> MediaInfo {
    MediaInfo {
        duration_secs,
        width: 0,
        height: 0,
        codec: "pcm_s16le".to_string(),
        video_streams: 0,
        audio_streams: 1,
    }
}

/// A command the fake was asked to run.
#[derive(Debug, Clone)]
pub struct RecordedInvocation {
    pub stage: MediaStage,
    pub command: FfmpegCommand,
}

impl RecordedInvocation {
    pub fn args(&self) -> Vec<String> {
        self.command.build_args()
    }

    pub fn joined_args(&self) -> String {
        self.args().join(" ")
    }

    pub fn output(&self) -> &Path {
        self.command.output()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureMode {
    /// Non-zero exit
    Fail,
    /// Exceeds its time budget
    Timeout,
}

/// When to make an invocation fail.
#[derive(Debug, Clone)]
pub struct FailureRule {
    stage: MediaStage,
    needle: Option<String>,
    mode: FailureMode,
    remaining: Option<u32>,
}

impl FailureRule {
    pub fn fail(stage: MediaStage) -> Self {
        Self {
            stage,
            needle: None,
            mode: FailureMode::Fail,
            remaining: None,
        }
    }

    pub fn timeout(stage: MediaStage) -> Self {
        Self {
            mode: FailureMode::Timeout,
            ..Self::fail(stage)
        }
    }

    /// Only match invocations whose arguments (or probed path) contain `needle`.
    pub fn matching(mut self, needle: impl Into<String>) -> Self {
        self.needle = Some(needle.into());
        self
    }

    /// Stop matching after `count` hits.
    pub fn times(mut self, count: u32) -> Self {
        self.remaining = Some(count);
        self
    }

    fn applies(&self, stage: MediaStage, haystack: &str) -> bool {
        self.stage == stage
            && self.remaining != Some(0)
            && self.needle.as_deref().map_or(true, |n| haystack.contains(n))
    }
}

#[derive(Default)]
struct FakeState {
    files: HashMap<PathBuf, MediaInfo>,
    invocations: Vec<RecordedInvocation>,
    rules: Vec<FailureRule>,
    cropdetect_lines: Vec<String>,
    copy_overshoot_secs: f64,
    drop_audio: HashSet<MediaStage>,
}

/// In-memory engine for tests.
#[derive(Default)]
pub struct FakeEngine {
    state: Mutex<FakeState>,
    delay: Option<Duration>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    inspect_count: AtomicUsize,
}

impl FakeEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every run take `delay`.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Extra duration stream-copied cuts come out with (keyframe snapping).
    pub fn with_copy_overshoot(self, secs: f64) -> Self {
        self.lock().copy_overshoot_secs = secs;
        self
    }

    /// Lines returned as stderr by `cropdetect` runs.
    pub fn with_cropdetect_output<I, S>(self, lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.lock().cropdetect_lines = lines.into_iter().map(Into::into).collect();
        self
    }

    /// Outputs of `stage` come out without an audio stream.
    pub fn with_dropped_audio(self, stage: MediaStage) -> Self {
        self.lock().drop_audio.insert(stage);
        self
    }

    pub fn add_failure(&self, rule: FailureRule) {
        self.lock().rules.push(rule);
    }

    /// Write a placeholder at `path` and register its facts.
    pub async fn register(&self, path: impl AsRef<Path>, info: MediaInfo) {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            let _ = tokio::fs::create_dir_all(parent).await;
        }
        let _ = tokio::fs::write(path, b"fake media").await;
        let key = canonical(path).await;
        self.lock().files.insert(key, info);
    }

    pub async fn add_video_file(&self, path: impl AsRef<Path>, duration_secs: f64, width: u32, height: u32) {
        self.register(path, video_info(duration_secs, width, height)).await;
    }

    pub async fn add_audio_file(&self, path: impl AsRef<Path>, duration_secs: f64) {
        self.register(path, audio_info(duration_secs)).await;
    }

    pub fn invocations(&self) -> Vec<RecordedInvocation> {
        self.lock().invocations.clone()
    }

    pub fn invocations_for(&self, stage: MediaStage) -> Vec<RecordedInvocation> {
        self.lock()
            .invocations
            .iter()
            .filter(|i| i.stage == stage)
            .cloned()
            .collect()
    }

    pub fn inspect_count(&self) -> usize {
        self.inspect_count.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// Registered facts for `path`, if any.
    pub async fn facts(&self, path: impl AsRef<Path>) -> Option<MediaInfo> {
        let key = canonical(path.as_ref()).await;
        self.lock().files.get(&key).cloned()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Consume a matching rule, if one applies.
    fn take_failure(&self, stage: MediaStage, haystack: &str) -> Option<FailureMode> {
        let mut state = self.lock();
        let rule = state.rules.iter_mut().find(|r| r.applies(stage, haystack))?;
        if let Some(remaining) = rule.remaining.as_mut() {
            *remaining -= 1;
        }
        Some(rule.mode)
    }

    async fn input_facts(&self, input: &FfmpegInput) -> Option<MediaInfo> {
        if input.is_lavfi() {
            let secs = input
                .arg_value("-t")
                .and_then(|t| t.parse().ok())
                .or_else(|| lavfi_duration(input.source()))
                .unwrap_or(0.0);
            return Some(if input.source().starts_with("anullsrc") {
                audio_info(secs)
            } else {
                video_info(secs, 0, 0)
            });
        }
        let key = canonical(Path::new(input.source())).await;
        self.lock().files.get(&key).cloned()
    }

    /// Derive what FFmpeg would have produced for `command`.
    async fn simulate_output(&self, stage: MediaStage, command: &FfmpegCommand) -> MediaResult<MediaInfo> {
        let mut inputs = Vec::with_capacity(command.inputs().len());
        for input in command.inputs() {
            let facts = self.input_facts(input).await.ok_or_else(|| {
                MediaError::engine_failed(
                    stage,
                    format!("{}: No such file or directory", input.source()),
                    None,
                    Some(1),
                )
            })?;
            inputs.push(facts);
        }
        let first = inputs
            .first()
            .cloned()
            .ok_or_else(|| MediaError::engine_failed(stage, "no input", None, Some(1)))?;
        let first_input = &command.inputs()[0];

        let duration_secs = if let Some(t) = command.output_value("-t").and_then(|t| t.parse().ok()) {
            t
        } else if let Some(t) = first_input.arg_value("-t").and_then(|t| t.parse::<f64>().ok()) {
            if command.output_value("-c") == Some("copy") {
                t + self.lock().copy_overshoot_secs
            } else {
                t
            }
        } else {
            let loops = first_input
                .arg_value("-stream_loop")
                .and_then(|n| n.parse::<f64>().ok())
                .unwrap_or(0.0);
            first.duration_secs * (loops + 1.0)
        };

        let (width, height) = command
            .filter_graph()
            .and_then(|g| dimensions_after(g, "pad=").or_else(|| dimensions_after(g, "crop=")))
            .unwrap_or((first.width, first.height));

        let maps = command.output_values("-map");
        let (mut video, mut audio) = if maps.is_empty() {
            (first.video_streams.min(1), first.audio_streams.min(1))
        } else {
            let mut video = 0;
            let mut audio = 0;
            for spec in maps {
                match resolve_map(spec, &inputs) {
                    Ok(Some(Kind::Video)) => video += 1,
                    Ok(Some(Kind::Audio)) => audio += 1,
                    Ok(None) => {}
                    Err(message) => {
                        return Err(MediaError::engine_failed(stage, message, None, Some(1)));
                    }
                }
            }
            (video, audio)
        };
        if command.has_output_flag("-vn") {
            video = 0;
        }
        if command.has_output_flag("-an") || self.lock().drop_audio.contains(&stage) {
            audio = 0;
        }

        Ok(MediaInfo {
            duration_secs,
            width: if video > 0 { width } else { 0 },
            height: if video > 0 { height } else { 0 },
            codec: if video > 0 { "h264" } else { "pcm_s16le" }.to_string(),
            video_streams: video,
            audio_streams: audio,
        })
    }
}

#[async_trait]
impl MediaEngine for FakeEngine {
    async fn run(&self, invocation: &EngineInvocation) -> MediaResult<EngineOutput> {
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);

        self.lock().invocations.push(RecordedInvocation {
            stage: invocation.stage,
            command: invocation.command.clone(),
        });

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let result = self.execute(invocation).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn inspect(&self, path: &Path, timeout: Duration) -> MediaResult<MediaInfo> {
        self.inspect_count.fetch_add(1, Ordering::SeqCst);
        match self.take_failure(MediaStage::Probe, &path.to_string_lossy()) {
            Some(FailureMode::Timeout) => {
                return Err(MediaError::Timeout {
                    stage: MediaStage::Probe,
                    secs: timeout.as_secs(),
                })
            }
            Some(FailureMode::Fail) => {
                return Err(MediaError::unreadable(path, "Invalid data found when processing input"))
            }
            None => {}
        }
        self.facts(path)
            .await
            .ok_or_else(|| MediaError::unreadable(path, "Invalid data found when processing input"))
    }
}

impl FakeEngine {
    async fn execute(&self, invocation: &EngineInvocation) -> MediaResult<EngineOutput> {
        let stage = invocation.stage;
        let command = &invocation.command;

        match self.take_failure(stage, &command.build_args().join(" ")) {
            Some(FailureMode::Timeout) => {
                return Err(MediaError::Timeout {
                    stage,
                    secs: invocation.timeout.as_secs(),
                })
            }
            Some(FailureMode::Fail) => {
                return Err(MediaError::engine_failed(
                    stage,
                    "ffmpeg exited with exit status: 1",
                    Some("simulated failure".to_string()),
                    Some(1),
                ))
            }
            None => {}
        }

        let info = self.simulate_output(stage, command).await?;

        let mut stderr = Vec::new();
        if command.filter_graph().is_some_and(|g| g.contains("cropdetect")) {
            stderr = self.lock().cropdetect_lines.clone();
        }

        if command.writes_file() {
            tokio::fs::write(command.output(), format!("fake {} output", stage))
                .await
                .map_err(|e| {
                    MediaError::engine_failed(
                        stage,
                        format!("{}: {}", command.output().display(), e),
                        None,
                        Some(1),
                    )
                })?;
            let key = canonical(command.output()).await;
            self.lock().files.insert(key, info);
        }

        Ok(EngineOutput {
            stderr,
            ..Default::default()
        })
    }
}

enum Kind {
    Video,
    Audio,
}

/// Resolve a `-map` specifier against the input facts.
fn resolve_map(spec: &str, inputs: &[MediaInfo]) -> Result<Option<Kind>, String> {
    if let Some(label) = spec.strip_prefix('[') {
        return Ok(match label.chars().next() {
            Some('v') => Some(Kind::Video),
            Some('a') => Some(Kind::Audio),
            _ => None,
        });
    }
    let optional = spec.ends_with('?');
    let mut parts = spec.trim_end_matches('?').split(':');
    let index: usize = parts
        .next()
        .and_then(|i| i.parse().ok())
        .ok_or_else(|| format!("Invalid stream specifier: {}", spec))?;
    let input = inputs
        .get(index)
        .ok_or_else(|| format!("Invalid input file index: {}", index))?;
    let (kind, available) = match parts.next() {
        Some("v") => (Kind::Video, input.video_streams),
        Some("a") => (Kind::Audio, input.audio_streams),
        _ => return Err(format!("Unsupported stream specifier: {}", spec)),
    };
    match (available > 0, optional) {
        (true, _) => Ok(Some(kind)),
        (false, true) => Ok(None),
        (false, false) => Err(format!("Stream map '{}' matches no streams.", spec)),
    }
}

/// First `W:H` pair following `prefix` in a filter graph.
fn dimensions_after(graph: &str, prefix: &str) -> Option<(u32, u32)> {
    graph.match_indices(prefix).find_map(|(at, _)| {
        let rest = &graph[at + prefix.len()..];
        let mut parts = rest.split([':', ',', '[', ';']);
        let w = parts.next()?.parse().ok()?;
        let h = parts.next()?.parse().ok()?;
        Some((w, h))
    })
}

/// Duration encoded in a lavfi source graph (`anullsrc=...:d=2.5`).
fn lavfi_duration(graph: &str) -> Option<f64> {
    graph
        .split([':', ',', '='])
        .collect::<Vec<_>>()
        .windows(2)
        .find(|w| w[0] == "d" || w[0] == "duration")
        .and_then(|w| w[1].parse().ok())
}

async fn canonical(path: &Path) -> PathBuf {
    tokio::fs::canonicalize(path)
        .await
        .unwrap_or_else(|_| path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dimensions_after_skips_audio_pad() {
        let graph = "[0:a]apad=whole_dur=3.000[a];[0:v]scale=1080:1920:force_original_aspect_ratio=decrease,pad=1080:1920:(ow-iw)/2";
        assert_eq!(dimensions_after(graph, "pad="), Some((1080, 1920)));
        assert_eq!(dimensions_after("crop=1280:528:0:96", "crop="), Some((1280, 528)));
        assert_eq!(dimensions_after("null", "pad="), None);
    }

    #[test]
    fn test_resolve_optional_audio_map() {
        let silent = MediaInfo {
            audio_streams: 0,
            ..video_info(5.0, 640, 360)
        };
        assert!(matches!(resolve_map("0:a:0?", &[silent.clone()]), Ok(None)));
        assert!(resolve_map("0:a:0", &[silent]).is_err());
    }

    #[test]
    fn test_lavfi_duration() {
        assert_eq!(lavfi_duration("anullsrc=r=44100:cl=stereo:d=2.5"), Some(2.5));
        assert_eq!(lavfi_duration("anullsrc=r=44100:cl=stereo"), None);
    }
}
