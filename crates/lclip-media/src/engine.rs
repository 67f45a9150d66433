//! The external media engine seam.
//!
//! Every subprocess goes through [`MediaEngine`]. The production
//! implementation drives `ffmpeg`/`ffprobe`; tests substitute a recording
//! fake so compositions can be asserted without spawning anything.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use lclip_models::MediaStage;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::command::FfmpegCommand;
use crate::error::{MediaError, MediaResult};
use crate::metrics;
use crate::probe::{parse_ffprobe_json, MediaInfo, MediaProbe};
use crate::progress::{FfmpegProgress, ProgressParser};

/// Number of stderr lines kept in failure messages.
const STDERR_TAIL_LINES: usize = 20;

/// One engine run: the command plus the stage it serves.
#[derive(Debug, Clone)]
pub struct EngineInvocation {
    pub stage: MediaStage,
    pub command: FfmpegCommand,
    pub timeout: Duration,
}

/// What a finished run left behind.
#[derive(Debug, Clone, Default)]
pub struct EngineOutput {
    /// Stderr log lines, progress blocks excluded
    pub stderr: Vec<String>,
    pub progress: FfmpegProgress,
    pub elapsed: Duration,
}

impl EngineOutput {
    pub fn stderr_tail(&self) -> String {
        tail(&self.stderr)
    }
}

#[async_trait]
pub trait MediaEngine: Send + Sync {
    /// Execute a transformation or analysis command.
    async fn run(&self, invocation: &EngineInvocation) -> MediaResult<EngineOutput>;

    /// Report duration, resolution and streams of `path`.
    async fn inspect(&self, path: &Path, timeout: Duration) -> MediaResult<MediaInfo>;
}

/// Engine backed by the `ffmpeg` and `ffprobe` binaries.
#[derive(Debug, Clone)]
pub struct FfmpegEngine {
    ffmpeg: PathBuf,
    ffprobe: PathBuf,
}

impl FfmpegEngine {
    pub fn new(ffmpeg: impl Into<PathBuf>, ffprobe: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            ffprobe: ffprobe.into(),
        }
    }

    /// Locate both binaries on PATH.
    pub fn detect() -> MediaResult<Self> {
        let ffmpeg = which::which("ffmpeg").map_err(|_| MediaError::FfmpegNotFound)?;
        let ffprobe = which::which("ffprobe").map_err(|_| MediaError::FfprobeNotFound)?;
        Ok(Self::new(ffmpeg, ffprobe))
    }
}

#[async_trait]
impl MediaEngine for FfmpegEngine {
    async fn run(&self, invocation: &EngineInvocation) -> MediaResult<EngineOutput> {
        let stage = invocation.stage;
        let args = invocation.command.build_args();
        debug!(stage = %stage, "Running FFmpeg: ffmpeg {}", args.join(" "));

        let started = Instant::now();
        let mut child = Command::new(&self.ffmpeg)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| MediaError::stage_failed(stage, format!("failed to spawn ffmpeg: {}", e)))?;

        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| MediaError::stage_failed(stage, "stderr not captured"))?;

        let reader = tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            let mut parser = ProgressParser::default();
            let mut log = Vec::new();
            while let Ok(Some(line)) = lines.next_line().await {
                if ProgressParser::is_progress_line(&line) {
                    if let Some(snapshot) = parser.feed(&line) {
                        debug!(
                            stage = %stage,
                            out_time_ms = snapshot.out_time_ms,
                            speed = snapshot.speed,
                            "FFmpeg progress"
                        );
                    }
                } else {
                    log.push(line);
                }
            }
            (log, parser.last().clone())
        });

        let status = match tokio::time::timeout(invocation.timeout, child.wait()).await {
            Ok(status) => status?,
            Err(_) => {
                warn!(
                    stage = %stage,
                    "FFmpeg timed out after {} seconds, killing process",
                    invocation.timeout.as_secs()
                );
                let _ = child.kill().await;
                reader.abort();
                metrics::record_engine_invocation(stage, "timeout", started.elapsed());
                return Err(MediaError::Timeout {
                    stage,
                    secs: invocation.timeout.as_secs(),
                });
            }
        };

        let (stderr, progress) = reader.await.unwrap_or_default();
        let elapsed = started.elapsed();

        if !status.success() {
            metrics::record_engine_invocation(stage, "failed", elapsed);
            return Err(MediaError::engine_failed(
                stage,
                format!("ffmpeg exited with {}", status),
                Some(tail(&stderr)),
                status.code(),
            ));
        }

        metrics::record_engine_invocation(stage, "ok", elapsed);
        Ok(EngineOutput {
            stderr,
            progress,
            elapsed,
        })
    }

    async fn inspect(&self, path: &Path, timeout: Duration) -> MediaResult<MediaInfo> {
        let started = Instant::now();
        let run = Command::new(&self.ffprobe)
            .args([
                "-v",
                "error",
                "-print_format",
                "json",
                "-show_format",
                "-show_streams",
            ])
            .arg(path)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output();

        let output = match tokio::time::timeout(timeout, run).await {
            Ok(output) => output.map_err(|e| MediaError::unreadable(path, e.to_string()))?,
            Err(_) => {
                metrics::record_engine_invocation(MediaStage::Probe, "timeout", started.elapsed());
                return Err(MediaError::Timeout {
                    stage: MediaStage::Probe,
                    secs: timeout.as_secs(),
                });
            }
        };

        if !output.status.success() {
            metrics::record_engine_invocation(MediaStage::Probe, "failed", started.elapsed());
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(MediaError::unreadable(path, stderr.trim().to_string()));
        }

        metrics::record_engine_invocation(MediaStage::Probe, "ok", started.elapsed());
        parse_ffprobe_json(path, &output.stdout)
    }
}

/// Decorator capping how many engine processes run at once.
pub struct BoundedEngine {
    inner: Arc<dyn MediaEngine>,
    permits: Arc<Semaphore>,
}

impl BoundedEngine {
    pub fn new(inner: Arc<dyn MediaEngine>, max_concurrent: usize) -> Self {
        Self {
            inner,
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
        }
    }

    pub fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }
}

#[async_trait]
impl MediaEngine for BoundedEngine {
    async fn run(&self, invocation: &EngineInvocation) -> MediaResult<EngineOutput> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| MediaError::Cancelled)?;
        self.inner.run(invocation).await
    }

    async fn inspect(&self, path: &Path, timeout: Duration) -> MediaResult<MediaInfo> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| MediaError::Cancelled)?;
        self.inner.inspect(path, timeout).await
    }
}

/// Engine, probe cache and per-invocation timeout bundled for the builders.
#[derive(Clone)]
pub struct EngineContext {
    engine: Arc<dyn MediaEngine>,
    probe: MediaProbe,
    timeout: Duration,
}

impl EngineContext {
    pub fn new(engine: Arc<dyn MediaEngine>, timeout: Duration) -> Self {
        let probe = MediaProbe::new(engine.clone(), timeout);
        Self {
            engine,
            probe,
            timeout,
        }
    }

    /// Run `command` on behalf of `stage` with the configured timeout.
    pub async fn run(&self, stage: MediaStage, command: FfmpegCommand) -> MediaResult<EngineOutput> {
        let invocation = EngineInvocation {
            stage,
            command,
            timeout: self.timeout,
        };
        let output = self.engine.run(&invocation).await?;
        // Outputs are rewritten in place on retries, never trust a stale probe.
        if invocation.command.writes_file() {
            self.probe.invalidate(invocation.command.output()).await;
        }
        Ok(output)
    }

    pub fn probe(&self) -> &MediaProbe {
        &self.probe
    }

    pub fn engine(&self) -> &Arc<dyn MediaEngine> {
        &self.engine
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

fn tail(lines: &[String]) -> String {
    let start = lines.len().saturating_sub(STDERR_TAIL_LINES);
    lines[start..].join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::FfmpegInput;
    use crate::testing::FakeEngine;

    #[tokio::test]
    async fn test_bounded_engine_limits_concurrency() {
        let fake = Arc::new(FakeEngine::new().with_delay(Duration::from_millis(50)));
        let bounded = Arc::new(BoundedEngine::new(fake.clone(), 2));

        let mut handles = Vec::new();
        for i in 0..5 {
            let engine = bounded.clone();
            handles.push(tokio::spawn(async move {
                let invocation = EngineInvocation {
                    stage: MediaStage::Extract,
                    command: FfmpegCommand::null_sink()
                        .input(FfmpegInput::lavfi(format!("anullsrc=d={}", i))),
                    timeout: Duration::from_secs(5),
                };
                engine.run(&invocation).await
            }));
        }
        for handle in handles {
            assert!(handle.await.unwrap().is_ok());
        }

        assert_eq!(fake.invocations().len(), 5);
        assert!(fake.max_in_flight() <= 2);
        assert_eq!(bounded.available_permits(), 2);
    }

    #[test]
    fn test_stderr_tail_is_bounded() {
        let lines: Vec<String> = (0..50).map(|i| format!("line {}", i)).collect();
        let output = EngineOutput {
            stderr: lines,
            ..Default::default()
        };
        let tail = output.stderr_tail();
        assert!(tail.starts_with("line 30"));
        assert!(tail.ends_with("line 49"));
    }
}
