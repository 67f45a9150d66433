//! Narration collaborator interface.
//!
//! Narration is optional: the timeline builder falls back to the original
//! audio whenever a source is disabled or fails.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use lclip_media::{MediaError, MediaResult};
use lclip_models::MediaStage;
use tokio::process::Command;
use tracing::{debug, warn};

/// Produces spoken audio for an expression.
#[async_trait]
pub trait NarrationSource: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Whether `synthesize` should be attempted at all.
    fn is_enabled(&self) -> bool {
        true
    }

    /// Write narration of `text` to `output` and return the written path.
    async fn synthesize(&self, text: &str, output: &Path) -> MediaResult<PathBuf>;
}

/// Narration switched off.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledNarration;

#[async_trait]
impl NarrationSource for DisabledNarration {
    fn name(&self) -> &'static str {
        "disabled"
    }

    fn is_enabled(&self) -> bool {
        false
    }

    async fn synthesize(&self, _text: &str, _output: &Path) -> MediaResult<PathBuf> {
        Err(MediaError::stage_failed(MediaStage::Narration, "narration is disabled"))
    }
}

/// Runs an external TTS command.
///
/// The template is split on whitespace; `{text}` and `{output}` are replaced
/// inside each argument, so `tts --voice en {text} -o {output}` passes the
/// whole text as one argument.
#[derive(Debug, Clone)]
pub struct CommandNarration {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandNarration {
    pub fn new(template: &str, timeout: Duration) -> MediaResult<Self> {
        let mut parts = template.split_whitespace().map(str::to_string);
        let program = parts
            .next()
            .ok_or_else(|| MediaError::invalid_input("empty narration command"))?;
        let args: Vec<String> = parts.collect();
        if !args.iter().any(|a| a.contains("{output}")) {
            return Err(MediaError::invalid_input(
                "narration command has no {output} placeholder",
            ));
        }
        Ok(Self {
            program,
            args,
            timeout,
        })
    }

    fn render_args(&self, text: &str, output: &Path) -> Vec<String> {
        let output = output.to_string_lossy();
        self.args
            .iter()
            .map(|a| a.replace("{text}", text).replace("{output}", &output))
            .collect()
    }
}

#[async_trait]
impl NarrationSource for CommandNarration {
    fn name(&self) -> &'static str {
        "command"
    }

    async fn synthesize(&self, text: &str, output: &Path) -> MediaResult<PathBuf> {
        let args = self.render_args(text, output);
        debug!(program = %self.program, "Running narration command");

        let run = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();

        let result = match tokio::time::timeout(self.timeout, run).await {
            Ok(result) => result.map_err(|e| {
                MediaError::stage_failed(
                    MediaStage::Narration,
                    format!("failed to spawn {}: {}", self.program, e),
                )
            })?,
            Err(_) => {
                warn!(program = %self.program, "Narration command timed out");
                return Err(MediaError::Timeout {
                    stage: MediaStage::Narration,
                    secs: self.timeout.as_secs(),
                });
            }
        };

        if !result.status.success() {
            return Err(MediaError::engine_failed(
                MediaStage::Narration,
                format!("{} exited with {}", self.program, result.status),
                Some(String::from_utf8_lossy(&result.stderr).trim().to_string()),
                result.status.code(),
            ));
        }
        if !tokio::fs::try_exists(output).await.unwrap_or(false) {
            return Err(MediaError::stage_failed(
                MediaStage::Narration,
                format!("{} wrote no file at {}", self.program, output.display()),
            ));
        }
        Ok(output.to_path_buf())
    }
}
