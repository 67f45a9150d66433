//! Final render pass per output format.
//!
//! One engine invocation per output: crop, canvas fit and every text overlay
//! run in a single filter chain, so the clip is re-encoded once regardless
//! of how many overlays it carries.

use std::path::Path;

use lclip_models::{CropRect, EncodingConfig, MediaStage, OutputFormat, OverlayItem};
use tracing::info;

use crate::command::{FfmpegCommand, FfmpegInput};
use crate::engine::EngineContext;
use crate::error::{MediaError, MediaResult};
use crate::filters::build_output_filter;
use crate::probe::MediaInfo;

/// Container forced on outputs, whose names do not end in `.mp4` until promoted.
const OUTPUT_CONTAINER: &str = "mp4";

/// Everything a render pass needs.
#[derive(Debug, Clone, Copy)]
pub struct RenderPass<'a> {
    pub input: &'a Path,
    pub format: OutputFormat,
    pub crop: Option<&'a CropRect>,
    pub overlays: &'a [OverlayItem],
    pub expected_ms: u64,
}

pub fn build_render_command(pass: &RenderPass<'_>, output: &Path, encoding: &EncodingConfig) -> FfmpegCommand {
    FfmpegCommand::new(output)
        .input(FfmpegInput::file(pass.input))
        .video_filter(build_output_filter(pass.format, pass.crop, pass.overlays))
        .map("0:v:0")
        .map("0:a:0")
        .encoding(encoding)
        .faststart()
        .output_args(["-f", OUTPUT_CONTAINER])
}

/// Render `pass` into `output` and verify the result.
pub async fn render_output(
    ctx: &EngineContext,
    pass: &RenderPass<'_>,
    output: &Path,
    encoding: &EncodingConfig,
    tolerance_secs: f64,
) -> MediaResult<MediaInfo> {
    info!(
        "Rendering {} output with {} overlays -> {}",
        pass.format,
        pass.overlays.len(),
        output.display()
    );
    ctx.run(MediaStage::Overlay, build_render_command(pass, output, encoding))
        .await?;

    let info = ctx.probe().probe(output).await.map_err(|e| e.in_stage(MediaStage::Overlay))?;
    if let Some((width, height)) = pass.format.canvas() {
        if (info.width, info.height) != (width, height) {
            return Err(MediaError::stage_failed(
                MediaStage::Overlay,
                format!(
                    "rendered {}x{}, expected canvas {}x{}",
                    info.width, info.height, width, height
                ),
            ));
        }
    }
    if !info.has_video() || !info.has_audio() {
        return Err(MediaError::stage_failed(
            MediaStage::Overlay,
            "rendered output is missing a stream",
        ));
    }
    if (info.duration_secs - pass.expected_ms as f64 / 1000.0).abs() > tolerance_secs {
        return Err(MediaError::DurationMismatch {
            stage: MediaStage::Overlay,
            expected_secs: pass.expected_ms as f64 / 1000.0,
            actual_secs: info.duration_secs,
        });
    }
    Ok(info)
}
