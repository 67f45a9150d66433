//! Clip extraction and looping.
//!
//! Extraction tries a stream copy first. Copies cut on keyframes, so the
//! result is probed and re-encoded with an accurate seek when its duration
//! drifts beyond tolerance. Looping repeats video and audio together from a
//! single input; the two streams are never looped independently.

use std::path::{Path, PathBuf};

use lclip_models::timestamp::secs_to_ms;
use lclip_models::{EncodingConfig, MediaStage, TimeRange};
use tracing::{debug, info, warn};

use crate::command::{FfmpegCommand, FfmpegInput};
use crate::engine::EngineContext;
use crate::error::{MediaError, MediaResult};
use crate::probe::MediaInfo;

/// Decoded lead-in before an accurate seek point.
const SEEK_PREROLL_MS: u64 = 3_000;

/// A cut of the source.
#[derive(Debug, Clone)]
pub struct ExtractedClip {
    pub path: PathBuf,
    pub info: MediaInfo,
    /// Whether the stream copy had to be replaced by a re-encode
    pub reencoded: bool,
}

fn within(actual_secs: f64, expected_ms: u64, tolerance_secs: f64) -> bool {
    (actual_secs - expected_ms as f64 / 1000.0).abs() <= tolerance_secs
}

/// Cut `range` out of `source` into `output`.
pub async fn extract_clip(
    ctx: &EngineContext,
    source: &Path,
    range: TimeRange,
    output: &Path,
    encoding: &EncodingConfig,
    tolerance_secs: f64,
) -> MediaResult<ExtractedClip> {
    if range.is_empty() {
        return Err(MediaError::invalid_input(format!("empty clip range {}", range)));
    }

    info!(
        "Extracting clip: {} [{}] -> {}",
        source.display(),
        range,
        output.display()
    );

    let copy = FfmpegCommand::new(output)
        .input(
            FfmpegInput::file(source)
                .seek_ms(range.start_ms)
                .duration_ms(range.duration_ms()),
        )
        .map("0:v:0")
        .map("0:a:0?")
        .codec_copy()
        .zero_timestamps();

    let fallback_reason = match ctx.run(MediaStage::Extract, copy).await {
        Ok(_) => match ctx.probe().probe(output).await {
            Ok(info) if info.has_video() && within(info.duration_secs, range.duration_ms(), tolerance_secs) => {
                debug!(path = %output.display(), "Stream copy accepted");
                return Ok(ExtractedClip {
                    path: output.to_path_buf(),
                    info,
                    reencoded: false,
                });
            }
            Ok(info) => format!(
                "stream copy measured {:.3}s for a {:.3}s range (keyframe boundary)",
                info.duration_secs,
                range.duration_ms() as f64 / 1000.0
            ),
            Err(e) => format!("stream copy unreadable: {}", e),
        },
        Err(e) if e.is_timeout() => return Err(e),
        Err(e) => format!("stream copy failed: {}", e),
    };
    warn!(source = %source.display(), "Re-encoding clip: {}", fallback_reason);

    let preroll = range.start_ms.min(SEEK_PREROLL_MS);
    let reencode = FfmpegCommand::new(output)
        .input(FfmpegInput::file(source).seek_ms(range.start_ms - preroll))
        .output_seek_ms(preroll)
        .output_duration_ms(range.duration_ms())
        .map("0:v:0")
        .map("0:a:0?")
        .encoding(encoding);
    ctx.run(MediaStage::Extract, reencode).await?;

    let info = ctx.probe().probe(output).await.map_err(|e| e.in_stage(MediaStage::Extract))?;
    if !within(info.duration_secs, range.duration_ms(), tolerance_secs) {
        return Err(MediaError::DurationMismatch {
            stage: MediaStage::Extract,
            expected_secs: range.duration_ms() as f64 / 1000.0,
            actual_secs: info.duration_secs,
        });
    }

    Ok(ExtractedClip {
        path: output.to_path_buf(),
        info,
        reencoded: true,
    })
}

/// Number of extra passes `-stream_loop` needs to cover `target_ms`.
pub fn loop_count(clip_ms: u64, target_ms: u64) -> u32 {
    if clip_ms == 0 || target_ms <= clip_ms {
        return 0;
    }
    (target_ms.div_ceil(clip_ms) - 1) as u32
}

/// Loop (or trim) `clip` to exactly `target_ms`.
///
/// A clip already within tolerance is returned as-is without invoking the
/// engine, so looping is idempotent.
pub async fn loop_to_duration(
    ctx: &EngineContext,
    clip: &ExtractedClip,
    target_ms: u64,
    output: &Path,
    encoding: &EncodingConfig,
    tolerance_secs: f64,
) -> MediaResult<PathBuf> {
    if within(clip.info.duration_secs, target_ms, tolerance_secs) {
        debug!(path = %clip.path.display(), "Clip already at target duration, not looping");
        return Ok(clip.path.clone());
    }

    let loops = loop_count(secs_to_ms(clip.info.duration_secs), target_ms);
    info!(
        "Looping clip {} x{} to {:.3}s",
        clip.path.display(),
        loops + 1,
        target_ms as f64 / 1000.0
    );

    let mut input = FfmpegInput::file(&clip.path);
    if loops > 0 {
        input = input.stream_loop(loops);
    }
    let command = FfmpegCommand::new(output)
        .input(input)
        .output_duration_ms(target_ms)
        .map("0:v:0")
        .map("0:a:0?")
        .encoding(encoding);
    ctx.run(MediaStage::Loop, command).await?;

    let info = ctx.probe().probe(output).await.map_err(|e| e.in_stage(MediaStage::Loop))?;
    if !within(info.duration_secs, target_ms, tolerance_secs) {
        return Err(MediaError::DurationMismatch {
            stage: MediaStage::Loop,
            expected_secs: target_ms as f64 / 1000.0,
            actual_secs: info.duration_secs,
        });
    }
    Ok(output.to_path_buf())
}
