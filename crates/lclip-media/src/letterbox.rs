//! Letterbox (black bar) detection.
//!
//! Runs the engine's `cropdetect` analysis over the window about to be
//! extracted, before extraction, so long-form and short-form renders share
//! one crop.

use std::collections::HashMap;
use std::path::Path;

use lclip_models::{CropRect, MediaStage, TimeRange};
use tracing::{debug, warn};

use crate::command::{FfmpegCommand, FfmpegInput};
use crate::engine::EngineContext;
use crate::error::MediaResult;

/// Longest stretch of video analysed.
const MAX_SAMPLE_MS: u64 = 10_000;
/// Luma threshold below which pixels count as black.
const CROPDETECT_LIMIT: u32 = 24;

/// Parse every `crop=W:H:X:Y` reported by cropdetect.
pub fn parse_cropdetect(lines: &[String]) -> Vec<CropRect> {
    lines
        .iter()
        .filter_map(|line| {
            let value = &line[line.rfind("crop=")? + "crop=".len()..];
            let mut parts = value.split_whitespace().next()?.split(':');
            let width = parts.next()?.parse().ok()?;
            let height = parts.next()?.parse().ok()?;
            let x = parts.next()?.parse().ok()?;
            let y = parts.next()?.parse().ok()?;
            Some(CropRect { width, height, x, y })
        })
        .collect()
}

/// Most frequently reported crop; ties go to the earliest report.
pub fn dominant_crop(crops: &[CropRect]) -> Option<CropRect> {
    let mut counts: HashMap<CropRect, (usize, usize)> = HashMap::new();
    for (i, crop) in crops.iter().enumerate() {
        counts.entry(*crop).or_insert((0, i)).0 += 1;
    }
    counts
        .into_iter()
        .max_by(|(_, (ca, fa)), (_, (cb, fb))| ca.cmp(cb).then(fb.cmp(fa)))
        .map(|(crop, _)| crop)
}

/// Detect black bars in `window` of `source`.
///
/// Returns `None` when there is nothing to crop. Analysis failures other
/// than timeouts are logged and treated as "no bars".
pub async fn detect_letterbox(
    ctx: &EngineContext,
    source: &Path,
    window: TimeRange,
    frame: (u32, u32),
) -> MediaResult<Option<CropRect>> {
    let sample_ms = window.duration_ms().min(MAX_SAMPLE_MS);
    if sample_ms == 0 || frame.0 == 0 || frame.1 == 0 {
        return Ok(None);
    }

    let command = FfmpegCommand::null_sink()
        .input(
            FfmpegInput::file(source)
                .seek_ms(window.start_ms)
                .duration_ms(sample_ms),
        )
        .video_filter(format!("cropdetect=limit={}:round=2:reset=0", CROPDETECT_LIMIT))
        .no_audio()
        .log_level("info");

    let output = match ctx.run(MediaStage::Detect, command).await {
        Ok(output) => output,
        Err(e) if e.is_timeout() => return Err(e),
        Err(e) => {
            warn!(source = %source.display(), "Black bar detection failed, rendering uncropped: {}", e);
            return Ok(None);
        }
    };

    let crop = dominant_crop(&parse_cropdetect(&output.stderr))
        .filter(|c| c.is_effective(frame.0, frame.1));
    debug!(source = %source.display(), crop = ?crop, "Black bar detection finished");
    Ok(crop)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FailureRule, FakeEngine};
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;

    fn lines(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_and_pick_dominant() {
        let out = lines(&[
            "[Parsed_cropdetect_0 @ 0x55] x1:0 x2:1279 y1:90 y2:629 w:1280 h:536 x:0 y:92 pts:1 t:0.04 crop=1280:536:0:92",
            "[Parsed_cropdetect_0 @ 0x55] x1:0 x2:1279 y1:0 y2:719 w:1280 h:720 x:0 y:0 pts:2 t:0.08 crop=1280:720:0:0",
            "[Parsed_cropdetect_0 @ 0x55] x1:0 x2:1279 y1:90 y2:629 w:1280 h:536 x:0 y:92 pts:3 t:0.12 crop=1280:536:0:92",
            "frame=  300 fps=0.0 q=-0.0 Lsize=N/A",
        ]);
        let crops = parse_cropdetect(&out);
        assert_eq!(crops.len(), 3);
        assert_eq!(
            dominant_crop(&crops),
            Some(CropRect { width: 1280, height: 536, x: 0, y: 92 })
        );
    }

    #[tokio::test]
    async fn test_detection_runs_on_window() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("ep.mkv");
        let engine = Arc::new(FakeEngine::new().with_cropdetect_output([
            "[Parsed_cropdetect_0 @ 0x1] crop=1280:536:0:92",
        ]));
        engine.add_video_file(&source, 600.0, 1280, 720).await;
        let ctx = EngineContext::new(engine.clone(), Duration::from_secs(5));

        let crop = detect_letterbox(&ctx, &source, TimeRange::new(30_000, 60_000), (1280, 720))
            .await
            .unwrap();
        assert_eq!(crop.map(|c| c.height), Some(536));

        let runs = engine.invocations_for(MediaStage::Detect);
        assert_eq!(runs.len(), 1);
        let input = &runs[0].command.inputs()[0];
        assert_eq!(input.arg_value("-ss"), Some("30.000"));
        assert_eq!(input.arg_value("-t"), Some("10.000"));
    }

    #[tokio::test]
    async fn test_full_frame_crop_is_ignored() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("ep.mkv");
        let engine = Arc::new(FakeEngine::new().with_cropdetect_output(["crop=1280:720:0:0"]));
        engine.add_video_file(&source, 60.0, 1280, 720).await;
        let ctx = EngineContext::new(engine, Duration::from_secs(5));

        let crop = detect_letterbox(&ctx, &source, TimeRange::new(0, 5_000), (1280, 720))
            .await
            .unwrap();
        assert!(crop.is_none());
    }

    #[tokio::test]
    async fn test_failure_degrades_but_timeout_propagates() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("ep.mkv");
        let engine = Arc::new(FakeEngine::new());
        engine.add_video_file(&source, 60.0, 1280, 720).await;
        engine.add_failure(FailureRule::fail(MediaStage::Detect).times(1));
        let ctx = EngineContext::new(engine.clone(), Duration::from_secs(5));
        let window = TimeRange::new(0, 5_000);

        let crop = detect_letterbox(&ctx, &source, window, (1280, 720)).await;
        tokio_test::assert_ok!(&crop);

        engine.add_failure(FailureRule::timeout(MediaStage::Detect));
        let err = detect_letterbox(&ctx, &source, window, (1280, 720))
            .await
            .unwrap_err();
        assert!(err.is_timeout());
    }
}
