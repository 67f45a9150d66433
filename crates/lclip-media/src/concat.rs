//! Stream-mapped concatenation.
//!
//! Segments are joined with the `concat` filter, mapping every video and
//! audio stream explicitly. Each segment contributes exactly one video and
//! one audio stream (silence when it has none) so the output can never lose
//! its audio track.

use std::path::{Path, PathBuf};

use lclip_models::encoding::{AUDIO_CHANNEL_LAYOUT, AUDIO_SAMPLE_RATE};
use lclip_models::timestamp::ms_to_secs_arg;
use lclip_models::{EncodingConfig, MediaStage};
use tracing::info;

use crate::command::{FfmpegCommand, FfmpegInput};
use crate::engine::EngineContext;
use crate::error::{MediaError, MediaResult};
use crate::probe::MediaInfo;

/// Where a segment's audio comes from.
#[derive(Debug, Clone, PartialEq)]
pub enum SegmentAudio {
    /// The video file's own first audio stream
    Own,
    /// A separate audio file (the rendered timeline)
    External(PathBuf),
    /// Generated silence
    Silent,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConcatSegment {
    pub video: PathBuf,
    pub audio: SegmentAudio,
    pub duration_ms: u64,
}

/// Inputs plus filter graph for joining `segments`.
pub fn build_concat_graph(segments: &[ConcatSegment]) -> (Vec<FfmpegInput>, String) {
    let mut inputs = Vec::new();
    let mut chains = Vec::new();
    let mut pairs = String::new();

    for (i, segment) in segments.iter().enumerate() {
        let duration = ms_to_secs_arg(segment.duration_ms);
        let video_index = inputs.len();
        inputs.push(FfmpegInput::file(&segment.video));

        chains.push(format!(
            "[{}:v:0]trim=duration={},setpts=PTS-STARTPTS,format=yuv420p,setsar=1[v{}]",
            video_index, duration, i
        ));

        let normalize = format!(
            "aresample={},aformat=sample_fmts=fltp:channel_layouts={},apad,atrim=duration={},asetpts=PTS-STARTPTS[a{}]",
            AUDIO_SAMPLE_RATE, AUDIO_CHANNEL_LAYOUT, duration, i
        );
        let audio = match &segment.audio {
            SegmentAudio::Own => format!("[{}:a:0]{}", video_index, normalize),
            SegmentAudio::External(path) => {
                let audio_index = inputs.len();
                inputs.push(FfmpegInput::file(path));
                format!("[{}:a:0]{}", audio_index, normalize)
            }
            SegmentAudio::Silent => format!(
                "anullsrc=r={}:cl={},atrim=duration={},asetpts=PTS-STARTPTS[a{}]",
                AUDIO_SAMPLE_RATE, AUDIO_CHANNEL_LAYOUT, duration, i
            ),
        };
        chains.push(audio);
        pairs.push_str(&format!("[v{}][a{}]", i, i));
    }

    chains.push(format!(
        "{}concat=n={}:v=1:a=1[vout][aout]",
        pairs,
        segments.len()
    ));
    (inputs, chains.join(";"))
}

/// Join `segments` into `output` and verify both streams survived.
pub async fn concat_segments(
    ctx: &EngineContext,
    segments: &[ConcatSegment],
    output: &Path,
    encoding: &EncodingConfig,
    tolerance_secs: f64,
) -> MediaResult<MediaInfo> {
    if segments.is_empty() {
        return Err(MediaError::invalid_input("nothing to concatenate"));
    }
    let total_ms: u64 = segments.iter().map(|s| s.duration_ms).sum();
    info!(
        "Concatenating {} segments ({:.3}s) -> {}",
        segments.len(),
        total_ms as f64 / 1000.0,
        output.display()
    );

    let (inputs, graph) = build_concat_graph(segments);
    let command = inputs
        .into_iter()
        .fold(FfmpegCommand::new(output), FfmpegCommand::input)
        .filter_complex(graph)
        .map("[vout]")
        .map("[aout]")
        .output_duration_ms(total_ms)
        .encoding(encoding);
    ctx.run(MediaStage::Concat, command).await?;

    let info = ctx.probe().probe(output).await.map_err(|e| e.in_stage(MediaStage::Concat))?;
    if !info.has_video() || !info.has_audio() {
        return Err(MediaError::stage_failed(
            MediaStage::Concat,
            format!(
                "concatenation lost a stream ({} video, {} audio)",
                info.video_streams, info.audio_streams
            ),
        ));
    }
    if (info.duration_secs - total_ms as f64 / 1000.0).abs() > tolerance_secs {
        return Err(MediaError::DurationMismatch {
            stage: MediaStage::Concat,
            expected_secs: total_ms as f64 / 1000.0,
            actual_secs: info.duration_secs,
        });
    }
    Ok(info)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeEngine;
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;

    fn segments(dir: &Path) -> Vec<ConcatSegment> {
        vec![
            ConcatSegment {
                video: dir.join("context.mp4"),
                audio: SegmentAudio::Own,
                duration_ms: 8_000,
            },
            ConcatSegment {
                video: dir.join("expr.mp4"),
                audio: SegmentAudio::External(dir.join("timeline.wav")),
                duration_ms: 9_500,
            },
        ]
    }

    #[test]
    fn test_graph_maps_every_stream_explicitly() {
        let (inputs, graph) = build_concat_graph(&segments(Path::new("/w")));
        assert_eq!(inputs.len(), 3);
        assert_eq!(inputs[2].source(), "/w/timeline.wav");
        assert!(graph.contains("[0:a:0]aresample=44100"));
        assert!(graph.contains("[2:a:0]aresample=44100"));
        assert!(graph.contains("[1:v:0]trim=duration=9.500"));
        assert!(graph.ends_with("[v0][a0][v1][a1]concat=n=2:v=1:a=1[vout][aout]"));
    }

    #[test]
    fn test_silent_segment_uses_generated_audio() {
        let segs = vec![ConcatSegment {
            video: "/w/mute.mp4".into(),
            audio: SegmentAudio::Silent,
            duration_ms: 2_000,
        }];
        let (inputs, graph) = build_concat_graph(&segs);
        assert_eq!(inputs.len(), 1);
        assert!(graph.contains("anullsrc=r=44100:cl=stereo,atrim=duration=2.000"));
    }

    #[tokio::test]
    async fn test_concat_preserves_audio_and_video() {
        let dir = TempDir::new().unwrap();
        let engine = Arc::new(FakeEngine::new());
        engine.add_video_file(dir.path().join("context.mp4"), 8.0, 1280, 720).await;
        engine.add_video_file(dir.path().join("expr.mp4"), 9.5, 1280, 720).await;
        engine.add_audio_file(dir.path().join("timeline.wav"), 9.5).await;
        let ctx = EngineContext::new(engine.clone(), Duration::from_secs(5));

        let out = dir.path().join("joined.mp4");
        let info = concat_segments(&ctx, &segments(dir.path()), &out, &EncodingConfig::default(), 0.1)
            .await
            .unwrap();

        assert_eq!(info.video_streams, 1);
        assert_eq!(info.audio_streams, 1);
        assert_eq!(info.stream_count(), 2);
        assert!((info.duration_secs - 17.5).abs() < 1e-9);

        let run = &engine.invocations_for(MediaStage::Concat)[0];
        assert_eq!(run.command.output_values("-map"), vec!["[vout]", "[aout]"]);
    }

    #[tokio::test]
    async fn test_dropped_audio_is_a_concat_failure() {
        let dir = TempDir::new().unwrap();
        let engine = Arc::new(FakeEngine::new().with_dropped_audio(MediaStage::Concat));
        engine.add_video_file(dir.path().join("context.mp4"), 8.0, 1280, 720).await;
        engine.add_video_file(dir.path().join("expr.mp4"), 9.5, 1280, 720).await;
        engine.add_audio_file(dir.path().join("timeline.wav"), 9.5).await;
        let ctx = EngineContext::new(engine, Duration::from_secs(5));

        let err = concat_segments(&ctx, &segments(dir.path()), &dir.path().join("j.mp4"), &EncodingConfig::default(), 0.1)
            .await
            .unwrap_err();
        assert!(matches!(err, MediaError::StageFailed { stage: MediaStage::Concat, .. }));
    }
}
