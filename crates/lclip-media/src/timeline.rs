//! Audio timeline assembly.
//!
//! Builds `lead silence, (speech, gap) x n minus the last gap, trail
//! silence` as one PCM track. Speech comes from narration when available,
//! else from the original audio at the dialogue window, else silence of the
//! same length (degraded). Repetition uses `asplit` and exact trims; nothing
//! is ever time-stretched.

use std::path::{Path, PathBuf};

use lclip_models::encoding::{AUDIO_CHANNEL_LAYOUT, AUDIO_CHANNELS, AUDIO_SAMPLE_RATE};
use lclip_models::timestamp::ms_to_secs_arg;
use lclip_models::{
    AudioSegment, AudioSegmentSpec, AudioTimeline, MediaStage, SpeechSourceKind, TimeRange,
    TimelineLayout,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::command::{FfmpegCommand, FfmpegInput};
use crate::engine::EngineContext;
use crate::error::{MediaError, MediaResult};
use crate::resources::JobResources;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineConfig {
    pub layout: TimelineLayout,
    pub sample_rate: u32,
    pub channels: u32,
    /// Accepted difference between the planned and measured duration
    pub tolerance_secs: f64,
}

impl Default for TimelineConfig {
    fn default() -> Self {
        Self {
            layout: TimelineLayout::default(),
            sample_rate: AUDIO_SAMPLE_RATE,
            channels: AUDIO_CHANNELS,
            tolerance_secs: 0.05,
        }
    }
}

/// Inputs for one timeline.
#[derive(Debug, Clone)]
pub struct TimelineRequest {
    /// Episode media, used for the original-audio fallback
    pub source: PathBuf,
    /// Matched dialogue window of the expression
    pub dialogue_window: TimeRange,
    pub repeat_count: u32,
    /// Narration audio, when it was produced
    pub narration: Option<PathBuf>,
}

/// Speech chosen for the timeline.
#[derive(Debug, Clone)]
struct Speech {
    kind: SpeechSourceKind,
    path: Option<PathBuf>,
    duration_ms: u64,
}

#[derive(Clone)]
pub struct AudioTimelineBuilder {
    ctx: EngineContext,
    config: TimelineConfig,
}

impl AudioTimelineBuilder {
    pub fn new(ctx: EngineContext, config: TimelineConfig) -> Self {
        Self { ctx, config }
    }

    pub fn config(&self) -> &TimelineConfig {
        &self.config
    }

    /// Render the timeline for `request` into the job's work directory.
    pub async fn build(&self, request: &TimelineRequest, resources: &JobResources) -> MediaResult<AudioTimeline> {
        if request.dialogue_window.is_empty() {
            return Err(MediaError::invalid_input(format!(
                "empty dialogue window {}",
                request.dialogue_window
            )));
        }
        if request.repeat_count == 0 {
            return Err(MediaError::invalid_input("repeat count must be at least 1"));
        }

        let speech = self.select_speech(request, resources).await?;
        let spec = AudioSegmentSpec::repeated(
            self.config.layout,
            speech.kind,
            speech.path,
            speech.duration_ms,
            request.repeat_count,
        );
        let total_ms = spec.total_ms();

        let output = resources.intermediate("timeline.wav")?;
        info!(
            source = speech.kind.as_str(),
            repeat = spec.repeat_count,
            "Rendering audio timeline ({:.3}s) -> {}",
            total_ms as f64 / 1000.0,
            output.display()
        );
        self.ctx
            .run(MediaStage::Timeline, self.render_command(&spec, &output))
            .await?;

        let measured = self
            .ctx
            .probe()
            .probe(&output)
            .await
            .map_err(|e| e.in_stage(MediaStage::Timeline))?;
        if (measured.duration_secs - total_ms as f64 / 1000.0).abs() > self.config.tolerance_secs {
            return Err(MediaError::DurationMismatch {
                stage: MediaStage::Timeline,
                expected_secs: total_ms as f64 / 1000.0,
                actual_secs: measured.duration_secs,
            });
        }

        Ok(AudioTimeline {
            path: output,
            total_ms,
            spec,
            measured_secs: measured.duration_secs,
        })
    }

    /// Narration, then original audio, then silence. Only timeouts abort.
    async fn select_speech(&self, request: &TimelineRequest, resources: &JobResources) -> MediaResult<Speech> {
        if let Some(narration) = &request.narration {
            match self.ctx.probe().probe(narration).await {
                Ok(info) if info.has_audio() => {
                    return Ok(Speech {
                        kind: SpeechSourceKind::Narration,
                        path: Some(narration.clone()),
                        duration_ms: info.duration_ms(),
                    })
                }
                Ok(_) => warn!(path = %narration.display(), "Narration has no audio stream, using original audio"),
                Err(e) if e.is_timeout() => return Err(e),
                Err(e) => warn!(path = %narration.display(), "Narration unusable, using original audio: {}", e),
            }
        }

        match self.extract_original(request, resources).await {
            Ok(speech) => return Ok(speech),
            Err(e) if e.is_timeout() => return Err(e),
            Err(e) => warn!(
                source = %request.source.display(),
                "Original audio unavailable, timeline degraded to silence: {}",
                e
            ),
        }

        Ok(Speech {
            kind: SpeechSourceKind::Silence,
            path: None,
            duration_ms: request.dialogue_window.duration_ms(),
        })
    }

    async fn extract_original(&self, request: &TimelineRequest, resources: &JobResources) -> MediaResult<Speech> {
        let output = resources.intermediate("speech_original.wav")?;
        let window = request.dialogue_window;
        let command = FfmpegCommand::new(&output)
            .input(
                FfmpegInput::file(&request.source)
                    .seek_ms(window.start_ms)
                    .duration_ms(window.duration_ms()),
            )
            .map("0:a:0")
            .no_video()
            .pcm_audio();
        self.ctx.run(MediaStage::AudioExtract, command).await?;

        let info = self
            .ctx
            .probe()
            .probe(&output)
            .await
            .map_err(|e| e.in_stage(MediaStage::AudioExtract))?;
        if !info.has_audio() {
            return Err(MediaError::stage_failed(
                MediaStage::AudioExtract,
                "extracted speech has no audio stream",
            ));
        }
        Ok(Speech {
            kind: SpeechSourceKind::OriginalAudio,
            path: Some(output),
            duration_ms: info.duration_ms(),
        })
    }

    fn audio_format(&self) -> String {
        format!(
            "aresample={},aformat=sample_fmts=s16:channel_layouts={}",
            self.config.sample_rate,
            channel_layout(self.config.channels)
        )
    }

    fn silence_source(&self) -> String {
        format!(
            "anullsrc=r={}:cl={}",
            self.config.sample_rate,
            channel_layout(self.config.channels)
        )
    }

    /// The single engine command rendering `spec` to `output`.
    pub fn render_command(&self, spec: &AudioSegmentSpec, output: &Path) -> FfmpegCommand {
        let total_ms = spec.total_ms();
        let speech_count = spec.speech_segments().count();
        let speech_source = spec.speech_segments().find_map(|s| match s {
            AudioSegment::Speech { source, .. } => Some(source.clone()),
            AudioSegment::Silence { .. } => None,
        });

        let Some(speech_source) = speech_source else {
            return FfmpegCommand::new(output)
                .input(FfmpegInput::lavfi(self.silence_source()))
                .output_duration_ms(total_ms)
                .pcm_audio();
        };

        let format = self.audio_format();
        let mut chains = Vec::with_capacity(spec.segments.len() + 2);
        let split_labels: String = (0..speech_count).map(|i| format!("[s{}]", i)).collect();
        chains.push(format!(
            "[0:a:0]{},asplit={}{}",
            format, speech_count, split_labels
        ));

        let mut speech_index = 0;
        let mut labels = String::new();
        for (i, segment) in spec.segments.iter().enumerate() {
            let duration = ms_to_secs_arg(segment.duration_ms());
            match segment {
                AudioSegment::Silence { .. } => chains.push(format!(
                    "{},{},atrim=duration={}[g{}]",
                    self.silence_source(),
                    format,
                    duration,
                    i
                )),
                AudioSegment::Speech { .. } => {
                    chains.push(format!(
                        "[s{}]atrim=duration={d},asetpts=PTS-STARTPTS,apad=whole_dur={d}[g{}]",
                        speech_index,
                        i,
                        d = duration
                    ));
                    speech_index += 1;
                }
            }
            labels.push_str(&format!("[g{}]", i));
        }
        chains.push(format!(
            "{}concat=n={}:v=0:a=1[aout]",
            labels,
            spec.segments.len()
        ));

        FfmpegCommand::new(output)
            .input(FfmpegInput::file(speech_source))
            .filter_complex(chains.join(";"))
            .map("[aout]")
            .output_duration_ms(total_ms)
            .pcm_audio()
    }
}

fn channel_layout(channels: u32) -> &'static str {
    if channels == 1 {
        "mono"
    } else {
        AUDIO_CHANNEL_LAYOUT
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::{CleanupPolicy, ResourceManager};
    use crate::testing::{FailureRule, FakeEngine};
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;

    struct Fixture {
        dir: TempDir,
        engine: Arc<FakeEngine>,
        builder: AudioTimelineBuilder,
        resources: JobResources,
    }

    async fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let engine = Arc::new(FakeEngine::new());
        engine.add_video_file(dir.path().join("ep.mkv"), 1_500.0, 1280, 720).await;
        let ctx = EngineContext::new(engine.clone(), Duration::from_secs(5));
        let builder = AudioTimelineBuilder::new(ctx, TimelineConfig::default());
        let manager = ResourceManager::new(dir.path().join("work"), CleanupPolicy::RetainOnFailure);
        let resources = manager.begin("job").await.unwrap();
        Fixture {
            dir,
            engine,
            builder,
            resources,
        }
    }

    fn request(dir: &Path, narration: Option<PathBuf>) -> TimelineRequest {
        TimelineRequest {
            source: dir.join("ep.mkv"),
            dialogue_window: TimeRange::new(751_600, 754_000),
            repeat_count: 3,
            narration,
        }
    }

    #[tokio::test]
    async fn test_original_audio_fallback_duration_formula() {
        let f = fixture().await;
        let timeline = f
            .builder
            .build(&request(f.dir.path(), None), &f.resources)
            .await
            .unwrap();

        // 1.0 + 3 x (2.4 + 0.5) - 0.5 + 1.0
        assert_eq!(timeline.total_ms, 10_200);
        assert_eq!(timeline.spec.total_ms(), timeline.total_ms);
        assert!((timeline.measured_secs - 10.2).abs() <= 0.05);
        assert_eq!(timeline.spec.source_kind, SpeechSourceKind::OriginalAudio);
        assert_eq!(f.engine.invocations_for(MediaStage::AudioExtract).len(), 1);
    }

    #[tokio::test]
    async fn test_zero_repeats_is_rejected() {
        let f = fixture().await;
        let mut req = request(f.dir.path(), None);
        req.repeat_count = 0;

        let err = f.builder.build(&req, &f.resources).await.unwrap_err();
        assert!(matches!(err, MediaError::InvalidInput(_)));
        assert!(f.engine.invocations().is_empty());
    }

    #[tokio::test]
    async fn test_narration_is_preferred() {
        let f = fixture().await;
        let narration = f.dir.path().join("narration.wav");
        f.engine.add_audio_file(&narration, 1.75).await;

        let timeline = f
            .builder
            .build(&request(f.dir.path(), Some(narration)), &f.resources)
            .await
            .unwrap();

        assert_eq!(timeline.spec.source_kind, SpeechSourceKind::Narration);
        assert_eq!(timeline.total_ms, 1_000 + 3 * 1_750 + 2 * 500 + 1_000);
        assert!(f.engine.invocations_for(MediaStage::AudioExtract).is_empty());
    }

    #[tokio::test]
    async fn test_silence_when_every_source_fails() {
        let f = fixture().await;
        f.engine.add_failure(FailureRule::fail(MediaStage::AudioExtract));

        let timeline = f
            .builder
            .build(&request(f.dir.path(), Some(f.dir.path().join("missing.wav"))), &f.resources)
            .await
            .unwrap();

        assert!(timeline.is_degraded());
        assert_eq!(timeline.total_ms, 10_200);
        let render = &f.engine.invocations_for(MediaStage::Timeline)[0];
        assert!(render.command.inputs()[0].is_lavfi());
    }

    #[tokio::test]
    async fn test_extract_timeout_is_fatal() {
        let f = fixture().await;
        f.engine.add_failure(FailureRule::timeout(MediaStage::AudioExtract));

        let err = f
            .builder
            .build(&request(f.dir.path(), None), &f.resources)
            .await
            .unwrap_err();
        assert!(matches!(err, MediaError::Timeout { stage: MediaStage::AudioExtract, .. }));
    }

    #[test]
    fn test_render_graph_repeats_by_split_not_stretch() {
        let spec = AudioSegmentSpec::repeated(
            TimelineLayout::default(),
            SpeechSourceKind::OriginalAudio,
            Some("/w/speech.wav".into()),
            2_400,
            3,
        );
        let ctx = EngineContext::new(Arc::new(FakeEngine::new()), Duration::from_secs(1));
        let builder = AudioTimelineBuilder::new(ctx, TimelineConfig::default());
        let command = builder.render_command(&spec, Path::new("/w/timeline.wav"));
        let graph = command.filter_graph().unwrap();

        assert!(graph.contains("asplit=3[s0][s1][s2]"));
        assert_eq!(graph.matches("apad=whole_dur=2.400").count(), 3);
        assert!(graph.ends_with("[g0][g1][g2][g3][g4][g5][g6]concat=n=7:v=0:a=1[aout]"));
        assert!(!graph.contains("atempo"));
        assert_eq!(command.output_value("-t"), Some("10.200"));
    }
}
