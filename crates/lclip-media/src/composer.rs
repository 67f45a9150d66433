//! Clip composition: extract, loop, concatenate, overlay, promote.
//!
//! Both output formats share one intermediate body (context clip followed
//! by the looped expression clip under its audio timeline) and differ only
//! in the final render pass. Renders land as `.partial` files inside the
//! job's work directory and are promoted to their final paths only after
//! every requested output rendered and verified.

use std::path::PathBuf;

use lclip_models::{CompositionJob, CropRect, EncodingConfig, MediaStage, OutputFormat, OutputTarget};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::clip::{extract_clip, loop_to_duration};
use crate::concat::{concat_segments, ConcatSegment, SegmentAudio};
use crate::engine::EngineContext;
use crate::error::{MediaError, MediaResult};
use crate::fs_utils::{partial_path, promote};
use crate::letterbox::detect_letterbox;
use crate::overlay::{render_output, RenderPass};
use crate::probe::MediaInfo;
use crate::resources::JobResources;

/// Composition settings; one encoding for every re-encode in every format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComposerConfig {
    #[serde(default)]
    pub encoding: EncodingConfig,
    /// Accepted drift of a stream-copied cut
    pub keyframe_tolerance_secs: f64,
    /// Accepted drift of a looped clip
    pub loop_tolerance_secs: f64,
    pub detect_black_bars: bool,
    /// Short-form canvas (width, height)
    pub canvas: (u32, u32),
}

impl Default for ComposerConfig {
    fn default() -> Self {
        let (width, height) = OutputFormat::short_form().canvas().unwrap_or((1080, 1920));
        Self {
            encoding: EncodingConfig::default(),
            keyframe_tolerance_secs: 0.1,
            loop_tolerance_secs: 0.05,
            detect_black_bars: true,
            canvas: (width, height),
        }
    }
}

impl ComposerConfig {
    /// Short-form format on the configured canvas.
    pub fn short_form(&self) -> OutputFormat {
        OutputFormat::ShortForm {
            width: self.canvas.0,
            height: self.canvas.1,
        }
    }
}

/// A finished, promoted output.
#[derive(Debug, Clone, PartialEq)]
pub struct ComposedOutput {
    pub format: OutputFormat,
    pub path: PathBuf,
    pub info: MediaInfo,
}

#[derive(Clone)]
pub struct ClipComposer {
    ctx: EngineContext,
    config: ComposerConfig,
}

impl ClipComposer {
    pub fn new(ctx: EngineContext, config: ComposerConfig) -> Self {
        Self { ctx, config }
    }

    pub fn config(&self) -> &ComposerConfig {
        &self.config
    }

    /// Compose every target of `job`.
    ///
    /// Intermediates are tracked through `resources`; on error nothing is
    /// left at any final path.
    pub async fn compose(&self, job: &CompositionJob, resources: &JobResources) -> MediaResult<Vec<ComposedOutput>> {
        if job.targets.is_empty() {
            return Err(MediaError::invalid_input("composition job has no output targets"));
        }
        if job.expression.is_empty() {
            return Err(MediaError::invalid_input("expression range is empty"));
        }

        let source = self.ctx.probe().probe(&job.source).await?;
        if !source.has_video() {
            return Err(MediaError::unreadable(&job.source, "no video stream"));
        }
        let latest_end = job
            .context
            .map_or(job.expression.end_ms, |c| c.end_ms.max(job.expression.end_ms));
        if latest_end as f64 / 1000.0 > source.duration_secs + self.config.keyframe_tolerance_secs {
            return Err(MediaError::invalid_input(format!(
                "clip ends at {:.3}s but source is {:.3}s long",
                latest_end as f64 / 1000.0,
                source.duration_secs
            )));
        }

        let crop = self.detect_crop(job, &source).await?;
        let encoding = &self.config.encoding;
        let tolerance = self.config.keyframe_tolerance_secs;

        let mut segments = Vec::with_capacity(2);
        if let Some(context) = job.context.filter(|c| !c.is_empty()) {
            let path = resources.intermediate("context.mp4")?;
            let clip = extract_clip(&self.ctx, &job.source, context, &path, encoding, tolerance).await?;
            segments.push(ConcatSegment {
                audio: if clip.info.has_audio() { SegmentAudio::Own } else { SegmentAudio::Silent },
                video: clip.path,
                duration_ms: context.duration_ms(),
            });
        }

        let path = resources.intermediate("expression.mp4")?;
        let expression = extract_clip(&self.ctx, &job.source, job.expression, &path, encoding, tolerance).await?;
        let target_ms = job.expression_segment_ms();
        let looped_path = resources.intermediate("expression_looped.mp4")?;
        let looped = loop_to_duration(
            &self.ctx,
            &expression,
            target_ms,
            &looped_path,
            encoding,
            self.config.loop_tolerance_secs,
        )
        .await?;
        segments.push(ConcatSegment {
            video: looped,
            audio: match &job.audio {
                Some(timeline) => SegmentAudio::External(timeline.path.clone()),
                None if expression.info.has_audio() => SegmentAudio::Own,
                None => SegmentAudio::Silent,
            },
            duration_ms: target_ms,
        });

        let body = match segments.as_slice() {
            [single] if single.audio == SegmentAudio::Own => single.video.clone(),
            _ => {
                let joined = resources.intermediate("composed.mp4")?;
                concat_segments(&self.ctx, &segments, &joined, encoding, tolerance).await?;
                joined
            }
        };

        let total_ms = job.total_ms();
        let mut rendered = Vec::with_capacity(job.targets.len());
        for target in &job.targets {
            let partial = resources.track(partial_path(resources.work_dir(), &target.path))?;
            let pass = RenderPass {
                input: &body,
                format: target.format,
                crop: crop.as_ref(),
                overlays: &job.overlays,
                expected_ms: total_ms,
            };
            let info = render_output(&self.ctx, &pass, &partial, encoding, tolerance).await?;
            rendered.push((partial, target.clone(), info));
        }

        self.promote_all(rendered).await
    }

    /// Detect black bars once, before any extraction.
    async fn detect_crop(&self, job: &CompositionJob, source: &MediaInfo) -> MediaResult<Option<CropRect>> {
        if !self.config.detect_black_bars {
            return Ok(None);
        }
        let window = job.context.filter(|c| !c.is_empty()).unwrap_or(job.expression);
        detect_letterbox(&self.ctx, &job.source, window, (source.width, source.height)).await
    }

    /// Move every partial into place, or none of them.
    async fn promote_all(
        &self,
        rendered: Vec<(PathBuf, OutputTarget, MediaInfo)>,
    ) -> MediaResult<Vec<ComposedOutput>> {
        let mut outputs: Vec<ComposedOutput> = Vec::with_capacity(rendered.len());
        for (partial, target, info) in rendered {
            if let Err(e) = promote(&partial, &target.path).await {
                for done in &outputs {
                    if let Err(remove) = tokio::fs::remove_file(&done.path).await {
                        warn!(path = %done.path.display(), "Could not withdraw promoted output: {}", remove);
                    }
                }
                return Err(MediaError::stage_failed(
                    MediaStage::Finalize,
                    format!("promoting {} failed: {}", target.path.display(), e),
                ));
            }
            info!(format = %target.format, path = %target.path.display(), "Output finalized");
            outputs.push(ComposedOutput {
                format: target.format,
                path: target.path,
                info,
            });
        }
        Ok(outputs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::{CleanupPolicy, ResourceManager};
    use crate::testing::{FailureRule, FakeEngine};
    use lclip_models::{
        AudioSegmentSpec, AudioTimeline, SpeechSourceKind, TimeRange, TimelineLayout,
    };
    use std::path::Path;
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;

    struct Fixture {
        dir: TempDir,
        engine: Arc<FakeEngine>,
        composer: ClipComposer,
        manager: ResourceManager,
    }

    async fn fixture(engine: FakeEngine) -> Fixture {
        let dir = TempDir::new().unwrap();
        let engine = Arc::new(engine);
        engine.add_video_file(dir.path().join("ep.mkv"), 1_500.0, 1280, 720).await;
        engine.add_audio_file(dir.path().join("timeline.wav"), 9.5).await;
        let ctx = EngineContext::new(engine.clone(), Duration::from_secs(5));
        let composer = ClipComposer::new(ctx, ComposerConfig::default());
        let manager = ResourceManager::new(dir.path().join("work"), CleanupPolicy::RetainOnFailure);
        Fixture {
            dir,
            engine,
            composer,
            manager,
        }
    }

    fn job(dir: &Path) -> CompositionJob {
        let spec = AudioSegmentSpec::repeated(
            TimelineLayout::default(),
            SpeechSourceKind::OriginalAudio,
            Some(dir.join("speech.wav")),
            2_000,
            3,
        );
        CompositionJob {
            job_id: "job1".into(),
            source: dir.join("ep.mkv"),
            context: Some(TimeRange::new(746_000, 760_000)),
            expression: TimeRange::new(751_600, 756_000),
            audio: Some(AudioTimeline {
                path: dir.join("timeline.wav"),
                total_ms: spec.total_ms(),
                spec,
                measured_secs: 9.0,
            }),
            overlays: vec![],
            targets: vec![
                OutputTarget {
                    format: OutputFormat::LongForm,
                    path: dir.join("out/ep/job1_long.mp4"),
                },
                OutputTarget {
                    format: OutputFormat::short_form(),
                    path: dir.join("out/ep/job1_short.mp4"),
                },
            ],
            work_dir: dir.join("work"),
        }
    }

    #[tokio::test]
    async fn test_compose_both_formats() {
        let f = fixture(FakeEngine::new()).await;
        let job = job(f.dir.path());
        let resources = f.manager.begin("job1").await.unwrap();

        let outputs = f.composer.compose(&job, &resources).await.unwrap();

        assert_eq!(outputs.len(), 2);
        assert!(outputs.iter().all(|o| o.path.exists()));
        let short = outputs.iter().find(|o| o.format != OutputFormat::LongForm).unwrap();
        assert_eq!((short.info.width, short.info.height), (1080, 1920));
        // 14 s context + 1 + 3 x 2 + 2 x 0.5 + 1 = 23 s
        assert!((short.info.duration_secs - 23.0).abs() < 1e-9);

        assert_eq!(f.engine.invocations_for(MediaStage::Concat).len(), 1);
        assert_eq!(f.engine.invocations_for(MediaStage::Overlay).len(), 2);
        assert_eq!(f.engine.invocations_for(MediaStage::Detect).len(), 1);
    }

    #[tokio::test]
    async fn test_detection_precedes_extraction() {
        let f = fixture(FakeEngine::new()).await;
        let resources = f.manager.begin("job1").await.unwrap();
        f.composer.compose(&job(f.dir.path()), &resources).await.unwrap();

        let stages: Vec<MediaStage> = f.engine.invocations().iter().map(|i| i.stage).collect();
        let detect = stages.iter().position(|s| *s == MediaStage::Detect).unwrap();
        let extract = stages.iter().position(|s| *s == MediaStage::Extract).unwrap();
        assert!(detect < extract);
    }

    #[tokio::test]
    async fn test_same_crop_for_both_formats() {
        let f = fixture(FakeEngine::new().with_cropdetect_output(["crop=1280:536:0:92"])).await;
        let resources = f.manager.begin("job1").await.unwrap();
        f.composer.compose(&job(f.dir.path()), &resources).await.unwrap();

        let renders = f.engine.invocations_for(MediaStage::Overlay);
        assert!(renders
            .iter()
            .all(|r| r.command.filter_graph().unwrap().starts_with("crop=1280:536:0:92,")));
    }

    #[tokio::test]
    async fn test_failed_overlay_leaves_no_final_output() {
        let f = fixture(FakeEngine::new()).await;
        f.engine
            .add_failure(FailureRule::fail(MediaStage::Overlay).matching("pad=1080:1920"));
        let job = job(f.dir.path());
        let resources = f.manager.begin("job1").await.unwrap();

        let err = f.composer.compose(&job, &resources).await.unwrap_err();

        assert!(matches!(err, MediaError::StageFailed { stage: MediaStage::Overlay, .. }));
        assert!(job.targets.iter().all(|t| !t.path.exists()));
    }

    #[tokio::test]
    async fn test_single_segment_without_timeline_skips_concat() {
        let f = fixture(FakeEngine::new()).await;
        let mut job = job(f.dir.path());
        job.context = None;
        job.audio = None;
        job.targets.truncate(1);
        let resources = f.manager.begin("job1").await.unwrap();

        let outputs = f.composer.compose(&job, &resources).await.unwrap();

        assert_eq!(outputs.len(), 1);
        assert!(f.engine.invocations_for(MediaStage::Concat).is_empty());
        assert!(f.engine.invocations_for(MediaStage::Loop).is_empty());
    }

    #[tokio::test]
    async fn test_range_past_source_end_is_rejected() {
        let f = fixture(FakeEngine::new()).await;
        let mut job = job(f.dir.path());
        job.expression = TimeRange::new(1_499_000, 1_503_000);
        job.context = None;
        let resources = f.manager.begin("job1").await.unwrap();

        let err = f.composer.compose(&job, &resources).await.unwrap_err();
        assert!(matches!(err, MediaError::InvalidInput(_)));
    }
}
