//! Per-expression pipeline.
//!
//! `received -> matched -> timeline_built -> composed -> finalized`, or
//! failed at the stage being attempted. Nothing is retried here: a failed job
//! keeps its intermediates and can be re-invoked, producing the same output
//! paths.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use lclip_dialogue::DialogueMatcher;
use lclip_media::{
    AudioTimelineBuilder, BoundedEngine, ClipComposer, ComposedOutput, EngineContext, JobResources,
    MediaEngine, MediaError, ResourceManager, TimelineRequest,
};
use lclip_models::{
    Artifact, AudioTimeline, CompositionJob, ExpressionRecord, JobId, JobStatusRecord, OutputFormat,
    OutputTarget, OverlayConfig, PipelineStage, ResolvedTiming, SpeechSourceKind, SubtitleEntry,
};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::Instrument;

use crate::config::PipelineConfig;
use crate::error::{PipelineError, PipelineResult};
use crate::logging::JobLogger;
use crate::metrics;
use crate::narration::NarrationSource;
use crate::overlays::{plan_overlays, ClipTiming};

/// Maximum length of the expression slug in artifact names.
const SLUG_MAX_LEN: usize = 40;

/// One expression of one episode.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpressionJob {
    /// Episode media file
    pub episode: PathBuf,
    /// Directory name under the output root; the episode file stem when unset
    #[serde(default)]
    pub episode_id: Option<String>,
    /// Title drawn over the whole clip
    #[serde(default)]
    pub title: Option<String>,
    pub record: ExpressionRecord,
    /// Subtitle index candidates must start at or after
    #[serde(default)]
    pub search_from: usize,
}

impl ExpressionJob {
    pub fn new(episode: impl Into<PathBuf>, record: ExpressionRecord) -> Self {
        Self {
            episode: episode.into(),
            episode_id: None,
            title: None,
            record,
            search_from: 0,
        }
    }

    pub fn job_id(&self) -> JobId {
        JobId::derive(&self.episode, &self.record.expression)
    }

    pub fn episode_id(&self) -> String {
        self.episode_id
            .clone()
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| {
                self.episode
                    .file_stem()
                    .map(|s| slugify(&s.to_string_lossy()))
                    .filter(|s| !s.is_empty())
                    .unwrap_or_else(|| "episode".to_string())
            })
    }
}

/// Lowercase ASCII slug with `_` separators.
pub fn slugify(text: &str) -> String {
    let mut slug = String::with_capacity(text.len());
    for c in text.trim().to_lowercase().chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c);
        } else if !slug.ends_with('_') && !slug.is_empty() {
            slug.push('_');
        }
    }
    let mut slug: String = slug.chars().take(SLUG_MAX_LEN).collect();
    while slug.ends_with('_') {
        slug.pop();
    }
    slug
}

/// Sequences matching, timeline building and composition for each job.
#[derive(Clone)]
pub struct PipelineCoordinator {
    config: PipelineConfig,
    ctx: EngineContext,
    matcher: DialogueMatcher,
    timeline: AudioTimelineBuilder,
    composer: ClipComposer,
    resources: ResourceManager,
    narration: Arc<dyn NarrationSource>,
    overlays: OverlayConfig,
}

impl PipelineCoordinator {
    /// Create a coordinator; `engine` is shared and bounded by
    /// `max_ffmpeg_processes` across every job.
    pub fn new(
        config: PipelineConfig,
        engine: Arc<dyn MediaEngine>,
        narration: Arc<dyn NarrationSource>,
    ) -> PipelineResult<Self> {
        config.validate()?;
        let overlays = config.load_overlay_config()?;
        let bounded: Arc<dyn MediaEngine> =
            Arc::new(BoundedEngine::new(engine, config.max_ffmpeg_processes));
        let ctx = EngineContext::new(bounded, config.subprocess_timeout);

        Ok(Self {
            matcher: DialogueMatcher::new(config.matcher_config()),
            timeline: AudioTimelineBuilder::new(ctx.clone(), config.timeline_config()),
            composer: ClipComposer::new(ctx.clone(), config.composer_config()),
            ctx,
            resources: ResourceManager::new(&config.work_dir, config.cleanup_policy()),
            narration,
            overlays,
            config,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn resources(&self) -> &ResourceManager {
        &self.resources
    }

    /// Deterministic final path of one output.
    pub fn artifact_path(&self, job: &ExpressionJob, format: OutputFormat) -> PathBuf {
        let slug = slugify(&job.record.expression);
        let name = if slug.is_empty() {
            format!("{}_{}.mp4", job.job_id(), format.as_str())
        } else {
            format!("{}_{}_{}.mp4", job.job_id(), slug, format.as_str())
        };
        self.config.output_dir.join(job.episode_id()).join(name)
    }

    /// Run one job to completion. Failures are reported in the record.
    pub async fn run(
        &self,
        job: &ExpressionJob,
        entries: &[SubtitleEntry],
        cancel: &watch::Receiver<bool>,
    ) -> JobStatusRecord {
        let job_id = job.job_id();
        let logger = JobLogger::new(&job_id, &job.record.expression);
        let span = logger.create_span();
        let started = Instant::now();
        let mut status = JobStatusRecord::received(job_id.clone());

        logger.log_start(&job.episode);

        let mut resources = None;
        let result = self
            .execute(job, entries, cancel, &logger, &mut status, &mut resources)
            .instrument(span)
            .await;

        match result {
            Ok(outputs) => {
                let artifacts: Vec<Artifact> = outputs
                    .into_iter()
                    .map(|o| Artifact {
                        format: o.format,
                        path: o.path,
                    })
                    .collect();
                let keep: Vec<PathBuf> = artifacts.iter().map(|a| a.path.clone()).collect();
                status.succeed(artifacts);
                match self.resources.release_all_except(job_id.as_str(), &keep).await {
                    Ok(report) => status.cleanup_warnings = report.warnings(),
                    Err(e) => status.cleanup_warnings.push(e.to_string()),
                }
                self.resources.forget(job_id.as_str());
                metrics::record_job_completed(started.elapsed());
                logger.log_completion(status.artifacts.len(), started.elapsed());
            }
            Err(e) => {
                let kind = e.failure_kind();
                status.fail(kind, e.media_stage(), e.to_string());
                if resources.is_some() {
                    match self.resources.fail(job_id.as_str()).await {
                        Ok(report) => status.cleanup_warnings = report.warnings(),
                        Err(cleanup) => status.cleanup_warnings.push(cleanup.to_string()),
                    }
                    self.resources.forget(job_id.as_str());
                }
                metrics::record_job_failed(status.failed_stage, kind, started.elapsed());
                logger.log_failure(status.failed_stage, kind, &e.to_string());
            }
        }

        for warning in &status.cleanup_warnings {
            logger.log_warning(&format!("could not remove {}", warning));
        }
        status
    }

    async fn execute(
        &self,
        job: &ExpressionJob,
        entries: &[SubtitleEntry],
        cancel: &watch::Receiver<bool>,
        logger: &JobLogger,
        status: &mut JobStatusRecord,
        resources: &mut Option<JobResources>,
    ) -> PipelineResult<Vec<ComposedOutput>> {
        check_cancelled(cancel, PipelineStage::Matched)?;
        let timing = self.resolve_timing(job, entries, logger, status)?;
        status.advance(PipelineStage::Matched);
        logger.log_stage(
            PipelineStage::Matched,
            &format!(
                "expression {} context {}",
                timing.expression_time(),
                timing.context_time()
            ),
        );

        check_cancelled(cancel, PipelineStage::TimelineBuilt)?;
        let job_resources = self.resources.begin(status.job_id.as_str()).await?;
        let job_resources = resources.insert(job_resources);
        let timeline = self
            .build_timeline(job, &timing, job_resources, logger, status)
            .await?;
        status.advance(PipelineStage::TimelineBuilt);
        logger.log_stage(
            PipelineStage::TimelineBuilt,
            &format!(
                "{} x{} = {}ms",
                timeline.spec.source_kind.as_str(),
                timeline.spec.repeat_count,
                timeline.total_ms
            ),
        );

        check_cancelled(cancel, PipelineStage::Composed)?;
        let composition = self.composition_job(job, &timing, timeline, job_resources);
        let outputs = self.composer.compose(&composition, job_resources).await?;
        status.advance(PipelineStage::Composed);
        logger.log_stage(PipelineStage::Composed, &format!("{} output(s)", outputs.len()));

        if let Err(e) = check_cancelled(cancel, PipelineStage::Finalized) {
            withdraw(&outputs, logger).await;
            return Err(e);
        }
        Ok(outputs)
    }

    /// Match the expression, or fall back to the record's hints.
    fn resolve_timing(
        &self,
        job: &ExpressionJob,
        entries: &[SubtitleEntry],
        logger: &JobLogger,
        status: &mut JobStatusRecord,
    ) -> PipelineResult<ResolvedTiming> {
        let timing = self.matcher.resolve(&job.record, entries, job.search_from)?;
        match &timing {
            ResolvedTiming::Matched(result) => {
                metrics::record_match_strategy(result.strategy);
                logger.log_progress(&format!(
                    "matched entries {}..={} by {} (score {:.3})",
                    result.range.first, result.range.last, result.strategy, result.score
                ));
            }
            ResolvedTiming::HintFallback { best_score, .. } => degrade(
                status,
                logger,
                "hint_timing",
                format!(
                    "best match score {:.3} below threshold {:.2}, using timing hints",
                    best_score, self.config.match_threshold
                ),
            ),
        }
        if timing.expression_time().is_empty() {
            return Err(PipelineError::invalid_input(format!(
                "resolved expression range {} is empty",
                timing.expression_time()
            )));
        }
        Ok(timing)
    }

    async fn build_timeline(
        &self,
        job: &ExpressionJob,
        timing: &ResolvedTiming,
        resources: &JobResources,
        logger: &JobLogger,
        status: &mut JobStatusRecord,
    ) -> PipelineResult<AudioTimeline> {
        // Unreadable media must fail the job, not degrade the timeline to silence.
        let source = self.ctx.probe().probe(&job.episode).await?;
        if !source.has_video() {
            return Err(MediaError::unreadable(&job.episode, "no video stream").into());
        }

        let narration = self.narrate(job, resources, logger).await?;
        let narration_requested = self.narration.is_enabled();

        let request = TimelineRequest {
            source: job.episode.clone(),
            dialogue_window: timing.expression_time(),
            repeat_count: self.config.repeat_count,
            narration,
        };
        let timeline = self.timeline.build(&request, resources).await?;

        if narration_requested && timeline.spec.source_kind != SpeechSourceKind::Narration {
            degrade(
                status,
                logger,
                "narration_fallback",
                format!("timeline uses {}", timeline.spec.source_kind.as_str()),
            );
        }
        if timeline.is_degraded() {
            degrade(
                status,
                logger,
                "silent_timeline",
                "no speech audio could be produced".to_string(),
            );
        }
        Ok(timeline)
    }

    /// Narration audio, or `None` so the timeline falls back to original audio.
    async fn narrate(
        &self,
        job: &ExpressionJob,
        resources: &JobResources,
        logger: &JobLogger,
    ) -> PipelineResult<Option<PathBuf>> {
        if !self.narration.is_enabled() {
            return Ok(None);
        }
        let output = resources.intermediate("narration.wav")?;
        match self.narration.synthesize(&job.record.expression, &output).await {
            Ok(path) => {
                if path != output {
                    resources.track(path.clone())?;
                }
                Ok(Some(path))
            }
            Err(e) => {
                logger.log_warning(&format!(
                    "{} narration failed, using original audio: {}",
                    self.narration.name(),
                    e
                ));
                Ok(None)
            }
        }
    }

    fn composition_job(
        &self,
        job: &ExpressionJob,
        timing: &ResolvedTiming,
        timeline: AudioTimeline,
        resources: &JobResources,
    ) -> CompositionJob {
        let context = timing.context_time();
        let clip_timing = ClipTiming {
            context_ms: context.duration_ms(),
            expression_ms: timeline.total_ms,
        };
        let overlays = plan_overlays(&job.record, &self.overlays, job.title.as_deref(), clip_timing);
        let targets = self
            .config
            .output_formats()
            .into_iter()
            .map(|format| OutputTarget {
                format,
                path: self.artifact_path(job, format),
            })
            .collect();

        CompositionJob {
            job_id: resources.job_id().to_string(),
            source: job.episode.clone(),
            context: (!context.is_empty()).then_some(context),
            expression: timing.expression_time(),
            audio: Some(timeline),
            overlays,
            targets,
            work_dir: resources.work_dir().to_path_buf(),
        }
    }
}

/// Record output produced with less than was asked for.
fn degrade(status: &mut JobStatusRecord, logger: &JobLogger, kind: &'static str, detail: String) {
    metrics::record_degradation(kind);
    logger.log_degradation(kind, &detail);
    status.degradations.push(format!("{}: {}", kind, detail));
}

fn check_cancelled(cancel: &watch::Receiver<bool>, next: PipelineStage) -> PipelineResult<()> {
    if *cancel.borrow() {
        return Err(PipelineError::Cancelled(next));
    }
    Ok(())
}

/// Remove promoted outputs of a job cancelled before finalization.
async fn withdraw(outputs: &[ComposedOutput], logger: &JobLogger) {
    for output in outputs {
        if let Err(e) = remove_if_exists(&output.path).await {
            logger.log_warning(&format!("could not withdraw {}: {}", output.path.display(), e));
        }
    }
}

async fn remove_if_exists(path: &Path) -> std::io::Result<()> {
    match tokio::fs::remove_file(path).await {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}
