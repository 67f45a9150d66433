//! End-to-end pipeline scenarios against the recording fake engine.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use lclip_media::testing::{FailureRule, FakeEngine};
use lclip_media::{MediaError, MediaResult};
use lclip_models::timestamp::parse_timestamp_ms;
use lclip_models::{
    ExpressionRecord, FailureKind, JobOutcome, MediaStage, OutputFormat, PipelineStage, SubtitleEntry,
    SubtitleTrack,
};
use lclip_worker::{
    DisabledNarration, ExpressionJob, JobExecutor, NarrationSource, PipelineConfig, PipelineCoordinator,
};
use tempfile::TempDir;
use tokio::sync::watch;

fn entry(index: u32, start: &str, end: &str, text: &str) -> SubtitleEntry {
    SubtitleEntry::new(
        index,
        parse_timestamp_ms(start).unwrap(),
        parse_timestamp_ms(end).unwrap(),
        text,
    )
    .unwrap()
}

fn subtitles() -> SubtitleTrack {
    SubtitleTrack::new(vec![
        entry(1, "00:12:20,000", "00:12:23,500", "Where's Tommy?"),
        entry(2, "00:12:24,000", "00:12:27,000", "[door slams]"),
        entry(3, "00:12:28,000", "00:12:31,500", "We've got no choice."),
        entry(4, "00:12:31,600", "00:12:34,000", "<i>We have to cut him</i>"),
        entry(5, "00:12:34,100", "00:12:36,000", "loose before sunrise."),
        entry(6, "00:12:40,000", "00:12:43,000", "Subtitles by explosiveskull"),
        entry(7, "00:12:44,000", "00:12:46,000", "Then cut him loose."),
    ])
    .unwrap()
}

fn cut_him_loose() -> ExpressionRecord {
    let mut record = ExpressionRecord::new("cut him loose").with_hints("00:12:28,000", "00:12:36,000");
    record.expression_translation = Some("풀어주다".into());
    record.similar_expressions = vec!["let him go".into()];
    record
}

struct Harness {
    dir: TempDir,
    engine: Arc<FakeEngine>,
    episode: PathBuf,
    config: PipelineConfig,
}

impl Harness {
    async fn new(engine: FakeEngine) -> Self {
        let dir = TempDir::new().unwrap();
        let engine = Arc::new(engine);
        let episode = dir.path().join("media/s01e02.mkv");
        engine.add_video_file(&episode, 1_500.0, 1280, 720).await;
        let config = PipelineConfig {
            work_dir: dir.path().join("work"),
            output_dir: dir.path().join("out"),
            subprocess_timeout: Duration::from_secs(30),
            ..PipelineConfig::default()
        };
        Self {
            dir,
            engine,
            episode,
            config,
        }
    }

    fn coordinator(&self) -> PipelineCoordinator {
        self.coordinator_with(Arc::new(DisabledNarration))
    }

    fn coordinator_with(&self, narration: Arc<dyn NarrationSource>) -> PipelineCoordinator {
        PipelineCoordinator::new(self.config.clone(), self.engine.clone(), narration).unwrap()
    }

    fn job(&self, record: ExpressionRecord) -> ExpressionJob {
        ExpressionJob::new(&self.episode, record)
    }
}

/// Per-job work directories currently under the work root.
fn work_dirs(h: &Harness) -> Vec<PathBuf> {
    std::fs::read_dir(&h.config.work_dir)
        .map(|entries| entries.flatten().map(|e| e.path()).filter(|p| p.is_dir()).collect())
        .unwrap_or_default()
}

fn files_in(dir: &Path) -> Vec<String> {
    std::fs::read_dir(dir)
        .unwrap()
        .flatten()
        .map(|e| e.file_name().to_string_lossy().to_string())
        .collect()
}

fn not_cancelled() -> watch::Receiver<bool> {
    watch::channel(false).1
}

/// Narration that "synthesizes" a fixed-length clip through the fake engine.
struct FakeNarration {
    engine: Arc<FakeEngine>,
    secs: f64,
}

#[async_trait]
impl NarrationSource for FakeNarration {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn synthesize(&self, _text: &str, output: &Path) -> MediaResult<PathBuf> {
        self.engine.add_audio_file(output, self.secs).await;
        Ok(output.to_path_buf())
    }
}

struct BrokenNarration;

#[async_trait]
impl NarrationSource for BrokenNarration {
    fn name(&self) -> &'static str {
        "broken"
    }

    async fn synthesize(&self, _text: &str, _output: &Path) -> MediaResult<PathBuf> {
        Err(MediaError::stage_failed(MediaStage::Narration, "voice service unavailable"))
    }
}

#[tokio::test]
async fn test_matched_expression_produces_both_formats() {
    let h = Harness::new(FakeEngine::new()).await;
    let coordinator = h.coordinator();
    let job = h.job(cut_him_loose());

    let status = coordinator.run(&job, subtitles().entries(), &not_cancelled()).await;

    assert_eq!(status.outcome, JobOutcome::Success, "{:?}", status.error_message);
    assert_eq!(status.stage_reached, PipelineStage::Finalized);
    assert!(status.degradations.is_empty());
    assert_eq!(status.artifacts.len(), 2);
    for artifact in &status.artifacts {
        assert!(artifact.path.exists());
        assert_eq!(artifact.path, coordinator.artifact_path(&job, artifact.format));
    }

    // The expression is extracted from its matched window, 12:31.6 - 12:36.
    let extract = h.engine.invocations_for(MediaStage::Extract);
    assert!(extract.iter().any(|i| i.joined_args().contains("-t 4.400")));
}

#[tokio::test]
async fn test_original_audio_timeline_follows_repeat_formula() {
    let h = Harness::new(FakeEngine::new()).await;
    let coordinator = h.coordinator();
    let job = h.job(cut_him_loose());

    let status = coordinator.run(&job, subtitles().entries(), &not_cancelled()).await;
    assert!(status.is_success());

    // Speech 4.4 s: 1.0 + 3 x (4.4 + 0.5) - 0.5 + 1.0 = 16.2 s
    let timeline = h.engine.invocations_for(MediaStage::Timeline);
    assert_eq!(timeline.len(), 1);
    assert_eq!(timeline[0].command.output_value("-t"), Some("16.200"));
    assert!(!timeline[0].output().exists(), "intermediates are removed after success");

    let audio = h.engine.invocations_for(MediaStage::AudioExtract);
    assert_eq!(audio.len(), 1);
    assert!(audio[0].joined_args().contains("-ss 751.600"));
}

#[tokio::test]
async fn test_short_form_is_scaled_and_padded_onto_canvas() {
    let h = Harness::new(FakeEngine::new()).await;
    let coordinator = h.coordinator();
    let job = h.job(cut_him_loose());

    let status = coordinator.run(&job, subtitles().entries(), &not_cancelled()).await;
    assert!(status.is_success());

    // Rendered canvas and streams are verified by probing before promotion.
    let short = status
        .artifacts
        .iter()
        .find(|a| a.format != OutputFormat::LongForm)
        .unwrap();
    assert!(short.path.exists());

    let renders = h.engine.invocations_for(MediaStage::Overlay);
    let short_render = renders
        .iter()
        .find(|r| r.command.filter_graph().is_some_and(|g| g.contains("pad=1080:1920")))
        .unwrap();
    let graph = short_render.command.filter_graph().unwrap();
    assert!(graph.contains("scale=1080:1920:force_original_aspect_ratio=decrease"));
    assert!(!graph.contains("crop="));
    assert!(graph.contains("drawtext="));
    assert_eq!(short_render.command.output_values("-map"), vec!["0:v:0", "0:a:0"]);
}

#[tokio::test]
async fn test_timeout_fails_stage_and_keeps_intermediates() {
    let h = Harness::new(FakeEngine::new()).await;
    h.engine.add_failure(FailureRule::timeout(MediaStage::Concat));
    let coordinator = h.coordinator();
    let job = h.job(cut_him_loose());

    let status = coordinator.run(&job, subtitles().entries(), &not_cancelled()).await;

    assert_eq!(status.outcome, JobOutcome::Failure);
    assert_eq!(status.failure_kind, Some(FailureKind::Timeout));
    assert_eq!(status.stage_reached, PipelineStage::TimelineBuilt);
    assert_eq!(status.failed_stage, Some(PipelineStage::Composed));
    assert_eq!(status.media_stage, Some(MediaStage::Concat));
    assert!(status.artifacts.is_empty());

    // The failed job's work directory stays behind with everything it wrote.
    let work_dirs = work_dirs(&h);
    assert_eq!(work_dirs.len(), 1);
    let written = files_in(&work_dirs[0]);
    for name in ["speech_original.wav", "timeline.wav", "context.mp4", "expression.mp4"] {
        assert!(written.iter().any(|f| f == name), "{} missing from {:?}", name, written);
    }
    assert!(!written.iter().any(|f| f == "composed.mp4"));
    assert_eq!(coordinator.resources().job_count(), 0);

    for format in coordinator.config().output_formats() {
        assert!(!coordinator.artifact_path(&job, format).exists());
    }
}

#[tokio::test]
async fn test_success_removes_every_intermediate() {
    let h = Harness::new(FakeEngine::new()).await;
    let coordinator = h.coordinator();
    let job = h.job(cut_him_loose());

    let status = coordinator.run(&job, subtitles().entries(), &not_cancelled()).await;
    assert!(status.is_success());
    assert!(status.cleanup_warnings.is_empty());

    assert!(work_dirs(&h).is_empty(), "work directories left: {:?}", work_dirs(&h));
    assert_eq!(coordinator.resources().job_count(), 0);
    for artifact in &status.artifacts {
        assert!(artifact.path.exists());
    }
}

#[tokio::test]
async fn test_reinvocation_overwrites_the_same_paths() {
    let h = Harness::new(FakeEngine::new()).await;
    let coordinator = h.coordinator();
    let job = h.job(cut_him_loose());

    let first = coordinator.run(&job, subtitles().entries(), &not_cancelled()).await;
    let second = coordinator.run(&job, subtitles().entries(), &not_cancelled()).await;

    assert!(first.is_success() && second.is_success());
    assert_eq!(first.job_id, second.job_id);
    assert_eq!(first.artifacts, second.artifacts);
}

#[tokio::test]
async fn test_hint_fallback_is_a_degradation_not_a_failure() {
    let h = Harness::new(FakeEngine::new()).await;
    let coordinator = h.coordinator();
    let record = ExpressionRecord::new("spill the beans").with_hints("00:12:28,000", "00:12:36,000");

    let status = coordinator
        .run(&h.job(record), subtitles().entries(), &not_cancelled())
        .await;

    assert!(status.is_success(), "{:?}", status.error_message);
    assert!(status.degradations.iter().any(|d| d.starts_with("hint_timing")));
}

#[tokio::test]
async fn test_no_match_without_hints_fails_before_any_media_work() {
    let h = Harness::new(FakeEngine::new()).await;
    let coordinator = h.coordinator();

    let status = coordinator
        .run(
            &h.job(ExpressionRecord::new("spill the beans")),
            subtitles().entries(),
            &not_cancelled(),
        )
        .await;

    assert_eq!(status.failure_kind, Some(FailureKind::NoMatch));
    assert_eq!(status.failed_stage, Some(PipelineStage::Matched));
    assert!(h.engine.invocations().is_empty());
    assert!(!h.dir.path().join("work").exists());
}

#[tokio::test]
async fn test_unreadable_episode_is_fatal() {
    let h = Harness::new(FakeEngine::new()).await;
    let coordinator = h.coordinator();
    let job = ExpressionJob::new(h.dir.path().join("media/missing.mkv"), cut_him_loose());

    let status = coordinator.run(&job, subtitles().entries(), &not_cancelled()).await;

    assert_eq!(status.failure_kind, Some(FailureKind::MediaUnreadable));
    assert_eq!(status.failed_stage, Some(PipelineStage::TimelineBuilt));
    assert!(status.degradations.is_empty());
}

#[tokio::test]
async fn test_narration_drives_the_timeline() {
    let h = Harness::new(FakeEngine::new()).await;
    let coordinator = h.coordinator_with(Arc::new(FakeNarration {
        engine: h.engine.clone(),
        secs: 1.2,
    }));

    let status = coordinator
        .run(&h.job(cut_him_loose()), subtitles().entries(), &not_cancelled())
        .await;

    assert!(status.is_success());
    assert!(status.degradations.is_empty());
    assert!(h.engine.invocations_for(MediaStage::AudioExtract).is_empty());
    let timeline = h.engine.invocations_for(MediaStage::Timeline);
    // 1.0 + 3 x 1.2 + 2 x 0.5 + 1.0 = 6.6 s
    assert_eq!(timeline[0].command.output_value("-t"), Some("6.600"));
    assert!(timeline[0].joined_args().contains("narration.wav"));
}

#[tokio::test]
async fn test_failed_narration_falls_back_to_original_audio() {
    let h = Harness::new(FakeEngine::new()).await;
    let coordinator = h.coordinator_with(Arc::new(BrokenNarration));

    let status = coordinator
        .run(&h.job(cut_him_loose()), subtitles().entries(), &not_cancelled())
        .await;

    assert!(status.is_success());
    assert!(status
        .degradations
        .iter()
        .any(|d| d.starts_with("narration_fallback")));
    assert_eq!(h.engine.invocations_for(MediaStage::AudioExtract).len(), 1);
}

#[tokio::test]
async fn test_silent_timeline_is_degraded_output() {
    let h = Harness::new(FakeEngine::new()).await;
    h.engine.add_failure(FailureRule::fail(MediaStage::AudioExtract));
    let coordinator = h.coordinator();

    let status = coordinator
        .run(&h.job(cut_him_loose()), subtitles().entries(), &not_cancelled())
        .await;

    assert!(status.is_success(), "{:?}", status.error_message);
    assert!(status.degradations.iter().any(|d| d.starts_with("silent_timeline")));
}

#[tokio::test]
async fn test_cancelled_jobs_stop_before_matching() {
    let h = Harness::new(FakeEngine::new()).await;
    let executor = JobExecutor::new(h.coordinator());
    executor.shutdown();

    let records = executor
        .run_jobs(subtitles(), vec![h.job(cut_him_loose())])
        .await;

    assert_eq!(records.len(), 1);
    assert_eq!(records[0].failure_kind, Some(FailureKind::Cancelled));
    assert_eq!(records[0].failed_stage, Some(PipelineStage::Matched));
    assert!(h.engine.invocations().is_empty());
}

#[tokio::test]
async fn test_executor_bounds_engine_concurrency_and_keeps_order() {
    let mut h = Harness::new(FakeEngine::new().with_delay(Duration::from_millis(5))).await;
    h.config.max_concurrent_jobs = 3;
    h.config.max_ffmpeg_processes = 1;
    let executor = JobExecutor::new(h.coordinator());

    let expressions = ["cut him loose", "We've got no choice", "Where's Tommy"];
    let jobs: Vec<_> = expressions
        .iter()
        .map(|e| h.job(ExpressionRecord::new(*e)))
        .collect();
    let expected: Vec<_> = jobs.iter().map(ExpressionJob::job_id).collect();

    let records = executor.run_jobs(subtitles(), jobs).await;

    assert!(records.iter().all(|r| r.is_success()));
    let ids: Vec<_> = records.iter().map(|r| r.job_id.clone()).collect();
    assert_eq!(ids, expected);
    assert_eq!(h.engine.max_in_flight(), 1);
}

#[tokio::test]
async fn test_duplicate_expressions_do_not_share_resources() {
    let mut h = Harness::new(FakeEngine::new().with_delay(Duration::from_millis(5))).await;
    h.config.max_concurrent_jobs = 2;
    let executor = JobExecutor::new(h.coordinator());

    let jobs = vec![h.job(cut_him_loose()), h.job(cut_him_loose())];
    let records = executor.run_jobs(subtitles(), jobs).await;

    assert_eq!(records.len(), 2);
    assert!(records.iter().all(|r| r.is_success()), "{:?}", records);
    assert_eq!(records[0].artifacts, records[1].artifacts);
    assert!(work_dirs(&h).is_empty());
    assert_eq!(executor.coordinator().resources().job_count(), 0);
}
