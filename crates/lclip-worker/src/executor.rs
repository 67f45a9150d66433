//! Job executor.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::future::join_all;
use lclip_models::{ExpressionRecord, FailureKind, JobId, JobStatusRecord, SubtitleEntry, SubtitleTrack};
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Semaphore};
use tracing::{error, info, warn};

use crate::coordinator::{ExpressionJob, PipelineCoordinator};
use crate::error::{PipelineError, PipelineResult};

/// One episode and the expressions to cut from it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpisodeManifest {
    pub episode: PathBuf,
    #[serde(default)]
    pub episode_id: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    pub subtitles: Vec<SubtitleEntry>,
    pub expressions: Vec<ExpressionRecord>,
}

impl EpisodeManifest {
    pub fn from_json_file(path: impl AsRef<Path>) -> PipelineResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        serde_json::from_str(&raw).map_err(|e| {
            PipelineError::invalid_input(format!("manifest {}: {}", path.display(), e))
        })
    }

    /// Validated, start-ordered subtitle collection.
    pub fn subtitle_track(&self) -> PipelineResult<SubtitleTrack> {
        SubtitleTrack::new(self.subtitles.clone())
            .map_err(|e| PipelineError::invalid_input(e.to_string()))
    }

    pub fn jobs(&self) -> Vec<ExpressionJob> {
        self.expressions
            .iter()
            .map(|record| ExpressionJob {
                episode: self.episode.clone(),
                episode_id: self.episode_id.clone(),
                title: self.title.clone(),
                record: record.clone(),
                search_from: 0,
            })
            .collect()
    }
}

/// Runs expression jobs concurrently, bounded by `max_concurrent_jobs`.
pub struct JobExecutor {
    coordinator: Arc<PipelineCoordinator>,
    job_semaphore: Arc<Semaphore>,
    shutdown: watch::Sender<bool>,
}

impl JobExecutor {
    pub fn new(coordinator: PipelineCoordinator) -> Self {
        let job_semaphore = Arc::new(Semaphore::new(coordinator.config().max_concurrent_jobs));
        let (shutdown, _) = watch::channel(false);
        Self {
            coordinator: Arc::new(coordinator),
            job_semaphore,
            shutdown,
        }
    }

    pub fn coordinator(&self) -> &PipelineCoordinator {
        &self.coordinator
    }

    /// Cancel every job at its next stage transition.
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    /// Receiver that observes `shutdown`.
    pub fn cancellation(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    /// Run every expression of `manifest`.
    pub async fn run_manifest(&self, manifest: &EpisodeManifest) -> PipelineResult<Vec<JobStatusRecord>> {
        let track = manifest.subtitle_track()?;
        Ok(self.run_jobs(track, manifest.jobs()).await)
    }

    /// Run `jobs` against one shared subtitle collection.
    ///
    /// Records come back in the order of `jobs`. Jobs with the same id write
    /// the same outputs, so they run one after another in a single task.
    pub async fn run_jobs(&self, track: SubtitleTrack, jobs: Vec<ExpressionJob>) -> Vec<JobStatusRecord> {
        info!(
            "Running {} job(s) with {} max concurrent jobs",
            jobs.len(),
            self.coordinator.config().max_concurrent_jobs
        );

        let total = jobs.len();
        let groups = group_by_job_id(jobs);
        let mut handles = Vec::with_capacity(groups.len());
        for (job_id, group) in groups {
            if group.len() > 1 {
                warn!(job_id = %job_id, runs = group.len(), "Duplicate job in batch, running sequentially");
            }
            let coordinator = Arc::clone(&self.coordinator);
            let semaphore = Arc::clone(&self.job_semaphore);
            let track = track.clone();
            let cancel = self.shutdown.subscribe();
            let positions: Vec<usize> = group.iter().map(|(position, _)| *position).collect();

            let handle = tokio::spawn(async move {
                // The semaphore is never closed.
                let _permit = semaphore.acquire_owned().await.ok();
                let mut records = Vec::with_capacity(group.len());
                for (_, job) in &group {
                    records.push(coordinator.run(job, track.entries(), &cancel).await);
                }
                records
            });
            handles.push((job_id, positions, handle));
        }

        let (meta, handles): (Vec<_>, Vec<_>) = handles
            .into_iter()
            .map(|(job_id, positions, handle)| ((job_id, positions), handle))
            .unzip();

        let mut ordered: Vec<Option<JobStatusRecord>> = vec![None; total];
        for (joined, (job_id, positions)) in join_all(handles).await.into_iter().zip(meta) {
            match joined {
                Ok(records) => {
                    for (position, record) in positions.into_iter().zip(records) {
                        ordered[position] = Some(record);
                    }
                }
                Err(e) => {
                    error!(job_id = %job_id, "Job task aborted: {}", e);
                    for position in positions {
                        let mut status = JobStatusRecord::received(job_id.clone());
                        status.fail(FailureKind::CompositionStage, None, format!("job task aborted: {}", e));
                        ordered[position] = Some(status);
                    }
                }
            }
        }
        ordered.into_iter().flatten().collect()
    }
}

/// Jobs grouped by id in order of first appearance, each with its input position.
fn group_by_job_id(jobs: Vec<ExpressionJob>) -> Vec<(JobId, Vec<(usize, ExpressionJob)>)> {
    let mut groups: Vec<(JobId, Vec<(usize, ExpressionJob)>)> = Vec::new();
    for (position, job) in jobs.into_iter().enumerate() {
        let job_id = job.job_id();
        match groups.iter_mut().find(|(id, _)| *id == job_id) {
            Some((_, group)) => group.push((position, job)),
            None => groups.push((job_id, vec![(position, job)])),
        }
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_jobs_share_a_group() {
        let job = |e: &str| ExpressionJob::new("/media/s01e02.mkv", ExpressionRecord::new(e));
        let groups = group_by_job_id(vec![job("cut him loose"), job("no choice"), job("Cut him loose ")]);

        assert_eq!(groups.len(), 2);
        let positions: Vec<usize> = groups[0].1.iter().map(|(p, _)| *p).collect();
        assert_eq!(positions, vec![0, 2]);
        assert_eq!(groups[1].1[0].0, 1);
    }
}
