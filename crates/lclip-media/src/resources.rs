//! Per-job ownership of temporary files.
//!
//! Every intermediate a job creates is tracked here, and nothing else deletes
//! files. A job is `Active` until it either succeeds (everything but the
//! final artifacts is removed, state `Cleaned`) or fails (files stay for
//! inspection unless the policy says otherwise, state
//! `RetainedForInspection`).

use std::collections::{HashMap, HashSet};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{MediaError, MediaResult};
use crate::metrics;

/// What happens to a failed job's files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CleanupPolicy {
    /// Leave everything on disk for debugging
    #[default]
    RetainOnFailure,
    /// Delete intermediates on failure as well
    CleanAlways,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobResourceState {
    Active,
    Cleaned,
    RetainedForInspection,
}

/// A file owned by a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackedFile {
    pub path: PathBuf,
    pub created_at: DateTime<Utc>,
    pub retained_on_failure: bool,
}

/// Outcome of a cleanup pass. Failed removals are warnings, never errors.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CleanupReport {
    pub removed: Vec<PathBuf>,
    pub retained: Vec<PathBuf>,
    pub failed: Vec<(PathBuf, String)>,
}

impl CleanupReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }

    /// One line per path that could not be removed.
    pub fn warnings(&self) -> Vec<String> {
        self.failed
            .iter()
            .map(|(path, reason)| format!("{}: {}", path.display(), reason))
            .collect()
    }
}

#[derive(Debug)]
struct JobEntry {
    work_dir: PathBuf,
    files: Vec<TrackedFile>,
    state: JobResourceState,
}

/// Registry of job work directories and their files.
#[derive(Debug, Clone)]
pub struct ResourceManager {
    base_dir: PathBuf,
    policy: CleanupPolicy,
    jobs: Arc<Mutex<HashMap<String, JobEntry>>>,
}

impl ResourceManager {
    pub fn new(base_dir: impl Into<PathBuf>, policy: CleanupPolicy) -> Self {
        Self {
            base_dir: base_dir.into(),
            policy,
            jobs: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn policy(&self) -> CleanupPolicy {
        self.policy
    }

    /// Start a job with its own `{job_id}_{uuid}` work directory.
    ///
    /// A job id that is still `Active` is refused: two runs of one job would
    /// otherwise share, and release, each other's files.
    pub async fn begin(&self, job_id: &str) -> MediaResult<JobResources> {
        let dir_name = format!("{}_{}", job_id, uuid::Uuid::new_v4().simple());
        let work_dir = self.base_dir.join(dir_name);

        {
            let mut jobs = self.lock();
            if jobs.get(job_id).is_some_and(|e| e.state == JobResourceState::Active) {
                return Err(MediaError::invalid_input(format!("job {} is already running", job_id)));
            }
            jobs.insert(
                job_id.to_string(),
                JobEntry {
                    work_dir: work_dir.clone(),
                    files: Vec::new(),
                    state: JobResourceState::Active,
                },
            );
        }

        if let Err(e) = tokio::fs::create_dir_all(&work_dir).await {
            self.lock().remove(job_id);
            return Err(e.into());
        }

        debug!(job_id = %job_id, path = %work_dir.display(), "Created job work directory");
        Ok(JobResources {
            job_id: job_id.to_string(),
            work_dir,
            manager: self.clone(),
        })
    }

    /// Register `path` as owned by `job_id`.
    pub fn track(&self, job_id: &str, path: impl Into<PathBuf>) -> MediaResult<()> {
        let path = path.into();
        let mut jobs = self.lock();
        let entry = jobs
            .get_mut(job_id)
            .ok_or_else(|| MediaError::invalid_input(format!("unknown job {}", job_id)))?;
        if entry.state != JobResourceState::Active {
            return Err(MediaError::invalid_input(format!(
                "job {} is no longer active",
                job_id
            )));
        }
        if !entry.files.iter().any(|f| f.path == path) {
            entry.files.push(TrackedFile {
                path,
                created_at: Utc::now(),
                retained_on_failure: true,
            });
        }
        Ok(())
    }

    /// Success path: delete every tracked file.
    pub async fn release_all(&self, job_id: &str) -> MediaResult<CleanupReport> {
        self.release_all_except(job_id, &[]).await
    }

    /// Success path: delete every tracked file except `keep`.
    pub async fn release_all_except(&self, job_id: &str, keep: &[PathBuf]) -> MediaResult<CleanupReport> {
        let (files, work_dir) = self.finish(job_id, JobResourceState::Cleaned)?;
        let keep: HashSet<&Path> = keep.iter().map(PathBuf::as_path).collect();

        let mut report = remove_files(&files, &keep).await;
        let keeps_inside = keep.iter().any(|p| p.starts_with(&work_dir));
        if !keeps_inside {
            remove_work_dir(&work_dir, &mut report).await;
        }

        log_report(job_id, "success", &report);
        Ok(report)
    }

    /// Failure path: keep files unless the policy cleans always.
    pub async fn fail(&self, job_id: &str) -> MediaResult<CleanupReport> {
        match self.policy {
            CleanupPolicy::RetainOnFailure => {
                let (files, work_dir) = self.finish(job_id, JobResourceState::RetainedForInspection)?;
                let retained: Vec<PathBuf> = files.into_iter().map(|f| f.path).collect();
                info!(
                    job_id = %job_id,
                    work_dir = %work_dir.display(),
                    retained = retained.len(),
                    "Job failed, intermediates retained for inspection"
                );
                Ok(CleanupReport {
                    retained,
                    ..Default::default()
                })
            }
            CleanupPolicy::CleanAlways => {
                let (files, work_dir) = self.finish(job_id, JobResourceState::Cleaned)?;
                let mut report = remove_files(&files, &HashSet::new()).await;
                remove_work_dir(&work_dir, &mut report).await;
                log_report(job_id, "failure", &report);
                Ok(report)
            }
        }
    }

    pub fn state(&self, job_id: &str) -> Option<JobResourceState> {
        self.lock().get(job_id).map(|e| e.state)
    }

    pub fn tracked(&self, job_id: &str) -> Vec<TrackedFile> {
        self.lock()
            .get(job_id)
            .map(|e| e.files.clone())
            .unwrap_or_default()
    }

    pub fn work_dir(&self, job_id: &str) -> Option<PathBuf> {
        self.lock().get(job_id).map(|e| e.work_dir.clone())
    }

    /// Jobs with bookkeeping, finished ones included until forgotten.
    pub fn job_count(&self) -> usize {
        self.lock().len()
    }

    /// Drop the bookkeeping for a finished job.
    pub fn forget(&self, job_id: &str) -> bool {
        let mut jobs = self.lock();
        match jobs.get(job_id).map(|e| e.state) {
            Some(JobResourceState::Active) | None => false,
            Some(_) => jobs.remove(job_id).is_some(),
        }
    }

    fn finish(&self, job_id: &str, next: JobResourceState) -> MediaResult<(Vec<TrackedFile>, PathBuf)> {
        let mut jobs = self.lock();
        let entry = jobs
            .get_mut(job_id)
            .ok_or_else(|| MediaError::invalid_input(format!("unknown job {}", job_id)))?;
        if entry.state != JobResourceState::Active {
            return Err(MediaError::invalid_input(format!(
                "job {} already finished",
                job_id
            )));
        }
        entry.state = next;
        Ok((entry.files.clone(), entry.work_dir.clone()))
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, JobEntry>> {
        self.jobs.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Handle a job uses to name and register its intermediates.
#[derive(Debug, Clone)]
pub struct JobResources {
    job_id: String,
    work_dir: PathBuf,
    manager: ResourceManager,
}

impl JobResources {
    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    /// Path for an intermediate inside the work directory (not yet tracked).
    pub fn work_path(&self, name: &str) -> PathBuf {
        self.work_dir.join(name)
    }

    /// Track `path` and hand it back.
    pub fn track(&self, path: impl Into<PathBuf>) -> MediaResult<PathBuf> {
        let path = path.into();
        self.manager.track(&self.job_id, path.clone())?;
        Ok(path)
    }

    /// Tracked path for an intermediate named `name`.
    pub fn intermediate(&self, name: &str) -> MediaResult<PathBuf> {
        self.track(self.work_path(name))
    }

    pub fn manager(&self) -> &ResourceManager {
        &self.manager
    }
}

async fn remove_files(files: &[TrackedFile], keep: &HashSet<&Path>) -> CleanupReport {
    let mut report = CleanupReport::default();
    for file in files {
        if keep.contains(file.path.as_path()) {
            report.retained.push(file.path.clone());
            continue;
        }
        match tokio::fs::remove_file(&file.path).await {
            Ok(()) => report.removed.push(file.path.clone()),
            Err(e) if e.kind() == ErrorKind::NotFound => report.removed.push(file.path.clone()),
            Err(e) => report.failed.push((file.path.clone(), e.to_string())),
        }
    }
    report
}

async fn remove_work_dir(work_dir: &Path, report: &mut CleanupReport) {
    match tokio::fs::remove_dir_all(work_dir).await {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => report.failed.push((work_dir.to_path_buf(), e.to_string())),
    }
}

fn log_report(job_id: &str, path: &str, report: &CleanupReport) {
    metrics::record_cleanup_failures(report.failed.len());
    for (failed, reason) in &report.failed {
        warn!(job_id = %job_id, path = %failed.display(), "Could not remove file: {}", reason);
    }
    debug!(
        job_id = %job_id,
        cleanup = path,
        removed = report.removed.len(),
        retained = report.retained.len(),
        failed = report.failed.len(),
        "Job resources released"
    );
}
