//! In-memory job map with a JSON snapshot on disk.
//!
//! Every mutation rewrites the snapshot so polling reflects committed
//! progress immediately and jobs survive a process restart. Snapshot
//! write failures are logged, never propagated — losing a snapshot must
//! not fail the provisioning work itself.

use std::collections::HashMap;
use std::path::PathBuf;

use tokio::sync::RwLock;

use crate::domain::{Job, JobId, JobStatus};
use crate::error::ManagerError;

/// Registry of all known jobs, terminal ones included, until explicitly
/// deleted.
#[derive(Debug)]
pub struct JobRegistry {
    jobs: RwLock<HashMap<JobId, Job>>,
    snapshot_path: Option<PathBuf>,
}

impl JobRegistry {
    /// Creates a registry, loading a previous snapshot when one exists.
    ///
    /// Jobs that were still `pending` or `processing` at the last shutdown
    /// cannot be resumed (committed chunks are never rolled back, and no
    /// processor owns them anymore); they are marked `failed` on load with
    /// their progress intact.
    #[must_use]
    pub fn new(snapshot_path: Option<PathBuf>) -> Self {
        let mut jobs = HashMap::new();
        if let Some(path) = &snapshot_path {
            match std::fs::read_to_string(path) {
                Ok(raw) => match serde_json::from_str::<Vec<Job>>(&raw) {
                    Ok(loaded) => {
                        for mut job in loaded {
                            if !job.status.is_terminal() {
                                job.push_error(
                                    String::new(),
                                    "interrupted by restart".to_string(),
                                );
                                job.finish(JobStatus::Failed);
                            }
                            jobs.insert(job.id, job);
                        }
                    }
                    Err(e) => {
                        tracing::warn!(path = %path.display(), error = %e, "job snapshot unreadable, starting empty");
                    }
                },
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "job snapshot unreadable, starting empty");
                }
            }
        }
        Self {
            jobs: RwLock::new(jobs),
            snapshot_path,
        }
    }

    /// Adds a job and persists the snapshot.
    pub async fn insert(&self, job: Job) {
        let mut jobs = self.jobs.write().await;
        jobs.insert(job.id, job);
        self.persist(&jobs);
    }

    /// Returns a copy of one job.
    pub async fn get(&self, job_id: JobId) -> Option<Job> {
        self.jobs.read().await.get(&job_id).cloned()
    }

    /// Returns all jobs, newest first, optionally filtered by status.
    pub async fn list(&self, status: Option<JobStatus>) -> Vec<Job> {
        let jobs = self.jobs.read().await;
        let mut list: Vec<Job> = jobs
            .values()
            .filter(|j| status.is_none_or(|s| j.status == s))
            .cloned()
            .collect();
        list.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        list
    }

    /// Applies a mutation to one job, persists the snapshot and returns
    /// the updated copy.
    ///
    /// # Errors
    ///
    /// Returns [`ManagerError::JobNotFound`] when the job does not exist.
    pub async fn update<F>(&self, job_id: JobId, mutate: F) -> Result<Job, ManagerError>
    where
        F: FnOnce(&mut Job),
    {
        let mut jobs = self.jobs.write().await;
        let job = jobs
            .get_mut(&job_id)
            .ok_or(ManagerError::JobNotFound(job_id))?;
        mutate(job);
        let updated = job.clone();
        self.persist(&jobs);
        Ok(updated)
    }

    /// Removes a terminal job and persists the snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`ManagerError::JobNotFound`] for an unknown id and
    /// [`ManagerError::JobNotTerminal`] while the job could still change.
    pub async fn remove(&self, job_id: JobId) -> Result<(), ManagerError> {
        let mut jobs = self.jobs.write().await;
        let job = jobs.get(&job_id).ok_or(ManagerError::JobNotFound(job_id))?;
        if !job.status.is_terminal() {
            return Err(ManagerError::JobNotTerminal(job_id));
        }
        jobs.remove(&job_id);
        self.persist(&jobs);
        Ok(())
    }

    /// Rewrites the snapshot file. Best-effort: failures are logged.
    fn persist(&self, jobs: &HashMap<JobId, Job>) {
        let Some(path) = &self.snapshot_path else {
            return;
        };
        let mut list: Vec<&Job> = jobs.values().collect();
        list.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        match serde_json::to_string_pretty(&list) {
            Ok(raw) => {
                if let Some(parent) = path.parent() {
                    let _ = std::fs::create_dir_all(parent);
                }
                if let Err(e) = std::fs::write(path, raw) {
                    tracing::warn!(path = %path.display(), error = %e, "failed to persist job snapshot");
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to serialize job snapshot");
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::domain::ClientTemplate;

    fn template() -> ClientTemplate {
        ClientTemplate {
            prefix: "user".to_string(),
            total: 0,
            expiry_time: 0,
            limit_ip: 0,
            reset: 0,
            method: None,
            flow: None,
        }
    }

    #[tokio::test]
    async fn insert_get_and_list() {
        let registry = JobRegistry::new(None);
        let job = Job::new(template(), 100, 1);
        let id = job.id;
        registry.insert(job).await;

        let fetched = registry.get(id).await;
        assert!(fetched.is_some());

        let all = registry.list(None).await;
        assert_eq!(all.len(), 1);
        let pending = registry.list(Some(JobStatus::Pending)).await;
        assert_eq!(pending.len(), 1);
        let done = registry.list(Some(JobStatus::Completed)).await;
        assert!(done.is_empty());
    }

    #[tokio::test]
    async fn update_unknown_job_fails() {
        let registry = JobRegistry::new(None);
        let result = registry.update(JobId::new(), |_| {}).await;
        assert!(matches!(result, Err(ManagerError::JobNotFound(_))));
    }

    #[tokio::test]
    async fn remove_refuses_non_terminal_jobs() {
        let registry = JobRegistry::new(None);
        let job = Job::new(template(), 100, 1);
        let id = job.id;
        registry.insert(job).await;

        let blocked = registry.remove(id).await;
        assert!(matches!(blocked, Err(ManagerError::JobNotTerminal(_))));

        let finished = registry
            .update(id, |job| job.finish(JobStatus::Completed))
            .await;
        assert!(finished.is_ok());
        let removed = registry.remove(id).await;
        assert!(removed.is_ok());
        assert!(registry.get(id).await.is_none());
    }

    #[tokio::test]
    async fn snapshot_round_trips_and_fails_interrupted_jobs() {
        let dir = tempfile::tempdir().ok().unwrap_or_else(|| {
            panic!("tempdir failed");
        });
        let path = dir.path().join("queues.json");

        {
            let registry = JobRegistry::new(Some(path.clone()));
            let mut processing = Job::new(template(), 100, 1);
            processing.status = JobStatus::Processing;
            let processing_id = processing.id;
            registry.insert(processing).await;
            let mut done = Job::new(template(), 10, 2);
            done.finish(JobStatus::Completed);
            registry.insert(done).await;
            assert!(registry.get(processing_id).await.is_some());
        }

        let reloaded = JobRegistry::new(Some(path));
        let all = reloaded.list(None).await;
        assert_eq!(all.len(), 2);
        let failed = reloaded.list(Some(JobStatus::Failed)).await;
        assert_eq!(failed.len(), 1);
        let Some(failed_job) = failed.first() else {
            panic!("expected failed job");
        };
        assert!(
            failed_job
                .errors
                .iter()
                .any(|e| e.reason.contains("interrupted"))
        );
        let completed = reloaded.list(Some(JobStatus::Completed)).await;
        assert_eq!(completed.len(), 1);
    }
}
