//! Provisioning job: state machine, progress counters and per-item errors.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::JobId;
use super::client::ClientTemplate;

/// Per-item errors kept on a job. Older entries are dropped beyond this
/// bound so a pathological job cannot grow the snapshot without limit.
pub const MAX_JOB_ERRORS: usize = 50;

/// Lifecycle state of a provisioning job.
///
/// `Pending → Processing → {Completed | Failed | Cancelled}`. Terminal
/// states never transition again; only terminal jobs may be deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Accepted, not yet picked up by a batch processor.
    Pending,
    /// A batch processor is draining the job's chunks.
    Processing,
    /// All requested items were attempted; per-item errors may exist.
    Completed,
    /// Unrecoverable error; remaining items were not created.
    Failed,
    /// Cancellation observed at a chunk boundary; committed chunks stand.
    Cancelled,
}

impl JobStatus {
    /// Whether the job will never change state again.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// Progress counters, persisted after every committed chunk.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct JobProgress {
    /// Items successfully created so far.
    pub completed: usize,
    /// Items that failed with a per-item error.
    pub failed: usize,
    /// Items requested in total.
    pub total: usize,
}

/// One per-item failure recorded while the job kept running.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobItemError {
    /// The generated email of the failing item.
    pub item: String,
    /// Failure description.
    pub reason: String,
}

/// A tracked bulk-provisioning request, processed in chunks.
///
/// Multi-inbound submissions become one `Job` per target inbound so
/// partial failure in one inbound never stalls the others.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Opaque job identifier.
    pub id: JobId,
    /// Current state-machine position.
    pub status: JobStatus,
    /// Fields stamped onto every generated client.
    pub template: ClientTemplate,
    /// The single target inbound of this job.
    pub inbound_id: i64,
    /// Progress counters.
    pub progress: JobProgress,
    /// Ordered per-item failures, capped at [`MAX_JOB_ERRORS`].
    pub errors: Vec<JobItemError>,
    /// Submission time.
    pub created_at: DateTime<Utc>,
    /// When a batch processor picked the job up.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    /// When the job reached a terminal state.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Creates a pending job for `count` clients on one inbound.
    #[must_use]
    pub fn new(template: ClientTemplate, count: usize, inbound_id: i64) -> Self {
        Self {
            id: JobId::new(),
            status: JobStatus::Pending,
            template,
            inbound_id,
            progress: JobProgress {
                completed: 0,
                failed: 0,
                total: count,
            },
            errors: Vec::new(),
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    /// Records a per-item failure, dropping the oldest entries beyond the
    /// cap.
    pub fn push_error(&mut self, item: String, reason: String) {
        self.errors.push(JobItemError { item, reason });
        if self.errors.len() > MAX_JOB_ERRORS {
            let overflow = self.errors.len() - MAX_JOB_ERRORS;
            self.errors.drain(..overflow);
        }
    }

    /// Moves the job into a terminal state and stamps `completed_at`.
    /// A no-op if the job is already terminal.
    pub fn finish(&mut self, status: JobStatus) {
        if self.status.is_terminal() || !status.is_terminal() {
            return;
        }
        self.status = status;
        self.completed_at = Some(Utc::now());
    }
}
