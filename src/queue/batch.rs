//! Batch processor: drains one job chunk by chunk.
//!
//! Each chunk is one transaction: a grouped record insert followed by one
//! sync-engine pass for the whole chunk, so the inbound's document is
//! rewritten once per chunk. Progress is persisted after every committed
//! chunk; cancellation is observed between chunks, never inside one. A
//! single bad item never aborts its chunk — it is recorded on the job and
//! the rest proceeds.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use super::job_registry::JobRegistry;
use crate::domain::{ClientTemplate, EventBus, JobId, JobStatus, ManagerEvent};
use crate::error::ManagerError;
use crate::persistence::{NewClient, SqliteStore};
use crate::sync::SyncEngine;

/// What one committed chunk produced.
#[derive(Debug, Default)]
struct ChunkOutcome {
    /// Clients created and synced.
    created: usize,
    /// Per-item failures: (email, reason).
    item_errors: Vec<(String, String)>,
    /// Whether the inbound document was rewritten.
    written: bool,
    /// Entry count after the rewrite.
    clients_total: usize,
}

/// Drains jobs in fixed-size chunks against the store and sync engine.
///
/// At most one processor instance runs a given job: `run` claims the job
/// by moving it `pending → processing` and backs off if someone else
/// already did.
#[derive(Debug, Clone)]
pub struct BatchProcessor {
    store: SqliteStore,
    sync: SyncEngine,
    events: EventBus,
    registry: Arc<JobRegistry>,
    chunk_size: usize,
    retry_attempts: u32,
    retry_backoff: Duration,
}

impl BatchProcessor {
    /// Creates a processor.
    #[must_use]
    pub fn new(
        store: SqliteStore,
        sync: SyncEngine,
        events: EventBus,
        registry: Arc<JobRegistry>,
        chunk_size: usize,
        retry_attempts: u32,
        retry_backoff: Duration,
    ) -> Self {
        Self {
            store,
            sync,
            events,
            registry,
            chunk_size: chunk_size.max(1),
            retry_attempts: retry_attempts.max(1),
            retry_backoff,
        }
    }

    /// Runs one job to a terminal state (or returns immediately when the
    /// job is not claimable). Per-item errors accumulate on the job;
    /// store-level errors fail it.
    pub async fn run(&self, job_id: JobId) {
        // Claim the job: pending → processing. Anything else means it was
        // cancelled before starting or another processor owns it.
        let mut claimed = false;
        let updated = self
            .registry
            .update(job_id, |job| {
                if job.status == JobStatus::Pending {
                    job.status = JobStatus::Processing;
                    job.started_at = Some(Utc::now());
                    claimed = true;
                }
            })
            .await;
        let job = match updated {
            Ok(job) if claimed => job,
            Ok(job) => {
                tracing::debug!(%job_id, status = ?job.status, "job not claimable, skipping");
                return;
            }
            Err(e) => {
                tracing::error!(%job_id, error = %e, "job vanished before processing");
                return;
            }
        };
        self.publish_status(job_id, JobStatus::Processing);
        tracing::info!(%job_id, inbound_id = job.inbound_id, total = job.progress.total, "job processing started");

        // Unrecoverable up front: the target inbound must exist and carry
        // a known protocol.
        match self.store.get_inbound(job.inbound_id).await {
            Ok(Some(inbound)) => {
                if let Err(e) = inbound.protocol.parse::<crate::domain::Protocol>() {
                    self.fail_job(job_id, &e).await;
                    return;
                }
            }
            Ok(None) => {
                self.fail_job(job_id, &ManagerError::InboundNotFound(job.inbound_id))
                    .await;
                return;
            }
            Err(e) => {
                self.fail_job(job_id, &e).await;
                return;
            }
        }

        let template = job.template.clone();
        let inbound_id = job.inbound_id;
        let total = job.progress.total;
        let mut index = 0usize;

        while index < total {
            // Cancellation is cooperative and chunk-granular: committed
            // chunks stand, no further chunks are issued.
            match self.registry.get(job_id).await {
                Some(current) if current.status == JobStatus::Cancelled => {
                    tracing::info!(%job_id, completed = current.progress.completed, "job cancelled, stopping");
                    return;
                }
                Some(_) => {}
                None => {
                    tracing::warn!(%job_id, "job deleted mid-flight, stopping");
                    return;
                }
            }

            let chunk = self.chunk_size.min(total - index);
            match self.chunk_with_retry(&template, inbound_id, index, chunk).await {
                Ok(outcome) => {
                    if outcome.written {
                        self.sync.notify_written(inbound_id, outcome.clients_total);
                    }
                    let updated = self
                        .registry
                        .update(job_id, |job| {
                            job.progress.completed += outcome.created;
                            job.progress.failed += outcome.item_errors.len();
                            for (item, reason) in &outcome.item_errors {
                                job.push_error(item.clone(), reason.clone());
                            }
                        })
                        .await;
                    let Ok(updated) = updated else {
                        tracing::warn!(%job_id, "job deleted mid-flight, stopping");
                        return;
                    };
                    let _ = self.events.publish(ManagerEvent::JobProgress {
                        job_id,
                        completed: updated.progress.completed,
                        total: updated.progress.total,
                        timestamp: Utc::now(),
                    });
                    tracing::debug!(%job_id, completed = updated.progress.completed, total, "chunk committed");
                }
                Err(e) => {
                    self.fail_job(job_id, &e).await;
                    return;
                }
            }

            index += chunk;
            // Yield between chunks so status polls and cancel requests are
            // observed within one chunk's duration, not one job's.
            tokio::task::yield_now().await;
        }

        let finished = self
            .registry
            .update(job_id, |job| job.finish(JobStatus::Completed))
            .await;
        if let Ok(job) = finished {
            if job.status == JobStatus::Completed {
                self.publish_status(job_id, JobStatus::Completed);
                tracing::info!(%job_id, completed = job.progress.completed, failed = job.progress.failed, "job completed");
            }
        }
    }

    /// Applies one chunk, retrying transient store contention within the
    /// configured budget before giving up.
    async fn chunk_with_retry(
        &self,
        template: &ClientTemplate,
        inbound_id: i64,
        start_index: usize,
        count: usize,
    ) -> Result<ChunkOutcome, ManagerError> {
        let mut attempt = 0;
        loop {
            match self
                .process_chunk(template, inbound_id, start_index, count)
                .await
            {
                Ok(outcome) => return Ok(outcome),
                Err(e) if e.is_transient() && attempt + 1 < self.retry_attempts => {
                    attempt += 1;
                    tracing::warn!(inbound_id, attempt, error = %e, "chunk write contended, retrying");
                    tokio::time::sleep(self.retry_backoff).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// One chunk: grouped insert + one sync pass, in one transaction under
    /// the inbound's lock.
    async fn process_chunk(
        &self,
        template: &ClientTemplate,
        inbound_id: i64,
        start_index: usize,
        count: usize,
    ) -> Result<ChunkOutcome, ManagerError> {
        let _guard = self.sync.locks().acquire(inbound_id).await;
        let mut tx = self.store.begin().await?;

        let mut outcome = ChunkOutcome::default();
        let mut created_ids = Vec::with_capacity(count);
        let mut requests = HashMap::with_capacity(count);

        for i in 0..count {
            let request = template.to_request(inbound_id, start_index + i);
            if let Err(e) = request.validate() {
                outcome.item_errors.push((request.email, e.to_string()));
                continue;
            }
            let insert = SqliteStore::insert_client(
                &mut *tx,
                &NewClient {
                    inbound_id,
                    email: request.email.clone(),
                    total: request.total,
                    expiry_time: request.expiry_time,
                    reset: request.reset,
                },
            )
            .await;
            match insert {
                Ok(id) => {
                    created_ids.push(id);
                    requests.insert(id, request);
                }
                Err(e @ (ManagerError::Conflict(_) | ManagerError::Validation(_))) => {
                    outcome.item_errors.push((request.email, e.to_string()));
                }
                Err(e) => return Err(e),
            }
        }

        let sync_result = self
            .sync
            .apply_tx(&mut *tx, inbound_id, &created_ids, &requests)
            .await?;
        for (id, error) in &sync_result.failed {
            // Containment: a record that could not be projected must not
            // survive the chunk, or the stores would diverge silently.
            let _ = SqliteStore::delete_client_row(&mut *tx, *id).await;
            let email = requests
                .get(id)
                .map_or_else(|| id.to_string(), |r| r.email.clone());
            outcome.item_errors.push((email, error.to_string()));
        }

        tx.commit().await?;

        outcome.created = created_ids.len() - sync_result.failed.len();
        outcome.written = sync_result.written;
        outcome.clients_total = sync_result.clients_total;
        Ok(outcome)
    }

    async fn fail_job(&self, job_id: JobId, error: &ManagerError) {
        tracing::error!(%job_id, error = %error, "job failed");
        let _ = self
            .registry
            .update(job_id, |job| {
                job.push_error(String::new(), error.to_string());
                job.finish(JobStatus::Failed);
            })
            .await;
        self.publish_status(job_id, JobStatus::Failed);
    }

    fn publish_status(&self, job_id: JobId, status: JobStatus) {
        let _ = self.events.publish(ManagerEvent::JobStatusChanged {
            job_id,
            status,
            timestamp: Utc::now(),
        });
    }
}
