//! The synchronization engine.
//!
//! `sync` takes a set of client record ids and makes each owning inbound's
//! config document agree with the record store: lifecycle fields are
//! overwritten in place, missing entries are inserted with fresh
//! credentials, entries whose record is gone are removed. Only this engine
//! writes config documents.
//!
//! Failure containment is per id: a corrupt document or an ambiguous match
//! skips the affected ids and the rest of the call proceeds. Documents are
//! written at most once per affected inbound per call, and only when an
//! entry actually changed — re-syncing a consistent id rewrites nothing.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use chrono::Utc;
use sqlx::SqliteConnection;

use super::locks::InboundLocks;
use crate::domain::credentials::Credentials;
use crate::domain::{
    ConfigClient, ConfigDocument, EventBus, ManagerEvent, NewClientRequest, Protocol,
};
use crate::error::ManagerError;
use crate::persistence::SqliteStore;
use crate::persistence::models::ClientRow;

/// Aggregate result of one `sync` call across all affected inbounds.
#[derive(Debug, Default)]
pub struct SyncReport {
    /// Ids whose entry was updated in place.
    pub updated: Vec<i64>,
    /// Ids already consistent; their documents were not rewritten.
    pub unchanged: Vec<i64>,
    /// Ids for which a new entry was inserted.
    pub inserted: Vec<i64>,
    /// Ids whose stale entries were removed.
    pub removed: Vec<i64>,
    /// Ids skipped with their error (corrupt document, ambiguous match,
    /// store failure). The remaining ids still completed.
    pub failed: Vec<(i64, ManagerError)>,
    /// Inbounds whose document was rewritten by this call.
    pub inbounds_written: Vec<i64>,
}

impl SyncReport {
    /// Whether every requested id ended consistent.
    #[must_use]
    pub fn is_fully_consistent(&self) -> bool {
        self.failed.is_empty()
    }

    fn absorb(&mut self, inbound_id: i64, outcome: InboundSync) {
        self.updated.extend(outcome.updated);
        self.unchanged.extend(outcome.unchanged);
        self.inserted.extend(outcome.inserted);
        self.removed.extend(outcome.removed);
        self.failed.extend(outcome.failed);
        if outcome.written {
            self.inbounds_written.push(inbound_id);
        }
    }
}

/// Result of projecting a batch of ids into a single inbound's document,
/// inside the caller's transaction.
#[derive(Debug, Default)]
pub struct InboundSync {
    /// Ids updated in place.
    pub updated: Vec<i64>,
    /// Ids already consistent.
    pub unchanged: Vec<i64>,
    /// Ids for which a new entry was inserted.
    pub inserted: Vec<i64>,
    /// Ids whose entries were removed.
    pub removed: Vec<i64>,
    /// Per-id failures; the rest of the batch proceeded.
    pub failed: Vec<(i64, ManagerError)>,
    /// Whether the document column was rewritten.
    pub written: bool,
    /// Entry count after the rewrite (for the `ConfigWritten` event).
    pub clients_total: usize,
}

/// Projects record lifecycle fields into config documents.
///
/// Holds the per-inbound lock registry; every document rewrite happens
/// under the owning inbound's exclusive region.
#[derive(Debug, Clone)]
pub struct SyncEngine {
    store: SqliteStore,
    locks: Arc<InboundLocks>,
    events: EventBus,
}

impl SyncEngine {
    /// Creates a new engine over the given store.
    #[must_use]
    pub fn new(store: SqliteStore, locks: Arc<InboundLocks>, events: EventBus) -> Self {
        Self {
            store,
            locks,
            events,
        }
    }

    /// Returns the shared per-inbound lock registry.
    #[must_use]
    pub fn locks(&self) -> &Arc<InboundLocks> {
        &self.locks
    }

    /// Makes the config documents agree with the record store for the
    /// given ids. Ids are deduplicated; inbounds are processed in
    /// ascending order, one transaction and at most one document write
    /// each. Ids whose record no longer exists have their stale entries
    /// removed wherever they appear.
    pub async fn sync(&self, client_ids: &[i64]) -> SyncReport {
        let ids: BTreeSet<i64> = client_ids.iter().copied().collect();
        let mut report = SyncReport::default();

        let mut by_inbound: BTreeMap<i64, Vec<i64>> = BTreeMap::new();
        let mut orphans: Vec<i64> = Vec::new();
        for id in ids {
            match self.store.get_client(id).await {
                Ok(Some(row)) => by_inbound.entry(row.inbound_id).or_default().push(id),
                Ok(None) => orphans.push(id),
                Err(e) => report.failed.push((id, e)),
            }
        }

        for (inbound_id, ids) in by_inbound {
            let _guard = self.locks.acquire(inbound_id).await;
            match self.apply_in_own_tx(inbound_id, &ids, &HashMap::new()).await {
                Ok(outcome) => {
                    if outcome.written {
                        self.notify_written(inbound_id, outcome.clients_total);
                    }
                    report.absorb(inbound_id, outcome);
                }
                Err(e) => {
                    tracing::warn!(inbound_id, error = %e, "sync skipped inbound");
                    report.failed.extend(ids.into_iter().map(|id| (id, e.clone())));
                }
            }
        }

        if !orphans.is_empty() {
            self.remove_orphans(&orphans, &mut report).await;
        }
        report
    }

    async fn apply_in_own_tx(
        &self,
        inbound_id: i64,
        client_ids: &[i64],
        requests: &HashMap<i64, NewClientRequest>,
    ) -> Result<InboundSync, ManagerError> {
        let mut tx = self.store.begin().await?;
        let outcome = self
            .apply_tx(&mut *tx, inbound_id, client_ids, requests)
            .await?;
        tx.commit().await?;
        Ok(outcome)
    }

    /// Projects `client_ids` into `inbound_id`'s document inside the
    /// caller's transaction. The caller must hold the inbound's lock; the
    /// caller also publishes the `ConfigWritten` event after committing
    /// (via [`SyncEngine::notify_written`]).
    ///
    /// `requests` carries the originating creation request per id, so
    /// supplied credentials and the IP limit reach a freshly inserted
    /// entry; ids without a request get generated credentials.
    ///
    /// # Errors
    ///
    /// Returns [`ManagerError::InboundNotFound`] or
    /// [`ManagerError::ConfigCorrupt`] for whole-inbound failures; per-id
    /// failures land in the returned [`InboundSync`] instead.
    pub async fn apply_tx(
        &self,
        conn: &mut SqliteConnection,
        inbound_id: i64,
        client_ids: &[i64],
        requests: &HashMap<i64, NewClientRequest>,
    ) -> Result<InboundSync, ManagerError> {
        let inbound = SqliteStore::fetch_inbound(conn, inbound_id)
            .await?
            .ok_or(ManagerError::InboundNotFound(inbound_id))?;
        let mut doc = ConfigDocument::parse(inbound_id, &inbound.settings)?;

        let mut outcome = InboundSync::default();
        let now_ms = Utc::now().timestamp_millis();
        let mut changed = false;

        for &id in client_ids {
            match SqliteStore::fetch_client(conn, id).await? {
                Some(record) if record.inbound_id == inbound_id => {
                    let matches = doc.matching_indices(record.id, &record.email);
                    match matches.as_slice() {
                        [] => {
                            match self.build_entry(&inbound.protocol, &record, requests.get(&id)) {
                                Ok(entry) => {
                                    doc.clients.push(entry);
                                    changed = true;
                                    outcome.inserted.push(id);
                                }
                                Err(e) => outcome.failed.push((id, e)),
                            }
                        }
                        [idx] => {
                            let Some(entry) = doc.clients.get_mut(*idx) else {
                                continue;
                            };
                            if project_lifecycle(entry, &record, now_ms) {
                                changed = true;
                                outcome.updated.push(id);
                            } else {
                                outcome.unchanged.push(id);
                            }
                        }
                        _ => outcome
                            .failed
                            .push((id, ManagerError::AmbiguousMatch {
                                inbound_id,
                                client_id: id,
                            })),
                    }
                }
                Some(record) => outcome.failed.push((
                    id,
                    ManagerError::Validation(format!(
                        "client {id} belongs to inbound {}, not {inbound_id}",
                        record.inbound_id
                    )),
                )),
                None => {
                    // Delete path: the record (and its email key) is gone,
                    // so every entry still carrying the numeric id is stale.
                    let before = doc.clients.len();
                    doc.clients.retain(|c| !c.matches_numeric_id(id));
                    if doc.clients.len() < before {
                        changed = true;
                        outcome.removed.push(id);
                    } else {
                        outcome.unchanged.push(id);
                    }
                }
            }
        }

        if changed {
            let settings = doc.to_settings()?;
            SqliteStore::update_inbound_settings(conn, inbound_id, &settings).await?;
            outcome.written = true;
        }
        outcome.clients_total = doc.clients.len();
        Ok(outcome)
    }

    /// Removes every entry matching the given record identity from one
    /// inbound's document, inside the caller's transaction. Used on the
    /// explicit delete path, where the email key is still known.
    ///
    /// Returns the number of entries removed; the caller publishes
    /// `ConfigWritten` after committing when it is non-zero.
    ///
    /// # Errors
    ///
    /// Returns [`ManagerError::InboundNotFound`] or
    /// [`ManagerError::ConfigCorrupt`] when the document cannot be read.
    pub async fn remove_entry_tx(
        &self,
        conn: &mut SqliteConnection,
        inbound_id: i64,
        client_id: i64,
        email: &str,
    ) -> Result<usize, ManagerError> {
        let inbound = SqliteStore::fetch_inbound(conn, inbound_id)
            .await?
            .ok_or(ManagerError::InboundNotFound(inbound_id))?;
        let mut doc = ConfigDocument::parse(inbound_id, &inbound.settings)?;

        let before = doc.clients.len();
        doc.clients.retain(|c| !c.matches_record(client_id, email));
        let removed = before - doc.clients.len();
        if removed > 0 {
            let settings = doc.to_settings()?;
            SqliteStore::update_inbound_settings(conn, inbound_id, &settings).await?;
        }
        Ok(removed)
    }

    /// Publishes the rewrite notification for one inbound. Call after the
    /// surrounding transaction committed, never before.
    pub fn notify_written(&self, inbound_id: i64, clients: usize) {
        tracing::debug!(inbound_id, clients, "config document rewritten");
        let _ = self.events.publish(ManagerEvent::ConfigWritten {
            inbound_id,
            clients,
            timestamp: Utc::now(),
        });
    }

    fn build_entry(
        &self,
        protocol: &str,
        record: &ClientRow,
        request: Option<&NewClientRequest>,
    ) -> Result<ConfigClient, ManagerError> {
        let protocol: Protocol = protocol.parse()?;
        let fallback = NewClientRequest {
            inbound_id: record.inbound_id,
            email: record.email.clone(),
            total: record.total,
            expiry_time: record.expiry_time,
            limit_ip: 0,
            reset: record.reset,
            password: None,
            method: None,
            flow: None,
        };
        let request = request.unwrap_or(&fallback);
        let creds = Credentials::for_new_client(protocol, record.id, request);
        Ok(ConfigClient {
            id: creds.id,
            email: record.email.clone(),
            enable: record.enable,
            expiry_time: record.expiry_time,
            total_gb: record.total,
            limit_ip: request.limit_ip,
            reset: record.reset,
            password: creds.password,
            method: creds.method,
            flow: creds.flow,
            updated_at: None,
            extra: serde_json::Map::new(),
        })
    }

    async fn remove_orphans(&self, ids: &[i64], report: &mut SyncReport) {
        let inbounds = match self.store.list_inbounds().await {
            Ok(rows) => rows,
            Err(e) => {
                report
                    .failed
                    .extend(ids.iter().map(|&id| (id, e.clone())));
                return;
            }
        };

        for &id in ids {
            let mut removed_somewhere = false;
            for inbound in &inbounds {
                // Cheap pre-check on the pooled copy before taking the lock.
                let Ok(doc) = ConfigDocument::parse(inbound.id, &inbound.settings) else {
                    continue;
                };
                if !doc.clients.iter().any(|c| c.matches_numeric_id(id)) {
                    continue;
                }
                let _guard = self.locks.acquire(inbound.id).await;
                match self.remove_numeric_in_own_tx(inbound.id, id).await {
                    Ok(0) => {}
                    Ok(_) => {
                        removed_somewhere = true;
                        report.inbounds_written.push(inbound.id);
                    }
                    Err(e) => report.failed.push((id, e)),
                }
            }
            if removed_somewhere {
                report.removed.push(id);
            } else {
                report.unchanged.push(id);
            }
        }
    }

    async fn remove_numeric_in_own_tx(
        &self,
        inbound_id: i64,
        client_id: i64,
    ) -> Result<usize, ManagerError> {
        let mut tx = self.store.begin().await?;
        let inbound = SqliteStore::fetch_inbound(&mut *tx, inbound_id)
            .await?
            .ok_or(ManagerError::InboundNotFound(inbound_id))?;
        let mut doc = ConfigDocument::parse(inbound_id, &inbound.settings)?;

        let before = doc.clients.len();
        doc.clients.retain(|c| !c.matches_numeric_id(client_id));
        let removed = before - doc.clients.len();
        if removed > 0 {
            let settings = doc.to_settings()?;
            SqliteStore::update_inbound_settings(&mut *tx, inbound_id, &settings).await?;
            tx.commit().await?;
            self.notify_written(inbound_id, before - removed);
        }
        Ok(removed)
    }
}

/// Overwrites the entry's lifecycle fields from the record. Returns whether
/// anything differed; `updated_at` is stamped only in that case so an
/// already-consistent entry stays byte-identical.
fn project_lifecycle(entry: &mut ConfigClient, record: &ClientRow, now_ms: i64) -> bool {
    let differs = entry.enable != record.enable
        || entry.expiry_time != record.expiry_time
        || entry.total_gb != record.total
        || entry.reset != record.reset;
    if differs {
        entry.enable = record.enable;
        entry.expiry_time = record.expiry_time;
        entry.total_gb = record.total;
        entry.reset = record.reset;
        entry.updated_at = Some(now_ms);
    }
    differs
}
