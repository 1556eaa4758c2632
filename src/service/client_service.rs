//! Client service: administrative single-item and bulk operations.
//!
//! Every mutator follows the pattern: acquire the inbound lock → open one
//! transaction → write the record row → run the sync engine over the same
//! transaction → commit → publish events. A crash between the two writes
//! therefore never commits an inconsistent pair; either both land or
//! neither does.

use std::collections::HashMap;

use chrono::Utc;

use crate::domain::{EventBus, ManagerEvent, NewClientRequest};
use crate::error::ManagerError;
use crate::persistence::models::StoreStats;
use crate::persistence::{ClientRow, SqliteStore, UnlimitedFilter};
use crate::sync::SyncEngine;

/// Milliseconds in one day, for expiry extension.
const DAY_MS: i64 = 24 * 60 * 60 * 1000;

/// One page of a client listing plus the unpaged total.
#[derive(Debug, Clone)]
pub struct ClientPage {
    /// The requested page.
    pub clients: Vec<ClientRow>,
    /// Matching rows across all pages.
    pub total: i64,
}

/// Result of a bulk administrative operation. Per-item failures never
/// abort the rest of the batch.
#[derive(Debug, Default)]
pub struct BulkOutcome {
    /// Items applied successfully.
    pub updated: usize,
    /// Per-item failures.
    pub errors: Vec<(i64, ManagerError)>,
}

/// Which clients a filtered bulk delete targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteFilter {
    /// Expiry set and already past.
    Expired,
    /// Never moved a byte.
    NoTraffic,
}

/// Orchestration layer for all administrative client operations.
///
/// Stateless coordinator over the store and the sync engine; safe to clone
/// and share.
#[derive(Debug, Clone)]
pub struct ClientService {
    store: SqliteStore,
    sync: SyncEngine,
    events: EventBus,
}

impl ClientService {
    /// Creates a new `ClientService`.
    #[must_use]
    pub fn new(store: SqliteStore, sync: SyncEngine, events: EventBus) -> Self {
        Self {
            store,
            sync,
            events,
        }
    }

    /// Returns the inner sync engine.
    #[must_use]
    pub fn sync_engine(&self) -> &SyncEngine {
        &self.sync
    }

    // ---- creation / deletion ----

    /// Creates one client: a record row plus a config entry with
    /// protocol-appropriate credentials, committed together.
    ///
    /// # Errors
    ///
    /// Returns [`ManagerError::Validation`] on bad input,
    /// [`ManagerError::InboundNotFound`] for a missing target,
    /// [`ManagerError::Conflict`] on a duplicate email, and store or
    /// document errors otherwise.
    pub async fn create_client(
        &self,
        request: NewClientRequest,
    ) -> Result<ClientRow, ManagerError> {
        request.validate()?;
        let inbound = self
            .store
            .get_inbound(request.inbound_id)
            .await?
            .ok_or(ManagerError::InboundNotFound(request.inbound_id))?;
        // Reject unknown protocols before any write.
        let _protocol: crate::domain::Protocol = inbound.protocol.parse()?;

        let _guard = self.sync.locks().acquire(request.inbound_id).await;
        let mut tx = self.store.begin().await?;
        let client_id = SqliteStore::insert_client(
            &mut *tx,
            &crate::persistence::NewClient {
                inbound_id: request.inbound_id,
                email: request.email.clone(),
                total: request.total,
                expiry_time: request.expiry_time,
                reset: request.reset,
            },
        )
        .await?;

        let mut requests = HashMap::new();
        requests.insert(client_id, request.clone());
        let outcome = self
            .sync
            .apply_tx(&mut *tx, request.inbound_id, &[client_id], &requests)
            .await?;
        if let Some((_, e)) = outcome.failed.first() {
            // Dropping the transaction rolls the row insert back.
            return Err(e.clone());
        }
        tx.commit().await?;

        if outcome.written {
            self.sync
                .notify_written(request.inbound_id, outcome.clients_total);
        }
        let _ = self.events.publish(ManagerEvent::ClientCreated {
            client_id,
            inbound_id: request.inbound_id,
            email: request.email.clone(),
            timestamp: Utc::now(),
        });
        tracing::info!(client_id, inbound_id = request.inbound_id, email = %request.email, "client created");

        Ok(ClientRow {
            id: client_id,
            inbound_id: request.inbound_id,
            enable: true,
            email: request.email,
            up: 0,
            down: 0,
            expiry_time: request.expiry_time,
            total: request.total,
            reset: request.reset,
        })
    }

    /// Deletes one client: the record row and every config entry carrying
    /// its identity, committed together.
    ///
    /// # Errors
    ///
    /// Returns [`ManagerError::ClientNotFound`] when the record does not
    /// exist, store or document errors otherwise.
    pub async fn delete_client(&self, client_id: i64) -> Result<(), ManagerError> {
        let record = self
            .store
            .get_client(client_id)
            .await?
            .ok_or(ManagerError::ClientNotFound(client_id))?;

        let _guard = self.sync.locks().acquire(record.inbound_id).await;
        let mut tx = self.store.begin().await?;
        let existed = SqliteStore::delete_client_row(&mut *tx, client_id).await?;
        if !existed {
            return Err(ManagerError::ClientNotFound(client_id));
        }
        let removed = self
            .sync
            .remove_entry_tx(&mut *tx, record.inbound_id, client_id, &record.email)
            .await?;
        tx.commit().await?;

        if removed > 0 {
            let clients = self
                .store
                .client_ids_for_inbound(record.inbound_id)
                .await
                .map(|ids| ids.len())
                .unwrap_or(0);
            self.sync.notify_written(record.inbound_id, clients);
        }
        let _ = self.events.publish(ManagerEvent::ClientRemoved {
            client_id,
            inbound_id: record.inbound_id,
            email: record.email.clone(),
            timestamp: Utc::now(),
        });
        tracing::info!(client_id, inbound_id = record.inbound_id, email = %record.email, "client deleted");
        Ok(())
    }

    /// Deletes a list of clients, collecting per-item failures.
    pub async fn bulk_delete(&self, client_ids: &[i64]) -> BulkOutcome {
        let mut outcome = BulkOutcome::default();
        for &id in client_ids {
            match self.delete_client(id).await {
                Ok(()) => outcome.updated += 1,
                Err(e) => outcome.errors.push((id, e)),
            }
        }
        outcome
    }

    /// Deletes every client matching the filter, collecting per-item
    /// failures.
    ///
    /// # Errors
    ///
    /// Returns a [`ManagerError`] when the candidate query itself fails;
    /// per-item delete failures land in the outcome instead.
    pub async fn delete_by_filter(
        &self,
        filter: DeleteFilter,
        inbound_id: Option<i64>,
    ) -> Result<BulkOutcome, ManagerError> {
        let rows = match filter {
            DeleteFilter::Expired => {
                self.store
                    .list_expired(Utc::now().timestamp_millis(), inbound_id)
                    .await?
            }
            DeleteFilter::NoTraffic => self.store.list_no_traffic(inbound_id).await?,
        };
        let ids: Vec<i64> = rows.iter().map(|r| r.id).collect();
        Ok(self.bulk_delete(&ids).await)
    }

    // ---- single-item lifecycle mutators ----

    /// Enables or disables one client in both stores atomically.
    ///
    /// # Errors
    ///
    /// Returns [`ManagerError::ClientNotFound`] when the record does not
    /// exist, store or document errors otherwise.
    pub async fn set_enable(&self, client_id: i64, enable: bool) -> Result<(), ManagerError> {
        let record = self
            .store
            .get_client(client_id)
            .await?
            .ok_or(ManagerError::ClientNotFound(client_id))?;

        let _guard = self.sync.locks().acquire(record.inbound_id).await;
        let mut tx = self.store.begin().await?;
        if !SqliteStore::update_enable(&mut *tx, client_id, enable).await? {
            return Err(ManagerError::ClientNotFound(client_id));
        }
        let outcome = self
            .sync
            .apply_tx(&mut *tx, record.inbound_id, &[client_id], &HashMap::new())
            .await?;
        if let Some((_, e)) = outcome.failed.first() {
            return Err(e.clone());
        }
        tx.commit().await?;
        if outcome.written {
            self.sync
                .notify_written(record.inbound_id, outcome.clients_total);
        }
        tracing::info!(client_id, enable, "client enable flag set");
        Ok(())
    }

    /// Sets one client's expiry timestamp (epoch millis, 0 = unlimited)
    /// in both stores atomically.
    ///
    /// # Errors
    ///
    /// Returns [`ManagerError::ClientNotFound`] when the record does not
    /// exist, [`ManagerError::Validation`] on a negative value, store or
    /// document errors otherwise.
    pub async fn set_expiry(&self, client_id: i64, expiry_time: i64) -> Result<(), ManagerError> {
        if expiry_time < 0 {
            return Err(ManagerError::Validation(
                "expiry_time must be >= 0".to_string(),
            ));
        }
        let record = self
            .store
            .get_client(client_id)
            .await?
            .ok_or(ManagerError::ClientNotFound(client_id))?;

        let _guard = self.sync.locks().acquire(record.inbound_id).await;
        let mut tx = self.store.begin().await?;
        if !SqliteStore::update_expiry(&mut *tx, client_id, expiry_time).await? {
            return Err(ManagerError::ClientNotFound(client_id));
        }
        let outcome = self
            .sync
            .apply_tx(&mut *tx, record.inbound_id, &[client_id], &HashMap::new())
            .await?;
        if let Some((_, e)) = outcome.failed.first() {
            return Err(e.clone());
        }
        tx.commit().await?;
        if outcome.written {
            self.sync
                .notify_written(record.inbound_id, outcome.clients_total);
        }
        tracing::info!(client_id, expiry_time, "client expiry set");
        Ok(())
    }

    /// Extends one client's expiry by whole days. An expiry that is unset
    /// or already past anchors at now; a future expiry is pushed further
    /// out. Returns the new expiry timestamp.
    ///
    /// # Errors
    ///
    /// Returns [`ManagerError::Validation`] for a non-positive day count,
    /// plus everything [`ClientService::set_expiry`] can return.
    pub async fn extend_expiry(&self, client_id: i64, days: i64) -> Result<i64, ManagerError> {
        if days <= 0 {
            return Err(ManagerError::Validation("days must be >= 1".to_string()));
        }
        let record = self
            .store
            .get_client(client_id)
            .await?
            .ok_or(ManagerError::ClientNotFound(client_id))?;
        let now_ms = Utc::now().timestamp_millis();
        let base = if record.expiry_time == 0 || record.expiry_time < now_ms {
            now_ms
        } else {
            record.expiry_time
        };
        let new_expiry = base + days * DAY_MS;
        self.set_expiry(client_id, new_expiry).await?;
        Ok(new_expiry)
    }

    /// Sets one client's traffic cap (bytes, 0 = unlimited) in both stores
    /// atomically. Usage counters are untouched.
    ///
    /// # Errors
    ///
    /// Returns [`ManagerError::ClientNotFound`] when the record does not
    /// exist, [`ManagerError::Validation`] on a negative value, store or
    /// document errors otherwise.
    pub async fn set_traffic_limit(&self, client_id: i64, total: i64) -> Result<(), ManagerError> {
        if total < 0 {
            return Err(ManagerError::Validation("total must be >= 0".to_string()));
        }
        let record = self
            .store
            .get_client(client_id)
            .await?
            .ok_or(ManagerError::ClientNotFound(client_id))?;

        let _guard = self.sync.locks().acquire(record.inbound_id).await;
        let mut tx = self.store.begin().await?;
        if !SqliteStore::update_total(&mut *tx, client_id, total).await? {
            return Err(ManagerError::ClientNotFound(client_id));
        }
        let outcome = self
            .sync
            .apply_tx(&mut *tx, record.inbound_id, &[client_id], &HashMap::new())
            .await?;
        if let Some((_, e)) = outcome.failed.first() {
            return Err(e.clone());
        }
        tx.commit().await?;
        if outcome.written {
            self.sync
                .notify_written(record.inbound_id, outcome.clients_total);
        }
        tracing::info!(client_id, total, "client traffic cap set");
        Ok(())
    }

    /// Adds to one client's traffic cap without resetting usage.
    ///
    /// # Errors
    ///
    /// Same failure set as [`ClientService::set_traffic_limit`].
    pub async fn add_traffic(&self, client_id: i64, additional: i64) -> Result<(), ManagerError> {
        if additional < 0 {
            return Err(ManagerError::Validation(
                "additional traffic must be >= 0".to_string(),
            ));
        }
        let record = self
            .store
            .get_client(client_id)
            .await?
            .ok_or(ManagerError::ClientNotFound(client_id))?;

        let _guard = self.sync.locks().acquire(record.inbound_id).await;
        let mut tx = self.store.begin().await?;
        if !SqliteStore::add_total(&mut *tx, client_id, additional).await? {
            return Err(ManagerError::ClientNotFound(client_id));
        }
        let outcome = self
            .sync
            .apply_tx(&mut *tx, record.inbound_id, &[client_id], &HashMap::new())
            .await?;
        if let Some((_, e)) = outcome.failed.first() {
            return Err(e.clone());
        }
        tx.commit().await?;
        if outcome.written {
            self.sync
                .notify_written(record.inbound_id, outcome.clients_total);
        }
        tracing::info!(client_id, additional, "client traffic cap increased");
        Ok(())
    }

    /// Zeroes one client's usage counters and sets a new cap, in both
    /// stores atomically.
    ///
    /// # Errors
    ///
    /// Same failure set as [`ClientService::set_traffic_limit`].
    pub async fn reset_traffic(&self, client_id: i64, new_limit: i64) -> Result<(), ManagerError> {
        if new_limit < 0 {
            return Err(ManagerError::Validation(
                "new_limit must be >= 0".to_string(),
            ));
        }
        let record = self
            .store
            .get_client(client_id)
            .await?
            .ok_or(ManagerError::ClientNotFound(client_id))?;

        let _guard = self.sync.locks().acquire(record.inbound_id).await;
        let mut tx = self.store.begin().await?;
        if !SqliteStore::reset_traffic(&mut *tx, client_id, new_limit).await? {
            return Err(ManagerError::ClientNotFound(client_id));
        }
        let outcome = self
            .sync
            .apply_tx(&mut *tx, record.inbound_id, &[client_id], &HashMap::new())
            .await?;
        if let Some((_, e)) = outcome.failed.first() {
            return Err(e.clone());
        }
        tx.commit().await?;
        if outcome.written {
            self.sync
                .notify_written(record.inbound_id, outcome.clients_total);
        }
        tracing::info!(client_id, new_limit, "client traffic reset");
        Ok(())
    }

    // ---- bulk lifecycle mutators ----

    /// Enables or disables a list of clients, collecting per-item
    /// failures.
    pub async fn bulk_set_enable(&self, client_ids: &[i64], enable: bool) -> BulkOutcome {
        let mut outcome = BulkOutcome::default();
        for &id in client_ids {
            match self.set_enable(id, enable).await {
                Ok(()) => outcome.updated += 1,
                Err(e) => outcome.errors.push((id, e)),
            }
        }
        outcome
    }

    /// Extends expiry for a list of clients, collecting per-item failures.
    pub async fn bulk_extend_expiry(&self, client_ids: &[i64], days: i64) -> BulkOutcome {
        let mut outcome = BulkOutcome::default();
        for &id in client_ids {
            match self.extend_expiry(id, days).await {
                Ok(_) => outcome.updated += 1,
                Err(e) => outcome.errors.push((id, e)),
            }
        }
        outcome
    }

    /// Adds traffic to a list of clients' caps, collecting per-item
    /// failures.
    pub async fn bulk_add_traffic(&self, client_ids: &[i64], additional: i64) -> BulkOutcome {
        let mut outcome = BulkOutcome::default();
        for &id in client_ids {
            match self.add_traffic(id, additional).await {
                Ok(()) => outcome.updated += 1,
                Err(e) => outcome.errors.push((id, e)),
            }
        }
        outcome
    }

    /// Resets traffic for a list of clients, collecting per-item failures.
    pub async fn bulk_reset_traffic(&self, client_ids: &[i64], new_limit: i64) -> BulkOutcome {
        let mut outcome = BulkOutcome::default();
        for &id in client_ids {
            match self.reset_traffic(id, new_limit).await {
                Ok(()) => outcome.updated += 1,
                Err(e) => outcome.errors.push((id, e)),
            }
        }
        outcome
    }

    // ---- queries ----

    /// Reads one client.
    ///
    /// # Errors
    ///
    /// Returns [`ManagerError::ClientNotFound`] when the record does not
    /// exist.
    pub async fn get_client(&self, client_id: i64) -> Result<ClientRow, ManagerError> {
        self.store
            .get_client(client_id)
            .await?
            .ok_or(ManagerError::ClientNotFound(client_id))
    }

    /// Lists clients with pagination, an optional inbound filter and an
    /// optional email substring search.
    ///
    /// # Errors
    ///
    /// Returns a [`ManagerError`] on database failure.
    pub async fn list_clients(
        &self,
        inbound_id: Option<i64>,
        search: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> Result<ClientPage, ManagerError> {
        let (clients, total) = self
            .store
            .list_clients(inbound_id, search, limit.max(1), offset.max(0))
            .await?;
        Ok(ClientPage { clients, total })
    }

    /// Clients whose expiry has passed.
    ///
    /// # Errors
    ///
    /// Returns a [`ManagerError`] on database failure.
    pub async fn list_expired(
        &self,
        now_ms: i64,
        inbound_id: Option<i64>,
    ) -> Result<Vec<ClientRow>, ManagerError> {
        self.store.list_expired(now_ms, inbound_id).await
    }

    /// Clients with `enable = 0`.
    ///
    /// # Errors
    ///
    /// Returns a [`ManagerError`] on database failure.
    pub async fn list_disabled(
        &self,
        inbound_id: Option<i64>,
    ) -> Result<Vec<ClientRow>, ManagerError> {
        self.store.list_disabled(inbound_id).await
    }

    /// Capped clients with at most `threshold` bytes remaining.
    ///
    /// # Errors
    ///
    /// Returns a [`ManagerError`] on database failure.
    pub async fn list_low_traffic(
        &self,
        threshold: i64,
        inbound_id: Option<i64>,
    ) -> Result<Vec<ClientRow>, ManagerError> {
        self.store.list_low_traffic(threshold, inbound_id).await
    }

    /// Clients with no expiry, no cap, or neither.
    ///
    /// # Errors
    ///
    /// Returns a [`ManagerError`] on database failure.
    pub async fn list_unlimited(
        &self,
        filter: UnlimitedFilter,
        inbound_id: Option<i64>,
    ) -> Result<Vec<ClientRow>, ManagerError> {
        self.store.list_unlimited(filter, inbound_id).await
    }

    /// Aggregate counters for the whole store.
    ///
    /// # Errors
    ///
    /// Returns a [`ManagerError`] on database failure.
    pub async fn stats(&self) -> Result<StoreStats, ManagerError> {
        self.store.stats().await
    }
}
