//! Periodic maintenance: disabling clients whose expiry has passed.
//!
//! The external runtime enforces expiry on its own; this sweep keeps the
//! administrative view honest and makes the disablement visible in both
//! stores, so listings and the runtime agree.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use super::client_service::ClientService;
use crate::error::ManagerError;

/// Interval-driven sweep that disables expired, still-enabled clients.
#[derive(Debug)]
pub struct ExpiredCleanup {
    service: Arc<ClientService>,
    interval: Duration,
}

impl ExpiredCleanup {
    /// Creates a sweep over the given service.
    #[must_use]
    pub fn new(service: Arc<ClientService>, interval: Duration) -> Self {
        Self { service, interval }
    }

    /// Runs one sweep. Returns how many clients were disabled. Per-client
    /// failures are logged and skipped; the sweep itself only fails when
    /// the candidate query does.
    ///
    /// # Errors
    ///
    /// Returns a [`ManagerError`] when the expired-client query fails.
    pub async fn run_once(&self) -> Result<usize, ManagerError> {
        let now_ms = Utc::now().timestamp_millis();
        let expired = self.service.list_expired(now_ms, None).await?;

        let mut disabled = 0;
        for row in expired.iter().filter(|r| r.enable) {
            match self.service.set_enable(row.id, false).await {
                Ok(()) => {
                    disabled += 1;
                    tracing::info!(client_id = row.id, email = %row.email, "disabled expired client");
                }
                Err(e) => {
                    tracing::warn!(client_id = row.id, error = %e, "failed to disable expired client");
                }
            }
        }
        if disabled > 0 {
            tracing::info!(expired = expired.len(), disabled, "expired cleanup sweep finished");
        }
        Ok(disabled)
    }

    /// Spawns the sweep loop. The first sweep runs one full interval after
    /// startup. The task runs until the handle is aborted.
    pub fn spawn(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // the first tick fires immediately; skip it
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if let Err(e) = self.run_once().await {
                    tracing::error!(error = %e, "expired cleanup sweep failed");
                }
            }
        })
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::domain::{EventBus, NewClientRequest};
    use crate::persistence::SqliteStore;
    use crate::sync::{InboundLocks, SyncEngine};

    async fn service_with_inbound() -> (Arc<ClientService>, i64, tempfile::TempDir) {
        let dir = tempfile::tempdir().ok().unwrap_or_else(|| {
            panic!("tempdir failed");
        });
        let store = SqliteStore::connect(dir.path().join("x-ui.db"), 5, 5).await;
        let Ok(store) = store else {
            panic!("store connect failed");
        };
        let events = EventBus::new(64);
        let sync = SyncEngine::new(
            store.clone(),
            Arc::new(InboundLocks::new()),
            events.clone(),
        );
        let service = Arc::new(ClientService::new(store.clone(), sync, events));
        let inbound = store
            .insert_inbound("test", 40000, "vless", r#"{"clients":[]}"#)
            .await;
        let Ok(inbound_id) = inbound else {
            panic!("inbound insert failed");
        };
        (service, inbound_id, dir)
    }

    fn request(inbound_id: i64, email: &str, expiry_time: i64) -> NewClientRequest {
        NewClientRequest {
            inbound_id,
            email: email.to_string(),
            total: 0,
            expiry_time,
            limit_ip: 0,
            reset: 0,
            password: None,
            method: None,
            flow: None,
        }
    }

    #[tokio::test]
    async fn sweep_disables_only_expired_enabled_clients() {
        let (service, inbound_id, _dir) = service_with_inbound().await;
        let Ok(expired) = service.create_client(request(inbound_id, "old", 1_000)).await else {
            panic!("create failed");
        };
        let Ok(alive) = service.create_client(request(inbound_id, "new", 0)).await else {
            panic!("create failed");
        };

        let cleanup = ExpiredCleanup::new(Arc::clone(&service), Duration::from_secs(3_600));
        let disabled = cleanup.run_once().await;
        let Ok(disabled) = disabled else {
            panic!("sweep failed");
        };
        assert_eq!(disabled, 1);

        let Ok(expired_row) = service.get_client(expired.id).await else {
            panic!("get failed");
        };
        assert!(!expired_row.enable);
        let Ok(alive_row) = service.get_client(alive.id).await else {
            panic!("get failed");
        };
        assert!(alive_row.enable);
    }

    #[tokio::test]
    async fn sweep_is_idempotent() {
        let (service, inbound_id, _dir) = service_with_inbound().await;
        let Ok(_row) = service.create_client(request(inbound_id, "old", 1_000)).await else {
            panic!("create failed");
        };

        let cleanup = ExpiredCleanup::new(Arc::clone(&service), Duration::from_secs(3_600));
        let first = cleanup.run_once().await;
        assert!(matches!(first, Ok(1)));
        let second = cleanup.run_once().await;
        assert!(matches!(second, Ok(0)));
    }
}
