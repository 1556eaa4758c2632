//! Top-level wiring: one call builds the store, engine, services and
//! queue from a [`ManagerConfig`].

use std::sync::Arc;
use std::time::Duration;

use crate::config::ManagerConfig;
use crate::domain::EventBus;
use crate::error::ManagerError;
use crate::persistence::SqliteStore;
use crate::queue::{BatchProcessor, JobRegistry, QueueManager};
use crate::service::{ClientService, ExpiredCleanup};
use crate::sync::{InboundLocks, SyncEngine};

/// Assembled manager: every component wired over one store, one lock
/// registry and one event bus.
#[derive(Debug)]
pub struct Manager {
    /// The underlying store.
    pub store: SqliteStore,
    /// Broadcast bus for domain events (config rewrites, job transitions).
    pub events: EventBus,
    /// Synchronization engine.
    pub sync: SyncEngine,
    /// Administrative client operations.
    pub clients: Arc<ClientService>,
    /// Bulk provisioning queue.
    pub queue: Arc<QueueManager>,
    config: ManagerConfig,
}

impl Manager {
    /// Connects to the vendor database and wires all components.
    ///
    /// # Errors
    ///
    /// Returns [`ManagerError::StoreUnavailable`] when the database cannot
    /// be opened.
    pub async fn connect(config: ManagerConfig) -> Result<Self, ManagerError> {
        let store = SqliteStore::connect(
            &config.database_path,
            config.database_max_connections,
            config.database_busy_timeout_secs,
        )
        .await?;

        let events = EventBus::new(config.event_bus_capacity);
        let locks = Arc::new(InboundLocks::new());
        let sync = SyncEngine::new(store.clone(), locks, events.clone());
        let clients = Arc::new(ClientService::new(
            store.clone(),
            sync.clone(),
            events.clone(),
        ));

        let registry = Arc::new(JobRegistry::new(Some(config.queue_file.clone())));
        let processor = BatchProcessor::new(
            store.clone(),
            sync.clone(),
            events.clone(),
            Arc::clone(&registry),
            config.chunk_size,
            config.chunk_retry_attempts,
            Duration::from_millis(config.chunk_retry_backoff_ms),
        );
        let queue = Arc::new(QueueManager::new(
            store.clone(),
            registry,
            processor,
            events.clone(),
            config.max_bulk_count,
        ));

        tracing::info!(
            database = %config.database_path.display(),
            chunk_size = config.chunk_size,
            "manager connected"
        );
        Ok(Self {
            store,
            events,
            sync,
            clients,
            queue,
            config,
        })
    }

    /// Spawns the periodic expired-client cleanup, when enabled by
    /// configuration. Returns `None` when the interval is zero.
    #[must_use]
    pub fn start_maintenance(&self) -> Option<tokio::task::JoinHandle<()>> {
        if self.config.cleanup_interval_secs == 0 {
            return None;
        }
        let cleanup = ExpiredCleanup::new(
            Arc::clone(&self.clients),
            Duration::from_secs(self.config.cleanup_interval_secs),
        );
        Some(cleanup.spawn())
    }
}
