//! # xui-manager
//!
//! Client provisioning and synchronization core for 3x-ui style proxy
//! panels. The external runtime reads its whole configuration from one
//! embedded JSON document per inbound, while a relational table tracks
//! per-client usage and lifecycle flags; this crate keeps both
//! representations consistent under concurrent, partial and high-volume
//! mutation, and runs bulk provisioning as chunked, cancellable jobs.
//!
//! The HTTP surface, auth, process supervision and the runtime reload
//! itself are deliberately outside this crate — callers subscribe to the
//! event bus to learn when a reload is due.
//!
//! ## Architecture
//!
//! ```text
//! Administrative callers             Bulk callers
//!     │                                  │
//!     ├── ClientService (service/)       ├── QueueManager (queue/)
//!     │                                  ├── BatchProcessor (queue/)
//!     │                                  │
//!     ├── SyncEngine (sync/)  ◄──────────┘
//!     ├── InboundLocks (sync/)
//!     ├── EventBus (domain/)
//!     │
//!     └── SqliteStore (persistence/) — the vendor's x-ui.db
//! ```

pub mod config;
pub mod domain;
pub mod error;
pub mod manager;
pub mod persistence;
pub mod queue;
pub mod service;
pub mod sync;

pub use config::ManagerConfig;
pub use error::ManagerError;
pub use manager::Manager;
