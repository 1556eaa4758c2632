//! Synchronization engine: projects record-store lifecycle fields into the
//! per-inbound config documents the external runtime reads.
//!
//! The record store is the source of truth for lifecycle fields; each
//! config document is a derived projection, rebuilt field-by-field (never
//! wholesale) so credentials and vendor fields survive every rewrite.

pub mod engine;
pub mod locks;

pub use engine::{InboundSync, SyncEngine, SyncReport};
pub use locks::InboundLocks;
