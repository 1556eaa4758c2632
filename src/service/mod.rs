//! Service layer: administrative client operations and periodic
//! maintenance.

pub mod client_service;
pub mod maintenance;

pub use client_service::{BulkOutcome, ClientPage, ClientService, DeleteFilter};
pub use maintenance::ExpiredCleanup;
