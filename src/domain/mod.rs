//! Domain types: identifiers, client templates, config documents, jobs
//! and the event bus.

pub mod client;
pub mod config_doc;
pub mod credentials;
pub mod event;
pub mod event_bus;
pub mod job;
pub mod job_id;

pub use client::{ClientTemplate, NewClientRequest, Protocol};
pub use config_doc::{ClientIdentity, ConfigClient, ConfigDocument};
pub use credentials::Credentials;
pub use event::ManagerEvent;
pub use event_bus::EventBus;
pub use job::{Job, JobItemError, JobProgress, JobStatus};
pub use job_id::JobId;
