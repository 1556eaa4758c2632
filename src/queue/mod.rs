//! Bulk provisioning queue: job registry, batch processor and the queue
//! manager that owns job lifecycles.

pub mod batch;
pub mod job_registry;
pub mod manager;

pub use batch::BatchProcessor;
pub use job_registry::JobRegistry;
pub use manager::QueueManager;
