//! Domain events published on every state mutation.

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::JobId;
use super::job::JobStatus;

/// Events emitted by services, the sync engine and the batch processor.
///
/// `ConfigWritten` is the reload hook: the external runtime only picks up
/// new config documents after a restart/reload, which the *caller* owns —
/// subscribing to this event tells it when one is due.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum ManagerEvent {
    /// A client record and its config entry were created.
    ClientCreated {
        /// Record-store id.
        client_id: i64,
        /// Owning inbound.
        inbound_id: i64,
        /// Display identifier.
        email: String,
        /// Emission time.
        timestamp: DateTime<Utc>,
    },
    /// A client record and its config entry were removed.
    ClientRemoved {
        /// Record-store id.
        client_id: i64,
        /// Owning inbound.
        inbound_id: i64,
        /// Display identifier.
        email: String,
        /// Emission time.
        timestamp: DateTime<Utc>,
    },
    /// An inbound's config document was rewritten.
    ConfigWritten {
        /// Inbound whose document changed.
        inbound_id: i64,
        /// Number of entries now embedded in the document.
        clients: usize,
        /// Emission time.
        timestamp: DateTime<Utc>,
    },
    /// A job changed state-machine position.
    JobStatusChanged {
        /// The job.
        job_id: JobId,
        /// New status.
        status: JobStatus,
        /// Emission time.
        timestamp: DateTime<Utc>,
    },
    /// A job committed a chunk and updated its counters.
    JobProgress {
        /// The job.
        job_id: JobId,
        /// Items created so far.
        completed: usize,
        /// Items requested in total.
        total: usize,
        /// Emission time.
        timestamp: DateTime<Utc>,
    },
}

impl ManagerEvent {
    /// Stable discriminator string for logging and filtering.
    #[must_use]
    pub const fn event_type_str(&self) -> &'static str {
        match self {
            Self::ClientCreated { .. } => "client_created",
            Self::ClientRemoved { .. } => "client_removed",
            Self::ConfigWritten { .. } => "config_written",
            Self::JobStatusChanged { .. } => "job_status_changed",
            Self::JobProgress { .. } => "job_progress",
        }
    }
}
