//! Type-safe job identifier.
//!
//! [`JobId`] is a newtype wrapper around [`uuid::Uuid`] (v4) providing
//! type safety so that job identifiers cannot be confused with other UUIDs
//! or with numeric client record ids.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Unique identifier for a provisioning job.
///
/// Wraps a UUID v4. Generated once at submission time and immutable
/// thereafter. Used as the dictionary key in the job registry and as the
/// handle for status, cancel and delete operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(uuid::Uuid);

impl JobId {
    /// Creates a new random `JobId` (UUID v4).
    #[must_use]
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    /// Creates a `JobId` from an existing [`uuid::Uuid`].
    #[must_use]
    pub const fn from_uuid(uuid: uuid::Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the inner [`uuid::Uuid`].
    #[must_use]
    pub const fn as_uuid(&self) -> &uuid::Uuid {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<uuid::Uuid> for JobId {
    fn from(uuid: uuid::Uuid) -> Self {
        Self(uuid)
    }
}

impl From<JobId> for uuid::Uuid {
    fn from(id: JobId) -> Self {
        id.0
    }
}
