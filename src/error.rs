//! Manager error types with numeric error codes.
//!
//! [`ManagerError`] is the central error type for the crate. Per-item
//! failures inside a bulk job are *not* errors at this level — they are
//! recorded in the job's error list (see [`crate::domain::job`]) while the
//! job keeps running. This enum covers the failures that a caller of an
//! administrative operation, or the job itself, must observe.

use crate::domain::JobId;

/// Central error enum with stable numeric code mapping.
///
/// # Error Code Ranges
///
/// | Range     | Category                     |
/// |-----------|------------------------------|
/// | 1000–1999 | Validation                   |
/// | 2000–2999 | State / Not Found / Conflict |
/// | 3000–3999 | Store                        |
/// | 4000–4999 | Document-Specific            |
#[derive(Debug, Clone, thiserror::Error)]
pub enum ManagerError {
    /// Request validation failed before any store write.
    #[error("invalid request: {0}")]
    Validation(String),

    /// Unsupported or invalid inbound protocol string.
    #[error("invalid protocol: {0}")]
    InvalidProtocol(String),

    /// Client with the given record id was not found.
    #[error("client not found: {0}")]
    ClientNotFound(i64),

    /// Inbound with the given id was not found.
    #[error("inbound not found: {0}")]
    InboundNotFound(i64),

    /// Job with the given id was not found.
    #[error("job not found: {0}")]
    JobNotFound(JobId),

    /// Job is not in a terminal state, so it cannot be deleted.
    #[error("job {0} is not in a terminal state")]
    JobNotTerminal(JobId),

    /// Duplicate identity (email or credential) for the target inbound.
    #[error("conflict: {0}")]
    Conflict(String),

    /// The inbound's config document is not valid JSON or has no client
    /// array — the store is already inconsistent, distinct from bad input.
    #[error("config document for inbound {inbound_id} is corrupt: {reason}")]
    ConfigCorrupt {
        /// Inbound whose document failed to parse.
        inbound_id: i64,
        /// Parse or shape failure description.
        reason: String,
    },

    /// More than one config entry matched a single client record.
    #[error("ambiguous match in inbound {inbound_id} for client {client_id}")]
    AmbiguousMatch {
        /// Inbound whose document holds the colliding entries.
        inbound_id: i64,
        /// Record id that matched multiple entries.
        client_id: i64,
    },

    /// The underlying store is unreachable or locked beyond the retry
    /// budget. Fatal for the in-flight chunk.
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    /// Other persistence layer failure.
    #[error("persistence error: {0}")]
    Persistence(String),
}

impl ManagerError {
    /// Returns the numeric error code for this variant.
    #[must_use]
    pub const fn error_code(&self) -> u32 {
        match self {
            Self::Validation(_) => 1001,
            Self::InvalidProtocol(_) => 1002,
            Self::ClientNotFound(_) => 2001,
            Self::InboundNotFound(_) => 2002,
            Self::JobNotFound(_) => 2003,
            Self::JobNotTerminal(_) => 2101,
            Self::Conflict(_) => 2102,
            Self::Persistence(_) => 3001,
            Self::StoreUnavailable(_) => 3002,
            Self::ConfigCorrupt { .. } => 4001,
            Self::AmbiguousMatch { .. } => 4002,
        }
    }

    /// Whether retrying the same operation may succeed without operator
    /// intervention. Only transient store contention qualifies.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::StoreUnavailable(_))
    }
}

impl From<sqlx::Error> for ManagerError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                Self::Conflict(db.message().to_string())
            }
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => {
                Self::StoreUnavailable(err.to_string())
            }
            sqlx::Error::Database(db) if db.message().contains("database is locked") => {
                Self::StoreUnavailable(db.message().to_string())
            }
            _ => Self::Persistence(err.to_string()),
        }
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn codes_fall_in_documented_ranges() {
        let validation = ManagerError::Validation("x".to_string());
        assert!((1000..2000).contains(&validation.error_code()));

        let not_found = ManagerError::ClientNotFound(7);
        assert!((2000..3000).contains(&not_found.error_code()));

        let store = ManagerError::StoreUnavailable("locked".to_string());
        assert!((3000..4000).contains(&store.error_code()));

        let corrupt = ManagerError::ConfigCorrupt {
            inbound_id: 1,
            reason: "not json".to_string(),
        };
        assert!((4000..5000).contains(&corrupt.error_code()));
    }

    #[test]
    fn only_store_unavailable_is_transient() {
        assert!(ManagerError::StoreUnavailable("locked".to_string()).is_transient());
        assert!(!ManagerError::Conflict("dup".to_string()).is_transient());
        assert!(!ManagerError::Validation("bad".to_string()).is_transient());
    }

    #[test]
    fn display_includes_context() {
        let err = ManagerError::ConfigCorrupt {
            inbound_id: 3,
            reason: "missing clients array".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains('3'));
        assert!(msg.contains("missing clients array"));
    }
}
