//! Manager configuration loaded from environment variables.
//!
//! Follows 12-factor style: all settings come from environment variables
//! (or a `.env` file via `dotenvy`).

use std::path::PathBuf;

/// Top-level manager configuration.
///
/// Loaded once at startup via [`ManagerConfig::from_env`].
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Path to the runtime vendor's SQLite database file.
    pub database_path: PathBuf,

    /// Maximum number of connections in the SQLite pool. Writes are
    /// serialized by the store regardless; extra connections serve readers.
    pub database_max_connections: u32,

    /// Seconds a connection waits on a locked database before erroring.
    pub database_busy_timeout_secs: u64,

    /// Number of clients applied per provisioning chunk.
    pub chunk_size: usize,

    /// Upper bound on `count` for a single bulk submission.
    pub max_bulk_count: usize,

    /// Attempts for a chunk write before the job fails with
    /// `StoreUnavailable` (transient lock contention budget).
    pub chunk_retry_attempts: u32,

    /// Milliseconds between chunk write retries.
    pub chunk_retry_backoff_ms: u64,

    /// Path of the job snapshot file (progress survives restarts).
    pub queue_file: PathBuf,

    /// Seconds between expired-client cleanup sweeps (0 disables the task).
    pub cleanup_interval_secs: u64,

    /// Capacity of the event bus broadcast channel.
    pub event_bus_capacity: usize,
}

impl ManagerConfig {
    /// Loads configuration from environment variables.
    ///
    /// Falls back to sensible defaults when a variable is not set.
    /// Calls `dotenvy::dotenv().ok()` to optionally load a `.env` file.
    ///
    /// # Errors
    ///
    /// Returns an error if `XUI_CHUNK_SIZE` is set to zero — a zero chunk
    /// size would make every job spin without progress.
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        dotenvy::dotenv().ok();

        let database_path = PathBuf::from(
            std::env::var("XUI_DATABASE_PATH").unwrap_or_else(|_| "/etc/x-ui/x-ui.db".to_string()),
        );
        let queue_file = PathBuf::from(
            std::env::var("XUI_QUEUE_FILE")
                .unwrap_or_else(|_| "/opt/xui-manager/queues.json".to_string()),
        );

        let database_max_connections = parse_env("XUI_DATABASE_MAX_CONNECTIONS", 5);
        let database_busy_timeout_secs = parse_env("XUI_DATABASE_BUSY_TIMEOUT_SECS", 5);

        let chunk_size = parse_env("XUI_CHUNK_SIZE", 100);
        if chunk_size == 0 {
            return Err("XUI_CHUNK_SIZE must be at least 1".into());
        }
        let max_bulk_count = parse_env("XUI_MAX_BULK_COUNT", 5_000);

        let chunk_retry_attempts = parse_env("XUI_CHUNK_RETRY_ATTEMPTS", 3);
        let chunk_retry_backoff_ms = parse_env("XUI_CHUNK_RETRY_BACKOFF_MS", 500);

        let cleanup_interval_secs = parse_env("XUI_CLEANUP_INTERVAL_SECS", 3_600);
        let event_bus_capacity = parse_env("XUI_EVENT_BUS_CAPACITY", 10_000);

        Ok(Self {
            database_path,
            database_max_connections,
            database_busy_timeout_secs,
            chunk_size,
            max_bulk_count,
            chunk_retry_attempts,
            chunk_retry_backoff_ms,
            queue_file,
            cleanup_interval_secs,
            event_bus_capacity,
        })
    }
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("/etc/x-ui/x-ui.db"),
            database_max_connections: 5,
            database_busy_timeout_secs: 5,
            chunk_size: 100,
            max_bulk_count: 5_000,
            chunk_retry_attempts: 3,
            chunk_retry_backoff_ms: 500,
            queue_file: PathBuf::from("/opt/xui-manager/queues.json"),
            cleanup_interval_secs: 3_600,
            event_bus_capacity: 10_000,
        }
    }
}

/// Parses an environment variable as `T`, returning `default` on missing
/// or invalid values.
fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn default_matches_vendor_layout() {
        let config = ManagerConfig::default();
        assert_eq!(config.database_path, PathBuf::from("/etc/x-ui/x-ui.db"));
        assert_eq!(config.chunk_size, 100);
        assert_eq!(config.max_bulk_count, 5_000);
    }

    #[test]
    fn parse_env_falls_back_when_unset() {
        let value: u32 = parse_env("XUI_TEST_KEY_THAT_IS_NEVER_SET", 42);
        assert_eq!(value, 42);
    }
}
