//! Row models for the vendor tables.

use serde::{Deserialize, Serialize};

/// One row of `client_traffics`: accounting plus lifecycle fields.
///
/// `up`/`down` are written only by the external runtime; this crate reads
/// them for queries and never projects them into config documents.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ClientRow {
    /// Stable store-generated id.
    pub id: i64,
    /// Owning inbound.
    pub inbound_id: i64,
    /// Whether the client may connect.
    pub enable: bool,
    /// Display identifier, unique across the table.
    pub email: String,
    /// Bytes uploaded (runtime-written).
    pub up: i64,
    /// Bytes downloaded (runtime-written).
    pub down: i64,
    /// Expiry as epoch milliseconds; 0 = unlimited.
    pub expiry_time: i64,
    /// Traffic cap in bytes; 0 = unlimited.
    pub total: i64,
    /// Traffic-reset period in days; 0 = never.
    pub reset: i64,
}

impl ClientRow {
    /// Bytes left under the cap, `None` when uncapped.
    #[must_use]
    pub fn remaining_traffic(&self) -> Option<i64> {
        (self.total > 0).then(|| self.total - self.up - self.down)
    }
}

/// One row of `inbounds`, restricted to the columns this crate touches.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct InboundRow {
    /// Inbound id.
    pub id: i64,
    /// Operator-facing name.
    pub remark: String,
    /// Listening port.
    pub port: i64,
    /// Protocol family string (`vmess`, `vless`, `trojan`, `shadowsocks`).
    pub protocol: String,
    /// The config document, JSON-encoded.
    pub settings: String,
}

/// Insert shape for a new `client_traffics` row. Counters start at zero;
/// the store generates the id.
#[derive(Debug, Clone)]
pub struct NewClient {
    /// Owning inbound.
    pub inbound_id: i64,
    /// Display identifier.
    pub email: String,
    /// Traffic cap in bytes; 0 = unlimited.
    pub total: i64,
    /// Expiry as epoch milliseconds; 0 = unlimited.
    pub expiry_time: i64,
    /// Traffic-reset period in days; 0 = never.
    pub reset: i64,
}

/// Aggregate counters for the whole store.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct StoreStats {
    /// Rows in `client_traffics`.
    pub total_clients: i64,
    /// Rows with `enable = 1`.
    pub enabled_clients: i64,
    /// Sum of `up` across all rows.
    pub total_upload: i64,
    /// Sum of `down` across all rows.
    pub total_download: i64,
    /// Rows in `inbounds`.
    pub total_inbounds: i64,
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    fn row(total: i64, up: i64, down: i64) -> ClientRow {
        ClientRow {
            id: 1,
            inbound_id: 1,
            enable: true,
            email: "a".to_string(),
            up,
            down,
            expiry_time: 0,
            total,
            reset: 0,
        }
    }

    #[test]
    fn remaining_traffic_is_none_when_uncapped() {
        assert_eq!(row(0, 10, 10).remaining_traffic(), None);
    }

    #[test]
    fn remaining_traffic_subtracts_both_directions() {
        assert_eq!(row(100, 30, 20).remaining_traffic(), Some(50));
    }
}
