//! Typed model of a per-inbound config document.
//!
//! The external runtime reads each inbound's `settings` column as a JSON
//! object containing a `clients` array. Field names here are bit-exact
//! with what the runtime expects (`expiryTime`, `totalGB`, `limitIp`, ...).
//! Unknown keys — on the document and on each entry — are captured in
//! `extra` maps so a rewrite never drops vendor fields this crate does not
//! model.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ManagerError;

/// Identity key of a config entry.
///
/// Shadowsocks entries carry the numeric record id; vmess/vless entries
/// carry a uuid string. Trojan entries have no `id` at all and are matched
/// by email only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ClientIdentity {
    /// Numeric record-store id (shadowsocks).
    Numeric(i64),
    /// Credential uuid string (vmess, vless).
    Uuid(String),
}

/// One embedded client entry inside a config document.
///
/// Lifecycle fields (`enable`, `expiry_time`, `total_gb`, `reset`) are a
/// projection of the client record and are overwritten by the sync engine;
/// credential fields (`id`, `password`, `method`, `flow`) are authoritative
/// here and never come from the record store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigClient {
    /// Identity key; absent for trojan entries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<ClientIdentity>,
    /// Display identifier, mirrors the record's `email` column.
    #[serde(default)]
    pub email: String,
    /// Whether the runtime accepts this client's connections.
    #[serde(default)]
    pub enable: bool,
    /// Expiry as epoch milliseconds; 0 = unlimited.
    #[serde(rename = "expiryTime", default)]
    pub expiry_time: i64,
    /// Traffic cap in bytes (the vendor key name notwithstanding);
    /// 0 = unlimited.
    #[serde(rename = "totalGB", default)]
    pub total_gb: i64,
    /// Concurrent-IP limit; 0 = unlimited.
    #[serde(rename = "limitIp", default)]
    pub limit_ip: i64,
    /// Traffic-reset period in days; 0 = never.
    #[serde(default)]
    pub reset: i64,
    /// Trojan/shadowsocks password.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// Shadowsocks cipher method.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    /// VLESS flow.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flow: Option<String>,
    /// Epoch-millis stamp of the last lifecycle projection. Only written
    /// when a lifecycle field actually changed, so re-syncing a consistent
    /// entry leaves the document byte-identical.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<i64>,
    /// Vendor fields this crate does not model, preserved verbatim.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

impl ConfigClient {
    /// Whether this entry belongs to the record with the given id/email,
    /// using the fallback key order: numeric id, then email.
    #[must_use]
    pub fn matches_record(&self, record_id: i64, email: &str) -> bool {
        if matches!(self.id, Some(ClientIdentity::Numeric(n)) if n == record_id) {
            return true;
        }
        !self.email.is_empty() && self.email == email
    }

    /// Whether this entry carries the given numeric record id. Used on the
    /// delete path when the record (and with it the email key) is gone.
    #[must_use]
    pub fn matches_numeric_id(&self, record_id: i64) -> bool {
        matches!(self.id, Some(ClientIdentity::Numeric(n)) if n == record_id)
    }
}

/// A full per-inbound config document: the `clients` array plus any other
/// vendor keys, preserved untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigDocument {
    /// Embedded client entries, in vendor order. Sync never reorders them.
    pub clients: Vec<ConfigClient>,
    /// Vendor fields outside the client array, preserved verbatim.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

/// Wire shape used to detect a document that parses but has no `clients`
/// array — a distinct corruption class, not an empty inbound.
#[derive(Debug, Deserialize)]
struct RawDocument {
    #[serde(default)]
    clients: Option<Vec<ConfigClient>>,
    #[serde(flatten)]
    extra: serde_json::Map<String, Value>,
}

impl ConfigDocument {
    /// Parses the raw `settings` column value for an inbound.
    ///
    /// # Errors
    ///
    /// Returns [`ManagerError::ConfigCorrupt`] when the value is not valid
    /// JSON or has no `clients` array.
    pub fn parse(inbound_id: i64, raw: &str) -> Result<Self, ManagerError> {
        let raw_doc: RawDocument =
            serde_json::from_str(raw).map_err(|e| ManagerError::ConfigCorrupt {
                inbound_id,
                reason: e.to_string(),
            })?;
        let Some(clients) = raw_doc.clients else {
            return Err(ManagerError::ConfigCorrupt {
                inbound_id,
                reason: "no clients array".to_string(),
            });
        };
        Ok(Self {
            clients,
            extra: raw_doc.extra,
        })
    }

    /// Serializes the document back to the `settings` column format.
    ///
    /// # Errors
    ///
    /// Returns [`ManagerError::Persistence`] if serialization fails (it
    /// cannot for this shape, but the error path is kept explicit).
    pub fn to_settings(&self) -> Result<String, ManagerError> {
        serde_json::to_string(self).map_err(|e| ManagerError::Persistence(e.to_string()))
    }

    /// Entries matching the record `(record_id, email)` under the fallback
    /// key order, returned as indices into `clients`.
    #[must_use]
    pub fn matching_indices(&self, record_id: i64, email: &str) -> Vec<usize> {
        self.clients
            .iter()
            .enumerate()
            .filter(|(_, c)| c.matches_record(record_id, email))
            .map(|(i, _)| i)
            .collect()
    }
}
