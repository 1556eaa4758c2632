//! Client-facing input types: protocols, creation requests and bulk
//! templates.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ManagerError;

/// Protocol family of an inbound. Decides which credential fields a config
/// entry carries and which identity key the sync engine matches on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// VMess: uuid credential.
    Vmess,
    /// VLESS: uuid credential plus optional flow.
    Vless,
    /// Trojan: password credential, no id field.
    Trojan,
    /// Shadowsocks: numeric store id plus cipher method and password.
    Shadowsocks,
}

impl Protocol {
    /// Protocol string as stored in the vendor's inbound table.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Vmess => "vmess",
            Self::Vless => "vless",
            Self::Trojan => "trojan",
            Self::Shadowsocks => "shadowsocks",
        }
    }
}

impl FromStr for Protocol {
    type Err = ManagerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "vmess" => Ok(Self::Vmess),
            "vless" => Ok(Self::Vless),
            "trojan" => Ok(Self::Trojan),
            "shadowsocks" => Ok(Self::Shadowsocks),
            other => Err(ManagerError::InvalidProtocol(other.to_string())),
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Request to create a single client on one inbound.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewClientRequest {
    /// Target inbound.
    pub inbound_id: i64,
    /// Display identifier. Uniqueness is enforced by the store.
    pub email: String,
    /// Traffic cap in bytes; 0 = unlimited.
    #[serde(default)]
    pub total: i64,
    /// Expiry as epoch milliseconds; 0 = unlimited.
    #[serde(default)]
    pub expiry_time: i64,
    /// Concurrent-IP limit; 0 = unlimited.
    #[serde(default)]
    pub limit_ip: i64,
    /// Traffic-reset period in days; 0 = never.
    #[serde(default)]
    pub reset: i64,
    /// Supplied shadowsocks/trojan password. Generated when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// Shadowsocks cipher method. Defaults when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    /// VLESS flow, e.g. `xtls-rprx-vision`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flow: Option<String>,
}

impl NewClientRequest {
    /// Validates field ranges before any store write.
    ///
    /// # Errors
    ///
    /// Returns [`ManagerError::Validation`] for an empty email or a
    /// negative cap/expiry.
    pub fn validate(&self) -> Result<(), ManagerError> {
        if self.email.trim().is_empty() {
            return Err(ManagerError::Validation("email must not be empty".to_string()));
        }
        if self.total < 0 {
            return Err(ManagerError::Validation("total must be >= 0".to_string()));
        }
        if self.expiry_time < 0 {
            return Err(ManagerError::Validation("expiry_time must be >= 0".to_string()));
        }
        if self.limit_ip < 0 {
            return Err(ManagerError::Validation("limit_ip must be >= 0".to_string()));
        }
        if self.reset < 0 {
            return Err(ManagerError::Validation("reset must be >= 0".to_string()));
        }
        Ok(())
    }
}

/// Fields stamped onto every client generated by a bulk job.
///
/// `prefix` plus a running index produces each client's email, e.g.
/// `user_0001`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientTemplate {
    /// Email prefix for generated clients.
    pub prefix: String,
    /// Traffic cap in bytes; 0 = unlimited.
    #[serde(default)]
    pub total: i64,
    /// Expiry as epoch milliseconds; 0 = unlimited.
    #[serde(default)]
    pub expiry_time: i64,
    /// Concurrent-IP limit; 0 = unlimited.
    #[serde(default)]
    pub limit_ip: i64,
    /// Traffic-reset period in days; 0 = never.
    #[serde(default)]
    pub reset: i64,
    /// Shadowsocks cipher method override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    /// VLESS flow override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flow: Option<String>,
}

impl ClientTemplate {
    /// Validates the template before a job is accepted.
    ///
    /// # Errors
    ///
    /// Returns [`ManagerError::Validation`] for an empty prefix or a
    /// negative cap/expiry.
    pub fn validate(&self) -> Result<(), ManagerError> {
        if self.prefix.trim().is_empty() {
            return Err(ManagerError::Validation("prefix must not be empty".to_string()));
        }
        if self.total < 0 || self.expiry_time < 0 || self.limit_ip < 0 || self.reset < 0 {
            return Err(ManagerError::Validation(
                "template numeric fields must be >= 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Email for the item at `index` (zero-based), matching the generation
    /// scheme `prefix_0001`, `prefix_0002`, ...
    #[must_use]
    pub fn email_for(&self, index: usize) -> String {
        format!("{}_{:04}", self.prefix, index + 1)
    }

    /// Expands the template into a creation request for one inbound.
    #[must_use]
    pub fn to_request(&self, inbound_id: i64, index: usize) -> NewClientRequest {
        NewClientRequest {
            inbound_id,
            email: self.email_for(index),
            total: self.total,
            expiry_time: self.expiry_time,
            limit_ip: self.limit_ip,
            reset: self.reset,
            password: None,
            method: self.method.clone(),
            flow: self.flow.clone(),
        }
    }
}
