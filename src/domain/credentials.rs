//! Protocol-appropriate credential generation.
//!
//! Credentials live only in config documents — the record store never holds
//! them. Each protocol family needs a different set: vmess/vless a uuid,
//! trojan a password, shadowsocks the numeric record id plus cipher method
//! and password.

use rand::Rng;
use rand::distributions::Alphanumeric;

use super::client::{NewClientRequest, Protocol};
use super::config_doc::ClientIdentity;

/// Default shadowsocks cipher when the request does not supply one.
pub const DEFAULT_SS_METHOD: &str = "chacha20-ietf-poly1305";

/// Generated password length.
const PASSWORD_LEN: usize = 16;

/// Credential fields for one new config entry.
#[derive(Debug, Clone, PartialEq)]
pub struct Credentials {
    /// Identity key, when the protocol carries one.
    pub id: Option<ClientIdentity>,
    /// Trojan/shadowsocks password.
    pub password: Option<String>,
    /// Shadowsocks cipher method.
    pub method: Option<String>,
    /// VLESS flow.
    pub flow: Option<String>,
}

impl Credentials {
    /// Builds credentials for a new client, taking supplied values from the
    /// request and generating the rest. `record_id` is the already-inserted
    /// record-store id, which shadowsocks entries use as their identity.
    #[must_use]
    pub fn for_new_client(protocol: Protocol, record_id: i64, request: &NewClientRequest) -> Self {
        match protocol {
            Protocol::Shadowsocks => Self {
                id: Some(ClientIdentity::Numeric(record_id)),
                password: Some(
                    request.password.clone().unwrap_or_else(generate_password),
                ),
                method: Some(
                    request
                        .method
                        .clone()
                        .unwrap_or_else(|| DEFAULT_SS_METHOD.to_string()),
                ),
                flow: None,
            },
            Protocol::Vless => Self {
                id: Some(ClientIdentity::Uuid(uuid::Uuid::new_v4().to_string())),
                password: None,
                method: None,
                flow: request.flow.clone(),
            },
            Protocol::Vmess => Self {
                id: Some(ClientIdentity::Uuid(uuid::Uuid::new_v4().to_string())),
                password: None,
                method: None,
                flow: None,
            },
            Protocol::Trojan => Self {
                id: None,
                password: Some(
                    request.password.clone().unwrap_or_else(generate_password),
                ),
                method: None,
                flow: None,
            },
        }
    }
}

/// Generates a random alphanumeric password.
#[must_use]
pub fn generate_password() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(PASSWORD_LEN)
        .map(char::from)
        .collect()
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    fn request() -> NewClientRequest {
        NewClientRequest {
            inbound_id: 1,
            email: "alice".to_string(),
            total: 0,
            expiry_time: 0,
            limit_ip: 0,
            reset: 0,
            password: None,
            method: None,
            flow: None,
        }
    }

    #[test]
    fn shadowsocks_uses_record_id_and_defaults() {
        let creds = Credentials::for_new_client(Protocol::Shadowsocks, 42, &request());
        assert_eq!(creds.id, Some(ClientIdentity::Numeric(42)));
        assert_eq!(creds.method.as_deref(), Some(DEFAULT_SS_METHOD));
        let Some(password) = creds.password else {
            panic!("shadowsocks must get a password");
        };
        assert_eq!(password.len(), 16);
    }

    #[test]
    fn vless_gets_uuid_and_keeps_flow() {
        let mut req = request();
        req.flow = Some("xtls-rprx-vision".to_string());
        let creds = Credentials::for_new_client(Protocol::Vless, 1, &req);
        assert!(matches!(creds.id, Some(ClientIdentity::Uuid(_))));
        assert_eq!(creds.flow.as_deref(), Some("xtls-rprx-vision"));
        assert!(creds.password.is_none());
    }

    #[test]
    fn trojan_has_no_identity() {
        let creds = Credentials::for_new_client(Protocol::Trojan, 1, &request());
        assert!(creds.id.is_none());
        assert!(creds.password.is_some());
    }

    #[test]
    fn supplied_password_wins_over_generated() {
        let mut req = request();
        req.password = Some("pinned".to_string());
        let creds = Credentials::for_new_client(Protocol::Trojan, 1, &req);
        assert_eq!(creds.password.as_deref(), Some("pinned"));
    }

    #[test]
    fn generated_passwords_differ() {
        assert_ne!(generate_password(), generate_password());
    }
}
