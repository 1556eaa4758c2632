//! DDL mirror of the vendor tables.
//!
//! The runtime creates these tables itself on a live host; this mirror
//! exists for fresh installs and tests. Column names and types follow the
//! vendor schema exactly and must not be extended — the vendor owns this
//! surface.

/// `client_traffics` and `inbounds`, as the runtime lays them out.
///
/// `client_traffics.email` is unique across the table; the provisioning
/// template relies on that to make generated emails collide loudly instead
/// of silently shadowing each other.
pub const SCHEMA_SQL: &str = r"
CREATE TABLE IF NOT EXISTS inbounds (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id     INTEGER NOT NULL DEFAULT 0,
    up          INTEGER NOT NULL DEFAULT 0,
    down        INTEGER NOT NULL DEFAULT 0,
    total       INTEGER NOT NULL DEFAULT 0,
    remark      TEXT    NOT NULL DEFAULT '',
    enable      INTEGER NOT NULL DEFAULT 1,
    expiry_time INTEGER NOT NULL DEFAULT 0,
    listen      TEXT    NOT NULL DEFAULT '',
    port        INTEGER NOT NULL,
    protocol    TEXT    NOT NULL,
    settings    TEXT    NOT NULL DEFAULT '{}',
    stream_settings TEXT NOT NULL DEFAULT '{}',
    tag         TEXT    NOT NULL DEFAULT '',
    sniffing    TEXT    NOT NULL DEFAULT '{}'
);

CREATE TABLE IF NOT EXISTS client_traffics (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    inbound_id  INTEGER NOT NULL REFERENCES inbounds (id),
    enable      INTEGER NOT NULL DEFAULT 1,
    email       TEXT    NOT NULL UNIQUE,
    up          INTEGER NOT NULL DEFAULT 0,
    down        INTEGER NOT NULL DEFAULT 0,
    expiry_time INTEGER NOT NULL DEFAULT 0,
    total       INTEGER NOT NULL DEFAULT 0,
    reset       INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_client_traffics_inbound_id
    ON client_traffics (inbound_id);
";
