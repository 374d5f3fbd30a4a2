//! Hub configuration loaded from environment variables.
//!
//! Follows 12-factor style: all settings come from environment variables
//! (or a `.env` file via `dotenvy`). Unset or malformed values fall back
//! to defaults, except the status API address, which must parse.

use std::net::SocketAddr;
use std::time::Duration;

use crate::net::ConnectionOptions;
use crate::session::SessionSettings;

/// Default collaboration port.
pub const DEFAULT_PORT: u16 = 8010;

/// Top-level hub configuration.
///
/// Loaded once at startup via [`CollabConfig::from_env`].
#[derive(Debug, Clone)]
pub struct CollabConfig {
    /// Interface the relay server binds.
    pub bind_host: String,

    /// Port to host on and to dial.
    pub port: u16,

    /// Peer to join on startup.
    pub hostname: Option<String>,

    /// Always host, even after joining a peer.
    pub is_host: bool,

    /// Name announced to peers.
    pub user_name: String,

    /// Admit every peer that announces itself.
    pub accept_all: bool,

    /// Write local changes to the network.
    pub ok_to_send: bool,

    /// Apply remote changes other than chat.
    pub ok_to_receive: bool,

    /// Forward chat and events between peers.
    pub ok_to_relay: bool,

    /// Longest accepted inbound line, in bytes.
    pub max_line_length: usize,

    /// Per-connection outbound queue capacity.
    pub outbound_queue: usize,

    /// Dial timeout in seconds.
    pub connect_timeout_secs: u64,

    /// Seen-message cache bound.
    pub seen_capacity: usize,

    /// Capacity of the notice broadcast channel.
    pub notice_bus_capacity: usize,

    /// Address of the HTTP status API.
    pub status_listen_addr: SocketAddr,

    /// Emit logs as JSON lines (`LOG_FORMAT=json`).
    pub log_json: bool,
}

impl CollabConfig {
    /// Loads configuration from environment variables.
    ///
    /// Calls `dotenvy::dotenv().ok()` to optionally load a `.env` file.
    ///
    /// # Errors
    ///
    /// Returns an error if `STATUS_LISTEN_ADDR` is set but cannot be parsed
    /// as a [`SocketAddr`].
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Returns an error if `STATUS_LISTEN_ADDR` cannot be parsed.
    pub fn from_lookup(
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let status_listen_addr: SocketAddr = lookup("STATUS_LISTEN_ADDR")
            .unwrap_or_else(|| "127.0.0.1:3010".to_string())
            .parse()?;

        let user_name = lookup("COLLAB_USER_NAME")
            .or_else(|| lookup("USER"))
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| "anonymous".to_string());

        Ok(Self {
            bind_host: lookup("COLLAB_BIND_HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            port: parse_value(lookup("COLLAB_PORT"), DEFAULT_PORT),
            hostname: lookup("COLLAB_HOSTNAME").filter(|h| !h.trim().is_empty()),
            is_host: parse_bool(lookup("COLLAB_SERVER"), false),
            user_name,
            accept_all: parse_bool(lookup("COLLAB_ACCEPT_ALL"), true),
            ok_to_send: parse_bool(lookup("COLLAB_OK_TO_SEND"), true),
            ok_to_receive: parse_bool(lookup("COLLAB_OK_TO_RECEIVE"), true),
            ok_to_relay: parse_bool(lookup("COLLAB_OK_TO_RELAY"), true),
            max_line_length: parse_value(lookup("COLLAB_MAX_LINE_LENGTH"), 1024 * 1024),
            outbound_queue: parse_value(lookup("COLLAB_OUTBOUND_QUEUE"), 1024),
            connect_timeout_secs: parse_value(lookup("COLLAB_CONNECT_TIMEOUT_SECS"), 10),
            seen_capacity: parse_value(lookup("COLLAB_SEEN_CAPACITY"), 1000),
            notice_bus_capacity: parse_value(lookup("NOTICE_BUS_CAPACITY"), 1024),
            status_listen_addr,
            log_json: lookup("LOG_FORMAT").is_some_and(|f| f.eq_ignore_ascii_case("json")),
        })
    }

    /// Connection tunables derived from this configuration.
    #[must_use]
    pub fn connection_options(&self) -> ConnectionOptions {
        ConnectionOptions {
            max_line_length: self.max_line_length.max(1),
            outbound_queue: self.outbound_queue.max(1),
            connect_timeout: Duration::from_secs(self.connect_timeout_secs.max(1)),
        }
    }

    /// Session settings derived from this configuration.
    #[must_use]
    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            user_name: self.user_name.clone(),
            bind_host: self.bind_host.clone(),
            accept_all: self.accept_all,
            ok_to_send: self.ok_to_send,
            ok_to_receive: self.ok_to_receive,
            ok_to_relay: self.ok_to_relay,
            seen_capacity: self.seen_capacity,
            notice_capacity: self.notice_bus_capacity,
            connection: self.connection_options(),
        }
    }
}

/// Parses `value` as `T`, returning `default` on missing or invalid input.
fn parse_value<T: std::str::FromStr>(value: Option<String>, default: T) -> T {
    value.and_then(|v| v.trim().parse().ok()).unwrap_or(default)
}

/// Parses a boolean. Accepts `"true"`, `"1"`, `"false"`, `"0"`
/// (case-insensitive). Returns `default` otherwise.
fn parse_bool(value: Option<String>, default: bool) -> bool {
    match value.map(|v| v.trim().to_ascii_lowercase()).as_deref() {
        Some("true" | "1") => true,
        Some("false" | "0") => false,
        _ => default,
    }
}
