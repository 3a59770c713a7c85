//! Daemon configuration.
//!
//! Loads configuration from JSON strings/files (file IO left to the app).
//! The CLI only ever sets `host`; the remaining fields keep their protocol
//! defaults and exist so tests can bind ephemeral ports and force
//! deterministic loss.

use serde::{Deserialize, Serialize};

/// UDP port daemons exchange SIMP datagrams on.
pub const PEER_PORT: u16 = 7777;

/// TCP port the local client connects to.
pub const CLIENT_PORT: u16 = 7778;

/// Daemon runtime configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Address both sockets bind on, e.g. `127.0.0.1`.
    pub host: String,
    /// UDP port for daemon-to-daemon datagrams.
    #[serde(default = "default_peer_port")]
    pub peer_port: u16,
    /// TCP port for the local client connection.
    #[serde(default = "default_client_port")]
    pub client_port: u16,
    /// Probability that a retransmitting send silently drops the datagram.
    #[serde(default = "default_drop_probability")]
    pub drop_probability: f64,
    /// Attempts per reliable send before giving up.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Per-attempt ACK wait window in milliseconds.
    #[serde(default = "default_ack_timeout_ms")]
    pub ack_timeout_ms: u64,
}

fn default_peer_port() -> u16 {
    PEER_PORT
}

fn default_client_port() -> u16 {
    CLIENT_PORT
}

fn default_drop_probability() -> f64 {
    0.25
}

fn default_max_retries() -> u32 {
    3
}

fn default_ack_timeout_ms() -> u64 {
    5_000
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            peer_port: default_peer_port(),
            client_port: default_client_port(),
            drop_probability: default_drop_probability(),
            max_retries: default_max_retries(),
            ack_timeout_ms: default_ack_timeout_ms(),
        }
    }
}

impl DaemonConfig {
    /// A config binding `host` with the fixed protocol ports.
    pub fn for_host(host: &str) -> Self {
        Self {
            host: host.to_string(),
            ..Self::default()
        }
    }

    /// Parses config from JSON.
    pub fn from_json_str(s: &str) -> serde_json::Result<Self> {
        serde_json::from_str(s)
    }
}
