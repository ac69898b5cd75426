//! Connection and timing settings for the client library.
//!
//! Every field has a serde default so a partial `[connection]` table in the
//! CLI's TOML file is enough.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default chunk size for file uploads: 64 KB.
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// Settings shared by the session, loaders and file transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Server URL (`ws://` or `wss://`).
    #[serde(default = "default_server")]
    pub server: String,

    /// Username offered at login (empty = ask).
    #[serde(default)]
    pub username: String,

    /// Upper bound on any single remote call.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Keepalive ping interval in seconds (0 = disabled).
    #[serde(default = "default_ping_interval")]
    pub ping_interval_secs: u64,

    /// Ceiling for `wait_for_load` on detail views.
    #[serde(default = "default_load_ceiling")]
    pub load_ceiling_secs: u64,

    /// Bytes per upload chunk.
    #[serde(default = "default_chunk_size")]
    pub upload_chunk_size: usize,

    /// Idle time after which an incoming transfer counts as abandoned.
    #[serde(default = "default_file_lease")]
    pub file_lease_secs: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server: default_server(),
            username: String::new(),
            request_timeout_secs: default_request_timeout(),
            ping_interval_secs: default_ping_interval(),
            load_ceiling_secs: default_load_ceiling(),
            upload_chunk_size: default_chunk_size(),
            file_lease_secs: default_file_lease(),
        }
    }
}

fn default_server() -> String {
    "ws://localhost:4444/ganymede".to_string()
}

fn default_request_timeout() -> u64 {
    30
}

fn default_ping_interval() -> u64 {
    30
}

fn default_load_ceiling() -> u64 {
    200
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

fn default_file_lease() -> u64 {
    60
}

impl ClientConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    /// `None` when keepalive is disabled.
    pub fn ping_interval(&self) -> Option<Duration> {
        (self.ping_interval_secs > 0).then(|| Duration::from_secs(self.ping_interval_secs))
    }

    pub fn load_ceiling(&self) -> Duration {
        Duration::from_secs(self.load_ceiling_secs)
    }

    pub fn file_lease(&self) -> Duration {
        Duration::from_secs(self.file_lease_secs.max(1))
    }

    /// Chunk size clamped to at least one byte.
    pub fn chunk_size(&self) -> usize {
        self.upload_chunk_size.max(1)
    }
}
