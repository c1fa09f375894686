//! Server configuration
//!
//! Loaded from an optional JSON file; every field has a default so an
//! empty object (or no file) is a valid configuration. Command-line flags
//! override file values in the server binary.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    /// Unix socket the server listens on
    pub socket_path: String,
    /// Idle time after which a session is torn down
    pub session_timeout_secs: u64,
    /// Interval between expiry sweeps
    pub sweep_interval_secs: u64,
    /// Vertex id space of the mirrored graph
    pub max_vertices: usize,
    /// Accept `publish_epoch` from workers
    pub allow_ingest: bool,
    /// Collect per-method latency metrics
    pub metrics: bool,
    /// Requests slower than this are logged
    pub slow_request_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            socket_path: "/tmp/shmrpc.sock".to_string(),
            session_timeout_secs: 30,
            sweep_interval_secs: 5,
            max_vertices: 1 << 20,
            allow_ingest: false,
            metrics: false,
            slow_request_ms: 100,
        }
    }
}

impl ServerConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    pub fn session_timeout(&self) -> Duration {
        Duration::from_secs(self.session_timeout_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}
