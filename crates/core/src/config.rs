//! Configuration management for FleetLink.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::Result;

/// Gateway runtime configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Dispatch endpoint the transport dials, e.g. `ws://host:port/gateway`
    pub endpoint: String,
    /// Reconnect attempts before falling back to degraded polling
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
    /// Degraded polling interval in seconds
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// Offline outbox database path; `:memory:` keeps the queue in-process
    #[serde(default = "default_outbox_path")]
    pub outbox_path: String,
    /// Optional outbox cap; when full the oldest queued command is dropped
    #[serde(default)]
    pub outbox_max_queued: Option<usize>,
}

fn default_max_reconnect_attempts() -> u32 {
    5
}

fn default_poll_interval_secs() -> u64 {
    30
}

fn default_outbox_path() -> String {
    "fleetlink-outbox.db".to_string()
}

impl GatewayConfig {
    /// Load configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = toml::from_str(&content)?;
        Ok(config)
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            endpoint: "ws://127.0.0.1:9300/gateway".to_string(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            poll_interval_secs: default_poll_interval_secs(),
            outbox_path: default_outbox_path(),
            outbox_max_queued: None,
        }
    }
}
