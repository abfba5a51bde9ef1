//! Configuration system.
//!
//! Loads server configuration from JSON strings or files.

use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

/// Server configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// UDP listen address, e.g. `127.0.0.1:40000`.
    pub server_addr: String,
    /// Tick rate of the driver loop and clock.
    pub tick_hz: u32,
    /// Recently processed sequence ids remembered per client.
    #[serde(default = "default_ack_window")]
    pub ack_window: usize,
    /// Upper bound on single steps the driver runs per tick.
    #[serde(default = "default_max_steps_per_tick")]
    pub max_steps_per_tick: usize,
}

fn default_ack_window() -> usize {
    64
}

fn default_max_steps_per_tick() -> usize {
    256
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            server_addr: "127.0.0.1:40000".to_string(),
            tick_hz: 64,
            ack_window: default_ack_window(),
            max_steps_per_tick: default_max_steps_per_tick(),
        }
    }
}

impl ServerConfig {
    /// Parses config from JSON.
    pub fn from_json_str(s: &str) -> serde_json::Result<Self> {
        serde_json::from_str(s)
    }

    /// Reads and parses a JSON config file.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("read config {}", path.display()))?;
        Self::from_json_str(&text).with_context(|| format!("parse config {}", path.display()))
    }
}
