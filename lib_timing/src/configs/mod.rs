//! # Runtime Configuration
//!
//! Tunables for the ingestion pipeline, loadable from a JSON file with
//! every field defaulted. Binaries point at a config file via CLI flag or
//! the `TIMING_CONFIG` environment variable; the library never reads
//! configuration implicitly.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error occurred: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Config parse error: {0}")]
    ParseError(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// Pause between a car becoming "of interest" and its synthetic lap
    /// announcement, letting connection state settle.
    pub settling_delay_ms: u64,
    /// Relay queue capacity per binding. Small on purpose: a full queue is
    /// backpressure on the producer.
    pub relay_queue_capacity: usize,
    /// Delay before a failed feed connection is retried.
    pub reconnect_delay_secs: u64,
    /// A feed silent for longer than this is considered dead and reconnected.
    pub feed_idle_timeout_secs: u64,
    /// Poll cadence for the structured-payload provider.
    pub racehero_poll_interval_secs: u64,
    /// Base URL the structured-payload provider is polled from.
    pub racehero_base_url: String,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            settling_delay_ms: 2_000,
            relay_queue_capacity: 10,
            reconnect_delay_secs: 5,
            feed_idle_timeout_secs: 30,
            racehero_poll_interval_secs: 10,
            racehero_base_url: "https://api.racehero.io/v1/events".to_string(),
        }
    }
}

impl TimingConfig {
    /// Loads configuration from a JSON file; a missing path yields the
    /// defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path)?;
                Ok(serde_json::from_str(&raw)?)
            }
            None => Ok(Self::default()),
        }
    }
}
