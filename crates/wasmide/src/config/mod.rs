use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use crate::config::facility::{Facilities, ModuleName, Redirect};
use crate::types::ResourceLimits;

pub mod facility;
mod loader;

/// Example configuration embedded at compile time.
///
/// Library users can access this to generate a starter config file.
pub const EXAMPLE_CONFIG: &str = include_str!("../../wasmide.example.toml");

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid module name: {0}")]
    InvalidModuleName(String),

    #[error("failed to read config file at {path}: {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] config::ConfigError),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Worker pool sizing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Number of worker threads running programs
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Number of admitted programs that may wait for a worker
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

/// Config for wasmide
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Name of the exported function invoked to run a program
    #[serde(default = "default_entry_point")]
    pub entry_point: String,

    /// Interval between engine epoch ticks in milliseconds.
    ///
    /// Cancellation of a running program is observed at the next tick.
    #[serde(default = "default_epoch_tick_ms")]
    pub epoch_tick_ms: u64,

    #[serde(default)]
    pub pool: PoolConfig,

    /// Default resource limits applied to all executions.
    /// This will be overridden if the request specifies different limits
    #[serde(default)]
    pub limits: ResourceLimits,

    /// Standard facilities redirected to sandbox substitutes
    #[serde(default)]
    pub facilities: Facilities,
}

impl Config {
    /// Create a new config from the embedded example
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a config with built-in defaults, without reading the embedded example
    pub fn empty() -> Self {
        Self {
            entry_point: default_entry_point(),
            epoch_tick_ms: default_epoch_tick_ms(),
            pool: PoolConfig::default(),
            limits: ResourceLimits::default(),
            facilities: Facilities::default(),
        }
    }

    /// Merge resource limits with defaults
    pub fn effective_limits(&self, overrides: Option<&ResourceLimits>) -> ResourceLimits {
        match overrides {
            Some(limits) => self.limits.with_overrides(limits),
            None => self.limits.clone(),
        }
    }

    /// Interval between epoch ticks
    pub fn epoch_tick(&self) -> Duration {
        Duration::from_millis(self.epoch_tick_ms)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::parse_toml(EXAMPLE_CONFIG).expect("embedded default config should be valid")
    }
}

fn default_entry_point() -> String {
    "main".to_owned()
}

fn default_epoch_tick_ms() -> u64 {
    10
}

fn default_workers() -> usize {
    5
}

fn default_queue_capacity() -> usize {
    5
}
