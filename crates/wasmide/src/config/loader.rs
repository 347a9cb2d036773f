//! Configuration file loading for wasmide
//!
//! Handles loading and parsing configuration files using the config crate.

use std::path::Path;

use config::{Config as ConfigBuilder, File, FileFormat};

use crate::config::{Config, ConfigError};

impl Config {
    /// Load configuration from a file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::ReadFile {
                path: path.to_path_buf(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "file not found"),
            });
        }

        let config = ConfigBuilder::builder()
            .add_source(File::from(path))
            .build()?;

        let config: Config = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a TOML string
    pub fn parse_toml(content: &str) -> Result<Self, ConfigError> {
        let config = ConfigBuilder::builder()
            .add_source(File::from_str(content, FileFormat::Toml))
            .build()?;

        let config: Config = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.entry_point.is_empty() {
            return Err(ConfigError::Invalid("entry_point is empty".to_owned()));
        }
        if self.epoch_tick_ms == 0 {
            return Err(ConfigError::Invalid(
                "epoch_tick_ms must be greater than zero".to_owned(),
            ));
        }
        if self.pool.workers == 0 {
            return Err(ConfigError::Invalid(
                "pool.workers must be greater than zero".to_owned(),
            ));
        }
        if self.pool.queue_capacity == 0 {
            return Err(ConfigError::Invalid(
                "pool.queue_capacity must be greater than zero".to_owned(),
            ));
        }
        match self.limits.wall_time_limit {
            None => {
                return Err(ConfigError::Invalid(
                    "limits.wall_time_limit is required".to_owned(),
                ));
            }
            Some(seconds) if self.limits.wall_time().is_none() => {
                return Err(ConfigError::Invalid(format!(
                    "limits.wall_time_limit must be a positive number of seconds, got {seconds}"
                )));
            }
            Some(_) => {}
        }

        self.facilities.validate()
    }
}
