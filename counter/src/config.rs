//! Configuration management for the counter.

use std::env;
use std::path::PathBuf;

/// Counter configuration loaded from environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Path of the JSON-lines record log
    pub log_path: PathBuf,
    /// Amount added or subtracted per command
    pub step: i64,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let log_path = lookup("COUNTER_LOG")
            .unwrap_or_else(|| "counter.log.jsonl".to_string())
            .into();

        let step = lookup("COUNTER_STEP")
            .unwrap_or_else(|| "1".to_string())
            .parse()
            .map_err(|_| ConfigError::InvalidStep)?;

        Ok(Self { log_path, step })
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid COUNTER_STEP value")]
    InvalidStep,
}
