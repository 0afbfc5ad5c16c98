//! JSON configuration file — load, save, defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::ConfigError;

/// Default configuration file name, resolved against the working directory.
pub const CONFIG_FILE: &str = "jobq.json";

/// Queue configuration.
///
/// Missing keys fall back to their defaults, so a hand-edited partial file
/// keeps working.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Maximum execution attempts before a job is parked in the DLQ.
    /// Snapshotted onto each job at enqueue time.
    pub max_retries: u32,
    /// Base of the exponential retry backoff, in seconds.
    pub backoff_base: u32,
    /// Worker poll interval when no job is available.
    pub poll_interval_ms: u64,
    /// Path to the shared SQLite database file.
    pub db_path: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_base: 2,
            poll_interval_ms: 100,
            db_path: PathBuf::from("jobq.db"),
        }
    }
}

impl Config {
    /// Load configuration from the default file.
    pub fn load() -> Self {
        Self::load_from(Path::new(CONFIG_FILE))
    }

    /// Load configuration from `path`.
    ///
    /// Creates the file with defaults if it does not exist. Unreadable or
    /// malformed files fall back to defaults with a warning rather than
    /// failing the command.
    pub fn load_from(path: &Path) -> Self {
        if !path.exists() {
            let config = Self::default();
            match config.save_to(path) {
                Ok(()) => info!(path = %path.display(), "Created default config file"),
                Err(e) => warn!(path = %path.display(), error = %e, "Could not write default config file"),
            }
            return config;
        }

        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Could not read config file, using defaults");
                return Self::default();
            }
        };

        match serde_json::from_str(&raw) {
            Ok(config) => config,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Invalid JSON in config file, using defaults");
                Self::default()
            }
        }
    }

    /// Write this configuration to `path` as pretty-printed JSON.
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let json = serde_json::to_string_pretty(self).map_err(|e| ConfigError::InvalidValue {
            key: "<config>".to_string(),
            message: e.to_string(),
        })?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Set a single key from its string representation (for `config set`).
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        let invalid = |message: String| ConfigError::InvalidValue {
            key: key.to_string(),
            message,
        };
        match key {
            "max_retries" => self.max_retries = value.parse().map_err(|_| invalid(format!("expected a non-negative integer, got '{value}'")))?,
            "backoff_base" => self.backoff_base = value.parse().map_err(|_| invalid(format!("expected a non-negative integer, got '{value}'")))?,
            "poll_interval_ms" => self.poll_interval_ms = value.parse().map_err(|_| invalid(format!("expected a non-negative integer, got '{value}'")))?,
            "db_path" => self.db_path = PathBuf::from(value),
            other => return Err(ConfigError::UnknownKey(other.to_string())),
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}
