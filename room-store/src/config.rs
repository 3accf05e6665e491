//! Configuration loading for room-store.
//!
//! Configuration is loaded from a TOML file (default: `store.toml`).

use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration for room-store.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Room store behaviour.
    #[serde(default)]
    pub store: StoreSettings,
    /// SQLite backend configuration.
    #[serde(default)]
    pub database: DatabaseConfig,
    /// Sweep task configuration.
    #[serde(default)]
    pub cleanup: CleanupConfig,
}

/// Room store behaviour.
#[derive(Debug, Clone, Deserialize)]
pub struct StoreSettings {
    /// Polling interval when the backend has no push support (default: 1500ms).
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Lifetime of an idle room (default: 6 hours).
    #[serde(default = "default_room_ttl_secs")]
    pub room_ttl_secs: u64,
    /// Lifetime of a directory entry since its last refresh (default: 15 minutes).
    #[serde(default = "default_directory_ttl_secs")]
    pub directory_ttl_secs: u64,
    /// Maximum entries returned by a directory listing (default: 25).
    #[serde(default = "default_directory_limit")]
    pub directory_limit: usize,
}

/// SQLite backend configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to SQLite database file.
    #[serde(default = "default_database_path")]
    pub path: PathBuf,
}

/// Sweep task configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct CleanupConfig {
    /// Sweep interval in seconds (default: 60).
    #[serde(default = "default_cleanup_interval")]
    pub interval_secs: u64,
    /// Enable sweep task (default: true).
    #[serde(default = "default_cleanup_enabled")]
    pub enabled: bool,
}

// Default value functions
fn default_poll_interval_ms() -> u64 {
    1500
}

fn default_room_ttl_secs() -> u64 {
    6 * 60 * 60 // 6 hours
}

fn default_directory_ttl_secs() -> u64 {
    15 * 60 // 15 minutes
}

fn default_directory_limit() -> usize {
    25
}

fn default_database_path() -> PathBuf {
    PathBuf::from("rooms.db")
}

fn default_cleanup_interval() -> u64 {
    60
}

fn default_cleanup_enabled() -> bool {
    true
}

impl StoreSettings {
    /// Polling interval as a duration.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Room TTL in milliseconds.
    pub fn room_ttl_ms(&self) -> i64 {
        (self.room_ttl_secs as i64).saturating_mul(1000)
    }

    /// Directory TTL in milliseconds.
    pub fn directory_ttl_ms(&self) -> i64 {
        (self.directory_ttl_secs as i64).saturating_mul(1000)
    }
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            room_ttl_secs: default_room_ttl_secs(),
            directory_ttl_secs: default_directory_ttl_secs(),
            directory_limit: default_directory_limit(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
        }
    }
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_cleanup_interval(),
            enabled: default_cleanup_enabled(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            store: StoreSettings::default(),
            database: DatabaseConfig::default(),
            cleanup: CleanupConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// Failed to parse configuration file.
    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying TOML parse error.
        source: toml::de::Error,
    },
}
