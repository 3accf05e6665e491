//! Session configuration.
//!
//! Loaded from the `[session]` table of a TOML file. The ACK retry ladder
//! is a protocol constant and deliberately not configurable.

use room_core::{OfferBackoff, PresenceTimeouts, RoundControl};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration file layout.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Per-join session timing.
    #[serde(default)]
    pub session: SessionConfig,
}

/// Timing of one room session.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    /// Presence heartbeat period (default: 5000ms).
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
    /// Maximum age of a peer's `lastSeenAt` (default: 15000ms).
    #[serde(default = "default_presence_seen_timeout_ms")]
    pub presence_seen_timeout_ms: u64,
    /// Maximum age of a peer's echo of our ping token (default: 30000ms).
    #[serde(default = "default_presence_ack_timeout_ms")]
    pub presence_ack_timeout_ms: u64,
    /// Dealer silence before others may start the next round (default: 45000ms).
    #[serde(default = "default_dealer_takeover_timeout_ms")]
    pub dealer_takeover_timeout_ms: u64,
    /// Offer attempts per peer before falling back to relay only (default: 3).
    #[serde(default = "default_offer_attempts")]
    pub offer_attempts: u32,
    /// Linear backoff step between offer attempts (default: 500ms).
    #[serde(default = "default_offer_backoff_ms")]
    pub offer_backoff_ms: u64,
}

fn default_heartbeat_interval_ms() -> u64 {
    5_000
}

fn default_presence_seen_timeout_ms() -> u64 {
    15_000
}

fn default_presence_ack_timeout_ms() -> u64 {
    30_000
}

fn default_dealer_takeover_timeout_ms() -> u64 {
    45_000
}

fn default_offer_attempts() -> u32 {
    3
}

fn default_offer_backoff_ms() -> u64 {
    500
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            presence_seen_timeout_ms: default_presence_seen_timeout_ms(),
            presence_ack_timeout_ms: default_presence_ack_timeout_ms(),
            dealer_takeover_timeout_ms: default_dealer_takeover_timeout_ms(),
            offer_attempts: default_offer_attempts(),
            offer_backoff_ms: default_offer_backoff_ms(),
        }
    }
}

impl SessionConfig {
    /// Heartbeat period as a duration.
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    /// The two presence windows.
    pub fn presence_timeouts(&self) -> PresenceTimeouts {
        PresenceTimeouts {
            seen: Duration::from_millis(self.presence_seen_timeout_ms),
            ack: Duration::from_millis(self.presence_ack_timeout_ms),
        }
    }

    /// Round-control policy with the configured takeover timeout.
    pub fn round_control(&self) -> RoundControl {
        RoundControl::new(Duration::from_millis(self.dealer_takeover_timeout_ms))
    }

    /// Offer retry policy.
    pub fn offer_backoff(&self) -> OfferBackoff {
        OfferBackoff::new(
            self.offer_attempts,
            Duration::from_millis(self.offer_backoff_ms),
        )
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_protocol_timings() {
        let config = SessionConfig::default();
        assert_eq!(config.heartbeat_interval(), Duration::from_secs(5));
        assert_eq!(config.presence_timeouts(), PresenceTimeouts::default());
        assert_eq!(config.round_control(), RoundControl::default());
        assert_eq!(config.offer_backoff(), OfferBackoff::default());
    }

    #[test]
    fn partial_table_keeps_other_defaults() {
        let toml = r#"
[session]
heartbeat_interval_ms = 1000
offer_attempts = 5
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.session.heartbeat_interval_ms, 1000);
        assert_eq!(config.session.offer_attempts, 5);
        assert_eq!(config.session.dealer_takeover_timeout_ms, 45_000);
    }

    #[test]
    fn ack_window_is_longer_than_seen_window() {
        let timeouts = SessionConfig::default().presence_timeouts();
        assert!(timeouts.ack > timeouts.seen);
    }

    #[test]
    fn missing_file_is_read_error() {
        let err = Config::from_file(std::path::Path::new("/nonexistent/session.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::ReadError { .. }));
    }
}
