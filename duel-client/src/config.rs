//! Configuration for the duel engine.
//!
//! Every field has a default, so an empty TOML document is a valid
//! configuration:
//!
//! ```toml
//! poll_interval_ms = 5000
//! fallback_grace_ms = 2000
//! countdown_ticks = 3
//! ```

use duel_core::MachineConfig;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Tunables of one [`crate::DuelClient`].
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DuelConfig {
    /// Status poller period (default: 5000).
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// How long the channel may stay down before polling starts (default: 2000).
    #[serde(default = "default_fallback_grace_ms")]
    pub fallback_grace_ms: u64,
    /// Countdown length in ticks (default: 3).
    #[serde(default = "default_countdown_ticks")]
    pub countdown_ticks: u8,
    /// Countdown tick period (default: 1000).
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    /// How long the reveal follower waits for the leader (default: 1500).
    #[serde(default = "default_reveal_follower_grace_ms")]
    pub reveal_follower_grace_ms: u64,
    /// Push-channel reconnects before giving up (default: 5).
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
    /// Push-channel keepalive period (default: 25000).
    #[serde(default = "default_ping_interval_ms")]
    pub ping_interval_ms: u64,
    /// Silence after a ping before the channel is declared dead (default: 10000).
    #[serde(default = "default_pong_timeout_ms")]
    pub pong_timeout_ms: u64,
    /// Bound of the event channel (default: 64).
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,
}

// Default value functions
fn default_poll_interval_ms() -> u64 {
    5_000
}

fn default_fallback_grace_ms() -> u64 {
    2_000
}

fn default_countdown_ticks() -> u8 {
    3
}

fn default_tick_interval_ms() -> u64 {
    1_000
}

fn default_reveal_follower_grace_ms() -> u64 {
    1_500
}

fn default_max_reconnect_attempts() -> u32 {
    5
}

fn default_ping_interval_ms() -> u64 {
    25_000
}

fn default_pong_timeout_ms() -> u64 {
    10_000
}

fn default_event_channel_capacity() -> usize {
    64
}

impl Default for DuelConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            fallback_grace_ms: default_fallback_grace_ms(),
            countdown_ticks: default_countdown_ticks(),
            tick_interval_ms: default_tick_interval_ms(),
            reveal_follower_grace_ms: default_reveal_follower_grace_ms(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            ping_interval_ms: default_ping_interval_ms(),
            pong_timeout_ms: default_pong_timeout_ms(),
            event_channel_capacity: default_event_channel_capacity(),
        }
    }
}

impl DuelConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Parse configuration from a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(ConfigError::Syntax)
    }

    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let nonzero = [
            ("poll_interval_ms", self.poll_interval_ms),
            ("tick_interval_ms", self.tick_interval_ms),
            ("ping_interval_ms", self.ping_interval_ms),
            ("pong_timeout_ms", self.pong_timeout_ms),
            ("countdown_ticks", u64::from(self.countdown_ticks)),
            ("event_channel_capacity", self.event_channel_capacity as u64),
        ];
        for (field, value) in nonzero {
            if value == 0 {
                return Err(ConfigError::Invalid {
                    field,
                    reason: "must be greater than zero".into(),
                });
            }
        }
        Ok(())
    }

    /// Set the poll interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval_ms = millis(interval);
        self
    }

    /// Set the fallback grace.
    pub fn with_fallback_grace(mut self, grace: Duration) -> Self {
        self.fallback_grace_ms = millis(grace);
        self
    }

    /// Set the countdown length and tick period.
    pub fn with_countdown(mut self, ticks: u8, tick_interval: Duration) -> Self {
        self.countdown_ticks = ticks;
        self.tick_interval_ms = millis(tick_interval);
        self
    }

    /// Set the reveal follower grace.
    pub fn with_reveal_follower_grace(mut self, grace: Duration) -> Self {
        self.reveal_follower_grace_ms = millis(grace);
        self
    }

    /// Set the reconnect cap.
    pub fn with_max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.max_reconnect_attempts = attempts;
        self
    }

    /// Set the keepalive ping period and pong timeout.
    pub fn with_keepalive(mut self, ping_interval: Duration, pong_timeout: Duration) -> Self {
        self.ping_interval_ms = millis(ping_interval);
        self.pong_timeout_ms = millis(pong_timeout);
        self
    }

    /// Set the event channel bound.
    pub fn with_event_channel_capacity(mut self, capacity: usize) -> Self {
        self.event_channel_capacity = capacity;
        self
    }

    /// Status poller period.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Channel-down grace before polling.
    pub fn fallback_grace(&self) -> Duration {
        Duration::from_millis(self.fallback_grace_ms)
    }

    /// Countdown tick period.
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    /// Keepalive ping period.
    pub fn ping_interval(&self) -> Duration {
        Duration::from_millis(self.ping_interval_ms)
    }

    /// Pong timeout.
    pub fn pong_timeout(&self) -> Duration {
        Duration::from_millis(self.pong_timeout_ms)
    }

    /// The pure machine's share of the configuration.
    pub fn machine_config(&self) -> MachineConfig {
        MachineConfig {
            countdown_ticks: self.countdown_ticks,
            reveal_follower_grace: Duration::from_millis(self.reveal_follower_grace_ms),
        }
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
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
    /// Failed to parse an in-memory TOML document.
    #[error("failed to parse config: {0}")]
    Syntax(#[source] toml::de::Error),
    /// A value is out of range.
    #[error("invalid config value for {field}: {reason}")]
    Invalid {
        /// Offending field.
        field: &'static str,
        /// What is wrong with it.
        reason: String,
    },
}
