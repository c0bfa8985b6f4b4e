//! Client configuration.
//!
//! Every field has a default, so a TOML file only needs the values it
//! changes:
//!
//! ```toml
//! request_timeout_ms = 10000
//!
//! [reconnect]
//! max_attempts = 3
//!
//! [submission]
//! ledger_close_time_ms = 1000
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Bound on the WebSocket handshake.
    pub connection_timeout_ms: u64,
    /// Bound on each request awaiting its response.
    pub request_timeout_ms: u64,
    /// Ping interval; a socket silent for two intervals is considered dead.
    pub heartbeat_interval_ms: u64,
    pub reconnect: ReconnectConfig,
    pub submission: SubmissionConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connection_timeout_ms: 5_000,
            request_timeout_ms: 20_000,
            heartbeat_interval_ms: 15_000,
            reconnect: ReconnectConfig::default(),
            submission: SubmissionConfig::default(),
        }
    }
}

impl ClientConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        toml::from_str(s).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Read(path.display().to_string(), e.to_string()))?;
        Self::from_toml_str(&text)
    }

    pub fn connection_timeout(&self) -> Duration {
        Duration::from_millis(self.connection_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms.max(1))
    }
}

/// Auto-reconnect behavior after an unexpected close.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    pub enabled: bool,
    /// Attempts before giving up.
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Multiplier for exponential backoff.
    pub multiplier: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: 10,
            initial_delay_ms: 100,
            max_delay_ms: 60_000,
            multiplier: 2.0,
        }
    }
}

impl ReconnectConfig {
    /// Delay before the given attempt (1-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(63) as i32;
        let delay = self.initial_delay_ms as f64 * self.multiplier.powi(exponent);
        let capped = if delay.is_finite() {
            (delay as u64).min(self.max_delay_ms)
        } else {
            self.max_delay_ms
        };
        Duration::from_millis(capped)
    }
}

/// Reliable-submission tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubmissionConfig {
    /// Approximate time for a ledger to close; one poll per interval.
    pub ledger_close_time_ms: u64,
    /// Ledgers added to the validated index when autofilling LastLedgerSequence.
    pub ledger_offset: u32,
    /// Upper bound on an autofilled fee, in drops.
    pub max_fee_drops: u64,
    /// Multiplier applied to the current open-ledger fee.
    pub fee_cushion: f64,
}

impl Default for SubmissionConfig {
    fn default() -> Self {
        Self {
            ledger_close_time_ms: 4_000,
            ledger_offset: 20,
            max_fee_drops: 2_000_000,
            fee_cushion: 1.2,
        }
    }
}

impl SubmissionConfig {
    pub fn ledger_close_time(&self) -> Duration {
        Duration::from_millis(self.ledger_close_time_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read config {0}: {1}")]
    Read(String, String),
    #[error("invalid config: {0}")]
    Parse(String),
}
