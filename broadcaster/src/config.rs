//! Broadcaster configuration with TOML file support.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::BroadcasterError;

/// How a broadcast hands heads to subscriber workers.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryMode {
    /// Enqueue and return immediately; the feed never waits on subscribers.
    /// A subscriber that falls behind builds a backlog but never misses a head.
    #[default]
    Queued,
    /// Wait until every subscriber has handled (or timed out on) the head.
    /// Subscribers still run concurrently with each other.
    Synchronous,
}

/// Configuration for a [`HeadBroadcaster`](crate::HeadBroadcaster).
///
/// Can be loaded from a TOML file via [`BroadcasterConfig::from_toml_file`]
/// or built programmatically (e.g. for tests).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BroadcasterConfig {
    /// Service name reported by `name()` and used as the health report key.
    #[serde(default = "default_name")]
    pub name: String,

    /// Fan-out behaviour, see [`DeliveryMode`].
    #[serde(default)]
    pub delivery_mode: DeliveryMode,

    /// Undelivered heads a single subscriber may accumulate before a warning
    /// is logged. Queues are unbounded; this only flags lagging subscribers.
    #[serde(default = "default_backlog_warn_threshold")]
    pub backlog_warn_threshold: usize,

    /// Upper bound on a single subscriber callback, in milliseconds. 0 disables.
    #[serde(default = "default_callback_timeout_ms")]
    pub callback_timeout_ms: u64,

    /// How long `close` waits for the feed task and subscriber workers.
    #[serde(default = "default_close_grace_period_ms")]
    pub close_grace_period_ms: u64,

    /// Capacity of the bundled channel feed.
    #[serde(default = "default_feed_capacity")]
    pub feed_capacity: usize,

    /// Log format: "human" or "json".
    #[serde(default = "default_log_format")]
    pub log_format: String,

    /// Log level filter: "trace", "debug", "info", "warn", "error".
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

// ── Serde default helpers ──────────────────────────────────────────────

fn default_name() -> String {
    "HeadBroadcaster".to_string()
}

fn default_backlog_warn_threshold() -> usize {
    256
}

fn default_callback_timeout_ms() -> u64 {
    2_000
}

fn default_close_grace_period_ms() -> u64 {
    5_000
}

fn default_feed_capacity() -> usize {
    64
}

fn default_log_format() -> String {
    "human".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

// ── Impl ───────────────────────────────────────────────────────────────

impl BroadcasterConfig {
    /// Load configuration from a TOML file.
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, BroadcasterError> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| BroadcasterError::Config(e.to_string()))?;
        Self::from_toml_str(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml_str(s: &str) -> Result<Self, BroadcasterError> {
        toml::from_str(s).map_err(|e| BroadcasterError::Config(e.to_string()))
    }

    /// Serialize the configuration to a TOML string.
    pub fn to_toml_string(&self) -> Result<String, BroadcasterError> {
        toml::to_string_pretty(self).map_err(|e| BroadcasterError::Config(e.to_string()))
    }

    /// Check the settings `start` depends on.
    pub fn validate(&self) -> Result<(), BroadcasterError> {
        if self.backlog_warn_threshold == 0 {
            return Err(BroadcasterError::InvalidConfiguration(
                "backlog_warn_threshold must be at least 1".into(),
            ));
        }
        if self.delivery_mode == DeliveryMode::Synchronous && self.callback_timeout_ms == 0 {
            return Err(BroadcasterError::InvalidConfiguration(
                "synchronous delivery requires a callback timeout".into(),
            ));
        }
        Ok(())
    }

    pub fn callback_timeout(&self) -> Option<Duration> {
        (self.callback_timeout_ms > 0).then(|| Duration::from_millis(self.callback_timeout_ms))
    }

    pub fn close_grace_period(&self) -> Duration {
        Duration::from_millis(self.close_grace_period_ms)
    }
}

impl Default for BroadcasterConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            delivery_mode: DeliveryMode::default(),
            backlog_warn_threshold: default_backlog_warn_threshold(),
            callback_timeout_ms: default_callback_timeout_ms(),
            close_grace_period_ms: default_close_grace_period_ms(),
            feed_capacity: default_feed_capacity(),
            log_format: default_log_format(),
            log_level: default_log_level(),
        }
    }
}
