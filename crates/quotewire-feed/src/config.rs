//! Feed configuration.

use crate::error::{FeedError, FeedResult};
use quotewire_ws::ReconnectConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Market feed client configuration.
///
/// `max_retries` is caller supplied: 0 disables reconnection entirely.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedConfig {
    /// Feed endpoint (`ws://` or `wss://`).
    pub url: String,
    /// Heartbeat probe interval in milliseconds. Default: 5000.
    #[serde(default = "default_ping_interval_ms")]
    pub ping_interval_ms: u64,
    /// Reconnect attempts after an unexpected close. Default: 5.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// First reconnect delay in milliseconds. Default: 500.
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    /// Reconnect delay ceiling in milliseconds (before jitter). Default: 10000.
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    /// Buffered events per subscriber before it starts lagging. Default: 1024.
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

fn default_ping_interval_ms() -> u64 {
    5000
}

fn default_max_retries() -> u32 {
    5
}

fn default_initial_backoff_ms() -> u64 {
    500
}

fn default_max_backoff_ms() -> u64 {
    10_000
}

fn default_event_capacity() -> usize {
    1024
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            ping_interval_ms: default_ping_interval_ms(),
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            event_capacity: default_event_capacity(),
        }
    }
}

impl FeedConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_millis(self.ping_interval_ms)
    }

    pub fn reconnect_config(&self) -> ReconnectConfig {
        ReconnectConfig {
            initial_backoff: Duration::from_millis(self.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.max_backoff_ms),
            max_retries: self.max_retries,
        }
    }

    /// Check the options that the reconnect policy does not cover.
    pub fn validate(&self) -> FeedResult<()> {
        if self.url.trim().is_empty() {
            return Err(FeedError::InvalidConfig("url is required".to_string()));
        }
        if self.ping_interval_ms == 0 {
            return Err(FeedError::InvalidConfig(
                "ping_interval_ms must be greater than zero".to_string(),
            ));
        }
        if self.event_capacity == 0 {
            return Err(FeedError::InvalidConfig(
                "event_capacity must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}
