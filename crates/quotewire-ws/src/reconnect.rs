//! Reconnection policy.
//!
//! `delay(n) = min(initial_backoff * 2^n, max_backoff) * (1 + jitter)` with
//! `jitter` drawn uniformly from `[0, MAX_JITTER_RATIO)`. The policy only
//! decides; scheduling belongs to the session that owns the timer.

use crate::error::{WsError, WsResult};
use rand::Rng;
use std::time::Duration;

/// Upper bound (exclusive) of the multiplicative jitter.
pub const MAX_JITTER_RATIO: f64 = 0.3;

/// Backoff configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectConfig {
    /// Delay before the first retry.
    pub initial_backoff: Duration,
    /// Ceiling for the un-jittered delay.
    pub max_backoff: Duration,
    /// Retries allowed after the first attempt (0 = single attempt).
    pub max_retries: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_millis(10_000),
            max_retries: 5,
        }
    }
}

/// What to do after an unexpected close.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectDecision {
    /// Reconnect after `delay`; `attempt` is the new retry count.
    Retry { attempt: u32, delay: Duration },
    /// Ceiling reached after `attempts` retries. Terminal.
    GiveUp { attempts: u32 },
}

/// Exponential backoff with jitter and a retry ceiling.
#[derive(Debug, Clone, Copy)]
pub struct ReconnectPolicy {
    config: ReconnectConfig,
}

impl ReconnectPolicy {
    pub fn new(config: ReconnectConfig) -> WsResult<Self> {
        if config.initial_backoff.is_zero() {
            return Err(WsError::InvalidConfig(
                "initial_backoff must be greater than zero".to_string(),
            ));
        }
        if config.initial_backoff > config.max_backoff {
            return Err(WsError::InvalidConfig(format!(
                "initial_backoff ({}ms) exceeds max_backoff ({}ms)",
                config.initial_backoff.as_millis(),
                config.max_backoff.as_millis()
            )));
        }
        Ok(Self { config })
    }

    pub fn config(&self) -> &ReconnectConfig {
        &self.config
    }

    pub fn max_retries(&self) -> u32 {
        self.config.max_retries
    }

    /// Un-jittered delay: `min(initial * 2^n, max)`.
    pub fn base_delay(&self, retry_count: u32) -> Duration {
        let initial_ms = self.config.initial_backoff.as_millis() as u64;
        let max_ms = self.config.max_backoff.as_millis() as u64;
        // Exponent saturates: anything past 2^63 is clamped anyway.
        let factor = 1u64.checked_shl(retry_count).unwrap_or(u64::MAX);
        Duration::from_millis(initial_ms.saturating_mul(factor).min(max_ms))
    }

    /// Delay for `retry_count` with an explicit jitter ratio in `[0, MAX_JITTER_RATIO)`.
    pub fn delay_with_jitter(&self, retry_count: u32, jitter: f64) -> Duration {
        let jitter = jitter.clamp(0.0, MAX_JITTER_RATIO);
        self.base_delay(retry_count).mul_f64(1.0 + jitter)
    }

    /// Delay for `retry_count` with random jitter.
    pub fn delay(&self, retry_count: u32) -> Duration {
        let jitter = rand::thread_rng().gen_range(0.0..MAX_JITTER_RATIO);
        self.delay_with_jitter(retry_count, jitter)
    }

    /// Decide after an unexpected close, given retries already made.
    pub fn decide(&self, retry_count: u32) -> ReconnectDecision {
        if retry_count < self.config.max_retries {
            ReconnectDecision::Retry {
                attempt: retry_count + 1,
                delay: self.delay(retry_count),
            }
        } else {
            ReconnectDecision::GiveUp {
                attempts: retry_count,
            }
        }
    }
}
