//! Backoff policy for automatic reconnect attempts.
//!
//! Delays grow exponentially from `initial_delay` by `factor`, capped at `max_delay`.
//! A factor of `1.0` gives a fixed delay.

use std::time::Duration;

use crate::config::StorageConfig;
use crate::constants::MAX_RETRY_DELAY_MS;

/// Retry behavior for failed Local -> Remote transitions.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub factor: f64,
    /// Consecutive failed attempts after which automatic retries stop.
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&StorageConfig::default())
    }
}

impl RetryPolicy {
    #[must_use]
    pub fn from_config(config: &StorageConfig) -> Self {
        Self {
            initial_delay: config.retry_delay(),
            max_delay: Duration::from_millis(MAX_RETRY_DELAY_MS).max(config.retry_delay()),
            factor: 2.0,
            max_attempts: config.remote_retry_attempts,
        }
    }

    /// Fixed delay between attempts.
    #[must_use]
    pub fn fixed(delay: Duration, max_attempts: u32) -> Self {
        Self {
            initial_delay: delay,
            max_delay: delay,
            factor: 1.0,
            max_attempts,
        }
    }

    /// Delay to wait after the `attempt`-th consecutive failure (1-based).
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32) as i32;
        let scaled = self.initial_delay.as_secs_f64() * self.factor.powi(exponent);
        if !scaled.is_finite() || scaled >= self.max_delay.as_secs_f64() {
            self.max_delay
        } else {
            Duration::from_secs_f64(scaled)
        }
    }

    /// Whether `failed_attempts` consecutive failures exhausted automatic retries.
    #[must_use]
    pub fn is_exhausted(&self, failed_attempts: u32) -> bool {
        failed_attempts >= self.max_attempts
    }
}
