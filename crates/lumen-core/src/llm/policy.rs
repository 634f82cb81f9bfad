//! Rate-limit and backoff policy shared by the queue and the retry executor.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Spacing and retry parameters for one run. Also the `[rate_limit]` config section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitPolicy {
    /// Minimum time between the starts of two consecutive provider calls
    pub min_spacing_ms: u64,

    /// Retries after the first attempt (rate-limit failures only)
    pub max_retries: u32,

    /// Wait before the first retry
    pub initial_backoff_ms: u64,

    /// Upper bound for any single wait
    pub max_backoff_ms: u64,

    /// Growth factor applied to the wait after each retry
    pub backoff_multiplier: f64,
}

impl Default for RateLimitPolicy {
    fn default() -> Self {
        Self {
            min_spacing_ms: 2000,
            max_retries: 3,
            initial_backoff_ms: 2000,
            max_backoff_ms: 30_000,
            backoff_multiplier: 2.0,
        }
    }
}

impl RateLimitPolicy {
    /// Default policy with the wider spacing free-tier models need.
    pub fn free_tier(min_spacing_ms: u64) -> Self {
        Self {
            min_spacing_ms,
            ..Self::default()
        }
    }

    pub fn min_spacing(&self) -> Duration {
        Duration::from_millis(self.min_spacing_ms)
    }

    /// Wait before retry number `attempt` (1-based):
    /// `min(initial * multiplier^(attempt-1), max)`.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let delay = self.initial_backoff_ms as f64 * self.backoff_multiplier.powi(exponent);
        let capped = if delay.is_finite() {
            delay.min(self.max_backoff_ms as f64)
        } else {
            self.max_backoff_ms as f64
        };
        Duration::from_millis(capped as u64)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.min_spacing_ms == 0 {
            return Err(ConfigError::ValidationError(
                "rate_limit.min_spacing_ms must be > 0".into(),
            ));
        }
        if self.backoff_multiplier.is_nan() || self.backoff_multiplier < 1.0 {
            return Err(ConfigError::ValidationError(
                "rate_limit.backoff_multiplier must be >= 1".into(),
            ));
        }
        if self.max_backoff_ms < self.initial_backoff_ms {
            return Err(ConfigError::ValidationError(
                "rate_limit.max_backoff_ms must be >= initial_backoff_ms".into(),
            ));
        }
        Ok(())
    }
}
