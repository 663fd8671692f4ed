//! Exponential backoff delays.

use rand::Rng;
use std::time::Duration;

use crate::config::RetryConfig;

/// Delay before retry `n + 1` is `base * 2^n`, optionally capped, plus an
/// optional uniform jitter.
///
/// Jitter is off by default. When enabled it is added after the cap, so only
/// the un-jittered part is strictly increasing in `n`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    base_ms: u64,
    max_ms: Option<u64>,
    jitter_ms: u64,
}

impl BackoffPolicy {
    /// Doubling delays starting at `base`.
    pub fn exponential(base: Duration) -> Self {
        Self {
            base_ms: base.as_millis() as u64,
            max_ms: None,
            jitter_ms: 0,
        }
    }

    /// Cap every delay at `max`.
    pub fn with_max(mut self, max: Duration) -> Self {
        self.max_ms = Some(max.as_millis() as u64);
        self
    }

    /// Add up to `jitter` of random delay.
    pub fn with_jitter(mut self, jitter: Duration) -> Self {
        self.jitter_ms = jitter.as_millis() as u64;
        self
    }

    /// Build from a retry configuration.
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            base_ms: config.base_delay_ms,
            max_ms: config.max_delay_ms,
            jitter_ms: config.jitter_ms,
        }
    }

    /// The deterministic delay before retry `retry_count + 1`.
    pub fn base_delay_for(&self, retry_count: u32) -> Duration {
        let factor = 1u64.checked_shl(retry_count).unwrap_or(u64::MAX);
        let mut delay_ms = self.base_ms.saturating_mul(factor);
        if let Some(max_ms) = self.max_ms {
            delay_ms = delay_ms.min(max_ms);
        }
        Duration::from_millis(delay_ms)
    }

    /// The delay to actually wait before retry `retry_count + 1`.
    pub fn delay_for(&self, retry_count: u32) -> Duration {
        let delay = self.base_delay_for(retry_count);
        if self.jitter_ms == 0 {
            return delay;
        }
        let jitter = rand::thread_rng().gen_range(0..=self.jitter_ms);
        delay + Duration::from_millis(jitter)
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}
