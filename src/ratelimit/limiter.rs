//! Sliding-window admission control.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

use crate::clock::{Clock, TokioClock};
use crate::config::LimiterConfig;

use super::key::AttemptKey;
use super::store::AttemptStore;

/// Outcome of a limiter check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// The attempt was counted and may proceed.
    Admitted,
    /// The key is over its limit until `retry_after` has passed.
    Denied {
        /// Time left in the current window
        retry_after: Duration,
    },
}

impl Decision {
    /// Whether the attempt may proceed.
    pub fn is_admitted(&self) -> bool {
        matches!(self, Decision::Admitted)
    }

    /// Milliseconds until a denied key may try again, `None` when admitted.
    pub fn retry_after_ms(&self) -> Option<u64> {
        match self {
            Decision::Admitted => None,
            Decision::Denied { retry_after } => Some(retry_after.as_millis() as u64),
        }
    }
}

/// Admits at most `max_attempts` attempts per key within a window that
/// starts at the first attempt after the previous window elapsed.
///
/// The limiter never fails: every check yields a [`Decision`].
pub struct SlidingWindowLimiter {
    config: LimiterConfig,
    store: Arc<AttemptStore>,
    clock: Arc<dyn Clock>,
}

impl SlidingWindowLimiter {
    /// Create a limiter over `store` using tokio time.
    pub fn new(config: LimiterConfig, store: Arc<AttemptStore>) -> Self {
        Self::with_clock(config, store, Arc::new(TokioClock))
    }

    /// Create a limiter with an explicit clock.
    pub fn with_clock(config: LimiterConfig, store: Arc<AttemptStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            store,
            clock,
        }
    }

    /// Check and count an attempt for `key`.
    pub fn check(&self, key: &str) -> Decision {
        let key = AttemptKey::new(key);
        let now = self.clock.now();
        let window = self.config.window();
        let max_attempts = self.config.max_attempts;

        let decision = self.store.update(&key, now, |record| {
            if record.roll_window(now, window) {
                debug!(key = %key, "Attempt window elapsed, counter reset");
            }

            if record.count >= max_attempts {
                Decision::Denied {
                    retry_after: record.remaining_window(now, window),
                }
            } else {
                record.count += 1;
                Decision::Admitted
            }
        });

        match decision {
            Decision::Admitted => trace!(key = %key, "Attempt admitted"),
            Decision::Denied { retry_after } => debug!(
                key = %key,
                max_attempts,
                retry_after_ms = retry_after.as_millis() as u64,
                "Attempt denied"
            ),
        }

        decision
    }

    /// Forget every attempt recorded for `key`.
    pub fn reset(&self, key: &str) {
        let key = AttemptKey::new(key);
        if self.store.remove(&key).is_some() {
            debug!(key = %key, "Attempt counter cleared");
        }
    }

    /// Admissions left for `key` in its current window, without counting one.
    pub fn remaining(&self, key: &str) -> u32 {
        let key = AttemptKey::new(key);
        let now = self.clock.now();
        match self.store.get(&key) {
            Some(record) if !record.is_expired(now, self.config.window()) => {
                self.config.max_attempts.saturating_sub(record.count)
            }
            _ => self.config.max_attempts,
        }
    }

    /// Drop records whose window has elapsed.
    pub fn purge_expired(&self) -> usize {
        self.store.purge_expired(self.clock.now(), self.config.window())
    }

    /// The limiter settings.
    pub fn config(&self) -> &LimiterConfig {
        &self.config
    }

    /// The backing store.
    pub fn store(&self) -> &Arc<AttemptStore> {
        &self.store
    }
}
