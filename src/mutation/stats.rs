//! Quota and outcome counters.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Remaining-quota counter shared by all operations of one mutation.
///
/// Decrements saturate at zero.
#[derive(Debug)]
pub struct Quota {
    remaining: AtomicU64,
}

impl Quota {
    pub fn new(initial: u64) -> Self {
        Self {
            remaining: AtomicU64::new(initial),
        }
    }

    /// Current remaining quota.
    pub fn remaining(&self) -> u64 {
        self.remaining.load(Ordering::SeqCst)
    }

    /// Take one unit, returning what is left.
    pub fn consume(&self) -> u64 {
        let previous = self
            .remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |q| Some(q.saturating_sub(1)))
            .unwrap_or(0);
        previous.saturating_sub(1)
    }

    /// Replace the remaining quota (e.g. after the server reports a new balance).
    pub fn set(&self, remaining: u64) {
        self.remaining.store(remaining, Ordering::SeqCst);
    }
}

/// Atomic counters of mutation outcomes.
#[derive(Debug, Default)]
pub struct MutationStats {
    remote_calls: AtomicU64,
    successes: AtomicU64,
    retries: AtomicU64,
    rate_limited: AtomicU64,
    terminal_failures: AtomicU64,
    exhausted: AtomicU64,
    cancelled: AtomicU64,
    /// Cumulative backoff time in milliseconds.
    total_backoff_ms: AtomicU64,
}

impl MutationStats {
    fn increment(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_remote_call(&self) {
        Self::increment(&self.remote_calls);
    }

    pub(crate) fn record_success(&self) {
        Self::increment(&self.successes);
    }

    pub(crate) fn record_rate_limited(&self) {
        Self::increment(&self.rate_limited);
    }

    pub(crate) fn record_terminal_failure(&self) {
        Self::increment(&self.terminal_failures);
    }

    pub(crate) fn record_exhausted(&self) {
        Self::increment(&self.exhausted);
    }

    pub(crate) fn record_cancelled(&self) {
        Self::increment(&self.cancelled);
    }

    /// Count one retry and the delay slept before it.
    pub(crate) fn record_backoff(&self, delay_ms: u64) {
        Self::increment(&self.retries);
        self.total_backoff_ms.fetch_add(delay_ms, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            remote_calls: self.remote_calls.load(Ordering::Relaxed),
            successes: self.successes.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            rate_limited: self.rate_limited.load(Ordering::Relaxed),
            terminal_failures: self.terminal_failures.load(Ordering::Relaxed),
            exhausted: self.exhausted.load(Ordering::Relaxed),
            cancelled: self.cancelled.load(Ordering::Relaxed),
            total_backoff_ms: self.total_backoff_ms.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`MutationStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct StatsSnapshot {
    pub remote_calls: u64,
    pub successes: u64,
    pub retries: u64,
    pub rate_limited: u64,
    pub terminal_failures: u64,
    pub exhausted: u64,
    pub cancelled: u64,
    pub total_backoff_ms: u64,
}

/// Status of a throttled mutation for dashboards and debug endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub name: String,
    pub remaining_quota: u64,
    pub in_flight: usize,
    pub stats: StatsSnapshot,
    pub generated_at: DateTime<Utc>,
}

impl StatusReport {
    /// Render as a JSON string.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quota_floor() {
        let quota = Quota::new(2);
        assert_eq!(quota.consume(), 1);
        assert_eq!(quota.consume(), 0);
        for _ in 0..10 {
            assert_eq!(quota.consume(), 0);
        }
        assert_eq!(quota.remaining(), 0);

        quota.set(5);
        assert_eq!(quota.remaining(), 5);
    }

    #[test]
    fn test_stats_snapshot() {
        let stats = MutationStats::default();
        stats.record_remote_call();
        stats.record_remote_call();
        stats.record_success();
        stats.record_cancelled();
        stats.record_backoff(500);
        stats.record_backoff(1000);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.remote_calls, 2);
        assert_eq!(snapshot.retries, 2);
        assert_eq!(snapshot.total_backoff_ms, 1500);
        assert_eq!(snapshot.successes, 1);
        assert_eq!(snapshot.cancelled, 1);
        assert_eq!(snapshot.rate_limited, 0);
    }

    #[test]
    fn test_status_report_json() {
        let report = StatusReport {
            name: "enrichment".to_string(),
            remaining_quota: 7,
            in_flight: 1,
            stats: StatsSnapshot::default(),
            generated_at: Utc::now(),
        };
        let json: serde_json::Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();
        assert_eq!(json["name"], "enrichment");
        assert_eq!(json["remaining_quota"], 7);
        assert_eq!(json["stats"]["remote_calls"], 0);
    }
}
