//! Per-key attempt records and the store that holds them.

use dashmap::DashMap;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

use super::key::AttemptKey;

/// Attempts observed for one key in its current window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttemptRecord {
    /// Attempts admitted in the current window
    pub count: u32,
    /// When the current window began
    pub window_start: Instant,
}

impl AttemptRecord {
    /// A fresh record whose window starts at `now`.
    pub fn new(now: Instant) -> Self {
        Self {
            count: 0,
            window_start: now,
        }
    }

    /// Time spent in the current window.
    pub fn elapsed(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.window_start)
    }

    /// Whether the window has fully elapsed.
    ///
    /// The boundary itself still belongs to the window.
    pub fn is_expired(&self, now: Instant, window: Duration) -> bool {
        self.elapsed(now) > window
    }

    /// Start a new window if the current one has elapsed.
    ///
    /// Returns `true` if the record was reset.
    pub fn roll_window(&mut self, now: Instant, window: Duration) -> bool {
        if self.is_expired(now, window) {
            self.count = 0;
            self.window_start = now;
            true
        } else {
            false
        }
    }

    /// Time until the current window closes.
    pub fn remaining_window(&self, now: Instant, window: Duration) -> Duration {
        window.saturating_sub(self.elapsed(now))
    }
}

/// Process-local store of attempt records.
///
/// A store is created empty and handed to one or more limiters; records
/// live until removed, cleared or purged. The store holds the entry lock for
/// a key for the whole of [`AttemptStore::update`], so concurrent updates of
/// the same key never lose an increment.
#[derive(Debug, Default)]
pub struct AttemptStore {
    records: DashMap<AttemptKey, AttemptRecord>,
}

impl AttemptStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` against the record for `key`, creating it first if needed.
    pub fn update<F, O>(&self, key: &AttemptKey, now: Instant, f: F) -> O
    where
        F: FnOnce(&mut AttemptRecord) -> O,
    {
        let mut entry = self
            .records
            .entry(key.clone())
            .or_insert_with(|| AttemptRecord::new(now));
        f(&mut *entry)
    }

    /// A copy of the record for `key`.
    pub fn get(&self, key: &AttemptKey) -> Option<AttemptRecord> {
        self.records.get(key).map(|r| *r)
    }

    /// Remove the record for `key`.
    pub fn remove(&self, key: &AttemptKey) -> Option<AttemptRecord> {
        self.records.remove(key).map(|(_, record)| record)
    }

    /// Number of tracked keys.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether no keys are tracked.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Drop every record.
    pub fn clear(&self) {
        self.records.clear();
    }

    /// Drop records whose window has elapsed. Returns how many were removed.
    pub fn purge_expired(&self, now: Instant, window: Duration) -> usize {
        let mut purged = 0;
        self.records.retain(|_, record| {
            let keep = !record.is_expired(now, window);
            if !keep {
                purged += 1;
            }
            keep
        });

        if purged > 0 {
            debug!(purged, remaining = self.records.len(), "Purged expired attempt records");
        }
        purged
    }
}
