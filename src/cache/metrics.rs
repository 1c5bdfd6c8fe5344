//! Cache Metrics Module
//!
//! Tracks insert, lookup and eviction counters.

use serde::Serialize;

use crate::cache::EvictionReason;

// == Metrics ==
/// Snapshot of cache counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Metrics {
    /// Successful inserts and updates
    pub inserted: u64,
    /// Lookup attempts
    pub retrievals: u64,
    /// Lookups that found a live entry (excludes loader invocations)
    pub hits: u64,
    /// Lookups that found nothing (includes loader invocations)
    pub misses: u64,
    /// Entries evicted to stay within the size limit
    pub evicted_full: u64,
    /// Entries removed because they expired
    pub evicted_expired: u64,
    /// Entries removed by close or purge
    pub evicted_closed: u64,
}

impl Metrics {
    // == Constructor ==
    /// Creates a new Metrics with all counters at zero.
    pub fn new() -> Self {
        Self::default()
    }

    // == Hit Rate ==
    /// Calculates the cache hit rate.
    ///
    /// Returns hits / (hits + misses), or 0.0 if no lookups have been made.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    pub(crate) fn record_insert(&mut self) {
        self.inserted += 1;
    }

    pub(crate) fn record_hit(&mut self) {
        self.retrievals += 1;
        self.hits += 1;
    }

    pub(crate) fn record_miss(&mut self) {
        self.retrievals += 1;
        self.misses += 1;
    }

    // == Record Eviction ==
    /// Counts one eviction under its reason. Explicit removals are not counted.
    pub(crate) fn record_eviction(&mut self, reason: EvictionReason) {
        match reason {
            EvictionReason::Removed => {}
            EvictionReason::EvictedSize => self.evicted_full += 1,
            EvictionReason::Expired => self.evicted_expired += 1,
            EvictionReason::Closed => self.evicted_closed += 1,
        }
    }

    /// Counts a bulk purge of `count` entries.
    pub(crate) fn record_purge(&mut self, count: usize) {
        self.evicted_closed += count as u64;
    }
}
