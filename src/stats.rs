//! Cache serving statistics.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Internal tracker for cache serving counters.
///
/// Updated from concurrently running fetch tasks, so every counter is an
/// atomic; reads take a point-in-time [`StatsSnapshot`].
#[derive(Debug, Default)]
pub struct CacheStats {
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    network_fetches: AtomicU64,
    evictions: AtomicU64,
}

impl CacheStats {
    /// Creates a zeroed tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a request answered from the content partition.
    pub fn record_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a request that missed the content partition.
    pub fn record_miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a network round trip.
    pub fn record_network_fetch(&self) {
        self.network_fetches.fetch_add(1, Ordering::Relaxed);
    }

    /// Records entries evicted during activation.
    pub fn record_evictions(&self, count: u64) {
        self.evictions.fetch_add(count, Ordering::Relaxed);
    }

    /// Takes a point-in-time snapshot of all counters.
    #[must_use]
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            network_fetches: self.network_fetches.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }
}

/// A point-in-time copy of the serving counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    /// Requests answered from the content partition.
    pub cache_hits: u64,
    /// Requests that missed the content partition.
    pub cache_misses: u64,
    /// Network round trips performed.
    pub network_fetches: u64,
    /// Entries evicted during activations.
    pub evictions: u64,
}
