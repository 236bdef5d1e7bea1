//! Cache statistics tracked with atomic counters

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Cache statistics tracked atomically
#[derive(Debug, Default)]
pub(crate) struct CacheStats {
    /// Lookups served from a fresh entry
    hits: AtomicU64,
    /// Lookups that had to wait for a computation (new or shared)
    misses: AtomicU64,
    /// Misses that joined a computation already in flight
    coalesced: AtomicU64,
    /// Fetcher invocations
    fetches: AtomicU64,
    /// Fetcher failures (including panics)
    failures: AtomicU64,
    /// Expired entries dropped by a fetch or a sweep
    evictions: AtomicU64,
    /// Keys removed by invalidation
    invalidations: AtomicU64,
}

impl CacheStats {
    pub(crate) fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_coalesced(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
        self.coalesced.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_fetch(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
        self.fetches.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_evictions(&self, count: u64) {
        if count > 0 {
            self.evictions.fetch_add(count, Ordering::Relaxed);
        }
    }

    pub(crate) fn record_invalidations(&self, count: u64) {
        if count > 0 {
            self.invalidations.fetch_add(count, Ordering::Relaxed);
        }
    }

    /// Take a point-in-time copy of the counters
    pub(crate) fn snapshot(&self, size: usize, pending: usize) -> CacheStatsSnapshot {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        CacheStatsSnapshot {
            hits,
            misses,
            coalesced: self.coalesced.load(Ordering::Relaxed),
            fetches: self.fetches.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            invalidations: self.invalidations.load(Ordering::Relaxed),
            size,
            pending,
            hit_rate: hit_rate(hits, misses),
        }
    }
}

#[allow(clippy::cast_precision_loss)]
fn hit_rate(hits: u64, misses: u64) -> f64 {
    let total = hits + misses;
    if total == 0 {
        0.0
    } else {
        hits as f64 / total as f64
    }
}

/// Snapshot of cache statistics
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheStatsSnapshot {
    /// Lookups served from a fresh entry
    pub hits: u64,
    /// Lookups not served from a fresh entry
    pub misses: u64,
    /// Misses that shared an in-flight computation instead of fetching
    pub coalesced: u64,
    /// Fetcher invocations
    pub fetches: u64,
    /// Failed computations
    pub failures: u64,
    /// Expired entries removed
    pub evictions: u64,
    /// Keys removed by invalidation
    pub invalidations: u64,
    /// Keys currently tracked (entries and pending requests)
    pub size: usize,
    /// Keys with a computation in flight
    pub pending: usize,
    /// Hit rate (0.0-1.0)
    pub hit_rate: f64,
}
