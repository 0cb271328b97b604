//! Cache statistics tracking

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters updated from any thread without locking.
#[derive(Debug, Default)]
pub struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
    /// Lookups that ran an uncached trace (full table, unseeded hit, dead entity).
    bypasses: AtomicU64,
    evictions: AtomicU64,
    refreshes: AtomicU64,
    /// Write-backs dropped because their slot was reclaimed first.
    stale_discards: AtomicU64,
    retirements: AtomicU64,
    invalidations: AtomicU64,
}

macro_rules! counter {
    ($record:ident, $field:ident) => {
        pub fn $record(&self) {
            self.$field.fetch_add(1, Ordering::Relaxed);
        }
    };
}

impl CacheStats {
    pub fn new() -> Self {
        Self::default()
    }

    counter!(record_hit, hits);
    counter!(record_miss, misses);
    counter!(record_bypass, bypasses);
    counter!(record_eviction, evictions);
    counter!(record_refresh, refreshes);
    counter!(record_stale_discard, stale_discards);
    counter!(record_retirement, retirements);
    counter!(record_invalidation, invalidations);

    pub fn snapshot(&self) -> CacheStatsSnapshot {
        CacheStatsSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            bypasses: self.bypasses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            refreshes: self.refreshes.load(Ordering::Relaxed),
            stale_discards: self.stale_discards.load(Ordering::Relaxed),
            retirements: self.retirements.load(Ordering::Relaxed),
            invalidations: self.invalidations.load(Ordering::Relaxed),
        }
    }
}

/// Plain copy of [`CacheStats`] at one point in time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStatsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub bypasses: u64,
    pub evictions: u64,
    pub refreshes: u64,
    pub stale_discards: u64,
    pub retirements: u64,
    pub invalidations: u64,
}

impl CacheStatsSnapshot {
    /// Fraction of lookups answered from the cache, in `[0, 1]`.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses + self.bypasses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}
