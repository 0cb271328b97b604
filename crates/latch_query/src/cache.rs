//! The query cache engine: table, collaborators and lookup policy.

use crate::config::QueryCacheConfig;
use crate::entry::EntrySnapshot;
use crate::error::QueryCacheError;
use crate::key::QueryKey;
use crate::services::QueryServices;
use crate::stats::{CacheStats, CacheStatsSnapshot};
use crate::table::{CacheTable, Lookup};
use std::sync::atomic::{AtomicBool, Ordering};

/// Hysteresis cache for trace queries.
///
/// One instance per level session, shared by reference between the game loop
/// (which drives [`run_update_cycle`](Self::run_update_cycle) and
/// [`invalidate`](Self::invalidate)) and the AI code issuing lookups.
pub struct QueryCache {
    pub(crate) table: CacheTable,
    pub(crate) services: QueryServices,
    pub(crate) stats: CacheStats,
    pub(crate) config: QueryCacheConfig,
    pub(crate) pool: Option<rayon::ThreadPool>,
    /// Set once a bypass has been logged this cycle.
    pub(crate) bypass_reported: AtomicBool,
}

impl QueryCache {
    pub fn new(config: QueryCacheConfig, services: QueryServices) -> Result<Self, QueryCacheError> {
        config.validate()?;

        let pool = match config.worker_threads {
            Some(threads) => Some(
                rayon::ThreadPoolBuilder::new()
                    .num_threads(threads)
                    .thread_name(|index| format!("latch-query-{index}"))
                    .build()?,
            ),
            None => None,
        };

        tracing::info!(
            capacity = config.capacity,
            buckets = config.bucket_count,
            workers = ?config.worker_threads,
            "query cache initialized"
        );

        Ok(Self {
            table: CacheTable::new(
                config.capacity,
                config.bucket_count,
                config.eviction_idle_cycles,
            ),
            services,
            stats: CacheStats::new(),
            config,
            pool,
            bypass_reported: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &QueryCacheConfig {
        &self.config
    }

    /// Answer `key`, reusing a cached result when one exists.
    ///
    /// Never blocks on a refresh and never fails: every path that cannot use
    /// the cache falls back to a direct trace.
    pub fn lookup(&self, key: &QueryKey) -> bool {
        let resolver = self.services.resolver.as_ref();
        if !key.references_live(resolver) {
            tracing::trace!(?key, "query references a destroyed entity");
            self.stats.record_bypass();
            return self.trace_uncached(key);
        }

        match self.table.lookup_or_create(key) {
            Lookup::Hit { snapshot, .. } if snapshot.seeded => {
                self.stats.record_hit();
                snapshot.result
            }
            Lookup::Hit { .. } => {
                // another caller is still seeding this entry
                self.stats.record_bypass();
                self.trace_uncached(key)
            }
            Lookup::Created { handle, evicted } => {
                self.stats.record_miss();
                if evicted {
                    self.stats.record_eviction();
                }

                let now = self.services.clock.now();
                match key.resolve_trace(resolver) {
                    Some(request) => {
                        let result = self.services.tracer.is_clear(&request);
                        if !self.table.complete(handle, result, now) {
                            self.stats.record_stale_discard();
                        }
                        result
                    }
                    None => {
                        self.table.retire(handle);
                        self.stats.record_retirement();
                        false
                    }
                }
            }
            Lookup::Bypass => {
                self.stats.record_bypass();
                if !self.bypass_reported.swap(true, Ordering::Relaxed) {
                    tracing::warn!(
                        capacity = self.table.capacity(),
                        "query cache full; tracing uncached until entries go idle"
                    );
                }
                self.trace_uncached(key)
            }
        }
    }

    /// Trace `key` directly without touching the table.
    pub fn trace_uncached(&self, key: &QueryKey) -> bool {
        key.resolve_trace(self.services.resolver.as_ref())
            .is_some_and(|request| self.services.tracer.is_clear(&request))
    }

    /// Drop every entry. Subsequent lookups behave as a cold cache.
    pub fn invalidate(&self) -> usize {
        let cleared = self.table.clear();
        if cleared > 0 {
            self.stats.record_invalidation();
            tracing::info!(cleared, "query cache invalidated");
        }
        cleared
    }

    /// Current state of the entry for `key`, without counting as a use.
    pub fn entry_snapshot(&self, key: &QueryKey) -> Option<EntrySnapshot> {
        self.table.peek(key).map(|(_, snapshot)| snapshot)
    }

    pub fn stats(&self) -> CacheStatsSnapshot {
        self.stats.snapshot()
    }

    pub fn table(&self) -> &CacheTable {
        &self.table
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.table.capacity()
    }
}
