//! Query cache configuration

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};

/// Largest capacity a slot handle can address.
pub const MAX_CAPACITY: usize = u32::MAX as usize;

/// Hysteresis interval, in seconds, for queries that do not set one.
pub const DEFAULT_UPDATE_INTERVAL: f32 = 0.2;

/// Tuning for the trace query cache.
///
/// Every field has a default, so a partial JSON document is a valid config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryCacheConfig {
    /// Fixed number of entry slots.
    pub capacity: usize,
    /// Number of hash buckets the slots are chained into.
    pub bucket_count: usize,
    /// Hysteresis interval used when a query does not set its own.
    pub default_update_interval: f32,
    /// Full update cycles an entry must go unused before it may be evicted.
    pub eviction_idle_cycles: u32,
    /// Fan refresh traces out over the worker pool instead of running them inline.
    pub parallel_refresh: bool,
    /// Size of a dedicated refresh pool. `None` shares the global rayon pool.
    pub worker_threads: Option<usize>,
}

impl Default for QueryCacheConfig {
    fn default() -> Self {
        Self {
            capacity: 1024,
            bucket_count: 1024,
            default_update_interval: DEFAULT_UPDATE_INTERVAL,
            eviction_idle_cycles: 1,
            parallel_refresh: true,
            worker_threads: None,
        }
    }
}

impl QueryCacheConfig {
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn with_bucket_count(mut self, bucket_count: usize) -> Self {
        self.bucket_count = bucket_count;
        self
    }

    pub fn with_default_update_interval(mut self, seconds: f32) -> Self {
        self.default_update_interval = seconds;
        self
    }

    pub fn with_eviction_idle_cycles(mut self, cycles: u32) -> Self {
        self.eviction_idle_cycles = cycles;
        self
    }

    pub fn with_parallel_refresh(mut self, parallel: bool) -> Self {
        self.parallel_refresh = parallel;
        self
    }

    pub fn with_worker_threads(mut self, threads: usize) -> Self {
        self.worker_threads = Some(threads);
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.capacity == 0 {
            return Err(ConfigError::ZeroCapacity);
        }
        if self.capacity > MAX_CAPACITY {
            return Err(ConfigError::CapacityTooLarge {
                capacity: self.capacity,
                max: MAX_CAPACITY,
            });
        }
        if self.bucket_count == 0 {
            return Err(ConfigError::ZeroBuckets);
        }
        if !self.default_update_interval.is_finite() || self.default_update_interval < 0.0 {
            return Err(ConfigError::InvalidInterval {
                interval: self.default_update_interval,
            });
        }
        if self.worker_threads == Some(0) {
            return Err(ConfigError::ZeroWorkerThreads);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert_eq!(QueryCacheConfig::default().validate(), Ok(()));
    }

    #[test]
    fn partial_json_fills_defaults() {
        let config: QueryCacheConfig =
            serde_json::from_str(r#"{ "capacity": 64, "parallel_refresh": false }"#).unwrap();
        assert_eq!(config.capacity, 64);
        assert!(!config.parallel_refresh);
        assert_eq!(config.bucket_count, 1024);
        assert_eq!(config.default_update_interval, DEFAULT_UPDATE_INTERVAL);
    }

    #[test]
    fn rejects_degenerate_values() {
        let base = QueryCacheConfig::default();
        assert_eq!(
            base.clone().with_capacity(0).validate(),
            Err(ConfigError::ZeroCapacity)
        );
        assert_eq!(
            base.clone().with_bucket_count(0).validate(),
            Err(ConfigError::ZeroBuckets)
        );
        assert_eq!(
            base.clone().with_worker_threads(0).validate(),
            Err(ConfigError::ZeroWorkerThreads)
        );

        let negative = QueryCacheConfig {
            default_update_interval: -1.0,
            ..base
        };
        assert!(matches!(
            negative.validate(),
            Err(ConfigError::InvalidInterval { .. })
        ));
    }
}
