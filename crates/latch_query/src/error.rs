use thiserror::Error;

/// Rejected [`QueryCacheConfig`](crate::QueryCacheConfig) values.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("cache capacity must be at least one entry")]
    ZeroCapacity,

    #[error("cache capacity {capacity} exceeds the addressable slot range ({max})")]
    CapacityTooLarge { capacity: usize, max: usize },

    #[error("bucket count must be at least one")]
    ZeroBuckets,

    #[error("default update interval must be finite and non-negative, got {interval}")]
    InvalidInterval { interval: f32 },

    #[error("worker thread count must be at least one when set")]
    ZeroWorkerThreads,
}

/// Errors raised while constructing the query layer.
///
/// Queries themselves never fail; a degraded lookup is an uncached trace.
#[derive(Debug, Error)]
pub enum QueryCacheError {
    #[error("invalid query cache configuration: {0}")]
    Config(#[from] ConfigError),

    #[cfg(feature = "query_cache")]
    #[error("failed to build refresh worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}
