//! Latch Query Cache
//!
//! Caches the answers of trace-style queries (segment traces, entity line of
//! sight) issued by AI code, so that the same question asked again within a
//! short window reuses the previous answer instead of re-tracing.
//!
//! - Hysteresis: a cached answer is reused until it is at least the query's
//!   `min_update_interval` old, so AI decisions do not flicker per frame.
//! - Decoupling: stale answers are refreshed by a once-per-tick update cycle
//!   that fans its traces out across a rayon pool, away from entity logic.
//!
//! # Feature Flags
//!
//! - `query_cache` - Compile in the cache (default: enabled). Without it the
//!   cache types do not exist and [`TraceQueries`] traces every query directly.
//!
//! # Usage
//!
//! ```ignore
//! use latch_query::{LineOfSightQuery, QueryCacheConfig, TraceQueries, EntityOffsetMode};
//!
//! let queries = TraceQueries::new(QueryCacheConfig::default(), services)?;
//!
//! // AI think
//! let query = LineOfSightQuery::new(npc, EntityOffsetMode::EyePosition,
//!                                   player, EntityOffsetMode::WorldSpaceCenter);
//! if queries.query_line_of_sight(&query) { /* ... */ }
//!
//! // once per tick, from the game loop
//! queries.run_update_cycle();
//!
//! // on level transition
//! queries.invalidate_all();
//! ```

mod config;
mod error;
mod facade;
mod services;

#[cfg(feature = "query_cache")]
mod cache;
#[cfg(feature = "query_cache")]
mod entry;
#[cfg(feature = "query_cache")]
mod key;
#[cfg(feature = "query_cache")]
mod stats;
#[cfg(feature = "query_cache")]
mod table;
#[cfg(feature = "query_cache")]
mod update;

#[cfg(test)]
mod test_support;

pub use config::{QueryCacheConfig, DEFAULT_UPDATE_INTERVAL, MAX_CAPACITY};
pub use error::{ConfigError, QueryCacheError};
pub use facade::{LineOfSightQuery, TraceLineQuery, TraceQueries};
pub use services::{
    CollisionGroup, EntityOffsetMode, EntityResolver, HitFilter, QueryServices, SimulationClock,
    TraceMask, TraceRequest, TraceService,
};

#[cfg(feature = "query_cache")]
pub use cache::QueryCache;
#[cfg(feature = "query_cache")]
pub use entry::{EntryHandle, EntrySnapshot};
#[cfg(feature = "query_cache")]
pub use key::{QueryKey, QueryType, MAX_QUERY_POINTS};
#[cfg(feature = "query_cache")]
pub use stats::{CacheStats, CacheStatsSnapshot};
#[cfg(feature = "query_cache")]
pub use table::{CacheTable, Lookup};
#[cfg(feature = "query_cache")]
pub use update::{RefreshOutcome, UpdateReport};
