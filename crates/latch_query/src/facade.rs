//! Entry points used by AI code.
//!
//! [`TraceQueries`] keeps the same surface whether or not the `query_cache`
//! feature is compiled in. Without it, every query is a direct trace and the
//! per-tick hooks do nothing, so callers must not rely on hysteresis.

use crate::config::QueryCacheConfig;
use crate::error::QueryCacheError;
use crate::services::{
    resolve_slot, CollisionGroup, EntityOffsetMode, HitFilter, QueryServices, TraceMask,
    TraceRequest,
};
use glam::Vec3;
use latch_core::ecs::Entity;
use std::sync::Arc;

#[cfg(feature = "query_cache")]
use crate::{cache::QueryCache, key::QueryKey};

/// "Can `source` see `target`", with the knobs of the underlying trace.
#[derive(Clone)]
pub struct LineOfSightQuery {
    pub source: Entity,
    pub source_mode: EntityOffsetMode,
    pub target: Entity,
    pub target_mode: EntityOffsetMode,
    pub skip: Option<Entity>,
    pub collision_group: CollisionGroup,
    pub trace_mask: TraceMask,
    pub filter: Option<Arc<dyn HitFilter>>,
    /// Seconds a cached answer may be reused before it is refreshed.
    /// `None` takes the cache's `default_update_interval`.
    pub min_update_interval: Option<f32>,
}

impl LineOfSightQuery {
    pub fn new(
        source: Entity,
        source_mode: EntityOffsetMode,
        target: Entity,
        target_mode: EntityOffsetMode,
    ) -> Self {
        Self {
            source,
            source_mode,
            target,
            target_mode,
            skip: None,
            collision_group: CollisionGroup::NONE,
            trace_mask: TraceMask::VISIBLE,
            filter: None,
            min_update_interval: None,
        }
    }

    pub fn skip(mut self, entity: Entity) -> Self {
        self.skip = Some(entity);
        self
    }

    pub fn collision_group(mut self, group: CollisionGroup) -> Self {
        self.collision_group = group;
        self
    }

    pub fn trace_mask(mut self, mask: TraceMask) -> Self {
        self.trace_mask = mask;
        self
    }

    pub fn filter(mut self, filter: Arc<dyn HitFilter>) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn min_update_interval(mut self, seconds: f32) -> Self {
        self.min_update_interval = Some(seconds);
        self
    }

    /// Cache key for this query; `default_interval` fills an unset interval.
    #[cfg(feature = "query_cache")]
    pub fn to_key(&self, default_interval: f32) -> QueryKey {
        QueryKey::line_of_sight(self.source, self.source_mode, self.target, self.target_mode)
            .with_skip(self.skip)
            .with_collision_group(self.collision_group)
            .with_trace_mask(self.trace_mask)
            .with_filter(self.filter.clone())
            .with_minimum_update_interval(self.min_update_interval.unwrap_or(default_interval))
    }

    #[cfg_attr(feature = "query_cache", allow(dead_code))]
    fn resolve(&self, services: &QueryServices) -> Option<TraceRequest<'_>> {
        let resolver = services.resolver.as_ref();
        Some(TraceRequest {
            start: resolve_slot(resolver, Vec3::ZERO, Some(self.source), self.source_mode)?,
            end: resolve_slot(resolver, Vec3::ZERO, Some(self.target), self.target_mode)?,
            skip: self.skip,
            target: Some(self.target),
            trace_mask: self.trace_mask,
            collision_group: self.collision_group,
            filter: self.filter.as_deref(),
        })
    }
}

/// Segment trace between two fixed points.
#[derive(Clone)]
pub struct TraceLineQuery {
    pub start: Vec3,
    pub end: Vec3,
    pub skip: Option<Entity>,
    pub collision_group: CollisionGroup,
    pub trace_mask: TraceMask,
    pub filter: Option<Arc<dyn HitFilter>>,
    pub min_update_interval: Option<f32>,
}

impl TraceLineQuery {
    pub fn new(start: Vec3, end: Vec3) -> Self {
        Self {
            start,
            end,
            skip: None,
            collision_group: CollisionGroup::NONE,
            trace_mask: TraceMask::VISIBLE,
            filter: None,
            min_update_interval: None,
        }
    }

    pub fn skip(mut self, entity: Entity) -> Self {
        self.skip = Some(entity);
        self
    }

    pub fn collision_group(mut self, group: CollisionGroup) -> Self {
        self.collision_group = group;
        self
    }

    pub fn trace_mask(mut self, mask: TraceMask) -> Self {
        self.trace_mask = mask;
        self
    }

    pub fn filter(mut self, filter: Arc<dyn HitFilter>) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn min_update_interval(mut self, seconds: f32) -> Self {
        self.min_update_interval = Some(seconds);
        self
    }

    #[cfg(feature = "query_cache")]
    pub fn to_key(&self, default_interval: f32) -> QueryKey {
        QueryKey::trace_line(self.start, self.end)
            .with_skip(self.skip)
            .with_collision_group(self.collision_group)
            .with_trace_mask(self.trace_mask)
            .with_filter(self.filter.clone())
            .with_minimum_update_interval(self.min_update_interval.unwrap_or(default_interval))
    }

    #[cfg_attr(feature = "query_cache", allow(dead_code))]
    fn request(&self) -> TraceRequest<'_> {
        TraceRequest {
            start: self.start,
            end: self.end,
            skip: self.skip,
            target: None,
            trace_mask: self.trace_mask,
            collision_group: self.collision_group,
            filter: self.filter.as_deref(),
        }
    }
}

/// Trace queries for AI code, cached when the `query_cache` feature is on.
pub struct TraceQueries {
    #[cfg(feature = "query_cache")]
    cache: Arc<QueryCache>,
    #[cfg(not(feature = "query_cache"))]
    services: QueryServices,
}

impl TraceQueries {
    pub fn new(config: QueryCacheConfig, services: QueryServices) -> Result<Self, QueryCacheError> {
        #[cfg(feature = "query_cache")]
        {
            Ok(Self {
                cache: Arc::new(QueryCache::new(config, services)?),
            })
        }
        #[cfg(not(feature = "query_cache"))]
        {
            config.validate()?;
            tracing::info!("query cache compiled out; traces run uncached");
            Ok(Self { services })
        }
    }

    /// Whether `query.source` has a clear line of sight to `query.target`.
    ///
    /// With the cache enabled the answer may be up to one
    /// `min_update_interval` old (the configured default when unset); a
    /// first-time query is traced immediately.
    pub fn query_line_of_sight(&self, query: &LineOfSightQuery) -> bool {
        #[cfg(feature = "query_cache")]
        {
            self.cache
                .lookup(&query.to_key(self.cache.config().default_update_interval))
        }
        #[cfg(not(feature = "query_cache"))]
        {
            query
                .resolve(&self.services)
                .is_some_and(|request| self.services.tracer.is_clear(&request))
        }
    }

    pub fn query_trace_line(&self, query: &TraceLineQuery) -> bool {
        #[cfg(feature = "query_cache")]
        {
            self.cache
                .lookup(&query.to_key(self.cache.config().default_update_interval))
        }
        #[cfg(not(feature = "query_cache"))]
        {
            self.services.tracer.is_clear(&query.request())
        }
    }

    /// Per-tick refresh; waits for the traces it dispatches.
    pub fn run_update_cycle(&self) {
        #[cfg(feature = "query_cache")]
        self.cache.run_update_cycle();
    }

    /// Per-tick refresh that returns immediately; traces land asynchronously.
    pub fn dispatch_update_cycle(&self) {
        #[cfg(feature = "query_cache")]
        self.cache.dispatch_update_cycle();
    }

    /// Forget every cached answer. Call on level transitions.
    pub fn invalidate_all(&self) {
        #[cfg(feature = "query_cache")]
        self.cache.invalidate();
    }

    #[cfg(feature = "query_cache")]
    pub fn cache(&self) -> &Arc<QueryCache> {
        &self.cache
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::Harness;

    fn queries(harness: &Harness) -> TraceQueries {
        TraceQueries::new(QueryCacheConfig::default(), harness.services()).unwrap()
    }

    #[test]
    fn line_of_sight_defaults() {
        let query = LineOfSightQuery::new(
            Entity::new(0, 0),
            EntityOffsetMode::EyePosition,
            Entity::new(1, 0),
            EntityOffsetMode::WorldSpaceCenter,
        );
        assert_eq!(query.min_update_interval, None);
        assert_eq!(query.trace_mask, TraceMask::VISIBLE);
        assert!(query.skip.is_none());
    }

    #[test]
    fn first_query_is_traced_immediately() {
        let harness = Harness::new();
        let queries = queries(&harness);
        let a = harness.world.spawn_at(Vec3::ZERO);
        let b = harness.world.spawn_at(Vec3::Z * 8.0);
        let query = LineOfSightQuery::new(
            a,
            EntityOffsetMode::EyePosition,
            b,
            EntityOffsetMode::EyePosition,
        );

        harness.tracer.set_answer(true);
        assert!(queries.query_line_of_sight(&query));
        assert_eq!(harness.tracer.calls(), 1);

        let request = harness.tracer.last_request().unwrap();
        assert_eq!(request.start, harness.world.eye_of(a));
        assert_eq!(request.end, harness.world.eye_of(b));
        assert_eq!(request.target, Some(b));
    }

    #[test]
    fn query_after_destroyed_target_is_not_clear() {
        let harness = Harness::new();
        let queries = queries(&harness);
        let a = harness.world.spawn_at(Vec3::ZERO);
        let b = harness.world.spawn_at(Vec3::X);
        harness.tracer.set_answer(true);
        harness.world.despawn(b);

        let query = LineOfSightQuery::new(
            a,
            EntityOffsetMode::WorldSpaceCenter,
            b,
            EntityOffsetMode::WorldSpaceCenter,
        );
        assert!(!queries.query_line_of_sight(&query));
    }

    #[test]
    fn trace_line_passes_skip_entity() {
        let harness = Harness::new();
        let queries = queries(&harness);
        let skip = harness.world.spawn_at(Vec3::Y);

        let query = TraceLineQuery::new(Vec3::ZERO, Vec3::X * 4.0)
            .skip(skip)
            .collision_group(CollisionGroup::NPC)
            .trace_mask(TraceMask::SOLID);
        harness.tracer.set_answer(true);
        assert!(queries.query_trace_line(&query));

        let request = harness.tracer.last_request().unwrap();
        assert_eq!(request.skip, Some(skip));
        assert_eq!(request.collision_group, CollisionGroup::NPC);
        assert_eq!(request.trace_mask, TraceMask::SOLID);
    }

    #[test]
    fn invalidate_all_twice_is_same_as_once() {
        let harness = Harness::new();
        let queries = queries(&harness);
        queries.invalidate_all();

        let query = TraceLineQuery::new(Vec3::ZERO, Vec3::Z);
        queries.query_trace_line(&query);
        queries.invalidate_all();
        queries.invalidate_all();
        queries.query_trace_line(&query);

        assert_eq!(harness.tracer.calls(), 2);
    }

    #[cfg(feature = "query_cache")]
    #[test]
    fn skip_entity_separates_cached_answers() {
        let harness = Harness::new();
        let queries = queries(&harness);
        let a = harness.world.spawn_at(Vec3::ZERO);
        let b = harness.world.spawn_at(Vec3::X * 5.0);
        let wall = harness.world.spawn_at(Vec3::X * 2.5);

        let blocked = LineOfSightQuery::new(
            a,
            EntityOffsetMode::WorldSpaceCenter,
            b,
            EntityOffsetMode::WorldSpaceCenter,
        );
        let through_wall = blocked.clone().skip(wall);

        harness.tracer.set_answer(false);
        assert!(!queries.query_line_of_sight(&blocked));
        harness.tracer.set_answer(true);
        assert!(queries.query_line_of_sight(&through_wall));
        assert_eq!(queries.cache().len(), 2);
    }

    #[cfg(feature = "query_cache")]
    #[test]
    fn repeated_query_within_interval_is_cached() {
        let harness = Harness::new();
        let queries = queries(&harness);
        let query = TraceLineQuery::new(Vec3::ZERO, Vec3::Y * 3.0);

        harness.tracer.set_answer(true);
        for tick in 0..10 {
            harness.clock.set(tick as f32 * 0.01);
            assert!(queries.query_trace_line(&query));
            queries.run_update_cycle();
        }
        assert_eq!(harness.tracer.calls(), 1);
    }

    #[cfg(feature = "query_cache")]
    #[test]
    fn unset_interval_follows_configured_default() {
        let harness = Harness::new();
        let config = QueryCacheConfig::default().with_default_update_interval(5.0);
        let queries = TraceQueries::new(config, harness.services()).unwrap();
        let query = TraceLineQuery::new(Vec3::ZERO, Vec3::X * 2.0);

        harness.clock.set(0.0);
        queries.query_trace_line(&query);
        harness.clock.set(0.3);
        queries.query_trace_line(&query);
        queries.run_update_cycle();
        assert_eq!(harness.tracer.calls(), 1, "0.3s is well inside the 5s default");

        let explicit = TraceLineQuery::new(Vec3::ZERO, Vec3::Y * 2.0).min_update_interval(0.1);
        assert_eq!(explicit.to_key(5.0).minimum_update_interval(), 0.1);
        queries.query_trace_line(&explicit);
        assert_eq!(harness.tracer.calls(), 2);
        harness.clock.set(0.5);
        queries.query_trace_line(&explicit);
        queries.run_update_cycle();
        assert_eq!(harness.tracer.calls(), 3, "an explicit interval wins over the default");
    }

    #[cfg(not(feature = "query_cache"))]
    #[test]
    fn uncached_build_traces_every_query() {
        let harness = Harness::new();
        let queries = queries(&harness);
        let query = TraceLineQuery::new(Vec3::ZERO, Vec3::Y * 3.0);

        for _ in 0..3 {
            queries.query_trace_line(&query);
            queries.run_update_cycle();
        }
        assert_eq!(harness.tracer.calls(), 3);
    }
}
