//! Canonical query keys.
//!
//! A [`QueryKey`] captures every parameter that can change a trace answer.
//! Two keys that [`matches`](QueryKey::matches) each other may share one
//! cached result, and such keys always hash to the same index.

use crate::services::{
    filter_identity, resolve_slot, CollisionGroup, EntityOffsetMode, EntityResolver, HitFilter,
    TraceMask, TraceRequest,
};
use ahash::AHasher;
use glam::Vec3;
use latch_core::ecs::Entity;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Maximum number of points/entities involved in one query.
pub const MAX_QUERY_POINTS: usize = 3;

/// Slot holding the entity a trace passes through.
pub const SKIP_SLOT: usize = 2;

/// Closed set of cacheable query kinds.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
pub enum QueryType {
    /// Unused slot; never matches anything.
    #[default]
    Invalid,
    TraceLine,
    EntityLineOfSight,
}

/// Normalized parameters of one cacheable trace query.
///
/// Fields are private so that `hash_index` can never go stale: every
/// mutation goes through a method that rehashes.
#[derive(Clone)]
pub struct QueryKey {
    query_type: QueryType,
    valid_points: usize,
    points: [Vec3; MAX_QUERY_POINTS],
    entities: [Option<Entity>; MAX_QUERY_POINTS],
    offset_modes: [EntityOffsetMode; MAX_QUERY_POINTS],
    trace_mask: TraceMask,
    collision_group: CollisionGroup,
    filter: Option<Arc<dyn HitFilter>>,
    minimum_update_interval: f32,
    hash_index: u32,
}

impl QueryKey {
    /// Key for an unused slot.
    pub fn invalid() -> Self {
        let mut key = Self {
            query_type: QueryType::Invalid,
            valid_points: 0,
            points: [Vec3::ZERO; MAX_QUERY_POINTS],
            entities: [None; MAX_QUERY_POINTS],
            offset_modes: [EntityOffsetMode::None; MAX_QUERY_POINTS],
            trace_mask: TraceMask::EMPTY,
            collision_group: CollisionGroup::NONE,
            filter: None,
            minimum_update_interval: 0.0,
            hash_index: 0,
        };
        key.rehash();
        key
    }

    /// Line of sight from `source` to `target`.
    ///
    /// Source occupies slot 0 and target slot 1; slot 2 carries the skip
    /// entity (none until [`with_skip`](Self::with_skip)).
    pub fn line_of_sight(
        source: Entity,
        source_mode: EntityOffsetMode,
        target: Entity,
        target_mode: EntityOffsetMode,
    ) -> Self {
        let mut key = Self::invalid();
        key.query_type = QueryType::EntityLineOfSight;
        key.valid_points = MAX_QUERY_POINTS;
        key.entities[0] = Some(source);
        key.offset_modes[0] = source_mode;
        key.entities[1] = Some(target);
        key.offset_modes[1] = target_mode;
        key.trace_mask = TraceMask::default();
        key.rehash();
        key
    }

    /// Segment trace between two fixed world points.
    pub fn trace_line(start: Vec3, end: Vec3) -> Self {
        let mut key = Self::invalid();
        key.query_type = QueryType::TraceLine;
        key.valid_points = MAX_QUERY_POINTS;
        key.points[0] = start;
        key.points[1] = end;
        key.trace_mask = TraceMask::default();
        key.rehash();
        key
    }

    pub fn with_skip(mut self, skip: Option<Entity>) -> Self {
        self.entities[SKIP_SLOT] = skip;
        self.offset_modes[SKIP_SLOT] = EntityOffsetMode::None;
        self.rehash();
        self
    }

    pub fn with_trace_mask(mut self, trace_mask: TraceMask) -> Self {
        self.trace_mask = trace_mask;
        self.rehash();
        self
    }

    pub fn with_collision_group(mut self, collision_group: CollisionGroup) -> Self {
        self.collision_group = collision_group;
        self.rehash();
        self
    }

    pub fn with_filter(mut self, filter: Option<Arc<dyn HitFilter>>) -> Self {
        self.filter = filter;
        self.rehash();
        self
    }

    /// Hysteresis interval in seconds. Does not take part in identity.
    pub fn with_minimum_update_interval(mut self, seconds: f32) -> Self {
        self.minimum_update_interval = seconds;
        self
    }

    pub fn query_type(&self) -> QueryType {
        self.query_type
    }

    pub fn valid_points(&self) -> usize {
        self.valid_points
    }

    pub fn point(&self, slot: usize) -> Option<Vec3> {
        (slot < self.valid_points).then(|| self.points[slot])
    }

    pub fn entity(&self, slot: usize) -> Option<Entity> {
        if slot < self.valid_points {
            self.entities[slot]
        } else {
            None
        }
    }

    pub fn offset_mode(&self, slot: usize) -> Option<EntityOffsetMode> {
        (slot < self.valid_points).then(|| self.offset_modes[slot])
    }

    pub fn trace_mask(&self) -> TraceMask {
        self.trace_mask
    }

    pub fn collision_group(&self) -> CollisionGroup {
        self.collision_group
    }

    pub fn filter(&self) -> Option<&Arc<dyn HitFilter>> {
        self.filter.as_ref()
    }

    pub fn minimum_update_interval(&self) -> f32 {
        self.minimum_update_interval
    }

    /// Cached result of [`compute_hash`](Self::compute_hash).
    pub fn hash_index(&self) -> u32 {
        self.hash_index
    }

    fn rehash(&mut self) {
        self.hash_index = self.compute_hash();
    }

    /// Hash over every field that takes part in [`matches`](Self::matches).
    ///
    /// Stable for the lifetime of the process; not meant to be persisted.
    pub fn compute_hash(&self) -> u32 {
        let mut hasher = AHasher::default();
        self.query_type.hash(&mut hasher);
        hasher.write_usize(self.valid_points);
        for slot in 0..self.valid_points {
            for bits in canonical_bits(self.points[slot]) {
                hasher.write_u32(bits);
            }
            match self.entities[slot] {
                Some(entity) => {
                    hasher.write_u8(1);
                    hasher.write_u64(entity.to_bits());
                }
                None => hasher.write_u8(0),
            }
            hasher.write_u8(self.offset_modes[slot].raw());
        }
        hasher.write_u32(self.trace_mask.bits());
        hasher.write_i32(self.collision_group.0);
        hasher.write_usize(filter_identity(&self.filter));

        let wide = hasher.finish();
        (wide ^ (wide >> 32)) as u32
    }

    /// Whether `other` asks the same question as `self`.
    ///
    /// Entities compare by handle, so a handle to a destroyed entity never
    /// matches the live entity that reused its index. Invalid keys match
    /// nothing, including each other.
    pub fn matches(&self, other: &QueryKey) -> bool {
        if self.query_type == QueryType::Invalid || other.query_type == QueryType::Invalid {
            return false;
        }
        if self.query_type != other.query_type
            || self.valid_points != other.valid_points
            || self.hash_index != other.hash_index
            || self.trace_mask != other.trace_mask
            || self.collision_group != other.collision_group
            || filter_identity(&self.filter) != filter_identity(&other.filter)
        {
            return false;
        }

        (0..self.valid_points).all(|slot| {
            canonical_bits(self.points[slot]) == canonical_bits(other.points[slot])
                && self.entities[slot] == other.entities[slot]
                && self.offset_modes[slot] == other.offset_modes[slot]
        })
    }

    /// True when every entity that contributes a position is still alive.
    pub fn references_live(&self, resolver: &dyn EntityResolver) -> bool {
        (0..self.valid_points.min(SKIP_SLOT)).all(|slot| match self.entities[slot] {
            Some(entity) => resolver.is_alive(entity),
            None => true,
        })
    }

    /// Resolve this key into a concrete segment trace.
    ///
    /// `None` when a position-bearing entity no longer exists.
    pub fn resolve_trace<'a>(&'a self, resolver: &dyn EntityResolver) -> Option<TraceRequest<'a>> {
        let target = match self.query_type {
            QueryType::Invalid => return None,
            QueryType::TraceLine => None,
            QueryType::EntityLineOfSight => self.entities[1],
        };

        let start = resolve_slot(resolver, self.points[0], self.entities[0], self.offset_modes[0])?;
        let end = resolve_slot(resolver, self.points[1], self.entities[1], self.offset_modes[1])?;

        Some(TraceRequest {
            start,
            end,
            skip: self.entity(SKIP_SLOT),
            target,
            trace_mask: self.trace_mask,
            collision_group: self.collision_group,
            filter: self.filter.as_deref(),
        })
    }
}

impl Default for QueryKey {
    fn default() -> Self {
        Self::invalid()
    }
}

impl fmt::Debug for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let slots = self.valid_points;
        f.debug_struct("QueryKey")
            .field("query_type", &self.query_type)
            .field("points", &&self.points[..slots])
            .field("entities", &&self.entities[..slots])
            .field("offset_modes", &&self.offset_modes[..slots])
            .field("trace_mask", &self.trace_mask)
            .field("collision_group", &self.collision_group)
            .field("filter", &format_args!("{:#x}", filter_identity(&self.filter)))
            .field("minimum_update_interval", &self.minimum_update_interval)
            .field("hash_index", &self.hash_index)
            .finish()
    }
}

/// Bit patterns of a point with -0.0 folded onto 0.0.
fn canonical_bits(point: Vec3) -> [u32; 3] {
    [
        (point.x + 0.0).to_bits(),
        (point.y + 0.0).to_bits(),
        (point.z + 0.0).to_bits(),
    ]
}
