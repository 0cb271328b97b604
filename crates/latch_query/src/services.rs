//! Contracts for the collaborators the cache consumes but does not own:
//! collision tracing, entity resolution, and the simulation clock.
//!
//! These types are compiled regardless of the `query_cache` feature, since
//! the uncached fallback path speaks the same language.

use glam::Vec3;
use latch_core::ecs::Entity;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// How a world position is derived from an entity reference.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum EntityOffsetMode {
    #[default]
    WorldSpaceCenter,
    EyePosition,
    /// No position is derived; the slot only carries identity.
    None,
}

impl EntityOffsetMode {
    #[cfg(feature = "query_cache")]
    pub(crate) fn raw(self) -> u8 {
        match self {
            EntityOffsetMode::WorldSpaceCenter => 0,
            EntityOffsetMode::EyePosition => 1,
            EntityOffsetMode::None => 2,
        }
    }
}

/// Bitmask selecting which world contents a trace treats as solid.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TraceMask(pub u32);

impl TraceMask {
    pub const EMPTY: TraceMask = TraceMask(0);
    pub const SOLID: TraceMask = TraceMask(0x1);
    pub const WINDOW: TraceMask = TraceMask(0x2);
    pub const GRATE: TraceMask = TraceMask(0x8);
    pub const OPAQUE: TraceMask = TraceMask(0x80);
    pub const MONSTER: TraceMask = TraceMask(0x0200_0000);

    /// Anything that blocks sight.
    pub const VISIBLE: TraceMask = TraceMask(Self::SOLID.0 | Self::OPAQUE.0);
    pub const SOLID_BRUSH_ONLY: TraceMask = TraceMask(Self::SOLID.0 | Self::WINDOW.0 | Self::GRATE.0);

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn contains(self, other: TraceMask) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn intersects(self, other: TraceMask) -> bool {
        self.0 & other.0 != 0
    }

    pub const fn union(self, other: TraceMask) -> TraceMask {
        TraceMask(self.0 | other.0)
    }
}

impl Default for TraceMask {
    fn default() -> Self {
        Self::VISIBLE
    }
}

/// Classification controlling which entity categories a trace may hit.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct CollisionGroup(pub i32);

impl CollisionGroup {
    pub const NONE: CollisionGroup = CollisionGroup(0);
    pub const DEBRIS: CollisionGroup = CollisionGroup(1);
    pub const PLAYER: CollisionGroup = CollisionGroup(5);
    pub const NPC: CollisionGroup = CollisionGroup(9);
}

/// Decides whether a trace should register a hit on a given entity.
///
/// The cache never calls this itself; it only forwards it to the trace
/// service and compares filters by identity.
pub trait HitFilter: Send + Sync {
    fn should_hit(&self, entity: Entity, collision_group: CollisionGroup) -> bool;
}

impl<F> HitFilter for F
where
    F: Fn(Entity, CollisionGroup) -> bool + Send + Sync,
{
    fn should_hit(&self, entity: Entity, collision_group: CollisionGroup) -> bool {
        self(entity, collision_group)
    }
}

/// Address of the shared filter allocation, used as its identity.
#[cfg(feature = "query_cache")]
pub(crate) fn filter_identity(filter: &Option<Arc<dyn HitFilter>>) -> usize {
    filter
        .as_ref()
        .map_or(0, |f| Arc::as_ptr(f) as *const () as usize)
}

/// World position for one query slot.
///
/// An entity with a position-deriving mode is resolved through `resolver`;
/// an entity with [`EntityOffsetMode::None`] only has to be alive, and the
/// slot's literal point is used.
pub(crate) fn resolve_slot(
    resolver: &dyn EntityResolver,
    point: Vec3,
    entity: Option<Entity>,
    mode: EntityOffsetMode,
) -> Option<Vec3> {
    match (entity, mode) {
        (Some(entity), EntityOffsetMode::None) => resolver.is_alive(entity).then_some(point),
        (Some(entity), mode) => resolver.resolve(entity, mode),
        (None, _) => Some(point),
    }
}

/// One fully resolved segment trace.
#[derive(Clone, Copy)]
pub struct TraceRequest<'a> {
    pub start: Vec3,
    pub end: Vec3,
    /// Entity the trace passes through without registering a hit.
    pub skip: Option<Entity>,
    /// Entity whose own geometry does not count as an obstruction.
    pub target: Option<Entity>,
    pub trace_mask: TraceMask,
    pub collision_group: CollisionGroup,
    pub filter: Option<&'a dyn HitFilter>,
}

impl fmt::Debug for TraceRequest<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TraceRequest")
            .field("start", &self.start)
            .field("end", &self.end)
            .field("skip", &self.skip)
            .field("target", &self.target)
            .field("trace_mask", &self.trace_mask)
            .field("collision_group", &self.collision_group)
            .field("filtered", &self.filter.is_some())
            .finish()
    }
}

/// Collision backend answering "is this segment clear".
///
/// Must be safe to call from several worker threads at once.
pub trait TraceService: Send + Sync {
    fn is_clear(&self, request: &TraceRequest<'_>) -> bool;
}

/// Turns weak entity references into world positions.
pub trait EntityResolver: Send + Sync {
    /// Position of `entity` under `mode`, or `None` for a destroyed entity.
    fn resolve(&self, entity: Entity, mode: EntityOffsetMode) -> Option<Vec3>;

    fn is_alive(&self, entity: Entity) -> bool;
}

/// Source of simulation time in seconds.
pub trait SimulationClock: Send + Sync {
    fn now(&self) -> f32;
}

/// Collaborators injected into the query layer.
#[derive(Clone)]
pub struct QueryServices {
    pub tracer: Arc<dyn TraceService>,
    pub resolver: Arc<dyn EntityResolver>,
    pub clock: Arc<dyn SimulationClock>,
}

impl QueryServices {
    pub fn new(
        tracer: Arc<dyn TraceService>,
        resolver: Arc<dyn EntityResolver>,
        clock: Arc<dyn SimulationClock>,
    ) -> Self {
        Self {
            tracer,
            resolver,
            clock,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn visible_mask_combines_solid_and_opaque() {
        assert!(TraceMask::VISIBLE.contains(TraceMask::SOLID));
        assert!(TraceMask::VISIBLE.contains(TraceMask::OPAQUE));
        assert!(!TraceMask::VISIBLE.intersects(TraceMask::MONSTER));
    }

    #[cfg(feature = "query_cache")]
    #[test]
    fn filter_identity_follows_allocation() {
        let a: Arc<dyn HitFilter> = Arc::new(|_: Entity, _: CollisionGroup| true);
        let b: Arc<dyn HitFilter> = Arc::new(|_: Entity, _: CollisionGroup| true);
        let a_clone = Some(a.clone());

        assert_eq!(filter_identity(&Some(a)), filter_identity(&a_clone));
        assert_ne!(filter_identity(&a_clone), filter_identity(&Some(b)));
        assert_eq!(filter_identity(&None), 0);
    }
}
