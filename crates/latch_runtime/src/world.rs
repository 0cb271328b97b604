//! Headless demo world
//!
//! Ground-plane actors plus static sphere occluders. Implements the query
//! layer's collaborators so the cache runs against real geometry.

use glam::Vec3;
use latch_core::ecs::{Entity, EntityAllocator};
use latch_core::math::DeterministicRng;
use latch_query::{
    CollisionGroup, EntityOffsetMode, EntityResolver, SimulationClock, TraceMask, TraceRequest,
    TraceService,
};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

pub const BODY_RADIUS: f32 = 0.5;
pub const CENTER_HEIGHT: f32 = 0.9;
pub const EYE_HEIGHT: f32 = 1.7;

#[derive(Debug, Clone, Copy)]
struct Body {
    /// Feet position on the ground plane.
    position: Vec3,
    group: CollisionGroup,
}

#[derive(Debug, Clone, Copy)]
struct Occluder {
    center: Vec3,
    radius: f32,
    contents: TraceMask,
}

#[derive(Default)]
struct WorldState {
    allocator: EntityAllocator,
    bodies: HashMap<Entity, Body>,
    occluders: Vec<Occluder>,
}

/// Entities spawned by [`DemoWorld::load_level`].
#[derive(Debug, Clone)]
pub struct Level {
    pub player: Entity,
    pub npcs: Vec<Entity>,
}

#[derive(Default)]
pub struct DemoWorld {
    state: RwLock<WorldState>,
    traces: AtomicU64,
}

impl DemoWorld {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace everything with a freshly generated level.
    ///
    /// Handles from the previous level stay dead for good since the
    /// allocator generations keep counting.
    pub fn load_level(
        &self,
        seed: u64,
        npc_count: usize,
        occluder_count: usize,
        half_extent: f32,
    ) -> Level {
        let mut rng = DeterministicRng::new(seed);
        let mut state = self.state.write();

        let previous: Vec<Entity> = state.bodies.keys().copied().collect();
        for entity in previous {
            state.allocator.despawn(entity);
        }
        state.bodies.clear();

        state.occluders = (0..occluder_count)
            .map(|index| Occluder {
                center: rng.ground_point(half_extent) + Vec3::Y * rng.range_f32(0.5, 2.0),
                radius: rng.range_f32(1.0, 4.0),
                // every fourth occluder is glass: blocks movement, not sight
                contents: if index % 4 == 3 {
                    TraceMask::WINDOW
                } else {
                    TraceMask::SOLID.union(TraceMask::OPAQUE)
                },
            })
            .collect();

        let player = spawn_body(&mut state, Vec3::ZERO, CollisionGroup::PLAYER);
        let npcs = (0..npc_count)
            .map(|_| {
                let position = rng.ground_point(half_extent);
                spawn_body(&mut state, position, CollisionGroup::NPC)
            })
            .collect();

        tracing::debug!(
            seed,
            npcs = npc_count,
            occluders = occluder_count,
            "level generated"
        );
        Level { player, npcs }
    }

    pub fn move_to(&self, entity: Entity, position: Vec3) -> bool {
        let mut state = self.state.write();
        match state.bodies.get_mut(&entity) {
            Some(body) => {
                body.position = position;
                true
            }
            None => false,
        }
    }

    pub fn despawn(&self, entity: Entity) -> bool {
        let mut state = self.state.write();
        state.bodies.remove(&entity);
        state.allocator.despawn(entity)
    }

    pub fn live_count(&self) -> usize {
        self.state.read().allocator.live_count()
    }

    /// Segment traces actually computed so far.
    pub fn trace_count(&self) -> u64 {
        self.traces.load(Ordering::Relaxed)
    }
}

fn spawn_body(state: &mut WorldState, position: Vec3, group: CollisionGroup) -> Entity {
    let entity = state.allocator.spawn();
    state.bodies.insert(entity, Body { position, group });
    entity
}

/// Whether the segment `start..end` passes within `radius` of `center`.
pub fn segment_hits_sphere(start: Vec3, end: Vec3, center: Vec3, radius: f32) -> bool {
    let delta = end - start;
    let length_squared = delta.length_squared();
    let t = if length_squared > f32::EPSILON {
        ((center - start).dot(delta) / length_squared).clamp(0.0, 1.0)
    } else {
        0.0
    };
    (start + delta * t).distance_squared(center) <= radius * radius
}

impl EntityResolver for DemoWorld {
    fn resolve(&self, entity: Entity, mode: EntityOffsetMode) -> Option<Vec3> {
        let state = self.state.read();
        let body = state.bodies.get(&entity)?;
        Some(match mode {
            EntityOffsetMode::WorldSpaceCenter => body.position + Vec3::Y * CENTER_HEIGHT,
            EntityOffsetMode::EyePosition => body.position + Vec3::Y * EYE_HEIGHT,
            EntityOffsetMode::None => body.position,
        })
    }

    fn is_alive(&self, entity: Entity) -> bool {
        self.state.read().allocator.is_alive(entity)
    }
}

impl TraceService for DemoWorld {
    fn is_clear(&self, request: &TraceRequest<'_>) -> bool {
        self.traces.fetch_add(1, Ordering::Relaxed);
        let state = self.state.read();

        let blocked_by_geometry = state.occluders.iter().any(|occluder| {
            request.trace_mask.intersects(occluder.contents)
                && segment_hits_sphere(request.start, request.end, occluder.center, occluder.radius)
        });
        if blocked_by_geometry {
            return false;
        }
        if !request.trace_mask.contains(TraceMask::MONSTER) {
            return true;
        }

        !state.bodies.iter().any(|(&entity, body)| {
            Some(entity) != request.skip
                && Some(entity) != request.target
                && body.group != CollisionGroup::DEBRIS
                && request
                    .filter
                    .map_or(true, |filter| filter.should_hit(entity, request.collision_group))
                && segment_hits_sphere(
                    request.start,
                    request.end,
                    body.position + Vec3::Y * CENTER_HEIGHT,
                    BODY_RADIUS,
                )
        })
    }
}

/// Simulation seconds published by the game loop once per tick.
#[derive(Debug, Default)]
pub struct TickClock {
    seconds_bits: AtomicU32,
}

impl TickClock {
    pub fn set(&self, seconds: f32) {
        self.seconds_bits.store(seconds.to_bits(), Ordering::Release);
    }
}

impl SimulationClock for TickClock {
    fn now(&self) -> f32 {
        f32::from_bits(self.seconds_bits.load(Ordering::Acquire))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use latch_query::HitFilter;

    fn request<'a>(start: Vec3, end: Vec3) -> TraceRequest<'a> {
        TraceRequest {
            start,
            end,
            skip: None,
            target: None,
            trace_mask: TraceMask::VISIBLE,
            collision_group: CollisionGroup::NONE,
            filter: None,
        }
    }

    fn empty_world() -> DemoWorld {
        let world = DemoWorld::new();
        world.load_level(1, 0, 0, 10.0);
        world
    }

    #[test]
    fn segment_sphere_intersection() {
        let center = Vec3::new(5.0, 0.0, 0.0);
        assert!(segment_hits_sphere(Vec3::ZERO, Vec3::X * 10.0, center, 1.0));
        assert!(!segment_hits_sphere(Vec3::ZERO, Vec3::X * 3.0, center, 1.0));
        assert!(!segment_hits_sphere(
            Vec3::new(0.0, 2.0, 0.0),
            Vec3::new(10.0, 2.0, 0.0),
            center,
            1.0
        ));
        assert!(segment_hits_sphere(center, center, center, 0.1));
    }

    #[test]
    fn occluder_blocks_only_matching_mask() {
        let world = empty_world();
        world.state.write().occluders.push(Occluder {
            center: Vec3::new(5.0, 1.0, 0.0),
            radius: 1.0,
            contents: TraceMask::WINDOW,
        });

        let start = Vec3::new(0.0, 1.0, 0.0);
        let end = Vec3::new(10.0, 1.0, 0.0);
        assert!(world.is_clear(&request(start, end)), "sight passes through glass");

        let solid = TraceRequest {
            trace_mask: TraceMask::SOLID_BRUSH_ONLY,
            ..request(start, end)
        };
        assert!(!world.is_clear(&solid));
        assert_eq!(world.trace_count(), 2);
    }

    #[test]
    fn bodies_block_unless_skipped_targeted_or_filtered() {
        let world = DemoWorld::new();
        let level = world.load_level(1, 1, 0, 10.0);
        let npc = level.npcs[0];
        world.move_to(level.player, Vec3::ZERO);
        world.move_to(npc, Vec3::new(5.0, 0.0, 0.0));

        let start = Vec3::new(-5.0, CENTER_HEIGHT, 0.0);
        let end = Vec3::new(10.0, CENTER_HEIGHT, 0.0);
        let mask = TraceMask::VISIBLE.union(TraceMask::MONSTER);
        let base = TraceRequest {
            trace_mask: mask,
            skip: Some(level.player),
            ..request(start, end)
        };
        assert!(!world.is_clear(&base));

        assert!(world.is_clear(&TraceRequest {
            target: Some(npc),
            ..base
        }));

        let ignore_npcs = |entity: Entity, _: CollisionGroup| entity != npc;
        let filter: &dyn HitFilter = &ignore_npcs;
        assert!(world.is_clear(&TraceRequest {
            filter: Some(filter),
            ..base
        }));

        assert!(world.is_clear(&TraceRequest {
            trace_mask: TraceMask::VISIBLE,
            ..base
        }));
    }

    #[test]
    fn level_reload_kills_old_handles() {
        let world = DemoWorld::new();
        let first = world.load_level(3, 4, 2, 20.0);
        assert_eq!(world.live_count(), 5);

        let second = world.load_level(4, 2, 2, 20.0);
        assert_eq!(world.live_count(), 3);
        assert!(!world.is_alive(first.player));
        assert!(world.is_alive(second.player));
        assert!(world
            .resolve(first.npcs[0], EntityOffsetMode::WorldSpaceCenter)
            .is_none());
    }

    #[test]
    fn offset_modes_resolve_heights() {
        let world = DemoWorld::new();
        let level = world.load_level(5, 0, 0, 10.0);
        world.move_to(level.player, Vec3::new(1.0, 0.0, 2.0));

        let eye = world
            .resolve(level.player, EntityOffsetMode::EyePosition)
            .unwrap();
        assert_eq!(eye, Vec3::new(1.0, EYE_HEIGHT, 2.0));
        let feet = world.resolve(level.player, EntityOffsetMode::None).unwrap();
        assert_eq!(feet, Vec3::new(1.0, 0.0, 2.0));
    }

    #[test]
    fn clock_reports_published_time() {
        let clock = TickClock::default();
        assert_eq!(clock.now(), 0.0);
        clock.set(1.25);
        assert_eq!(clock.now(), 1.25);
    }
}
