//! Latch Engine Runtime
//!
//! Headless AI demo: squads of NPCs watch a patrolling player through the
//! trace query layer on the fixed simulation tick.

mod settings;
mod world;

use anyhow::{Context, Result};
use latch_core::ecs::Entity;
use latch_core::math::Vec3;
use latch_core::time::{SimulationTime, TICK_RATE_HZ};
use latch_query::{
    CollisionGroup, EntityOffsetMode, HitFilter, LineOfSightQuery, QueryServices, TraceMask,
    TraceQueries,
};
use settings::RuntimeSettings;
use std::collections::HashSet;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use world::{DemoWorld, Level, TickClock};

const SQUAD_COUNT: usize = 4;
const PATROL_RADIUS: f32 = 20.0;
/// Seconds per patrol lap.
const PATROL_PERIOD: f32 = 12.0;
const SIGHT_UPDATE_INTERVAL: f32 = 0.25;

/// An NPC and the hit filter shared by its squad.
struct Watcher {
    entity: Entity,
    squad_filter: Arc<dyn HitFilter>,
}

/// Split the level's NPCs into squads whose members never block each other.
fn form_squads(level: &Level) -> Vec<Watcher> {
    let mut members: Vec<HashSet<Entity>> = vec![HashSet::new(); SQUAD_COUNT];
    for (index, &npc) in level.npcs.iter().enumerate() {
        members[index % SQUAD_COUNT].insert(npc);
    }

    let filters: Vec<Arc<dyn HitFilter>> = members
        .into_iter()
        .map(|squad| {
            Arc::new(move |entity: Entity, _: CollisionGroup| !squad.contains(&entity))
                as Arc<dyn HitFilter>
        })
        .collect();

    level
        .npcs
        .iter()
        .enumerate()
        .map(|(index, &entity)| Watcher {
            entity,
            squad_filter: Arc::clone(&filters[index % SQUAD_COUNT]),
        })
        .collect()
}

fn sight_query(watcher: &Watcher, player: Entity) -> LineOfSightQuery {
    LineOfSightQuery::new(
        watcher.entity,
        EntityOffsetMode::EyePosition,
        player,
        EntityOffsetMode::WorldSpaceCenter,
    )
    .skip(watcher.entity)
    .collision_group(CollisionGroup::NPC)
    .trace_mask(TraceMask::VISIBLE.union(TraceMask::MONSTER))
    .filter(Arc::clone(&watcher.squad_filter))
    .min_update_interval(SIGHT_UPDATE_INTERVAL)
}

fn patrol_position(seconds: f32) -> Vec3 {
    let angle = seconds / PATROL_PERIOD * std::f32::consts::TAU;
    Vec3::new(angle.cos(), 0.0, angle.sin()) * PATROL_RADIUS
}

fn load_level(world: &DemoWorld, settings: &RuntimeSettings, seed: u64) -> Level {
    world.load_level(
        seed,
        settings.npc_count,
        settings.occluder_count,
        settings.arena_half_extent,
    )
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    tracing::info!("Latch Engine v{}", latch_core::VERSION);

    let settings = RuntimeSettings::from_args(std::env::args().skip(1))?;
    tracing::debug!(?settings, "settings loaded");

    let world = Arc::new(DemoWorld::new());
    let clock = Arc::new(TickClock::default());
    let services = QueryServices::new(world.clone(), world.clone(), clock.clone());
    let queries = TraceQueries::new(settings.query_cache.clone(), services)
        .context("creating trace query layer")?;

    let mut level = load_level(&world, &settings, settings.seed);
    let mut watchers = form_squads(&level);
    let mut time = SimulationTime::new();
    let mut lookups = 0u64;
    let mut sightings = 0u64;

    for tick in 0..settings.ticks {
        if settings.level_transition_tick == Some(tick) {
            queries.invalidate_all();
            level = load_level(&world, &settings, settings.seed.wrapping_add(tick));
            watchers = form_squads(&level);
            tracing::info!(
                tick,
                npcs = watchers.len(),
                live = world.live_count(),
                "level transition"
            );
        }

        time.advance_tick();
        clock.set(time.seconds());
        world.move_to(level.player, patrol_position(time.seconds()));

        if let Some(interval) = settings.npc_death_interval {
            if interval > 0 && tick > 0 && tick % interval == 0 && !watchers.is_empty() {
                let fallen = watchers.remove(0);
                world.despawn(fallen.entity);
                tracing::debug!(tick, entity = ?fallen.entity, "npc died");
            }
        }

        let visible = watchers
            .iter()
            .filter(|watcher| queries.query_line_of_sight(&sight_query(watcher, level.player)))
            .count();
        lookups += watchers.len() as u64;
        sightings += visible as u64;

        if settings.async_refresh {
            queries.dispatch_update_cycle();
        } else {
            queries.run_update_cycle();
        }

        if tick % u64::from(TICK_RATE_HZ) == 0 {
            tracing::info!(
                tick,
                seconds = time.seconds(),
                visible,
                watchers = watchers.len(),
                traces = world.trace_count(),
                "tick"
            );
        }
    }

    report(&queries, &world, lookups, sightings);
    Ok(())
}

#[cfg(feature = "query_cache")]
fn report(queries: &TraceQueries, world: &DemoWorld, lookups: u64, sightings: u64) {
    let cache = queries.cache();
    let stats = cache.stats();
    tracing::info!(
        lookups,
        sightings,
        traces = world.trace_count(),
        entries = cache.len(),
        hits = stats.hits,
        misses = stats.misses,
        bypasses = stats.bypasses,
        evictions = stats.evictions,
        refreshes = stats.refreshes,
        retirements = stats.retirements,
        stale_discards = stats.stale_discards,
        hit_rate = stats.hit_rate(),
        "run complete"
    );
}

#[cfg(not(feature = "query_cache"))]
fn report(_queries: &TraceQueries, world: &DemoWorld, lookups: u64, sightings: u64) {
    tracing::info!(
        lookups,
        sightings,
        traces = world.trace_count(),
        "run complete (uncached)"
    );
}
