//! Runtime settings

use anyhow::{Context, Result};
use latch_query::QueryCacheConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Demo scene and loop settings. Missing fields take their defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeSettings {
    pub ticks: u64,
    pub npc_count: usize,
    pub occluder_count: usize,
    pub seed: u64,
    pub arena_half_extent: f32,
    /// Tick at which the level is reloaded and the cache invalidated.
    pub level_transition_tick: Option<u64>,
    /// One NPC dies every this many ticks.
    pub npc_death_interval: Option<u64>,
    /// Let refreshes land asynchronously instead of joining them each tick.
    pub async_refresh: bool,
    pub query_cache: QueryCacheConfig,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            ticks: 600,
            npc_count: 48,
            occluder_count: 24,
            seed: 7,
            arena_half_extent: 60.0,
            level_transition_tick: Some(300),
            npc_death_interval: Some(90),
            async_refresh: false,
            query_cache: QueryCacheConfig::default(),
        }
    }
}

impl RuntimeSettings {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading settings from {}", path.display()))?;
        serde_json::from_str(&text)
            .with_context(|| format!("parsing settings in {}", path.display()))
    }

    /// Settings from `--config <path>` if given, defaults otherwise.
    pub fn from_args(mut args: impl Iterator<Item = String>) -> Result<Self> {
        while let Some(arg) = args.next() {
            if arg == "--config" {
                let path = args.next().context("--config needs a path")?;
                return Self::load(Path::new(&path));
            }
        }
        Ok(Self::default())
    }
}
