//! Deterministic time system
//!
//! Fixed 60Hz tick rate; systems that need wall-style seconds read them from
//! the tick counter so replays stay bit-identical.

use std::time::Duration;

/// Fixed simulation tick rate (60 Hz = 16.666ms per tick)
pub const TICK_RATE_HZ: u32 = 60;
pub const TICK_DURATION: Duration = Duration::from_micros(16_666); // ~16.666ms

/// Simulation time tracker
#[derive(Debug, Clone, Default)]
pub struct SimulationTime {
    tick_count: u64,
}

impl SimulationTime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tick_count(&self) -> u64 {
        self.tick_count
    }

    pub fn advance_tick(&mut self) {
        self.tick_count += 1;
    }

    /// Exact for any tick count.
    pub fn total_time(&self) -> Duration {
        let nanos = TICK_DURATION.as_nanos() * u128::from(self.tick_count);
        Duration::new(
            (nanos / 1_000_000_000) as u64,
            (nanos % 1_000_000_000) as u32,
        )
    }

    /// Elapsed simulation time in seconds, derived from the exact tick rate.
    pub fn seconds(&self) -> f32 {
        (self.tick_count as f64 / TICK_RATE_HZ as f64) as f32
    }
}
