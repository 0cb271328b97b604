//! Latch Engine Core
//!
//! Contains the fundamental simulation primitives shared by engine crates:
//! - Generational entity handles
//! - Deterministic time and math

pub mod ecs;
pub mod math;
pub mod time;

pub use glam;

/// Engine version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
