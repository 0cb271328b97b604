//! Entity handles and allocation
//!
//! Entities are weak references: holding an [`Entity`] never keeps the
//! underlying object alive, and a despawned handle stays detectably stale.

mod entity;

pub use entity::{Entity, EntityAllocator};
