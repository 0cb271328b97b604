//! Cache entry storage.
//!
//! Each slot is split in two halves:
//! - [`CacheEntry`]: key, chain links and usage bookkeeping, only touched
//!   while the table lock is held.
//! - [`EntryCell`]: the answer and its timing flags packed into a single
//!   `AtomicU64`, readable and writable without the lock.
//!
//! Layout of the packed word:
//!
//! ```text
//! bits  0..32  last update time (f32 bits)
//! bit   32     result
//! bit   33     refresh in flight
//! bit   34     seeded (a result has been computed)
//! bit   35     retired (an entity died; never matches again)
//! bits 36..64  slot generation (28 bits, wrapping)
//! ```
//!
//! Every write is a compare-exchange against the generation the writer was
//! handed, so a refresh that completes after its slot was reclaimed is
//! dropped instead of clobbering the new occupant.

use crate::key::QueryKey;
use std::sync::atomic::{AtomicU64, Ordering};

const TIME_MASK: u64 = 0xFFFF_FFFF;
const RESULT_BIT: u64 = 1 << 32;
const IN_FLIGHT_BIT: u64 = 1 << 33;
const SEEDED_BIT: u64 = 1 << 34;
const RETIRED_BIT: u64 = 1 << 35;
const GENERATION_SHIFT: u32 = 36;
pub(crate) const GENERATION_MASK: u32 = (1 << 28) - 1;

/// Stable reference to one occupied slot.
///
/// Becomes stale once the slot is reclaimed; stale handles are ignored.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct EntryHandle {
    pub(crate) slot: u32,
    pub(crate) generation: u32,
}

impl EntryHandle {
    pub fn slot(&self) -> u32 {
        self.slot
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }
}

/// Point-in-time view of one entry.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct EntrySnapshot {
    pub result: bool,
    pub last_update_time: f32,
    /// A refresh has been dispatched and has not written back yet. The
    /// previous `result` stays readable meanwhile.
    pub speculatively_in_progress: bool,
    /// False until the first trace for this entry has completed.
    pub seeded: bool,
    pub retired: bool,
    pub used_since_last_update: bool,
}

#[derive(Debug, Copy, Clone, PartialEq)]
pub(crate) struct EntryState {
    pub generation: u32,
    pub last_update_time: f32,
    pub result: bool,
    pub in_flight: bool,
    pub seeded: bool,
    pub retired: bool,
}

impl EntryState {
    fn vacant(generation: u32) -> Self {
        Self {
            generation,
            last_update_time: 0.0,
            result: false,
            in_flight: false,
            seeded: false,
            retired: false,
        }
    }

    fn pack(self) -> u64 {
        let mut word = self.last_update_time.to_bits() as u64 & TIME_MASK;
        if self.result {
            word |= RESULT_BIT;
        }
        if self.in_flight {
            word |= IN_FLIGHT_BIT;
        }
        if self.seeded {
            word |= SEEDED_BIT;
        }
        if self.retired {
            word |= RETIRED_BIT;
        }
        word | (((self.generation & GENERATION_MASK) as u64) << GENERATION_SHIFT)
    }

    fn unpack(word: u64) -> Self {
        Self {
            generation: (word >> GENERATION_SHIFT) as u32 & GENERATION_MASK,
            last_update_time: f32::from_bits((word & TIME_MASK) as u32),
            result: word & RESULT_BIT != 0,
            in_flight: word & IN_FLIGHT_BIT != 0,
            seeded: word & SEEDED_BIT != 0,
            retired: word & RETIRED_BIT != 0,
        }
    }

    pub fn snapshot(self, used_since_last_update: bool) -> EntrySnapshot {
        EntrySnapshot {
            result: self.result,
            last_update_time: self.last_update_time,
            speculatively_in_progress: self.in_flight,
            seeded: self.seeded,
            retired: self.retired,
            used_since_last_update,
        }
    }
}

/// Lock-free answer word for one slot.
#[derive(Debug)]
pub(crate) struct EntryCell {
    word: AtomicU64,
}

impl EntryCell {
    pub fn new() -> Self {
        Self {
            word: AtomicU64::new(EntryState::vacant(0).pack()),
        }
    }

    pub fn load(&self) -> EntryState {
        EntryState::unpack(self.word.load(Ordering::Acquire))
    }

    /// Apply `change` only if the slot still carries `generation`.
    fn update(&self, generation: u32, change: impl Fn(EntryState) -> Option<EntryState>) -> bool {
        self.word
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |word| {
                let state = EntryState::unpack(word);
                if state.generation != generation {
                    return None;
                }
                change(state).map(EntryState::pack)
            })
            .is_ok()
    }

    /// Prepare a freshly occupied slot: no result yet, first trace pending.
    pub fn activate(&self) -> u32 {
        let generation = self.load().generation;
        self.word.store(
            EntryState {
                in_flight: true,
                ..EntryState::vacant(generation)
            }
            .pack(),
            Ordering::Release,
        );
        generation
    }

    /// Release the slot. Bumps the generation so outstanding handles go stale.
    pub fn reclaim(&self) {
        // Ok is guaranteed: the closure never declines.
        let _ = self
            .word
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |word| {
                let next = EntryState::unpack(word).generation.wrapping_add(1) & GENERATION_MASK;
                Some(EntryState::vacant(next).pack())
            });
    }

    /// Mark a seeded entry as refreshing. Fails if a refresh is already out.
    pub fn begin_refresh(&self, generation: u32) -> bool {
        self.update(generation, |state| {
            (state.seeded && !state.in_flight && !state.retired).then_some(EntryState {
                in_flight: true,
                ..state
            })
        })
    }

    pub fn complete(&self, generation: u32, result: bool, now: f32) -> bool {
        self.update(generation, |state| {
            (!state.retired).then_some(EntryState {
                result,
                last_update_time: now,
                in_flight: false,
                seeded: true,
                ..state
            })
        })
    }

    pub fn retire(&self, generation: u32) -> bool {
        self.update(generation, |state| {
            Some(EntryState {
                retired: true,
                in_flight: false,
                ..state
            })
        })
    }
}

/// Locked half of a slot.
#[derive(Debug)]
pub(crate) struct CacheEntry {
    pub key: QueryKey,
    pub occupied: bool,
    pub bucket_prev: Option<u32>,
    pub bucket_next: Option<u32>,
    pub lru_prev: Option<u32>,
    pub lru_next: Option<u32>,
    pub used_since_last_update: bool,
    /// Consecutive update cycles that found this entry unused.
    pub idle_cycles: u32,
}

impl CacheEntry {
    pub fn vacant() -> Self {
        Self {
            key: QueryKey::invalid(),
            occupied: false,
            bucket_prev: None,
            bucket_next: None,
            lru_prev: None,
            lru_next: None,
            used_since_last_update: false,
            idle_cycles: 0,
        }
    }

    pub fn reset(&mut self) {
        *self = Self::vacant();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packed_state_keeps_every_field() {
        let state = EntryState {
            generation: GENERATION_MASK,
            last_update_time: 12.5,
            result: true,
            in_flight: false,
            seeded: true,
            retired: true,
        };
        assert_eq!(EntryState::unpack(state.pack()), state);
    }

    #[test]
    fn activated_cell_is_pending_and_unseeded() {
        let cell = EntryCell::new();
        let generation = cell.activate();
        let state = cell.load();
        assert_eq!(state.generation, generation);
        assert!(state.in_flight);
        assert!(!state.seeded);
    }

    #[test]
    fn completion_after_reclaim_is_discarded() {
        let cell = EntryCell::new();
        let generation = cell.activate();
        cell.reclaim();

        assert!(!cell.complete(generation, true, 1.0));
        let state = cell.load();
        assert!(!state.result);
        assert!(!state.seeded);
        assert_ne!(state.generation, generation);
    }

    #[test]
    fn only_one_refresh_in_flight() {
        let cell = EntryCell::new();
        let generation = cell.activate();
        assert!(!cell.begin_refresh(generation), "unseeded entry is already pending");

        assert!(cell.complete(generation, true, 0.0));
        assert!(cell.begin_refresh(generation));
        assert!(!cell.begin_refresh(generation));

        let state = cell.load();
        assert!(state.in_flight);
        assert!(state.result, "previous answer stays readable while refreshing");

        assert!(cell.complete(generation, false, 0.3));
        let state = cell.load();
        assert!(!state.in_flight);
        assert!(!state.result);
        assert_eq!(state.last_update_time, 0.3);
    }

    #[test]
    fn retired_cell_refuses_refresh() {
        let cell = EntryCell::new();
        let generation = cell.activate();
        assert!(cell.complete(generation, true, 0.0));
        assert!(cell.retire(generation));
        assert!(!cell.begin_refresh(generation));
        assert!(!cell.complete(generation, false, 1.0));
    }

    #[test]
    fn generation_wraps_within_mask() {
        let cell = EntryCell {
            word: AtomicU64::new(EntryState::vacant(GENERATION_MASK).pack()),
        };
        cell.reclaim();
        assert_eq!(cell.load().generation, 0);
    }
}
