//! Fixed-capacity, hash-bucketed entry table.
//!
//! Slots live in an arena allocated once at construction. Occupied slots are
//! threaded onto two intrusive doubly linked lists:
//! - a per-bucket chain for lookup,
//! - a recency list (head = most recently used) for traversal and eviction.
//!
//! All link and key manipulation happens under one table-wide lock. The
//! answer words ([`EntryCell`]) sit outside it, so trace write-backs never
//! contend with lookups.

use crate::entry::{CacheEntry, EntryCell, EntryHandle, EntrySnapshot};
use crate::key::{QueryKey, QueryType};
use parking_lot::Mutex;

/// Outcome of [`CacheTable::lookup_or_create`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Lookup {
    /// An entry for the key exists; it has been marked used.
    Hit {
        handle: EntryHandle,
        snapshot: EntrySnapshot,
    },
    /// A new entry was inserted and is pending its first trace.
    /// `evicted` is set when an older entry gave up its slot.
    Created { handle: EntryHandle, evicted: bool },
    /// The key is not cacheable right now (table full, or invalid key).
    Bypass,
}

/// A refresh claimed by the update cycle. Owns a copy of the key so the
/// trace can run without the table lock.
#[derive(Debug, Clone)]
pub(crate) struct RefreshJob {
    pub handle: EntryHandle,
    pub key: QueryKey,
}

/// Bookkeeping from one pass of [`CacheTable::collect_refresh_jobs`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct CycleScan {
    pub live: usize,
    pub idle: usize,
    pub in_flight: usize,
}

struct TableState {
    entries: Vec<CacheEntry>,
    buckets: Vec<Option<u32>>,
    lru_head: Option<u32>,
    lru_tail: Option<u32>,
    free: Vec<u32>,
    /// Retired entries awaiting reuse. May hold stale handles.
    retired: Vec<EntryHandle>,
    /// Set when a scan found nothing evictable; cleared by anything that
    /// can make an entry evictable again.
    exhausted: bool,
    live: usize,
}

impl TableState {
    fn new(capacity: usize, bucket_count: usize) -> Self {
        Self {
            entries: (0..capacity).map(|_| CacheEntry::vacant()).collect(),
            buckets: vec![None; bucket_count],
            lru_head: None,
            lru_tail: None,
            // LIFO: slot 0 is handed out first
            free: (0..capacity as u32).rev().collect(),
            retired: Vec::new(),
            exhausted: false,
            live: 0,
        }
    }

    fn bucket_of(&self, key: &QueryKey) -> usize {
        key.hash_index() as usize % self.buckets.len()
    }

    fn link_bucket(&mut self, slot: u32, bucket: usize) {
        let head = self.buckets[bucket];
        {
            let entry = &mut self.entries[slot as usize];
            entry.bucket_prev = None;
            entry.bucket_next = head;
        }
        if let Some(head) = head {
            self.entries[head as usize].bucket_prev = Some(slot);
        }
        self.buckets[bucket] = Some(slot);
    }

    fn unlink_bucket(&mut self, slot: u32) {
        let bucket = self.bucket_of(&self.entries[slot as usize].key);
        let (prev, next) = {
            let entry = &self.entries[slot as usize];
            (entry.bucket_prev, entry.bucket_next)
        };
        match prev {
            Some(prev) => self.entries[prev as usize].bucket_next = next,
            None => self.buckets[bucket] = next,
        }
        if let Some(next) = next {
            self.entries[next as usize].bucket_prev = prev;
        }
    }

    fn push_front(&mut self, slot: u32) {
        let head = self.lru_head;
        {
            let entry = &mut self.entries[slot as usize];
            entry.lru_prev = None;
            entry.lru_next = head;
        }
        match head {
            Some(head) => self.entries[head as usize].lru_prev = Some(slot),
            None => self.lru_tail = Some(slot),
        }
        self.lru_head = Some(slot);
    }

    fn unlink_lru(&mut self, slot: u32) {
        let (prev, next) = {
            let entry = &self.entries[slot as usize];
            (entry.lru_prev, entry.lru_next)
        };
        match prev {
            Some(prev) => self.entries[prev as usize].lru_next = next,
            None => self.lru_head = next,
        }
        match next {
            Some(next) => self.entries[next as usize].lru_prev = prev,
            None => self.lru_tail = prev,
        }
    }

    fn touch(&mut self, slot: u32) {
        if self.lru_head != Some(slot) {
            self.unlink_lru(slot);
            self.push_front(slot);
        }
    }

    /// Slots in recency order, most recent first.
    fn occupied_slots(&self) -> Vec<u32> {
        let mut slots = Vec::with_capacity(self.live);
        let mut cursor = self.lru_head;
        while let Some(slot) = cursor {
            slots.push(slot);
            cursor = self.entries[slot as usize].lru_next;
        }
        slots
    }
}

/// Arena of cache entries with bucket chains and LRU order.
pub struct CacheTable {
    state: Mutex<TableState>,
    cells: Box<[EntryCell]>,
    eviction_idle_cycles: u32,
}

impl CacheTable {
    /// `capacity` and `bucket_count` must be non-zero; the cache validates
    /// its config before building a table.
    pub fn new(capacity: usize, bucket_count: usize, eviction_idle_cycles: u32) -> Self {
        Self {
            state: Mutex::new(TableState::new(capacity, bucket_count.max(1))),
            cells: (0..capacity).map(|_| EntryCell::new()).collect(),
            eviction_idle_cycles,
        }
    }

    pub fn capacity(&self) -> usize {
        self.cells.len()
    }

    pub fn len(&self) -> usize {
        self.state.lock().live
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Find the entry answering `key`, inserting one on a miss.
    ///
    /// A miss on a full table reclaims the least recently used evictable
    /// entry. If nothing is evictable the lookup degrades to [`Lookup::Bypass`].
    pub fn lookup_or_create(&self, key: &QueryKey) -> Lookup {
        if key.query_type() == QueryType::Invalid {
            return Lookup::Bypass;
        }

        let mut guard = self.state.lock();
        let state = &mut *guard;
        let bucket = state.bucket_of(key);

        let mut cursor = state.buckets[bucket];
        while let Some(slot) = cursor {
            let entry = &state.entries[slot as usize];
            cursor = entry.bucket_next;

            let cell = self.cells[slot as usize].load();
            if cell.retired || !entry.key.matches(key) {
                continue;
            }

            state.entries[slot as usize].used_since_last_update = true;
            state.touch(slot);
            return Lookup::Hit {
                handle: EntryHandle {
                    slot,
                    generation: cell.generation,
                },
                snapshot: cell.snapshot(true),
            };
        }

        let (slot, evicted) = match state.free.pop() {
            Some(slot) => (slot, false),
            None => match self.find_evictable(state) {
                Some(slot) => {
                    tracing::trace!(slot, "evicting idle query cache entry");
                    self.detach(state, slot);
                    (slot, true)
                }
                None => return Lookup::Bypass,
            },
        };

        let generation = self.cells[slot as usize].activate();
        {
            let entry = &mut state.entries[slot as usize];
            entry.key = key.clone();
            entry.occupied = true;
            entry.used_since_last_update = true;
            entry.idle_cycles = 0;
        }
        state.link_bucket(slot, bucket);
        state.push_front(slot);
        state.live += 1;

        Lookup::Created {
            handle: EntryHandle { slot, generation },
            evicted,
        }
    }

    /// Locate the entry for `key` without marking it used.
    pub fn peek(&self, key: &QueryKey) -> Option<(EntryHandle, EntrySnapshot)> {
        let state = self.state.lock();
        let mut cursor = state.buckets[state.bucket_of(key)];
        while let Some(slot) = cursor {
            let entry = &state.entries[slot as usize];
            cursor = entry.bucket_next;
            let cell = self.cells[slot as usize].load();
            if !cell.retired && entry.key.matches(key) {
                return Some((
                    EntryHandle {
                        slot,
                        generation: cell.generation,
                    },
                    cell.snapshot(entry.used_since_last_update),
                ));
            }
        }
        None
    }

    pub fn snapshot(&self, handle: EntryHandle) -> Option<EntrySnapshot> {
        let state = self.state.lock();
        let entry = state.entries.get(handle.slot as usize)?;
        let cell = self.cells[handle.slot as usize].load();
        (entry.occupied && cell.generation == handle.generation)
            .then(|| cell.snapshot(entry.used_since_last_update))
    }

    /// Visit every occupied entry once, most recently used first.
    pub fn for_each(&self, mut visitor: impl FnMut(EntryHandle, &QueryKey, EntrySnapshot)) {
        let state = self.state.lock();
        for slot in state.occupied_slots() {
            let entry = &state.entries[slot as usize];
            let cell = self.cells[slot as usize].load();
            visitor(
                EntryHandle {
                    slot,
                    generation: cell.generation,
                },
                &entry.key,
                cell.snapshot(entry.used_since_last_update),
            );
        }
    }

    /// Release every entry. Returns how many were live.
    pub fn clear(&self) -> usize {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let cleared = state.live;
        if cleared == 0 {
            return 0;
        }

        for slot in state.occupied_slots() {
            self.cells[slot as usize].reclaim();
            state.entries[slot as usize].reset();
        }
        state.buckets.iter_mut().for_each(|bucket| *bucket = None);
        state.lru_head = None;
        state.lru_tail = None;
        state.free = (0..self.capacity() as u32).rev().collect();
        state.retired.clear();
        state.exhausted = false;
        state.live = 0;
        cleared
    }

    /// Write back a finished trace. False if the slot was reclaimed meanwhile.
    pub fn complete(&self, handle: EntryHandle, result: bool, now: f32) -> bool {
        self.cells
            .get(handle.slot as usize)
            .is_some_and(|cell| cell.complete(handle.generation, result, now))
    }

    /// Mark an entry whose entities no longer resolve. It stops matching and
    /// becomes the first choice for eviction.
    pub fn retire(&self, handle: EntryHandle) -> bool {
        let retired = self
            .cells
            .get(handle.slot as usize)
            .is_some_and(|cell| cell.retire(handle.generation));
        if retired {
            let mut state = self.state.lock();
            state.retired.push(handle);
            state.exhausted = false;
        }
        retired
    }

    /// Claim the entries that are due for a refresh at `now`.
    ///
    /// Unused entries age by one idle cycle and are left alone; used entries
    /// whose last trace is at least their interval old are marked in flight
    /// and returned as jobs. Usage flags are reset on every entry afterwards.
    pub(crate) fn collect_refresh_jobs(&self, now: f32) -> (Vec<RefreshJob>, CycleScan) {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let mut jobs = Vec::new();
        let mut scan = CycleScan::default();
        state.exhausted = false;

        for slot in state.occupied_slots() {
            scan.live += 1;
            let cell = &self.cells[slot as usize];
            let current = cell.load();
            let entry = &mut state.entries[slot as usize];

            if current.retired {
                entry.used_since_last_update = false;
                continue;
            }

            if !entry.used_since_last_update {
                entry.idle_cycles = entry.idle_cycles.saturating_add(1);
                scan.idle += 1;
                continue;
            }
            entry.idle_cycles = 0;
            entry.used_since_last_update = false;

            if current.in_flight {
                scan.in_flight += 1;
                continue;
            }

            let age = now - current.last_update_time;
            if age >= entry.key.minimum_update_interval() && cell.begin_refresh(current.generation) {
                jobs.push(RefreshJob {
                    handle: EntryHandle {
                        slot,
                        generation: current.generation,
                    },
                    key: entry.key.clone(),
                });
            }
        }

        (jobs, scan)
    }

    /// Retired entries first, then the least recently used entry that sat
    /// out at least `eviction_idle_cycles` full cycles.
    ///
    /// Entries used since the last cycle always form a prefix of the recency
    /// list, so the scan from the tail stops at the first used one.
    fn find_evictable(&self, state: &mut TableState) -> Option<u32> {
        while let Some(handle) = state.retired.pop() {
            let cell = self.cells[handle.slot as usize].load();
            if state.entries[handle.slot as usize].occupied
                && cell.generation == handle.generation
                && cell.retired
            {
                return Some(handle.slot);
            }
        }
        if state.exhausted {
            return None;
        }

        let mut cursor = state.lru_tail;
        while let Some(slot) = cursor {
            let entry = &state.entries[slot as usize];
            if entry.used_since_last_update {
                break;
            }
            if entry.idle_cycles >= self.eviction_idle_cycles {
                return Some(slot);
            }
            cursor = entry.lru_prev;
        }

        state.exhausted = true;
        None
    }

    /// Unlink an occupied slot and invalidate its handles. The caller
    /// reuses the slot directly.
    fn detach(&self, state: &mut TableState, slot: u32) {
        state.unlink_bucket(slot);
        state.unlink_lru(slot);
        self.cells[slot as usize].reclaim();
        state.entries[slot as usize].reset();
        state.live -= 1;
    }
}
