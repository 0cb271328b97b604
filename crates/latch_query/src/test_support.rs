//! Scripted collaborators for unit tests.

use crate::services::{
    CollisionGroup, EntityOffsetMode, EntityResolver, QueryServices, SimulationClock, TraceMask,
    TraceRequest, TraceService,
};
use glam::Vec3;
use latch_core::ecs::{Entity, EntityAllocator};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, RwLock};
use std::time::{Duration, Instant};

const EYE_HEIGHT: f32 = 1.7;

/// Entities with a position; eyes sit `EYE_HEIGHT` above the center.
#[derive(Default)]
pub struct TestWorld {
    inner: RwLock<(EntityAllocator, HashMap<Entity, Vec3>)>,
}

impl TestWorld {
    pub fn spawn_at(&self, center: Vec3) -> Entity {
        let mut guard = self.inner.write().unwrap();
        let entity = guard.0.spawn();
        guard.1.insert(entity, center);
        entity
    }

    pub fn despawn(&self, entity: Entity) {
        let mut guard = self.inner.write().unwrap();
        guard.0.despawn(entity);
        guard.1.remove(&entity);
    }

    pub fn eye_of(&self, entity: Entity) -> Vec3 {
        self.resolve(entity, EntityOffsetMode::EyePosition).unwrap()
    }
}

impl EntityResolver for TestWorld {
    fn resolve(&self, entity: Entity, mode: EntityOffsetMode) -> Option<Vec3> {
        let guard = self.inner.read().unwrap();
        let center = *guard.1.get(&entity)?;
        Some(match mode {
            EntityOffsetMode::EyePosition => center + Vec3::Y * EYE_HEIGHT,
            EntityOffsetMode::WorldSpaceCenter | EntityOffsetMode::None => center,
        })
    }

    fn is_alive(&self, entity: Entity) -> bool {
        self.inner.read().unwrap().0.is_alive(entity)
    }
}

/// Owned copy of the parts of a [`TraceRequest`] tests assert on.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RecordedTrace {
    pub start: Vec3,
    pub end: Vec3,
    pub skip: Option<Entity>,
    pub target: Option<Entity>,
    pub trace_mask: TraceMask,
    pub collision_group: CollisionGroup,
}

impl From<&TraceRequest<'_>> for RecordedTrace {
    fn from(request: &TraceRequest<'_>) -> Self {
        Self {
            start: request.start,
            end: request.end,
            skip: request.skip,
            target: request.target,
            trace_mask: request.trace_mask,
            collision_group: request.collision_group,
        }
    }
}

/// Returns a switchable answer and counts calls.
#[derive(Default)]
pub struct CountingTracer {
    answer: AtomicBool,
    calls: AtomicUsize,
    last: Mutex<Option<RecordedTrace>>,
}

impl CountingTracer {
    pub fn set_answer(&self, answer: bool) {
        self.answer.store(answer, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_request(&self) -> Option<RecordedTrace> {
        *self.last.lock().unwrap()
    }
}

impl TraceService for CountingTracer {
    fn is_clear(&self, request: &TraceRequest<'_>) -> bool {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last.lock().unwrap() = Some(request.into());
        self.answer.load(Ordering::SeqCst)
    }
}

/// Tracer that parks callers while held, for racing refreshes.
pub struct WaitingTracer {
    answer: AtomicBool,
    calls: AtomicUsize,
    gate: Mutex<Gate>,
    changed: Condvar,
}

#[derive(Default)]
struct Gate {
    held: bool,
    waiting: usize,
}

impl WaitingTracer {
    pub fn new() -> Self {
        Self {
            answer: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
            gate: Mutex::new(Gate::default()),
            changed: Condvar::new(),
        }
    }

    pub fn set_answer(&self, answer: bool) {
        self.answer.store(answer, Ordering::SeqCst);
    }

    pub fn hold(&self) {
        self.gate.lock().unwrap().held = true;
    }

    pub fn release(&self) {
        self.gate.lock().unwrap().held = false;
        self.changed.notify_all();
    }

    pub fn wait_for_waiters(&self, count: usize, timeout: Duration) -> bool {
        let gate = self.gate.lock().unwrap();
        let (gate, _) = self
            .changed
            .wait_timeout_while(gate, timeout, |gate| gate.waiting < count)
            .unwrap();
        gate.waiting >= count
    }

    pub fn wait_for_calls(&self, count: usize, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if self.calls.load(Ordering::SeqCst) >= count {
                return true;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        false
    }
}

impl TraceService for WaitingTracer {
    fn is_clear(&self, _request: &TraceRequest<'_>) -> bool {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut gate = self.gate.lock().unwrap();
        gate.waiting += 1;
        self.changed.notify_all();
        while gate.held {
            gate = self.changed.wait(gate).unwrap();
        }
        gate.waiting -= 1;
        self.answer.load(Ordering::SeqCst)
    }
}

/// Clock that only moves when told to.
#[derive(Default)]
pub struct ManualClock {
    bits: AtomicU32,
}

impl ManualClock {
    pub fn set(&self, seconds: f32) {
        self.bits.store(seconds.to_bits(), Ordering::SeqCst);
    }
}

impl SimulationClock for ManualClock {
    fn now(&self) -> f32 {
        f32::from_bits(self.bits.load(Ordering::SeqCst))
    }
}

/// One set of test collaborators.
pub struct Harness {
    pub world: Arc<TestWorld>,
    pub tracer: Arc<CountingTracer>,
    pub clock: Arc<ManualClock>,
    tracer_override: Option<Arc<dyn TraceService>>,
}

impl Harness {
    pub fn new() -> Self {
        Self {
            world: Arc::new(TestWorld::default()),
            tracer: Arc::new(CountingTracer::default()),
            clock: Arc::new(ManualClock::default()),
            tracer_override: None,
        }
    }

    /// Route traces to `tracer` instead of the counting tracer.
    pub fn with_tracer(tracer: Arc<dyn TraceService>) -> Self {
        Self {
            tracer_override: Some(tracer),
            ..Self::new()
        }
    }

    pub fn services(&self) -> QueryServices {
        let tracer = self
            .tracer_override
            .clone()
            .unwrap_or_else(|| self.tracer.clone() as Arc<dyn TraceService>);
        QueryServices::new(tracer, self.world.clone(), self.clock.clone())
    }
}
