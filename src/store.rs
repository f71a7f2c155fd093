//! C1: the shared task store — a fixed-capacity ring of task descriptors
//! addressed by `task_id mod window_size`, plus the header fields
//! (`current_task_index`, `last_task_alive`) that track the live window.
//!
//! Slot reuse is legal only after the previous occupant has reached
//! CONSUMED and `last_task_alive` has advanced past it (spec.md §3,
//! invariant 6). The per-slot `fanout` field is guarded by a [`Mutex`]
//! rather than the lighter-weight [`atomic_refcell::AtomicRefCell`] used for
//! the rest of the descriptor, because it is the one piece of descriptor
//! state mutated by two different threads at once: the orchestrator
//! appending a new consumer edge, and the completion drainer freezing the
//! list when the producer finishes. See [`crate::scheduler`] for how the
//! two sides use this lock together.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use atomic_refcell::AtomicRefCell;

use crate::error::RuntimeError;
use crate::sync::Latch;
use crate::types::{Param, TaskId, WorkerKind};

/// A singly-linked edge list head, as stored inline in a descriptor: `head`
/// is an offset into the dependency-list pool (0 is the null sentinel), and
/// `count` is the number of edges currently linked.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct EdgeList {
    pub head: u32,
    pub count: u32,
}

/// The mutable body of a descriptor that is fully written before publish and
/// read-only afterwards (spec.md §5, writer discipline).
pub(crate) struct SlotBody {
    pub worker_kind: WorkerKind,
    pub func_name: String,
    pub params: Vec<Param>,
    pub scope_depth: u32,
}

struct Slot {
    /// The task id currently occupying this slot; valid only while
    /// `is_active` is true.
    task_id: AtomicU32,
    /// Epoch tag: true once the descriptor has been fully written and
    /// published (spec.md §3: "slot epoch tag used to detect stale
    /// readers").
    is_active: AtomicBool,
    body: AtomicRefCell<SlotBody>,
    /// The fanin list: read-only after publish; never touched once visible
    /// to any other thread, so a plain `AtomicRefCell` borrow suffices.
    fanin: AtomicRefCell<EdgeList>,
    /// The fanout list + count, guarded by a real lock (see module docs).
    fanout: Mutex<EdgeList>,
    /// Set by a worker when this task's own kernel call fails, or by the
    /// completion drainer propagating a producer's poison onto this task
    /// before it runs (spec.md §4.4 "poisoned release"). `None` once reset
    /// by `begin_build`, `Some(message)` from the first failure recorded.
    poison: Mutex<Option<String>>,
}

impl Slot {
    fn empty() -> Self {
        Self {
            task_id: AtomicU32::new(0),
            is_active: AtomicBool::new(false),
            body: AtomicRefCell::new(SlotBody {
                worker_kind: WorkerKind::Cube,
                func_name: String::new(),
                params: Vec::new(),
                scope_depth: 0,
            }),
            fanin: AtomicRefCell::new(EdgeList::default()),
            fanout: Mutex::new(EdgeList::default()),
            poison: Mutex::new(None),
        }
    }
}

pub struct Store {
    slots: Box<[Slot]>,
    window_size: u32,
    current_task_index: AtomicU32,
    last_task_alive: AtomicU32,
    retirement_latch: Latch,
}

const RESERVE_MAX_WAIT: Duration = Duration::from_millis(2000);
const RESERVE_POLL_INTERVAL: Duration = Duration::from_millis(1);

impl Store {
    pub fn new(window_size: u32) -> Result<Self, RuntimeError> {
        if window_size == 0 || !window_size.is_power_of_two() {
            return Err(RuntimeError::ConfigInvalid(
                "task window size must be a nonzero power of two",
            ));
        }
        let slots = (0..window_size).map(|_| Slot::empty()).collect();
        Ok(Self {
            slots,
            window_size,
            current_task_index: AtomicU32::new(0),
            last_task_alive: AtomicU32::new(0),
            retirement_latch: Latch::new(),
        })
    }

    pub fn window_size(&self) -> u32 {
        self.window_size
    }

    pub fn slot_index(&self, task_id: TaskId) -> usize {
        (task_id & (self.window_size - 1)) as usize
    }

    pub fn current_task_index(&self) -> u32 {
        self.current_task_index.load(Ordering::Acquire)
    }

    pub fn last_task_alive(&self) -> u32 {
        self.last_task_alive.load(Ordering::Acquire)
    }

    /// Reserve the next task id and slot, blocking (bounded) if the window
    /// is saturated. Mirrors spec.md §4.1's `reserve()`.
    pub fn reserve(&self) -> Result<(TaskId, usize), RuntimeError> {
        let mut waiter = self.retirement_latch.waiter();
        let deadline = std::time::Instant::now() + RESERVE_MAX_WAIT;
        loop {
            let current = self.current_task_index.load(Ordering::Acquire);
            let alive = self.last_task_alive.load(Ordering::Acquire);
            if current.wrapping_sub(alive) < self.window_size {
                match self.current_task_index.compare_exchange_weak(
                    current,
                    current.wrapping_add(1),
                    Ordering::AcqRel,
                    Ordering::Acquire,
                ) {
                    Ok(_) => {
                        let slot = self.slot_index(current);
                        return Ok((current, slot));
                    }
                    Err(_) => continue,
                }
            }
            if std::time::Instant::now() >= deadline {
                return Err(RuntimeError::TaskWindowFull);
            }
            let remaining = deadline.saturating_duration_since(std::time::Instant::now());
            waiter.wait_timeout(remaining.min(RESERVE_POLL_INTERVAL));
        }
    }

    /// Reset a (previously CONSUMED, now legally reusable) slot for a new
    /// task id and write its body. Must be called before any other thread
    /// can possibly reference `task_id` (true by construction: the
    /// orchestrator is single-writer and nothing else learns of `task_id`
    /// until [`Store::publish`]).
    pub(crate) fn begin_build(&self, task_id: TaskId, slot: usize, body: SlotBody) {
        let s = &self.slots[slot];
        s.is_active.store(false, Ordering::Relaxed);
        s.task_id.store(task_id, Ordering::Relaxed);
        *s.fanin.borrow_mut() = EdgeList::default();
        *s.fanout.lock().unwrap() = EdgeList::default();
        *s.poison.lock().unwrap() = None;
        *s.body.borrow_mut() = body;
    }

    /// Publish the descriptor, making it visible to the scheduler and
    /// workers. Must be the last write the orchestrator performs for this
    /// task.
    pub(crate) fn publish(&self, slot: usize) {
        self.slots[slot].is_active.store(true, Ordering::Release);
    }

    pub(crate) fn is_active(&self, slot: usize) -> bool {
        self.slots[slot].is_active.load(Ordering::Acquire)
    }

    pub(crate) fn task_id_at(&self, slot: usize) -> TaskId {
        self.slots[slot].task_id.load(Ordering::Acquire)
    }

    pub(crate) fn with_body<R>(&self, slot: usize, f: impl FnOnce(&SlotBody) -> R) -> R {
        f(&self.slots[slot].body.borrow())
    }

    pub(crate) fn fanin_count(&self, slot: usize) -> u32 {
        self.slots[slot].fanin.borrow().count
    }

    /// Peek the most recently appended fanin entry's offset (for the
    /// de-duplication check in spec.md §4.3 step 2).
    pub(crate) fn fanin_list(&self, slot: usize) -> EdgeList {
        *self.slots[slot].fanin.borrow()
    }

    pub(crate) fn set_fanin_list(&self, slot: usize, list: EdgeList) {
        *self.slots[slot].fanin.borrow_mut() = list;
    }

    /// Lock a slot's fanout list for the duration of an append-vs-freeze
    /// critical section. See module docs.
    pub(crate) fn lock_fanout(&self, slot: usize) -> std::sync::MutexGuard<'_, EdgeList> {
        self.slots[slot].fanout.lock().unwrap()
    }

    /// Record `message` as this slot's poison, if it is not already
    /// poisoned (first failure wins). Used both for a task's own kernel
    /// error and for a producer's poison carried forward onto a consumer
    /// that has not run yet.
    pub(crate) fn mark_poisoned(&self, slot: usize, message: String) {
        let mut guard = self.slots[slot].poison.lock().unwrap();
        if guard.is_none() {
            *guard = Some(message);
        }
    }

    /// The slot's current poison message, if any.
    pub(crate) fn poison(&self, slot: usize) -> Option<String> {
        self.slots[slot].poison.lock().unwrap().clone()
    }

    /// Attempt to advance `last_task_alive` to the largest contiguous run of
    /// CONSUMED slots starting at its current value. `is_consumed` is
    /// supplied by the scheduler, which owns `task_state`.
    pub(crate) fn try_retire(&self, is_consumed: impl Fn(TaskId) -> bool) {
        loop {
            let alive = self.last_task_alive.load(Ordering::Acquire);
            let limit = self.current_task_index.load(Ordering::Acquire);
            let mut next = alive;
            while next < limit && is_consumed(next) {
                next = next.wrapping_add(1);
            }
            if next == alive {
                return;
            }
            match self.last_task_alive.compare_exchange(
                alive,
                next,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    self.retirement_latch.open();
                    return;
                }
                Err(_) => continue,
            }
        }
    }
}
