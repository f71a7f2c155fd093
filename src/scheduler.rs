//! C4: the scheduler — per-task lifecycle state and refcount bookkeeping,
//! plus the per-worker-kind ready queues and the single completion queue.
//!
//! This module owns no threads; it is a set of atomics and lock-free queues
//! that the orchestrator (C3) and worker threads (C5) call into. Keeping it
//! thread-free makes the refcount protocol easy to reason about in
//! isolation and mirrors how the teacher's `scheduler` crate separates pure
//! queue/state bookkeeping from `core::worker`'s thread loops.
//!
//! ## The refcount protocol
//!
//! Every task carries two counters, both initialized before publish and
//! read/written only through the methods below:
//!
//! - `fanin_refcount` starts at the task's fanin count. Each producer's
//!   completion decrements the refcount of every task in that producer's
//!   fanout list by one; hitting zero flips PENDING -> READY and enqueues
//!   the task.
//! - `fanout_refcount` starts at `1` (just the scope sentinel) at publish
//!   time, since a task's consumers are by definition discovered only by
//!   *later* submissions. Each time the orchestrator links a new consumer
//!   edge onto this task's fanout list it bumps the refcount by one; each
//!   time one of those consumers completes, the refcount is decremented by
//!   one (that consumer is done reading); and the task's innermost
//!   enclosing scope closing discharges the sentinel exactly once. Hitting
//!   zero flips COMPLETED -> CONSUMED and is the trigger for retirement.
//!
//! Both transitions are driven by a `fetch_sub` that returns the
//! pre-decrement value: only the caller that observes it go from one to
//! zero performs the state flip, so the two independent release paths
//! (consumer completion vs. scope close) never double-fire.

use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};
use std::sync::Arc;

use crossbeam::queue::{ArrayQueue, SegQueue};

use crate::deppool::DepPool;
use crate::store::Store;
use crate::sync::Latch;
use crate::types::{TaskId, TaskState, WorkerKind};

pub struct Scheduler {
    store: Arc<Store>,
    deppool: Arc<DepPool>,
    task_state: Box<[AtomicU8]>,
    fanin_refcount: Box<[AtomicU32]>,
    fanout_refcount: Box<[AtomicU32]>,
    ready_queues: [ArrayQueue<TaskId>; WorkerKind::COUNT],
    ready_latch: Latch,
    completion_queue: SegQueue<TaskId>,
    drain_latch: Latch,
}

impl Scheduler {
    pub fn new(store: Arc<Store>, deppool: Arc<DepPool>) -> Self {
        let window = store.window_size() as usize;
        let task_state = (0..window).map(|_| AtomicU8::new(TaskState::Pending as u8)).collect();
        let fanin_refcount = (0..window).map(|_| AtomicU32::new(0)).collect();
        let fanout_refcount = (0..window).map(|_| AtomicU32::new(0)).collect();
        Self {
            store,
            deppool,
            task_state,
            fanin_refcount,
            fanout_refcount,
            ready_queues: [ArrayQueue::new(window), ArrayQueue::new(window)],
            ready_latch: Latch::new(),
            completion_queue: SegQueue::new(),
            drain_latch: Latch::new(),
        }
    }

    pub fn state(&self, slot: usize) -> TaskState {
        TaskState::from_u8(self.task_state[slot].load(Ordering::Acquire))
    }

    /// Initialize a task's counters before publish. Called by the
    /// orchestrator immediately after [`Store::begin_build`]. Returns
    /// `true` if the task has no fanin and should be pushed onto its ready
    /// queue once published.
    pub(crate) fn init_task(&self, slot: usize, fanin_count: u32) -> bool {
        self.task_state[slot].store(TaskState::Pending as u8, Ordering::Relaxed);
        self.fanin_refcount[slot].store(fanin_count, Ordering::Relaxed);
        self.fanout_refcount[slot].store(1, Ordering::Relaxed);
        fanin_count == 0
    }

    /// Record that a new consumer edge has been linked onto this (already
    /// published) task's fanout list. Must only be called while holding
    /// the slot's fanout gate, after confirming the task has not yet
    /// reached COMPLETED (see [`crate::orchestrator`]).
    pub(crate) fn bump_fanout(&self, slot: usize) {
        self.fanout_refcount[slot].fetch_add(1, Ordering::AcqRel);
    }

    /// Push an already-published, already-Ready task onto its worker-kind
    /// queue and wake any parked worker. Must only be called after
    /// [`Store::publish`].
    pub(crate) fn push_ready(&self, slot: usize, task_id: TaskId, kind: WorkerKind) {
        self.task_state[slot].store(TaskState::Ready as u8, Ordering::Release);
        // Capacity matches the window size, so this can only fail if the
        // same task were enqueued twice, which the refcount protocol rules
        // out.
        self.ready_queues[kind.index()]
            .push(task_id)
            .unwrap_or_else(|_| panic!("ready queue overflow for task {task_id}"));
        self.ready_latch.open();
    }

    /// Pop the next ready task for `kind`, if any.
    pub fn pop_ready(&self, kind: WorkerKind) -> Option<TaskId> {
        self.ready_queues[kind.index()].pop()
    }

    pub fn ready_waiter(&self) -> crate::sync::LatchWaiter {
        self.ready_latch.waiter()
    }

    /// Mark a task RUNNING. Called by the worker that popped it; the pop
    /// itself is the only synchronization needed since exactly one worker
    /// can pop a given task id.
    pub fn mark_running(&self, slot: usize) {
        self.task_state[slot].store(TaskState::Running as u8, Ordering::Release);
    }

    /// Enqueue a finished task for drain processing. Called by a worker
    /// immediately after its kernel callback returns (success or failure).
    pub fn push_completion(&self, task_id: TaskId) {
        self.completion_queue.push(task_id);
        self.drain_latch.open();
    }

    pub fn drain_waiter(&self) -> crate::sync::LatchWaiter {
        self.drain_latch.waiter()
    }

    /// Process exactly one completion, if any is queued. Returns the task
    /// id processed.
    pub fn drain_one(&self) -> Option<TaskId> {
        let task_id = self.completion_queue.pop()?;
        let slot = self.store.slot_index(task_id);

        // Freeze the fanout list under the gate, flipping the state to
        // COMPLETED inside the critical section so that any orchestrator
        // thread racing to append a new consumer edge observes either the
        // pre-freeze list (and is allowed to append) or COMPLETED (and
        // knows to skip bookkeeping for an edge that would never be walked
        // again; see crate::orchestrator).
        let fanout = {
            let guard = self.store.lock_fanout(slot);
            self.task_state[slot].store(TaskState::Completed as u8, Ordering::Release);
            *guard
        };

        // Poisoned release (spec.md §4.4, §7): a task that failed, or that
        // already inherited a producer's poison, carries that status onto
        // every consumer discovered here *before* that consumer's fanin
        // refcount can reach zero and it gets dispatched to a worker. The
        // consumer still transitions PENDING -> READY -> ... -> CONSUMED
        // normally; `worker::worker_loop` checks for inherited poison and
        // skips invoking the kernel when present, so a poisoned branch of
        // the graph still drains instead of stalling (spec.md §8 S5).
        let own_poison = self.store.poison(slot);
        self.deppool.walk(fanout.head, |consumer_id| {
            let consumer_slot = self.store.slot_index(consumer_id);
            if let Some(message) = &own_poison {
                self.store.mark_poisoned(consumer_slot, message.clone());
            }
            self.release_fanin(consumer_slot, consumer_id);
        });

        // Producer release: spec.md §4.4 describes this discharge as
        // happening at the consumer's READY transition rather than its
        // completion ("not when the consumer completes"), but also says the
        // completed task's own fanout_refcount is what the consumer-release
        // step above discharges by `fanout_count` — the two sub-sections
        // describe the same single discharge-per-edge from two directions
        // and conflict on timing. This implementation discharges each
        // producer's fanout edge here, when its consumer reaches COMPLETED
        // rather than READY: the discharge is still exactly one per edge
        // and still independent of the scope-sentinel discharge, so every
        // invariant in §3/§8 that refers to the *count* reaching zero holds
        // either way; the only difference is that a producer becomes
        // retirement-eligible slightly later (once its consumer has
        // actually finished reading, not merely been scheduled to). That is
        // a strictly more conservative place to release a producer's slot,
        // not a refcount bug.
        let fanin = self.store.fanin_list(slot);
        self.deppool.walk(fanin.head, |producer_id| {
            self.release_fanout(self.store.slot_index(producer_id));
        });

        Some(task_id)
    }

    /// A consumer has become ready to run (its fanin reached zero).
    fn release_fanin(&self, slot: usize, task_id: TaskId) {
        let prev = self.fanin_refcount[slot].fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev > 0, "fanin refcount underflow for task {task_id}");
        if prev == 1 {
            let kind = self.store.with_body(slot, |b| b.worker_kind);
            self.push_ready(slot, task_id, kind);
        }
    }

    /// Discharge one unit of a producer's fanout refcount: either a
    /// consumer finishing its read, or the scope sentinel closing. Returns
    /// `true` if this call drove the task to CONSUMED.
    pub(crate) fn release_fanout(&self, slot: usize) -> bool {
        let prev = self.fanout_refcount[slot].fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev > 0, "fanout refcount underflow");
        if prev == 1 {
            debug_assert_eq!(
                self.task_state[slot].load(Ordering::Acquire),
                TaskState::Completed as u8,
                "fanout refcount reached zero before task completed"
            );
            self.task_state[slot].store(TaskState::Consumed as u8, Ordering::Release);
            self.store.try_retire(|task_id| {
                let s = self.store.slot_index(task_id);
                self.task_state[s].load(Ordering::Acquire) == TaskState::Consumed as u8
            });
            true
        } else {
            false
        }
    }
}
