//! C3: the orchestrator — the single-writer thread that turns `submit()`
//! calls into task descriptors, infers dependency edges from tile overlap,
//! and maintains the scope stack.
//!
//! Because exactly one thread ever calls into this module, the tile
//! overlap index and scope stack need no locking of their own — the only
//! state here that is visible to other threads is reached through
//! [`crate::store::Store`] and [`crate::scheduler::Scheduler`], both of
//! which already arbitrate their own cross-thread access.

use std::collections::HashMap;
use std::sync::Arc;

use crate::deppool::DepPool;
use crate::error::RuntimeError;
use crate::scheduler::Scheduler;
use crate::store::{EdgeList, SlotBody, Store};
use crate::types::{Param, TaskId, TaskState, TileKey, WorkerKind};

#[derive(Default)]
struct TileEntry {
    writer: Option<TaskId>,
    readers: Vec<TaskId>,
}

pub struct Orchestrator {
    store: Arc<Store>,
    scheduler: Arc<Scheduler>,
    deppool: Arc<DepPool>,
    overlap: HashMap<TileKey, TileEntry>,
    /// Each frame lists the tasks submitted while it was the innermost
    /// scope. Frame 0 is the implicit root scope, closed by
    /// [`Orchestrator::orchestration_done`].
    scope_stack: Vec<Vec<TaskId>>,
    done: bool,
}

impl Orchestrator {
    pub fn new(store: Arc<Store>, scheduler: Arc<Scheduler>, deppool: Arc<DepPool>) -> Self {
        Self {
            store,
            scheduler,
            deppool,
            overlap: HashMap::new(),
            scope_stack: vec![Vec::new()],
            done: false,
        }
    }

    pub fn scope_begin(&mut self) -> Result<(), RuntimeError> {
        if self.done {
            return Err(RuntimeError::ShutdownInProgress);
        }
        self.scope_stack.push(Vec::new());
        Ok(())
    }

    /// Close the innermost scope, discharging the fanout sentinel of every
    /// task submitted under it.
    pub fn scope_end(&mut self) -> Result<(), RuntimeError> {
        if self.done {
            return Err(RuntimeError::ShutdownInProgress);
        }
        if self.scope_stack.len() <= 1 {
            return Err(RuntimeError::ConfigInvalid(
                "scope_end called without a matching scope_begin",
            ));
        }
        let frame = self.scope_stack.pop().expect("checked non-empty above");
        self.discharge_frame(frame);
        Ok(())
    }

    fn discharge_frame(&self, frame: Vec<TaskId>) {
        for task_id in frame {
            let slot = self.store.slot_index(task_id);
            self.scheduler.release_fanout(slot);
        }
    }

    /// Signal that no further tasks will be submitted, closing every
    /// remaining scope including the implicit root. Idempotent.
    pub fn orchestration_done(&mut self) -> Result<(), RuntimeError> {
        if self.done {
            return Ok(());
        }
        while self.scope_stack.len() > 1 {
            let frame = self.scope_stack.pop().unwrap();
            self.discharge_frame(frame);
        }
        if let Some(root) = self.scope_stack.pop() {
            self.discharge_frame(root);
        }
        self.done = true;
        Ok(())
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Submit a task, inferring its dependencies from the tiles its
    /// parameters reference and linking it into the dependency graph.
    pub fn submit(
        &mut self,
        worker_kind: WorkerKind,
        func_name: String,
        params: Vec<Param>,
    ) -> Result<TaskId, RuntimeError> {
        if self.done {
            return Err(RuntimeError::ShutdownInProgress);
        }

        let (task_id, slot) = self.store.reserve()?;
        let alive_floor = self.store.last_task_alive();

        let mut producers: Vec<TaskId> = Vec::new();
        for p in &params {
            let entry = self.overlap.entry(p.tile_key()).or_default();
            prune_stale(entry, alive_floor);
            if p.direction.writes() {
                if let Some(w) = entry.writer {
                    push_unique(&mut producers, w);
                }
                for r in entry.readers.drain(..) {
                    push_unique(&mut producers, r);
                }
                entry.writer = Some(task_id);
            } else {
                if let Some(w) = entry.writer {
                    push_unique(&mut producers, w);
                }
                entry.readers.push(task_id);
            }
        }

        let mut fanin_head = 0u32;
        let mut fanin_count = 0u32;
        for producer_id in producers {
            let producer_slot = self.store.slot_index(producer_id);
            let linked = {
                let mut guard = self.store.lock_fanout(producer_slot);
                if self.scheduler.state(producer_slot) as u8 >= TaskState::Completed as u8 {
                    false
                } else {
                    let offset = self.deppool.alloc_edge(task_id, guard.head)?;
                    guard.head = offset;
                    guard.count += 1;
                    true
                }
            };
            if linked {
                // The gate above is only about *this producer's* fanout
                // list; bumping its refcount can happen just after release
                // since the refcount itself is an independent atomic and
                // the producer cannot observe fanout_refcount reach zero
                // until it is COMPLETED, which the gate already ruled out.
                self.scheduler.bump_fanout(producer_slot);
                let offset = self.deppool.alloc_edge(producer_id, fanin_head)?;
                fanin_head = offset;
                fanin_count += 1;
            }
        }

        let scope_depth = (self.scope_stack.len() - 1) as u32;
        self.store.begin_build(
            task_id,
            slot,
            SlotBody {
                worker_kind,
                func_name,
                params,
                scope_depth,
            },
        );
        self.store.set_fanin_list(
            slot,
            EdgeList {
                head: fanin_head,
                count: fanin_count,
            },
        );

        let ready_now = self.scheduler.init_task(slot, fanin_count);
        self.store.publish(slot);
        if ready_now {
            self.scheduler.push_ready(slot, task_id, worker_kind);
        }

        self.scope_stack
            .last_mut()
            .expect("root scope always present")
            .push(task_id);

        Ok(task_id)
    }
}

fn prune_stale(entry: &mut TileEntry, alive_floor: TaskId) {
    if let Some(w) = entry.writer {
        if w < alive_floor {
            entry.writer = None;
        }
    }
    entry.readers.retain(|&r| r >= alive_floor);
}

fn push_unique(producers: &mut Vec<TaskId>, id: TaskId) {
    if !producers.contains(&id) {
        producers.push(id);
    }
}
