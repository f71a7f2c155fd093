//! C2: the dependency-list pool — a bump-allocated arena of singly-linked
//! edge nodes shared by every task's fanin and fanout lists.
//!
//! Nodes are never freed individually; the arena only grows for the
//! lifetime of the runtime. This mirrors the teacher's scheduler, which
//! favors a flat slab over per-task heap allocation on the hot path. Offset
//! `0` is reserved as the null/"empty list" sentinel, so the pool's first
//! real node is offset `1`.
//!
//! The backing `Vec` is shared by every fanin/fanout list in the runtime, so
//! `alloc_edge` (orchestrator thread, appending a new edge) and `walk`
//! (completion-drain thread, releasing a just-completed task's neighbors)
//! run concurrently against the *same* `Vec` as soon as any task has a
//! dependency: a growing push can reallocate out from under a live reader.
//! A real lock is needed here, not a runtime-checked cell — this is the one
//! piece of shared state in the crate where two threads genuinely want to
//! touch it at once rather than merely being disciplined about who touches
//! it when, so it gets a `Mutex` like `store.rs`'s fanout gate rather than
//! `AtomicRefCell`.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use crate::error::RuntimeError;
use crate::types::TaskId;

/// One link in a fanin/fanout list: the neighboring task id and the offset
/// of the next node (0 = end of list).
#[derive(Debug, Clone, Copy)]
struct Node {
    task_id: TaskId,
    next: u32,
}

pub struct DepPool {
    nodes: Mutex<Vec<Node>>,
    len: AtomicU32,
    capacity: u32,
}

impl DepPool {
    pub fn new(capacity: u32) -> Self {
        let mut nodes = Vec::with_capacity(capacity as usize + 1);
        // Sentinel node at offset 0; its contents are never read.
        nodes.push(Node { task_id: 0, next: 0 });
        Self {
            nodes: Mutex::new(nodes),
            len: AtomicU32::new(1),
            capacity: capacity + 1,
        }
    }

    /// Allocate a new node recording an edge to `task_id`, linking it in
    /// front of `prev_head`, and return its offset.
    pub fn alloc_edge(&self, task_id: TaskId, prev_head: u32) -> Result<u32, RuntimeError> {
        let mut nodes = self.nodes.lock().unwrap();
        if nodes.len() as u32 >= self.capacity {
            return Err(RuntimeError::DepPoolExhausted);
        }
        let offset = nodes.len() as u32;
        nodes.push(Node { task_id, next: prev_head });
        self.len.store(offset + 1, Ordering::Release);
        Ok(offset)
    }

    /// Walk a list starting at `head`, calling `visit` on each task id, in
    /// most-recently-added-first order.
    pub fn walk(&self, head: u32, mut visit: impl FnMut(TaskId)) {
        if head == 0 {
            return;
        }
        let nodes = self.nodes.lock().unwrap();
        let mut offset = head;
        while offset != 0 {
            let node = nodes[offset as usize];
            visit(node.task_id);
            offset = node.next;
        }
    }

    pub fn len(&self) -> u32 {
        self.len.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_and_walk_order() {
        let pool = DepPool::new(8);
        let mut head = 0;
        head = pool.alloc_edge(10, head).unwrap();
        head = pool.alloc_edge(11, head).unwrap();
        head = pool.alloc_edge(12, head).unwrap();
        let mut seen = Vec::new();
        pool.walk(head, |id| seen.push(id));
        assert_eq!(seen, vec![12, 11, 10]);
    }

    #[test]
    fn exhaustion_is_reported() {
        let pool = DepPool::new(2);
        let mut head = 0;
        head = pool.alloc_edge(1, head).unwrap();
        head = pool.alloc_edge(2, head).unwrap();
        assert!(matches!(
            pool.alloc_edge(3, head),
            Err(RuntimeError::DepPoolExhausted)
        ));
    }
}
