//! Core value types shared by every component of the runtime.

use std::sync::Arc;

use crate::error::RuntimeError;

/// A 32-bit monotonically increasing task identity, assigned at submission.
pub type TaskId = u32;

/// An opaque identity for a buffer a parameter tile belongs to.
///
/// The runtime never dereferences this value; it is whatever the host uses
/// to distinguish one buffer from another (a pointer cast to an integer, a
/// handle, an index into a buffer table, ...).
pub type BufferBase = u64;

/// The class of worker a task must run on.
///
/// Modeled as a tagged enum rather than a trait object so that per-kind ready
/// queues can live in a fixed-size array indexed by [`WorkerKind::index`]
/// instead of going through dynamic dispatch on the hot path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkerKind {
    Cube,
    Vector,
}

impl WorkerKind {
    /// All worker kinds known to this build, in queue-array order.
    pub const ALL: [WorkerKind; 2] = [WorkerKind::Cube, WorkerKind::Vector];
    pub const COUNT: usize = Self::ALL.len();

    pub fn index(self) -> usize {
        match self {
            WorkerKind::Cube => 0,
            WorkerKind::Vector => 1,
        }
    }
}

/// The access direction of a task parameter, used for dependency inference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    In,
    Out,
    InOut,
}

impl Direction {
    pub fn reads(self) -> bool {
        matches!(self, Direction::In | Direction::InOut)
    }

    pub fn writes(self) -> bool {
        matches!(self, Direction::Out | Direction::InOut)
    }
}

/// The tile identity used for overlap detection: `tile_size` is deliberately
/// excluded, per spec — it is passed to the kernel verbatim but plays no
/// part in dependency inference.
pub type TileKey = (BufferBase, u32);

/// One parameter of a submitted task.
#[derive(Debug, Clone, Copy)]
pub struct Param {
    pub buffer_base: BufferBase,
    pub tile_index: u32,
    pub tile_size: u32,
    pub direction: Direction,
}

impl Param {
    pub fn tile_key(&self) -> TileKey {
        (self.buffer_base, self.tile_index)
    }
}

/// Opaque context handed back to the kernel callback on every invocation.
pub type UserContext = Arc<dyn std::any::Any + Send + Sync>;

/// The kernel callback provided by the host. Must not block indefinitely and
/// must not retain `params` past return (see spec.md §6).
pub type Kernel = Arc<dyn Fn(&str, &[Param], &UserContext) -> Result<(), String> + Send + Sync>;

/// Host callback invoked once per task with its final status: `Ok(())` on a
/// normal completion, or `Err(RuntimeError::KernelError { .. })` if this
/// task's own kernel call failed or it inherited a poisoned completion from
/// a producer (spec.md §4.4, §7).
pub type CompletionCallback = Arc<dyn Fn(TaskId, Result<(), RuntimeError>) + Send + Sync>;

/// The lifecycle state of a task, advancing monotonically.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TaskState {
    Pending = 0,
    Ready = 1,
    Running = 2,
    Completed = 3,
    Consumed = 4,
}

impl TaskState {
    pub fn from_u8(v: u8) -> Self {
        match v {
            0 => TaskState::Pending,
            1 => TaskState::Ready,
            2 => TaskState::Running,
            3 => TaskState::Completed,
            4 => TaskState::Consumed,
            other => panic!("invalid task state byte {other}"),
        }
    }
}
