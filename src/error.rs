//! Error taxonomy (spec.md §7). Every case is a distinct return value; the
//! runtime never throws. Fatal invariant violations are `assert!`/
//! `debug_assert!` panics elsewhere, not constructed here.

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeError {
    /// A reservation would overtake `last_task_alive` and no retirement
    /// happened within the bounded wait. The caller is expected to retry
    /// after yielding, not treat this as fatal.
    TaskWindowFull,
    /// The dependency-edge arena is saturated. Unrecoverable for the
    /// current run.
    DepPoolExhausted,
    /// A worker's kernel callback returned an error for `task_id`. Recorded
    /// on the descriptor and propagated to consumers as a poisoned
    /// completion.
    KernelError { task_id: u32, message: String },
    /// `submit` was called after `orchestration_done`.
    ShutdownInProgress,
    /// Construction-time configuration was invalid.
    ConfigInvalid(&'static str),
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuntimeError::TaskWindowFull => write!(f, "task window full; no slot retired in time"),
            RuntimeError::DepPoolExhausted => write!(f, "dependency-list pool exhausted"),
            RuntimeError::KernelError { task_id, message } => {
                write!(f, "kernel error on task {task_id}: {message}")
            }
            RuntimeError::ShutdownInProgress => {
                write!(f, "submit() called after orchestration_done()")
            }
            RuntimeError::ConfigInvalid(reason) => write!(f, "invalid configuration: {reason}"),
        }
    }
}

impl std::error::Error for RuntimeError {}
