//! Construction-time configuration. Deliberately data-only: this crate does
//! not parse CLI args or config files (see SPEC_FULL.md Non-goals); the
//! host embeds a `RuntimeConfig` however it likes and passes it to
//! [`crate::Runtime::create`]. `serde` support is still derived, matching
//! how the rest of the ambient stack carries serde end to end even though
//! no file-loading path is wired up.

use serde::{Deserialize, Serialize};

use crate::error::RuntimeError;
use crate::types::WorkerKind;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Task window size; must be a nonzero power of two.
    pub window_size: u32,
    /// Dependency-list pool capacity, in edges.
    pub dep_pool_capacity: u32,
    /// Worker thread count per kind, indexed by [`WorkerKind::index`].
    pub worker_counts: [usize; WorkerKind::COUNT],
    /// Whether to record Chrome Trace Event Format data for every task
    /// execution. Off by default: recording is essentially free but writing
    /// it out is a host decision.
    pub enable_trace: bool,
}

impl RuntimeConfig {
    pub fn validate(&self) -> Result<(), RuntimeError> {
        if self.window_size == 0 || !self.window_size.is_power_of_two() {
            return Err(RuntimeError::ConfigInvalid(
                "window_size must be a nonzero power of two",
            ));
        }
        if self.dep_pool_capacity == 0 {
            return Err(RuntimeError::ConfigInvalid(
                "dep_pool_capacity must be nonzero",
            ));
        }
        if self.worker_counts.iter().all(|&c| c == 0) {
            return Err(RuntimeError::ConfigInvalid(
                "at least one worker thread is required",
            ));
        }
        Ok(())
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            window_size: 1024,
            dep_pool_capacity: 1 << 16,
            worker_counts: [2, 2],
            enable_trace: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(RuntimeConfig::default().validate().is_ok());
    }

    #[test]
    fn rejects_non_power_of_two_window() {
        let cfg = RuntimeConfig {
            window_size: 100,
            ..RuntimeConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_zero_workers() {
        let cfg = RuntimeConfig {
            worker_counts: [0, 0],
            ..RuntimeConfig::default()
        };
        assert!(cfg.validate().is_err());
    }
}
