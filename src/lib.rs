//! A dependency-inferring task-graph scheduler for heterogeneous worker
//! pools: submit tasks with tagged buffer-tile parameters, and the runtime
//! infers RAW/WAW/WAR edges from tile overlap, schedules each task on a
//! worker of the kind it declared, and retires completed work once both its
//! consumers and its enclosing scope have released it.
//!
//! See [`Runtime`] for the public entry point.

pub mod config;
pub mod deppool;
pub mod error;
pub mod orchestrator;
pub mod scheduler;
pub mod store;
pub mod sync;
pub mod trace;
pub mod types;
pub mod worker;

use std::sync::{Arc, Mutex};

pub use config::RuntimeConfig;
pub use error::RuntimeError;
pub use types::{
    CompletionCallback, Direction, Kernel, Param, TaskId, TaskState, UserContext, WorkerKind,
};

use deppool::DepPool;
use orchestrator::Orchestrator;
use scheduler::Scheduler;
use store::Store;
use trace::TraceRecorder;
use worker::WorkerPool;

/// The public entry point: owns the task store, scheduler bookkeeping,
/// worker pool, and the single-writer orchestrator.
///
/// `submit`/`scope_begin`/`scope_end`/`orchestration_done` are expected to
/// be called from one thread (the orchestrator thread, by convention the
/// thread that owns the `Runtime`); everything else is safe to call from
/// anywhere.
pub struct Runtime {
    store: Arc<Store>,
    scheduler: Arc<Scheduler>,
    deppool: Arc<DepPool>,
    trace: Arc<TraceRecorder>,
    orchestrator: Mutex<Orchestrator>,
    workers: Option<WorkerPool>,
}

impl Runtime {
    /// Build a runtime. `on_complete`, if given, is invoked once per task
    /// with its final status (spec.md §6/§7's completion callback); pass
    /// `None` if the host does not need per-task completion notification.
    pub fn create(
        config: RuntimeConfig,
        kernel: Kernel,
        user_ctx: UserContext,
        on_complete: Option<CompletionCallback>,
    ) -> Result<Self, RuntimeError> {
        config.validate()?;
        let store = Arc::new(Store::new(config.window_size)?);
        let deppool = Arc::new(DepPool::new(config.dep_pool_capacity));
        let scheduler = Arc::new(Scheduler::new(Arc::clone(&store), Arc::clone(&deppool)));
        let trace = Arc::new(TraceRecorder::new(config.enable_trace));
        let orchestrator = Orchestrator::new(
            Arc::clone(&store),
            Arc::clone(&scheduler),
            Arc::clone(&deppool),
        );
        let workers = WorkerPool::spawn(
            Arc::clone(&store),
            Arc::clone(&scheduler),
            kernel,
            user_ctx,
            Arc::clone(&trace),
            on_complete,
            config.worker_counts,
        );
        log::debug!(
            target: "taskgraph",
            "runtime created: window_size={} dep_pool_capacity={} worker_counts={:?}",
            config.window_size,
            config.dep_pool_capacity,
            config.worker_counts,
        );
        Ok(Self {
            store,
            scheduler,
            deppool,
            trace,
            orchestrator: Mutex::new(orchestrator),
            workers: Some(workers),
        })
    }

    /// Enable Chrome Trace Event Format recording of task executions. Takes
    /// effect immediately for already-spawned worker threads, since they
    /// hold a clone of the same `Arc<TraceRecorder>` this flips the flag on.
    pub fn enable_trace(&self) {
        self.trace.set_enabled(true);
    }

    pub fn write_trace(&self, path: impl AsRef<std::path::Path>) -> anyhow::Result<()> {
        self.trace.write_to_file(path)
    }

    pub fn submit(
        &self,
        worker_kind: WorkerKind,
        func_name: impl Into<String>,
        params: Vec<Param>,
    ) -> Result<TaskId, RuntimeError> {
        self.orchestrator
            .lock()
            .unwrap()
            .submit(worker_kind, func_name.into(), params)
    }

    pub fn scope_begin(&self) -> Result<(), RuntimeError> {
        self.orchestrator.lock().unwrap().scope_begin()
    }

    pub fn scope_end(&self) -> Result<(), RuntimeError> {
        self.orchestrator.lock().unwrap().scope_end()
    }

    pub fn state(&self, task_id: TaskId) -> TaskState {
        self.scheduler.state(self.store.slot_index(task_id))
    }

    pub fn window_size(&self) -> u32 {
        self.store.window_size()
    }

    pub fn dep_pool_len(&self) -> u32 {
        self.deppool.len()
    }

    /// Stop accepting new submissions, wait for every in-flight task to
    /// reach CONSUMED, then join all worker and drain threads.
    pub fn orchestration_done(&self) -> Result<(), RuntimeError> {
        self.orchestrator.lock().unwrap().orchestration_done()
    }

    /// Wait for the task window to fully drain (every submitted task
    /// reaches CONSUMED). Call after [`Runtime::orchestration_done`].
    pub fn wait_idle(&self) {
        while self.store.last_task_alive() != self.store.current_task_index() {
            std::thread::yield_now();
        }
    }

    pub fn shutdown(mut self) {
        if !self.orchestrator.lock().unwrap().is_done() {
            let _ = self.orchestrator.lock().unwrap().orchestration_done();
        }
        self.wait_idle();
        if let Some(workers) = self.workers.take() {
            workers.shutdown();
        }
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        if let Some(workers) = self.workers.take() {
            if !self.orchestrator.lock().unwrap().is_done() {
                let _ = self.orchestrator.lock().unwrap().orchestration_done();
            }
            self.wait_idle();
            workers.shutdown();
        }
    }
}
