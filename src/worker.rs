//! C5: worker threads and the completion-drain thread.
//!
//! Each [`WorkerKind`] gets its own pool of OS threads pulling from that
//! kind's ready queue; a single dedicated thread drains the completion
//! queue, which is what gives the refcount release protocol in
//! [`crate::scheduler`] its single-writer guarantee. All three kinds of
//! thread park on a [`crate::sync::Latch`] waiter when they find nothing to
//! do, rather than spinning.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::error::RuntimeError;
use crate::scheduler::Scheduler;
use crate::store::Store;
use crate::trace::TraceRecorder;
use crate::types::{CompletionCallback, Kernel, UserContext, WorkerKind};

const PARK_POLL: Duration = Duration::from_millis(25);

pub struct WorkerPool {
    shutdown: Arc<AtomicBool>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `counts[kind.index()]` worker threads per kind plus one
    /// completion-drain thread.
    pub fn spawn(
        store: Arc<Store>,
        scheduler: Arc<Scheduler>,
        kernel: Kernel,
        user_ctx: UserContext,
        trace: Arc<TraceRecorder>,
        on_complete: Option<CompletionCallback>,
        counts: [usize; WorkerKind::COUNT],
    ) -> Self {
        let shutdown = Arc::new(AtomicBool::new(false));
        let mut handles = Vec::new();

        for kind in WorkerKind::ALL {
            for worker_idx in 0..counts[kind.index()] {
                let store = Arc::clone(&store);
                let scheduler = Arc::clone(&scheduler);
                let kernel = Arc::clone(&kernel);
                let user_ctx = Arc::clone(&user_ctx);
                let trace = Arc::clone(&trace);
                let on_complete = on_complete.clone();
                let shutdown = Arc::clone(&shutdown);
                let name = format!("{kind:?}-worker-{worker_idx}");
                let handle = std::thread::Builder::new()
                    .name(name)
                    .spawn(move || {
                        worker_loop(
                            store, scheduler, kernel, user_ctx, trace, on_complete, kind, shutdown,
                        )
                    })
                    .expect("failed to spawn worker thread");
                handles.push(handle);
            }
        }

        {
            let store = Arc::clone(&store);
            let scheduler = Arc::clone(&scheduler);
            let shutdown = Arc::clone(&shutdown);
            let handle = std::thread::Builder::new()
                .name("completion-drain".to_string())
                .spawn(move || drain_loop(store, scheduler, shutdown))
                .expect("failed to spawn completion-drain thread");
            handles.push(handle);
        }

        Self { shutdown, handles }
    }

    /// Signal every thread to stop once its queue is empty, then join them
    /// all. Blocks until every thread has exited.
    pub fn shutdown(mut self) {
        self.shutdown.store(true, Ordering::Release);
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}

fn worker_loop(
    store: Arc<Store>,
    scheduler: Arc<Scheduler>,
    kernel: Kernel,
    user_ctx: UserContext,
    trace: Arc<TraceRecorder>,
    on_complete: Option<CompletionCallback>,
    kind: WorkerKind,
    shutdown: Arc<AtomicBool>,
) {
    loop {
        if let Some(task_id) = scheduler.pop_ready(kind) {
            let slot = store.slot_index(task_id);
            scheduler.mark_running(slot);
            let start = std::time::Instant::now();

            // A poisoned release from an upstream producer (see
            // `scheduler::drain_one`) is recorded on this slot before it
            // can ever be dispatched; honor it instead of running the
            // kernel, so a poisoned branch of the graph drains without
            // ever executing downstream work on bad input.
            let inherited = store.poison(slot);
            let (result, func_name) = if let Some(message) = inherited {
                let func_name = store.with_body(slot, |body| body.func_name.clone());
                (Err(message), func_name)
            } else {
                store.with_body(slot, |body| {
                    (
                        (kernel)(&body.func_name, &body.params, &user_ctx),
                        body.func_name.clone(),
                    )
                })
            };

            if trace.is_enabled() {
                trace.record(task_id, &func_name, kind, start, std::time::Instant::now());
            }

            let status = match &result {
                Ok(()) => Ok(()),
                Err(message) => {
                    store.mark_poisoned(slot, message.clone());
                    log::warn!(target: "taskgraph::worker", "task {task_id} kernel error: {message}");
                    Err(RuntimeError::KernelError {
                        task_id,
                        message: message.clone(),
                    })
                }
            };
            if let Some(callback) = &on_complete {
                callback(task_id, status);
            }

            scheduler.push_completion(task_id);
            continue;
        }

        if shutdown.load(Ordering::Acquire) {
            return;
        }
        let mut waiter = scheduler.ready_waiter();
        waiter.wait_timeout(PARK_POLL);
    }
}

fn drain_loop(store: Arc<Store>, scheduler: Arc<Scheduler>, shutdown: Arc<AtomicBool>) {
    loop {
        if scheduler.drain_one().is_some() {
            continue;
        }
        if shutdown.load(Ordering::Acquire) && store.last_task_alive() == store.current_task_index()
        {
            return;
        }
        let mut waiter = scheduler.drain_waiter();
        waiter.wait_timeout(PARK_POLL);
    }
}
