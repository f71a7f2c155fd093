//! Integration scenarios exercising the dependency-inference and lifecycle
//! guarantees end to end, through the public [`taskgraph::Runtime`] API
//! only.

use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use taskgraph::{Direction, Param, Runtime, RuntimeConfig, RuntimeError, TaskState, WorkerKind};

struct RecordingCtx {
    tiles: Vec<AtomicI64>,
    order: Mutex<Vec<String>>,
}

fn make_runtime(
    ctx: Arc<RecordingCtx>,
    window_size: u32,
) -> Runtime {
    let kernel_ctx: Arc<dyn std::any::Any + Send + Sync> = ctx.clone();
    let kernel = Arc::new(move |func: &str, params: &[Param], ctx: &Arc<dyn std::any::Any + Send + Sync>| {
        let ctx = ctx.downcast_ref::<RecordingCtx>().unwrap();
        ctx.order.lock().unwrap().push(func.to_string());
        match func {
            "write" => {
                ctx.tiles[params[0].tile_index as usize].store(1, Ordering::SeqCst);
            }
            "read_then_write" => {
                let seen = ctx.tiles[params[0].tile_index as usize].load(Ordering::SeqCst);
                assert_eq!(seen, 1, "reader observed unwritten tile");
                ctx.tiles[params[0].tile_index as usize].fetch_add(1, Ordering::SeqCst);
            }
            "err" => return Err("intentional failure".to_string()),
            "noop" => {}
            _ => panic!("unknown kernel {func}"),
        }
        Ok(())
    });
    let config = RuntimeConfig {
        window_size,
        dep_pool_capacity: 4096,
        worker_counts: [2, 2],
        enable_trace: false,
    };
    Runtime::create(config, kernel, kernel_ctx, None).expect("runtime init")
}

fn param(tile: u32, dir: Direction) -> Param {
    Param {
        buffer_base: 0,
        tile_index: tile,
        tile_size: 64,
        direction: dir,
    }
}

/// S1: tasks over disjoint tiles carry no induced dependency and all reach
/// CONSUMED once the window drains.
#[test]
fn disjoint_tiles_have_no_dependency() {
    let ctx = Arc::new(RecordingCtx {
        tiles: (0..4).map(|_| AtomicI64::new(0)).collect(),
        order: Mutex::new(Vec::new()),
    });
    let runtime = make_runtime(ctx, 32);

    let mut ids = Vec::new();
    for tile in 0..4 {
        ids.push(
            runtime
                .submit(WorkerKind::Cube, "write", vec![param(tile, Direction::Out)])
                .unwrap(),
        );
    }
    runtime.orchestration_done().unwrap();
    runtime.wait_idle();

    for id in ids {
        assert_eq!(runtime.state(id), TaskState::Consumed);
    }
    runtime.shutdown();
}

/// S2: a RAW edge forces the reader to observe the writer's output.
#[test]
fn raw_dependency_orders_writer_before_reader() {
    let ctx = Arc::new(RecordingCtx {
        tiles: (0..1).map(|_| AtomicI64::new(0)).collect(),
        order: Mutex::new(Vec::new()),
    });
    let runtime = make_runtime(ctx, 32);

    let writer = runtime
        .submit(WorkerKind::Cube, "write", vec![param(0, Direction::Out)])
        .unwrap();
    let reader = runtime
        .submit(
            WorkerKind::Vector,
            "read_then_write",
            vec![param(0, Direction::InOut)],
        )
        .unwrap();

    runtime.orchestration_done().unwrap();
    runtime.wait_idle();

    assert_eq!(runtime.state(writer), TaskState::Consumed);
    assert_eq!(runtime.state(reader), TaskState::Consumed);
    runtime.shutdown();
}

/// S3: a scope holds its tasks at COMPLETED (not CONSUMED) until it closes,
/// even after the tasks themselves have finished running.
#[test]
fn scope_gates_retirement() {
    let ctx = Arc::new(RecordingCtx {
        tiles: (0..1).map(|_| AtomicI64::new(1)).collect(),
        order: Mutex::new(Vec::new()),
    });
    let runtime = make_runtime(ctx, 32);

    runtime.scope_begin().unwrap();
    let id = runtime
        .submit(WorkerKind::Cube, "noop", vec![param(0, Direction::In)])
        .unwrap();

    // Give the worker pool a chance to actually run and complete the task
    // while the scope is still open.
    let mut waited = Duration::ZERO;
    while runtime.state(id) != TaskState::Completed && waited < Duration::from_secs(2) {
        std::thread::sleep(Duration::from_millis(5));
        waited += Duration::from_millis(5);
    }
    assert_eq!(
        runtime.state(id),
        TaskState::Completed,
        "task should be COMPLETED but not yet CONSUMED while its scope is open"
    );

    runtime.scope_end().unwrap();
    runtime.orchestration_done().unwrap();
    runtime.wait_idle();
    assert_eq!(runtime.state(id), TaskState::Consumed);
    runtime.shutdown();
}

/// S4: the task window recycles slots once tasks retire, so submitting far
/// more tasks than the window size does not deadlock.
#[test]
fn window_recycles_under_sustained_submission() {
    let ctx = Arc::new(RecordingCtx {
        tiles: (0..8).map(|_| AtomicI64::new(0)).collect(),
        order: Mutex::new(Vec::new()),
    });
    let runtime = make_runtime(ctx, 16);

    let total = 500u32;
    for i in 0..total {
        let tile = i % 8;
        runtime
            .submit(WorkerKind::Cube, "write", vec![param(tile, Direction::Out)])
            .unwrap();
    }
    runtime.orchestration_done().unwrap();
    runtime.wait_idle();
    runtime.shutdown();
}

/// S5: a kernel error on one task does not stall its independent siblings
/// or the window's retirement, and propagates as a poisoned completion
/// through its fanout instead of running the downstream kernel.
#[test]
fn kernel_error_does_not_stall_the_graph() {
    let ctx = Arc::new(RecordingCtx {
        tiles: (0..2).map(|_| AtomicI64::new(0)).collect(),
        order: Mutex::new(Vec::new()),
    });

    let statuses: Arc<Mutex<Vec<(u32, bool)>>> = Arc::new(Mutex::new(Vec::new()));
    let statuses_cb = statuses.clone();
    let on_complete: taskgraph::CompletionCallback = Arc::new(move |task_id, status| {
        statuses_cb.lock().unwrap().push((task_id, status.is_ok()));
    });

    let kernel_ctx: Arc<dyn std::any::Any + Send + Sync> = ctx.clone();
    let kernel = Arc::new(move |func: &str, params: &[Param], ctx: &Arc<dyn std::any::Any + Send + Sync>| {
        let ctx = ctx.downcast_ref::<RecordingCtx>().unwrap();
        ctx.order.lock().unwrap().push(func.to_string());
        match func {
            "err" => return Err("intentional failure".to_string()),
            "downstream" => {
                ctx.tiles[params[0].tile_index as usize].fetch_add(1, Ordering::SeqCst);
            }
            "noop" => {}
            _ => panic!("unknown kernel {func}"),
        }
        Ok(())
    });
    let config = RuntimeConfig {
        window_size: 32,
        dep_pool_capacity: 4096,
        worker_counts: [2, 2],
        enable_trace: false,
    };
    let runtime = Runtime::create(config, kernel, kernel_ctx, Some(on_complete)).unwrap();

    let failing = runtime
        .submit(WorkerKind::Cube, "err", vec![param(0, Direction::Out)])
        .unwrap();
    let poisoned_consumer = runtime
        .submit(
            WorkerKind::Vector,
            "downstream",
            vec![param(0, Direction::InOut)],
        )
        .unwrap();
    let independent = runtime
        .submit(WorkerKind::Vector, "noop", vec![param(1, Direction::In)])
        .unwrap();

    runtime.orchestration_done().unwrap();
    runtime.wait_idle();

    assert_eq!(runtime.state(failing), TaskState::Consumed);
    assert_eq!(runtime.state(poisoned_consumer), TaskState::Consumed);
    assert_eq!(runtime.state(independent), TaskState::Consumed);
    assert_eq!(
        ctx.tiles[0].load(Ordering::SeqCst),
        0,
        "poisoned consumer must not have run its kernel"
    );

    let recorded = statuses.lock().unwrap();
    let failing_status = recorded.iter().find(|(id, _)| *id == failing).unwrap();
    let consumer_status = recorded.iter().find(|(id, _)| *id == poisoned_consumer).unwrap();
    assert!(!failing_status.1, "failing task must report an error status");
    assert!(
        !consumer_status.1,
        "poisoned consumer must inherit an error status"
    );

    runtime.shutdown();
}

/// RuntimeError::KernelError is what a completion callback actually
/// receives; exercise its Display impl directly since it's otherwise only
/// constructed deep inside the worker loop.
#[test]
fn kernel_error_display_includes_task_and_message() {
    let err = RuntimeError::KernelError {
        task_id: 7,
        message: "boom".to_string(),
    };
    assert_eq!(err.to_string(), "kernel error on task 7: boom");
}

/// S6: WAR hazard — a writer submitted after a reader must not be observed
/// to stomp the tile before the reader's kernel has recorded its read.
#[test]
fn war_hazard_preserves_read_before_overwrite() {
    let seen_before_overwrite = Arc::new(AtomicUsize::new(0));
    struct WarCtx {
        tile: AtomicI64,
        seen_before_overwrite: Arc<AtomicUsize>,
    }
    let ctx = Arc::new(WarCtx {
        tile: AtomicI64::new(7),
        seen_before_overwrite: seen_before_overwrite.clone(),
    });
    let kernel_ctx: Arc<dyn std::any::Any + Send + Sync> = ctx.clone();
    let kernel = Arc::new(move |func: &str, _: &[Param], ctx: &Arc<dyn std::any::Any + Send + Sync>| {
        let ctx = ctx.downcast_ref::<WarCtx>().unwrap();
        match func {
            "read" => {
                if ctx.tile.load(Ordering::SeqCst) == 7 {
                    ctx.seen_before_overwrite.fetch_add(1, Ordering::SeqCst);
                }
                std::thread::sleep(Duration::from_millis(10));
            }
            "overwrite" => {
                ctx.tile.store(9, Ordering::SeqCst);
            }
            _ => panic!("unknown kernel"),
        }
        Ok(())
    });
    let config = RuntimeConfig {
        window_size: 32,
        dep_pool_capacity: 1024,
        worker_counts: [2, 2],
        enable_trace: false,
    };
    let runtime = Runtime::create(config, kernel, kernel_ctx, None).unwrap();

    runtime
        .submit(WorkerKind::Cube, "read", vec![param(0, Direction::In)])
        .unwrap();
    runtime
        .submit(WorkerKind::Vector, "overwrite", vec![param(0, Direction::Out)])
        .unwrap();

    runtime.orchestration_done().unwrap();
    runtime.wait_idle();

    assert_eq!(seen_before_overwrite.load(Ordering::SeqCst), 1);
    runtime.shutdown();
}
