//! A small GEMM-shaped demo: a tiled multiply-accumulate over a handful of
//! output tiles, each output tile written by several input-reading tasks in
//! sequence, exercising RAW/WAW dependency inference end to end.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use taskgraph::{Direction, Param, Runtime, RuntimeConfig, WorkerKind};

struct Tile {
    value: AtomicI64,
}

struct Ctx {
    tiles: Vec<Tile>,
}

fn main() {
    env_logger::init();

    const TILES: usize = 4;
    const STEPS: usize = 8;

    let ctx = Arc::new(Ctx {
        tiles: (0..TILES).map(|_| Tile { value: AtomicI64::new(0) }).collect(),
    });

    let kernel_ctx: Arc<dyn std::any::Any + Send + Sync> = ctx.clone();

    let kernel = Arc::new(move |func: &str, params: &[Param], ctx: &Arc<dyn std::any::Any + Send + Sync>| {
        let ctx = ctx.downcast_ref::<Ctx>().expect("context type mismatch");
        let tile_idx = params[0].tile_index as usize;
        match func {
            "init" => {
                ctx.tiles[tile_idx].value.store(0, Ordering::SeqCst);
            }
            "accumulate" => {
                ctx.tiles[tile_idx].value.fetch_add(1, Ordering::SeqCst);
            }
            other => return Err(format!("unknown kernel {other}")),
        }
        Ok(())
    });

    let config = RuntimeConfig {
        window_size: 64,
        dep_pool_capacity: 4096,
        worker_counts: [2, 2],
        enable_trace: false,
    };

    let runtime = Runtime::create(config, kernel, kernel_ctx, None).expect("runtime init");
    runtime.enable_trace();

    for tile_idx in 0..TILES {
        runtime
            .submit(
                WorkerKind::Cube,
                "init",
                vec![Param {
                    buffer_base: 0,
                    tile_index: tile_idx as u32,
                    tile_size: 128,
                    direction: Direction::Out,
                }],
            )
            .expect("submit init");
    }

    runtime.scope_begin().expect("scope_begin");
    for step in 0..STEPS {
        let kind = if step % 2 == 0 { WorkerKind::Cube } else { WorkerKind::Vector };
        for tile_idx in 0..TILES {
            runtime
                .submit(
                    kind,
                    "accumulate",
                    vec![Param {
                        buffer_base: 0,
                        tile_index: tile_idx as u32,
                        tile_size: 128,
                        direction: Direction::InOut,
                    }],
                )
                .expect("submit accumulate");
        }
    }
    runtime.scope_end().expect("scope_end");

    runtime.orchestration_done().expect("orchestration_done");
    runtime.wait_idle();

    for (idx, tile) in ctx.tiles.iter().enumerate() {
        println!("tile {idx}: {}", tile.value.load(Ordering::SeqCst));
    }

    runtime.write_trace("taskgraph_demo_trace.json").expect("write trace");
    runtime.shutdown();
}
