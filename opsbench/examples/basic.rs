//! Single-process benchmark of the four task kinds.
//!
//! ```text
//! cargo run --release --example basic -- --duration 1s
//! ```

use opsbench::prelude::*;
use std::hint::black_box;

fn main() {
    Benchmark::new(BenchConfig::new("basic"))
        .add_async("async task", || tokio::time::sleep(std::time::Duration::ZERO))
        .add_callback("callback task", |done| {
            tokio::task::spawn_local(async move { done.done() });
        })
        .add_sync("sync task", || {
            black_box(1 + 1);
        })
        .add_sync_batched(
            "sync faster task",
            |n| {
                for i in 0..n {
                    black_box(i + 1);
                }
            },
            DEFAULT_BATCH_SIZE,
        )
        .run_and_exit();
}
