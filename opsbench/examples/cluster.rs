//! The basic benchmark fanned out over two worker processes.
//!
//! ```text
//! cargo run --release --example cluster -- --format json
//! ```

use opsbench::prelude::*;
use std::hint::black_box;

fn main() {
    let config = BenchConfig::new("cluster").with_cluster(2);

    Benchmark::new(config)
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
