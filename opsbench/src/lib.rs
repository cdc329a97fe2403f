#![warn(missing_docs)]
//! # opsbench
//!
//! Measures operations per second of user-supplied work under four
//! execution disciplines:
//! - **Sync**: a blocking closure, counted once per call
//! - **SyncBatched**: a blocking closure told to perform a whole batch per call,
//!   for work too cheap to time one call at a time
//! - **Async**: a future-returning closure, driven by `concurrency` workers on
//!   one cooperative scheduler
//! - **Callback**: a closure that signals completion through a [`Done`], driven
//!   by `concurrency` call chains
//!
//! Tasks run one after another for a fixed duration each. With cluster mode
//! the binary re-executes itself once per worker, splits the concurrency
//! between them and merges their results into one report.
//!
//! ## Quick Start
//!
//! ```ignore
//! use opsbench::prelude::*;
//!
//! fn main() {
//!     Benchmark::new(BenchConfig::new("example"))
//!         .add_sync("sum", || {
//!             std::hint::black_box((0..64u64).sum::<u64>());
//!         })
//!         .add_sync_batched("increment", |n| {
//!             for i in 0..n {
//!                 std::hint::black_box(i + 1);
//!             }
//!         }, DEFAULT_BATCH_SIZE)
//!         .add_async("yield", || tokio::task::yield_now())
//!         .add_callback("callback", |done| done.done())
//!         .run_and_exit();
//! }
//! ```
//!
//! ## Cluster Mode
//!
//! ```ignore
//! let config = BenchConfig::new("cluster").with_concurrency(100).with_cluster(4);
//! Benchmark::new(config).add_async("io", || io_call()).run_and_exit();
//! ```
//!
//! Every worker rebuilds its registry by running the same `main`; keep task
//! registration deterministic.

pub use opsbench_core::{
    DEFAULT_BATCH_SIZE, Done, ExecutionOutcome, Task, TaskError, TaskHeader, TaskKind,
    TaskRegistry, WorkResult, WorkUnit, execute, run_async, run_callback, run_sync,
    run_sync_batched,
};

pub use opsbench_report::{
    ClusterInfo, Measurement, OutputFormat, Report, ReportMeta, ReportSummary, RunConfig,
    SystemInfo, TaskResult, TaskStatus, WorkerResult, WorkerTask, generate_json_report,
    merge_worker_reports,
};

pub use opsbench_cli::{
    BenchConfig, Benchmark, Cli, ClusterConfig, ConfigError, EngineError, Executor, FileConfig,
    ProcessSpawner, Role, Supervisor, SupervisorError, SupervisorLink, WorkerLink, WorkerMain,
    WorkerSpawner, format_human_output, init_tracing, run_with_cli,
};

/// Runtime the async and callback pools run on; work units may use its
/// timers and `spawn_local`
pub use tokio;

/// Wire protocol between a cluster parent and its workers
pub mod ipc {
    pub use opsbench_ipc::*;
}

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::{
        BenchConfig, Benchmark, DEFAULT_BATCH_SIZE, Done, Report, TaskKind, TaskStatus,
    };
}
