#![warn(missing_docs)]
//! opsbench Core - Tasks and Strategy Runners
//!
//! This crate holds everything that runs inside one process:
//! - `TaskRegistry` of titled work units, kept in registration order
//! - `WorkUnit`, one variant per execution kind
//! - Time-budgeted runners for each kind (`run_sync`, `run_sync_batched`,
//!   `run_async`, `run_callback`) and the `execute` dispatcher
//!
//! Async and Callback runners must be awaited from a current-thread tokio
//! runtime with the timer enabled.

mod error;
mod runner;
mod task;

pub use error::{TaskError, panic_message};
pub use runner::{
    ExecutionOutcome, execute, run_async, run_callback, run_sync, run_sync_batched,
};
pub use task::{
    AsyncFn, BatchedFn, CallbackFn, DEFAULT_BATCH_SIZE, Done, LocalBoxFuture, SyncFn, Task,
    TaskHeader, TaskKind, TaskRegistry, WorkResult, WorkUnit,
};
