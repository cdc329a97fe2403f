#![warn(missing_docs)]
//! opsbench IPC Protocol
//!
//! Wire protocol between a cluster parent and its worker processes.
//! A worker announces `Ready`, receives `Start` with its share of the
//! concurrency, and answers with exactly one `Result` or `Error`.
//! Messages are rkyv archives inside length-prefixed frames.

mod framing;
mod messages;

pub use framing::{FrameError, FrameReader, FrameWriter, MAX_FRAME_SIZE, read_frame, write_frame};
pub use messages::{
    RecordedOutcome, RunParameters, SupervisorCommand, TaskRecord, WorkerMessage, WorkerReport,
};

/// Protocol version for compatibility checking
pub const PROTOCOL_VERSION: u32 = 1;

/// Environment variable carrying the worker's `<read_fd>,<write_fd>` pair.
///
/// Its presence is what marks a process as a cluster worker.
pub const IPC_FD_ENV: &str = "OPSBENCH_IPC_FD";

/// Hidden command-line flag the parent appends when spawning a worker
pub const WORKER_FLAG: &str = "--opsbench-worker";
