//! Single-Process Execution
//!
//! ```text
//! TaskRegistry (registration order)
//!       │
//!       ▼
//! ┌─────────────┐
//! │  execution  │  delay, run each task with its strategy runner
//! └──────┬──────┘
//!        │  Vec<TaskResult>
//!        ▼
//! ┌─────────────┐
//! │  metadata   │  version, timestamp, pid, platform
//! └──────┬──────┘
//!        │  Report
//!        ▼
//! ┌─────────────┐
//! │ formatting  │  Human-readable output
//! └─────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`execution`] - Sequential task execution on a current-thread runtime
//! - [`metadata`] - System metadata collection
//! - [`formatting`] - Human-readable output formatting

mod execution;
mod formatting;
mod metadata;

pub use execution::Executor;
pub use formatting::format_human_output;
pub use metadata::{build_report_meta, system_info};
