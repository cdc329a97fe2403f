#![warn(missing_docs)]
//! opsbench Report - Report Model and Output
//!
//! - `Report`: configuration snapshot plus one result per task, in order
//! - `merge_worker_reports`: folds per-worker results of a cluster run into one report
//! - JSON rendering; the human table lives with the command-line front end

mod json;
mod merge;
mod report;

pub use json::generate_json_report;
pub use merge::{WorkerResult, WorkerTask, merge_worker_reports};
pub use report::{
    ClusterInfo, Measurement, Report, ReportMeta, ReportSummary, RunConfig, SystemInfo,
    TaskResult, TaskStatus,
};

/// Output format selection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable terminal output
    #[default]
    Human,
    /// Pretty-printed JSON of the full report
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "json" => Ok(OutputFormat::Json),
            "human" | "text" => Ok(OutputFormat::Human),
            other => Err(format!("Unknown output format: {}", other)),
        }
    }
}
