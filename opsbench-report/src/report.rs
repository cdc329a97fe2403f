//! Report Data Structures

use chrono::{DateTime, Utc};
use opsbench_core::{ExecutionOutcome, TaskHeader, TaskKind};
use serde::{Deserialize, Serialize};

/// Complete benchmark report.
///
/// Built once per run and never mutated afterwards; a later run produces a
/// new `Report`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    /// Who produced the report, when and where
    pub meta: ReportMeta,
    /// Settings the run used
    pub config: RunConfig,
    /// One entry per registered task, in registration order
    pub results: Vec<TaskResult>,
}

impl Report {
    /// Count results by status
    pub fn summary(&self) -> ReportSummary {
        let completed = self.results.iter().filter(|r| r.is_success()).count();
        ReportSummary {
            total: self.results.len(),
            completed,
            failed: self.results.len() - completed,
        }
    }

    /// Completed tasks with their measurement
    pub fn completed(&self) -> impl Iterator<Item = (&TaskResult, &Measurement)> {
        self.results
            .iter()
            .filter_map(|r| r.measurement().map(|m| (r, m)))
    }

    /// Failed tasks with their error message
    pub fn failed(&self) -> impl Iterator<Item = (&TaskResult, &str)> {
        self.results.iter().filter_map(|r| r.error().map(|e| (r, e)))
    }
}

/// Report metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportMeta {
    /// opsbench version
    pub version: String,
    /// When the report was built
    pub timestamp: DateTime<Utc>,
    /// Process that produced the report (the parent, for a cluster run)
    pub pid: u32,
    /// Host the run was performed on
    pub system: SystemInfo,
}

/// System information
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemInfo {
    /// Operating system
    pub os: String,
    /// CPU architecture
    pub arch: String,
    /// CPU model name, "Unknown" if unavailable
    pub cpu: String,
    /// Logical cores
    pub cpu_cores: u32,
    /// Total memory in GiB, 0 if unavailable
    pub memory_gb: f64,
}

/// Configuration the run was performed with
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    /// Benchmark title
    pub title: String,
    /// Measurement budget per task
    pub duration_secs: f64,
    /// Requested concurrency for Async and Callback tasks
    pub concurrency: u32,
    /// Pause before each task
    pub delay_secs: f64,
    /// Present when the run was fanned out over worker processes
    pub cluster: Option<ClusterInfo>,
}

/// Cluster fan-out of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterInfo {
    /// Worker processes
    pub workers: u32,
    /// `ceil(concurrency / workers)`
    pub per_worker_concurrency: u32,
}

/// Outcome of one task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    /// Registration index
    pub index: usize,
    /// Task title
    pub title: String,
    /// Execution discipline
    pub kind: TaskKind,
    /// Measurement or failure
    #[serde(flatten)]
    pub status: TaskStatus,
}

impl TaskResult {
    /// Successful result from a runner outcome
    pub fn completed(index: usize, header: &TaskHeader, outcome: &ExecutionOutcome) -> Self {
        Self {
            index,
            title: header.title.clone(),
            kind: header.kind,
            status: TaskStatus::Completed(Measurement::from(outcome)),
        }
    }

    /// Failed result
    pub fn failed(index: usize, header: &TaskHeader, message: impl Into<String>) -> Self {
        Self {
            index,
            title: header.title.clone(),
            kind: header.kind,
            status: TaskStatus::Failed {
                message: message.into(),
            },
        }
    }

    /// Whether the task produced a measurement
    pub fn is_success(&self) -> bool {
        matches!(self.status, TaskStatus::Completed(_))
    }

    /// Measurement, if the task completed
    pub fn measurement(&self) -> Option<&Measurement> {
        match &self.status {
            TaskStatus::Completed(m) => Some(m),
            TaskStatus::Failed { .. } => None,
        }
    }

    /// Error message, if the task failed
    pub fn error(&self) -> Option<&str> {
        match &self.status {
            TaskStatus::Completed(_) => None,
            TaskStatus::Failed { message } => Some(message),
        }
    }
}

/// Task execution status
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum TaskStatus {
    /// The runner finished and produced a measurement
    Completed(Measurement),
    /// The task produced no measurement
    Failed {
        /// Error description, never empty
        message: String,
    },
}

/// Throughput measurement of one task
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    /// Wall time until every worker stopped; the slowest worker in a cluster run
    pub elapsed_secs: f64,
    /// Logical operations completed
    pub count: u64,
    /// Effective concurrency; summed across workers in a cluster run
    pub concurrency: u32,
    /// `count / elapsed_secs`, already aggregate for a cluster run
    pub ops_per_sec: f64,
}

impl Measurement {
    /// Build a measurement, deriving the throughput
    pub fn new(elapsed_secs: f64, count: u64, concurrency: u32) -> Self {
        let ops_per_sec = if elapsed_secs > 0.0 {
            count as f64 / elapsed_secs
        } else {
            0.0
        };
        Self {
            elapsed_secs,
            count,
            concurrency,
            ops_per_sec,
        }
    }

    /// Mean wall time per operation in nanoseconds
    pub fn nanos_per_op(&self) -> Option<f64> {
        if self.count == 0 {
            None
        } else {
            Some(self.elapsed_secs * 1e9 / self.count as f64)
        }
    }
}

impl From<&ExecutionOutcome> for Measurement {
    fn from(outcome: &ExecutionOutcome) -> Self {
        Self::new(
            outcome.elapsed_secs(),
            outcome.count,
            u32::try_from(outcome.concurrency).unwrap_or(u32::MAX),
        )
    }
}

/// Report summary
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportSummary {
    /// Registered tasks
    pub total: usize,
    /// Tasks with a measurement
    pub completed: usize,
    /// Tasks without one
    pub failed: usize,
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::time::Duration;

    pub(crate) fn sample_meta() -> ReportMeta {
        ReportMeta {
            version: "0.1.0".to_string(),
            timestamp: Utc::now(),
            pid: 100,
            system: SystemInfo {
                os: "linux".to_string(),
                arch: "x86_64".to_string(),
                cpu: "Test CPU".to_string(),
                cpu_cores: 8,
                memory_gb: 16.0,
            },
        }
    }

    pub(crate) fn sample_config() -> RunConfig {
        RunConfig {
            title: "codec".to_string(),
            duration_secs: 2.0,
            concurrency: 100,
            delay_secs: 1.0,
            cluster: None,
        }
    }

    pub(crate) fn sample_report() -> Report {
        let encode = TaskHeader {
            title: "encode".to_string(),
            kind: TaskKind::SyncBatched,
        };
        let fetch = TaskHeader {
            title: "fetch".to_string(),
            kind: TaskKind::Async,
        };
        let outcome = ExecutionOutcome {
            elapsed: Duration::from_secs(2),
            count: 20_000,
            concurrency: 1,
        };

        Report {
            meta: sample_meta(),
            config: sample_config(),
            results: vec![
                TaskResult::completed(0, &encode, &outcome),
                TaskResult::failed(1, &fetch, "socket closed"),
            ],
        }
    }

    #[test]
    fn test_summary_counts() {
        let summary = sample_report().summary();
        assert_eq!(
            summary,
            ReportSummary {
                total: 2,
                completed: 1,
                failed: 1
            }
        );
    }

    #[test]
    fn test_completed_and_failed_views() {
        let report = sample_report();

        let completed: Vec<_> = report.completed().collect();
        assert_eq!(completed.len(), 1);
        assert_eq!(completed[0].0.title, "encode");
        assert_eq!(completed[0].1.ops_per_sec, 10_000.0);

        let failed: Vec<_> = report.failed().collect();
        assert_eq!(failed, vec![(&report.results[1], "socket closed")]);
    }

    #[test]
    fn test_measurement_with_zero_elapsed() {
        let m = Measurement::new(0.0, 0, 1);
        assert_eq!(m.ops_per_sec, 0.0);
        assert_eq!(m.nanos_per_op(), None);

        let m = Measurement::new(0.5, 1_000, 4);
        assert_eq!(m.ops_per_sec, 2_000.0);
        assert_eq!(m.nanos_per_op(), Some(500_000.0));
    }
}
