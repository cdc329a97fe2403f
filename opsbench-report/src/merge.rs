//! Cluster Merge
//!
//! Every worker runs the same task registry, so task `i` of each worker's
//! results is the same logical task. Results are joined by position:
//!
//! - any worker failure fails the task, naming the first failing worker
//! - otherwise counts and concurrency are summed and the elapsed time is
//!   the longest among the workers
//!
//! Throughput is recomputed from the merged count and elapsed time, so it is
//! already the aggregate rate of the whole cluster.

use crate::report::{Measurement, Report, ReportMeta, RunConfig, TaskResult, TaskStatus};
use opsbench_core::TaskHeader;

/// One task as reported by a worker
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerTask {
    /// Task title in the worker's registry
    pub title: String,
    /// Outcome on that worker
    pub status: TaskStatus,
}

/// What the parent collected from one worker
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerResult {
    /// The worker ran the registry and sent back its results
    Reported {
        /// Worker index within the cluster
        worker: usize,
        /// Worker process id
        pid: u32,
        /// Results in the worker's registration order
        tasks: Vec<WorkerTask>,
    },
    /// The worker crashed, timed out, broke protocol or reported an error
    Failed {
        /// Worker index within the cluster
        worker: usize,
        /// Why no results arrived
        message: String,
    },
}

impl WorkerResult {
    /// Worker index within the cluster
    pub fn worker(&self) -> usize {
        match self {
            WorkerResult::Reported { worker, .. } | WorkerResult::Failed { worker, .. } => *worker,
        }
    }

    /// Whether the worker delivered results
    pub fn is_reported(&self) -> bool {
        matches!(self, WorkerResult::Reported { .. })
    }
}

/// Merge worker results into one report for the parent's task registry.
///
/// The merged report always has exactly one result per entry in `headers`.
pub fn merge_worker_reports(
    meta: ReportMeta,
    config: RunConfig,
    headers: &[TaskHeader],
    workers: &[WorkerResult],
) -> Report {
    let results = headers
        .iter()
        .enumerate()
        .map(|(index, header)| match merge_task(index, header, workers) {
            Ok(measurement) => TaskResult {
                index,
                title: header.title.clone(),
                kind: header.kind,
                status: TaskStatus::Completed(measurement),
            },
            Err(message) => TaskResult::failed(index, header, message),
        })
        .collect();

    Report {
        meta,
        config,
        results,
    }
}

fn merge_task(
    index: usize,
    header: &TaskHeader,
    workers: &[WorkerResult],
) -> Result<Measurement, String> {
    if workers.is_empty() {
        return Err("no worker reported".to_string());
    }

    let mut elapsed_secs = 0.0f64;
    let mut count = 0u64;
    let mut concurrency = 0u32;

    for result in workers {
        let (worker, tasks) = match result {
            WorkerResult::Failed { worker, message } => {
                return Err(format!("worker {}: {}", worker, message));
            }
            WorkerResult::Reported { worker, tasks, .. } => (*worker, tasks),
        };

        let task = tasks.get(index).ok_or_else(|| {
            format!(
                "worker {}: no result for task #{} (reported {})",
                worker,
                index,
                tasks.len()
            )
        })?;

        if task.title != header.title {
            return Err(format!(
                "worker {}: registry mismatch at task #{}: expected '{}', got '{}'",
                worker, index, header.title, task.title
            ));
        }

        match &task.status {
            TaskStatus::Failed { message } => {
                return Err(format!("worker {}: {}", worker, message));
            }
            TaskStatus::Completed(m) => {
                elapsed_secs = elapsed_secs.max(m.elapsed_secs);
                count += m.count;
                concurrency = concurrency.saturating_add(m.concurrency);
            }
        }
    }

    Ok(Measurement::new(elapsed_secs, count, concurrency))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::tests::{sample_config, sample_meta};
    use opsbench_core::TaskKind;

    fn headers() -> Vec<TaskHeader> {
        vec![
            TaskHeader {
                title: "parse".to_string(),
                kind: TaskKind::Sync,
            },
            TaskHeader {
                title: "query".to_string(),
                kind: TaskKind::Async,
            },
        ]
    }

    fn completed(title: &str, elapsed_secs: f64, count: u64, concurrency: u32) -> WorkerTask {
        WorkerTask {
            title: title.to_string(),
            status: TaskStatus::Completed(Measurement::new(elapsed_secs, count, concurrency)),
        }
    }

    fn reported(worker: usize, tasks: Vec<WorkerTask>) -> WorkerResult {
        WorkerResult::Reported {
            worker,
            pid: 1000 + worker as u32,
            tasks,
        }
    }

    fn merge(workers: &[WorkerResult]) -> Report {
        merge_worker_reports(sample_meta(), sample_config(), &headers(), workers)
    }

    #[test]
    fn test_n_workers_sum_counts_and_keep_elapsed() {
        let workers: Vec<_> = (0..4)
            .map(|w| {
                reported(
                    w,
                    vec![completed("parse", 2.0, 500, 1), completed("query", 2.0, 300, 25)],
                )
            })
            .collect();

        let report = merge(&workers);

        let parse = report.results[0].measurement().unwrap();
        assert_eq!(parse.count, 2_000);
        assert_eq!(parse.elapsed_secs, 2.0);
        assert_eq!(parse.concurrency, 4);
        assert_eq!(parse.ops_per_sec, 1_000.0);

        let query = report.results[1].measurement().unwrap();
        assert_eq!(query.count, 1_200);
        assert_eq!(query.concurrency, 100);
    }

    #[test]
    fn test_elapsed_is_longest_worker() {
        let workers = vec![
            reported(0, vec![completed("parse", 2.0, 10, 1), completed("query", 2.1, 10, 1)]),
            reported(1, vec![completed("parse", 2.4, 10, 1), completed("query", 2.0, 10, 1)]),
        ];

        let report = merge(&workers);

        assert_eq!(report.results[0].measurement().unwrap().elapsed_secs, 2.4);
        assert_eq!(report.results[1].measurement().unwrap().elapsed_secs, 2.1);
    }

    #[test]
    fn test_failed_worker_fails_every_task() {
        let workers = vec![
            reported(0, vec![completed("parse", 2.0, 10, 1), completed("query", 2.0, 10, 1)]),
            WorkerResult::Failed {
                worker: 1,
                message: "exited with signal 9".to_string(),
            },
        ];

        let report = merge(&workers);

        assert_eq!(report.results.len(), 2);
        for result in &report.results {
            assert_eq!(result.error(), Some("worker 1: exited with signal 9"));
        }
    }

    #[test]
    fn test_task_failure_is_isolated() {
        let workers = vec![
            reported(
                0,
                vec![
                    completed("parse", 2.0, 10, 1),
                    WorkerTask {
                        title: "query".to_string(),
                        status: TaskStatus::Failed {
                            message: "connection refused".to_string(),
                        },
                    },
                ],
            ),
            reported(1, vec![completed("parse", 2.0, 10, 1), completed("query", 2.0, 10, 1)]),
        ];

        let report = merge(&workers);

        assert_eq!(report.results[0].measurement().unwrap().count, 20);
        assert_eq!(report.results[1].error(), Some("worker 0: connection refused"));
    }

    #[test]
    fn test_short_worker_report_fails_missing_task() {
        let workers = vec![
            reported(0, vec![completed("parse", 2.0, 10, 1), completed("query", 2.0, 10, 1)]),
            reported(1, vec![completed("parse", 2.0, 10, 1)]),
        ];

        let report = merge(&workers);

        assert!(report.results[0].is_success());
        assert_eq!(
            report.results[1].error(),
            Some("worker 1: no result for task #1 (reported 1)")
        );
    }

    #[test]
    fn test_title_mismatch_fails_task() {
        let workers = vec![reported(
            0,
            vec![completed("parse", 2.0, 10, 1), completed("insert", 2.0, 10, 1)],
        )];

        let report = merge(&workers);

        assert!(report.results[0].is_success());
        assert!(
            report.results[1]
                .error()
                .unwrap()
                .contains("registry mismatch")
        );
    }

    #[test]
    fn test_no_workers_fails_every_task() {
        let report = merge(&[]);
        assert_eq!(report.summary().failed, 2);
    }

    #[test]
    fn test_results_keep_parent_order_and_kind() {
        let workers = vec![reported(
            0,
            vec![completed("parse", 1.0, 1, 1), completed("query", 1.0, 1, 1)],
        )];

        let report = merge(&workers);

        let order: Vec<_> = report
            .results
            .iter()
            .map(|r| (r.index, r.title.as_str(), r.kind))
            .collect();
        assert_eq!(
            order,
            [(0, "parse", TaskKind::Sync), (1, "query", TaskKind::Async)]
        );
    }
}
