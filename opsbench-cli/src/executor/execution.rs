//! Task Execution
//!
//! Runs every task of a registry, one after the other, in registration order.
//! Each task is preceded by the configured delay so CPU frequency and thermal
//! state settle between measurements. A task failure is recorded and the run
//! moves on to the next task.

use crate::config::BenchConfig;
use opsbench_core::{TaskHeader, TaskRegistry, execute};
use opsbench_report::TaskResult;
use std::time::Duration;
use tracing::{info, warn};

/// Sequential executor for one process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Executor {
    duration: Duration,
    concurrency: usize,
    delay: Duration,
}

impl Executor {
    /// Executor with an explicit budget, concurrency and cool-down
    pub fn new(duration: Duration, concurrency: usize, delay: Duration) -> Self {
        Self {
            duration,
            concurrency,
            delay,
        }
    }

    /// Executor for the measurement settings of `config`
    pub fn from_config(config: &BenchConfig) -> Self {
        Self::new(config.duration, config.concurrency as usize, config.delay)
    }

    /// Run every task and return one result per task, in registration order.
    ///
    /// Only building the runtime can fail; task failures are part of the results.
    pub fn execute(&self, registry: &mut TaskRegistry) -> std::io::Result<Vec<TaskResult>> {
        // Work units may use tokio timers and sockets
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;

        Ok(runtime.block_on(self.run_tasks(registry)))
    }

    async fn run_tasks(&self, registry: &mut TaskRegistry) -> Vec<TaskResult> {
        let headers = registry.headers();
        let mut results = Vec::with_capacity(headers.len());

        for (index, header) in headers.iter().enumerate() {
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            results.push(self.run_task(registry, index, header).await);
        }

        results
    }

    async fn run_task(
        &self,
        registry: &mut TaskRegistry,
        index: usize,
        header: &TaskHeader,
    ) -> TaskResult {
        info!("start task #{}: {} ({})", index, header.title, header.kind);

        let task = match registry.get_mut(index) {
            Ok(task) => task,
            Err(e) => return TaskResult::failed(index, header, e.to_string()),
        };

        match execute(task.work_mut(), self.duration, self.concurrency).await {
            Ok(outcome) => {
                info!(
                    "finish task #{}: {} ops in {:.3}s, {:.2} ops/sec (concurrency {})",
                    index,
                    outcome.count,
                    outcome.elapsed_secs(),
                    outcome.ops_per_sec(),
                    outcome.concurrency
                );
                TaskResult::completed(index, header, &outcome)
            }
            Err(e) => {
                warn!("task #{} '{}' failed: {}", index, header.title, e);
                TaskResult::failed(index, header, e.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opsbench_core::{Task, TaskKind, WorkUnit};
    use std::time::Instant;

    fn executor() -> Executor {
        Executor::new(Duration::from_millis(20), 4, Duration::ZERO)
    }

    #[test]
    fn test_results_follow_registration_order() {
        let mut registry = TaskRegistry::new();
        registry.push(Task::new(
            "slow",
            WorkUnit::sync(|| std::thread::sleep(Duration::from_millis(5))),
        ));
        registry.push(Task::new("fast", WorkUnit::sync(|| {})));
        registry.push(Task::new(
            "pool",
            WorkUnit::future(|| tokio::time::sleep(Duration::from_millis(2))),
        ));

        let results = executor().execute(&mut registry).unwrap();

        let order: Vec<_> = results.iter().map(|r| (r.index, r.title.as_str())).collect();
        assert_eq!(order, [(0, "slow"), (1, "fast"), (2, "pool")]);
        assert!(results.iter().all(|r| r.is_success()));
        assert_eq!(results[2].kind, TaskKind::Async);
        assert_eq!(results[2].measurement().unwrap().concurrency, 4);
    }

    #[test]
    fn test_failure_does_not_stop_the_run() {
        let mut registry = TaskRegistry::new();
        registry.push(Task::new(
            "broken",
            WorkUnit::sync(|| -> Result<(), String> { Err("bad input".to_string()) }),
        ));
        registry.push(Task::new("healthy", WorkUnit::sync(|| {})));

        let results = executor().execute(&mut registry).unwrap();

        assert_eq!(results[0].error(), Some("bad input"));
        assert!(results[1].is_success());
    }

    #[test]
    fn test_sync_tasks_ignore_concurrency() {
        let mut registry = TaskRegistry::new();
        registry.push(Task::new("single", WorkUnit::sync(|| {})));
        registry.push(Task::new("batched", WorkUnit::batched(64, |_| {})));

        let results = Executor::new(Duration::from_millis(10), 32, Duration::ZERO)
            .execute(&mut registry)
            .unwrap();

        for result in &results {
            assert_eq!(result.measurement().unwrap().concurrency, 1);
        }
        assert_eq!(results[1].measurement().unwrap().count % 64, 0);
    }

    #[test]
    fn test_delay_precedes_every_task() {
        let mut registry = TaskRegistry::new();
        registry.push(Task::new("a", WorkUnit::sync(|| {})));
        registry.push(Task::new("b", WorkUnit::sync(|| {})));

        let start = Instant::now();
        Executor::new(Duration::from_millis(5), 1, Duration::from_millis(30))
            .execute(&mut registry)
            .unwrap();

        assert!(start.elapsed() >= Duration::from_millis(70));
    }

    #[test]
    fn test_empty_registry_yields_no_results() {
        let mut registry = TaskRegistry::new();
        assert!(executor().execute(&mut registry).unwrap().is_empty());
    }
}
