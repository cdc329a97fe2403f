//! Benchmark Engine
//!
//! [`Benchmark`] owns the configuration and the task registry and picks how
//! to run them from its [`Role`]:
//!
//! - `Standalone`: run every task in this process
//! - `Parent`: fan the registry out over worker processes and merge
//! - `Worker`: run the registry for a parent and report back
//!
//! The role is resolved when the run starts, so configuration layered on
//! after construction (file, command line) can still enable cluster mode.

use crate::config::{BenchConfig, ConfigError};
use crate::executor::{Executor, build_report_meta};
use crate::supervisor::{ProcessSpawner, Supervisor};
use crate::transport::{SupervisorError, SupervisorLink, WorkerSpawner};
use crate::worker::{PipeSupervisorLink, WorkerMain};
use opsbench_core::{Done, Task, TaskHeader, TaskRegistry, WorkResult, WorkUnit};
use opsbench_ipc::IPC_FD_ENV;
use opsbench_report::{Report, merge_worker_reports};
use std::future::Future;
use thiserror::Error;
use tracing::{error, info};

/// Errors that abort a whole run
#[derive(Debug, Error)]
pub enum EngineError {
    /// The configuration failed validation
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    /// The tokio runtime could not be built
    #[error("failed to build async runtime: {0}")]
    Runtime(#[source] std::io::Error),

    /// The first cluster worker could not be started
    #[error("failed to spawn cluster worker: {0}")]
    Spawn(#[source] SupervisorError),

    /// The parent could not supervise its workers
    #[error("cluster supervision failed: {0}")]
    Supervisor(#[source] SupervisorError),

    /// This worker lost its link to the parent
    #[error("link to cluster parent failed: {0}")]
    Worker(#[source] SupervisorError),

    /// The parent sent unusable run parameters
    #[error("invalid run parameters from cluster parent: {0}")]
    Parameters(String),
}

/// Part a process plays in a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Run every task in this process
    Standalone,
    /// Spawn workers, collect and merge their reports
    Parent,
    /// Run for a parent and report back
    Worker,
}

impl Role {
    /// Role of the current process: a worker if the parent's IPC descriptors
    /// are present, otherwise decided by the cluster setting.
    pub fn detect(config: &BenchConfig) -> Self {
        if std::env::var_os(IPC_FD_ENV).is_some() {
            Role::Worker
        } else if config.cluster.enabled {
            Role::Parent
        } else {
            Role::Standalone
        }
    }
}

/// Throughput benchmark: a configuration plus an ordered list of tasks
pub struct Benchmark {
    config: BenchConfig,
    role: Option<Role>,
    registry: TaskRegistry,
    last_report: Option<Report>,
}

impl Benchmark {
    /// Create an engine whose role is detected when it runs
    pub fn new(config: BenchConfig) -> Self {
        Self {
            config,
            role: None,
            registry: TaskRegistry::new(),
            last_report: None,
        }
    }

    /// Create an engine with a fixed role
    pub fn with_role(config: BenchConfig, role: Role) -> Self {
        Self {
            role: Some(role),
            ..Self::new(config)
        }
    }

    /// Configuration the next run will use
    pub fn config(&self) -> &BenchConfig {
        &self.config
    }

    /// Adjust the configuration before running
    pub fn config_mut(&mut self) -> &mut BenchConfig {
        &mut self.config
    }

    /// Role the next run will take
    pub fn role(&self) -> Role {
        self.role.unwrap_or_else(|| Role::detect(&self.config))
    }

    /// Add a blocking task counted once per call
    pub fn add_sync<F, R>(self, title: impl Into<String>, f: F) -> Self
    where
        F: FnMut() -> R + 'static,
        R: WorkResult,
    {
        self.add_task(Task::new(title, WorkUnit::sync(f)))
    }

    /// Add a blocking task that performs `batch_size` operations per call.
    ///
    /// [`opsbench_core::DEFAULT_BATCH_SIZE`] suits most sub-microsecond work.
    pub fn add_sync_batched<F, R>(self, title: impl Into<String>, f: F, batch_size: u64) -> Self
    where
        F: FnMut(u64) -> R + 'static,
        R: WorkResult,
    {
        self.add_task(Task::new(title, WorkUnit::batched(batch_size, f)))
    }

    /// Add an async task run by `concurrency` concurrent workers
    pub fn add_async<F, Fut, R>(self, title: impl Into<String>, f: F) -> Self
    where
        F: Fn() -> Fut + 'static,
        Fut: Future<Output = R> + 'static,
        R: WorkResult,
    {
        self.add_task(Task::new(title, WorkUnit::future(f)))
    }

    /// Add a callback task run by `concurrency` concurrent call chains
    pub fn add_callback<F>(self, title: impl Into<String>, f: F) -> Self
    where
        F: Fn(Done) + 'static,
    {
        self.add_task(Task::new(title, WorkUnit::callback(f)))
    }

    /// Add a prepared task
    pub fn add_task(mut self, task: Task) -> Self {
        self.registry.push(task);
        self
    }

    /// Registered tasks in execution order
    pub fn tasks(&self) -> Vec<TaskHeader> {
        self.registry.headers()
    }

    /// Most recent report, replaced by every run
    pub fn last_report(&self) -> Option<&Report> {
        self.last_report.as_ref()
    }

    /// Run every task according to the role.
    ///
    /// In a worker process this reports to the parent and exits the process.
    pub fn run(&mut self) -> Result<Report, EngineError> {
        match self.role() {
            Role::Standalone => self.run_standalone(),
            Role::Parent => {
                let spawner = ProcessSpawner::current().map_err(EngineError::Spawn)?;
                self.run_parent(&spawner)
            }
            Role::Worker => {
                let link = PipeSupervisorLink::from_env().map_err(EngineError::Worker)?;
                let code = match self.run_worker(link) {
                    Ok(_) => 0,
                    Err(e) => {
                        error!("worker {} failed: {}", std::process::id(), e);
                        1
                    }
                };
                std::process::exit(code)
            }
        }
    }

    /// Run every task in this process
    pub fn run_standalone(&mut self) -> Result<Report, EngineError> {
        self.config.validate()?;
        info!(
            "running {} tasks, {:?} each, concurrency {}",
            self.registry.len(),
            self.config.duration,
            self.config.concurrency
        );

        let results = Executor::from_config(&self.config)
            .execute(&mut self.registry)
            .map_err(EngineError::Runtime)?;

        Ok(self.store(Report {
            meta: build_report_meta(),
            config: self.config.run_config(),
            results,
        }))
    }

    /// Run the registry on workers from `spawner` and merge their results
    pub fn run_parent<S: WorkerSpawner>(&mut self, spawner: &S) -> Result<Report, EngineError> {
        self.config.validate()?;
        let mut config = self.config.clone();
        config.cluster.enabled = true;

        let supervisor = Supervisor::new(&config);
        info!(
            "running {} tasks on {} workers, concurrency {} each",
            self.registry.len(),
            config.cluster.workers,
            supervisor.parameters().concurrency
        );

        let workers = supervisor.run(spawner).map_err(|e| match e {
            SupervisorError::SpawnFailed(_) => EngineError::Spawn(e),
            other => EngineError::Supervisor(other),
        })?;

        Ok(self.store(merge_worker_reports(
            build_report_meta(),
            config.run_config(),
            &self.registry.headers(),
            &workers,
        )))
    }

    /// Serve one cluster run for the parent at the other end of `link`
    pub fn run_worker<L: SupervisorLink>(&mut self, link: L) -> Result<Option<Report>, EngineError> {
        let report = WorkerMain::new(link).run(&mut self.registry, &self.config)?;
        if let Some(report) = &report {
            self.last_report = Some(report.clone());
        }
        Ok(report)
    }

    /// Layer `opsbench.toml` and command-line flags over the configuration,
    /// run, print the report, and exit.
    ///
    /// Exits with 0 once the run completed, even if some tasks failed, and
    /// with 1 if the run itself could not be performed.
    pub fn run_and_exit(self) -> ! {
        use clap::Parser;

        let code = match crate::run_with_cli(self, crate::Cli::parse()) {
            Ok(()) => 0,
            Err(e) => {
                eprintln!("Error: {:#}", e);
                1
            }
        };
        std::process::exit(code)
    }

    fn store(&mut self, report: Report) -> Report {
        self.last_report = Some(report.clone());
        report
    }
}

impl std::fmt::Debug for Benchmark {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Benchmark")
            .field("config", &self.config)
            .field("role", &self.role)
            .field("tasks", &self.registry.len())
            .finish()
    }
}
