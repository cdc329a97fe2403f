//! Worker Process Entry Point
//!
//! Child side of a cluster run. The parent starts the same binary with
//! `OPSBENCH_IPC_FD=3,4`; the worker reads commands from fd 3 and writes
//! messages to fd 4.
//!
//! A worker announces `Ready`, waits for `Start`, runs its own copy of the
//! task registry with the concurrency, duration and delay it was given, and
//! answers with one `Result` or `Error`. A `Shutdown` before `Start` ends it
//! without running anything.

use crate::config::BenchConfig;
use crate::engine::EngineError;
use crate::executor::{Executor, build_report_meta};
use crate::transport::{SupervisorError, SupervisorLink};
use opsbench_core::TaskRegistry;
use opsbench_ipc::{
    FrameReader, FrameWriter, IPC_FD_ENV, RecordedOutcome, RunParameters, SupervisorCommand,
    TaskRecord, WorkerMessage, WorkerReport,
};
use opsbench_report::{Report, TaskResult, TaskStatus};
use std::os::unix::io::{FromRawFd, RawFd};
use std::time::Duration;
use tracing::{debug, info};

/// Pipe pair inherited from the parent
pub struct PipeSupervisorLink {
    reader: FrameReader<std::fs::File>,
    writer: FrameWriter<std::fs::File>,
}

impl PipeSupervisorLink {
    /// Open the descriptors named by `OPSBENCH_IPC_FD`
    pub fn from_env() -> Result<Self, SupervisorError> {
        let value = std::env::var(IPC_FD_ENV)
            .map_err(|_| SupervisorError::IpcError(format!("{} is not set", IPC_FD_ENV)))?;

        let (read_fd, write_fd) = parse_fd_pair(&value).ok_or_else(|| {
            SupervisorError::IpcError(format!(
                "invalid {}={:?} (expected format: <read_fd>,<write_fd>)",
                IPC_FD_ENV, value
            ))
        })?;

        // The parent dup'ed both ends to these numbers right before exec
        let read_file = unsafe { std::fs::File::from_raw_fd(read_fd) };
        let write_file = unsafe { std::fs::File::from_raw_fd(write_fd) };

        Ok(Self {
            reader: FrameReader::new(read_file),
            writer: FrameWriter::new(write_file),
        })
    }
}

impl SupervisorLink for PipeSupervisorLink {
    fn send(&mut self, message: &WorkerMessage) -> Result<(), SupervisorError> {
        self.writer.write(message)?;
        Ok(())
    }

    fn recv(&mut self) -> Result<SupervisorCommand, SupervisorError> {
        Ok(self.reader.read()?)
    }
}

/// `"3,4"` → `(3, 4)`; stdio descriptors are refused
fn parse_fd_pair(value: &str) -> Option<(RawFd, RawFd)> {
    let (read, write) = value.split_once(',')?;
    let read: RawFd = read.trim().parse().ok()?;
    let write: RawFd = write.trim().parse().ok()?;
    (read > 2 && write > 2 && read != write).then_some((read, write))
}

/// Worker main loop
pub struct WorkerMain<L> {
    link: L,
}

impl<L: SupervisorLink> WorkerMain<L> {
    /// Worker talking to its parent over `link`
    pub fn new(link: L) -> Self {
        Self { link }
    }

    /// Perform the worker side of one cluster run.
    ///
    /// Returns the report that was sent to the parent, or `None` if the parent
    /// asked for a shutdown before starting.
    pub fn run(
        &mut self,
        registry: &mut TaskRegistry,
        config: &BenchConfig,
    ) -> Result<Option<Report>, EngineError> {
        self.link
            .send(&WorkerMessage::ready())
            .map_err(EngineError::Worker)?;

        let parameters = match self.link.recv().map_err(EngineError::Worker)? {
            SupervisorCommand::Start(parameters) => parameters,
            SupervisorCommand::Shutdown => {
                info!("worker told to shut down before start");
                return Ok(None);
            }
        };
        debug!("worker received {:?}", parameters);

        if let Err(message) = parameters.validate() {
            self.report_error(&message);
            return Err(EngineError::Parameters(message));
        }

        let config = worker_config(config, &parameters);
        let results = match Executor::from_config(&config).execute(registry) {
            Ok(results) => results,
            Err(e) => {
                self.report_error(&e.to_string());
                return Err(EngineError::Runtime(e));
            }
        };

        let report = Report {
            meta: build_report_meta(),
            config: config.run_config(),
            results,
        };

        self.link
            .send(&WorkerMessage::Result(worker_report(&report, parameters)))
            .map_err(EngineError::Worker)?;

        Ok(Some(report))
    }

    fn report_error(&mut self, message: &str) {
        // Best effort: the parent treats a vanished worker as crashed anyway
        let _ = self.link.send(&WorkerMessage::Error {
            message: message.to_string(),
        });
    }
}

/// The worker's own configuration with the parent's parameters applied
fn worker_config(base: &BenchConfig, parameters: &RunParameters) -> BenchConfig {
    let mut config = base.clone();
    config.concurrency = parameters.concurrency;
    config.duration = Duration::from_nanos(parameters.duration_nanos);
    config.delay = Duration::from_nanos(parameters.delay_nanos);
    config.cluster.enabled = false;
    config
}

fn worker_report(report: &Report, parameters: RunParameters) -> WorkerReport {
    WorkerReport {
        pid: report.meta.pid,
        title: report.config.title.clone(),
        parameters,
        tasks: report.results.iter().map(task_record).collect(),
    }
}

fn task_record(result: &TaskResult) -> TaskRecord {
    let outcome = match &result.status {
        TaskStatus::Completed(m) => RecordedOutcome::Completed {
            elapsed_nanos: Duration::try_from_secs_f64(m.elapsed_secs)
                .map(|d| d.as_nanos() as u64)
                .unwrap_or(0),
            count: m.count,
            concurrency: m.concurrency,
        },
        TaskStatus::Failed { message } => RecordedOutcome::Failed {
            message: message.clone(),
        },
    };
    TaskRecord {
        title: result.title.clone(),
        outcome,
    }
}
