//! Supervisor Process
//!
//! Cluster parent: spawns the worker processes, hands each its share of the
//! concurrency, collects one report per worker and terminates them.
//!
//! ```text
//! parent                                  worker i
//!   │ spawn (fd 3 = commands, fd 4 = messages)
//!   │ ◄─────────────────────── Ready { protocol_version, pid }
//!   │ Start { concurrency, duration, delay } ─────►
//!   │                                       runs every task
//!   │ ◄─────────────────────── Result(report) | Error { message }
//!   │ terminate
//! ```
//!
//! Workers are driven in parallel, one rayon thread each. A worker that
//! crashes, breaks protocol or misses its deadline is recorded as failed; the
//! others are still collected.

use crate::config::BenchConfig;
use crate::transport::{SupervisorError, WorkerLink, WorkerSpawner};
use opsbench_ipc::{
    FrameError, FrameReader, FrameWriter, IPC_FD_ENV, PROTOCOL_VERSION, RecordedOutcome,
    RunParameters, SupervisorCommand, TaskRecord, WORKER_FLAG, WorkerMessage, WorkerReport,
};
use opsbench_report::{Measurement, TaskStatus, WorkerResult, WorkerTask};
use rayon::ThreadPoolBuilder;
use rayon::prelude::*;
use std::env;
use std::ffi::OsString;
use std::os::unix::io::{FromRawFd, RawFd};
use std::os::unix::process::{CommandExt, ExitStatusExt};
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Longest single poll before re-checking worker liveness
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// How long a worker gets to exit on its own, and again after SIGTERM
const EXIT_GRACE: Duration = Duration::from_millis(200);

/// Result of polling for data
#[derive(Debug)]
enum PollResult {
    DataAvailable,
    Timeout,
    PipeClosed,
    Error(std::io::Error),
}

/// Wait for data to be available on a file descriptor with timeout
fn wait_for_data(fd: i32, timeout_ms: i32) -> PollResult {
    let mut pollfd = libc::pollfd {
        fd,
        events: libc::POLLIN,
        revents: 0,
    };

    let result = unsafe { libc::poll(&mut pollfd, 1, timeout_ms) };

    if result < 0 {
        PollResult::Error(std::io::Error::last_os_error())
    } else if result == 0 {
        PollResult::Timeout
    } else {
        // A worker may write its report and exit at once: drain before reporting a hangup
        if pollfd.revents & libc::POLLIN != 0 {
            PollResult::DataAvailable
        } else if pollfd.revents & (libc::POLLERR | libc::POLLHUP | libc::POLLNVAL) != 0 {
            PollResult::PipeClosed
        } else {
            PollResult::Timeout
        }
    }
}

/// Create a pipe pair, returning (read_fd, write_fd).
fn create_pipe() -> Result<(RawFd, RawFd), std::io::Error> {
    let mut fds = [0 as RawFd; 2];
    let ret = unsafe { libc::pipe(fds.as_mut_ptr()) };
    if ret != 0 {
        return Err(std::io::Error::last_os_error());
    }
    // Close-on-exec by default; the child clears it on the two ends it keeps
    for &fd in &fds {
        unsafe {
            let flags = libc::fcntl(fd, libc::F_GETFD);
            libc::fcntl(fd, libc::F_SETFD, flags | libc::FD_CLOEXEC);
        }
    }
    Ok((fds[0], fds[1]))
}

/// Close a raw file descriptor.
fn close_fd(fd: RawFd) {
    unsafe {
        libc::close(fd);
    }
}

/// Send SIGTERM to a process. Returns `Err` if the signal could not be delivered.
fn send_sigterm(pid: u32) -> Result<(), std::io::Error> {
    let ret = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
    if ret == -1 {
        Err(std::io::Error::last_os_error())
    } else {
        Ok(())
    }
}

/// Move `fd` to `target` in a freshly forked child and keep it across exec
unsafe fn install_fd(fd: RawFd, target: RawFd) {
    unsafe {
        if fd != target {
            libc::dup2(fd, target);
            libc::close(fd);
        }
        let flags = libc::fcntl(target, libc::F_GETFD);
        libc::fcntl(target, libc::F_SETFD, flags & !libc::FD_CLOEXEC);
    }
}

fn describe_status(status: ExitStatus) -> String {
    match (status.code(), status.signal()) {
        (Some(code), _) => format!("exited with status {}", code),
        (None, Some(signal)) => format!("killed by signal {}", signal),
        (None, None) => "exited".to_string(),
    }
}

/// Worker process handle
pub struct WorkerHandle {
    child: Child,
    reader: FrameReader<std::fs::File>,
    writer: FrameWriter<std::fs::File>,
    msg_read_fd: RawFd,
}

impl WorkerHandle {
    /// Spawn `binary args... --opsbench-worker` with fd 3/4 wired for IPC.
    pub fn spawn(binary: &std::path::Path, args: &[OsString]) -> Result<Self, SupervisorError> {
        // cmd_pipe: parent writes commands → worker reads from fd 3
        let (cmd_read, cmd_write) = create_pipe()?;
        // msg_pipe: worker writes messages from fd 4 → parent reads
        let (msg_read, msg_write) = match create_pipe() {
            Ok(fds) => fds,
            Err(e) => {
                close_fd(cmd_read);
                close_fd(cmd_write);
                return Err(SupervisorError::SpawnFailed(e));
            }
        };

        let mut command = Command::new(binary);
        command
            .args(args)
            .arg(WORKER_FLAG)
            .env(IPC_FD_ENV, "3,4")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::inherit());

        // SAFETY: only async-signal-safe calls between fork and exec
        unsafe {
            command.pre_exec(move || {
                // Parent-side ends first, so a low-numbered one cannot clobber fd 3 or 4
                libc::close(cmd_write);
                libc::close(msg_read);
                install_fd(cmd_read, 3);
                install_fd(msg_write, 4);
                Ok(())
            });
        }

        let child = match command.spawn() {
            Ok(c) => c,
            Err(e) => {
                close_fd(cmd_read);
                close_fd(cmd_write);
                close_fd(msg_read);
                close_fd(msg_write);
                return Err(SupervisorError::SpawnFailed(e));
            }
        };

        // Close the child-side ends in the parent
        close_fd(cmd_read);
        close_fd(msg_write);

        let writer_file = unsafe { std::fs::File::from_raw_fd(cmd_write) };
        let reader_file = unsafe { std::fs::File::from_raw_fd(msg_read) };

        Ok(Self {
            child,
            reader: FrameReader::new(reader_file),
            writer: FrameWriter::new(writer_file),
            msg_read_fd: msg_read,
        })
    }

    /// Check if worker process is still running
    pub fn is_alive(&mut self) -> bool {
        match self.child.try_wait() {
            Ok(Some(_)) => false,
            Ok(None) => true,
            Err(_) => false,
        }
    }

    /// Wait up to `grace` for the process to exit; true once it has
    fn wait_for_exit(&mut self, grace: Duration) -> bool {
        let deadline = Instant::now() + grace;
        loop {
            match self.child.try_wait() {
                Ok(Some(_)) | Err(_) => return true,
                Ok(None) if Instant::now() >= deadline => return false,
                Ok(None) => std::thread::sleep(Duration::from_millis(5)),
            }
        }
    }

    /// Why the worker went away, for crash reports
    fn describe_exit(&mut self) -> String {
        // The pipe can close a moment before the process is reapable
        self.wait_for_exit(EXIT_GRACE);
        match self.child.try_wait() {
            Ok(Some(status)) => describe_status(status),
            Ok(None) => "worker closed its pipe".to_string(),
            Err(e) => format!("worker state unknown: {}", e),
        }
    }
}

impl WorkerLink for WorkerHandle {
    fn pid(&self) -> u32 {
        self.child.id()
    }

    fn send(&mut self, command: &SupervisorCommand) -> Result<(), SupervisorError> {
        self.writer.write(command)?;
        Ok(())
    }

    fn recv(&mut self, deadline: Option<Instant>) -> Result<WorkerMessage, SupervisorError> {
        while !self.reader.has_buffered_data() {
            let slice = match deadline {
                Some(deadline) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        return Err(SupervisorError::Timeout);
                    }
                    remaining.min(POLL_INTERVAL)
                }
                None => POLL_INTERVAL,
            };

            match wait_for_data(self.msg_read_fd, slice.as_millis() as i32) {
                PollResult::DataAvailable => break,
                PollResult::Timeout => {
                    // Workers exit right after reporting; the report may land after the poll
                    if !self.is_alive() {
                        match wait_for_data(self.msg_read_fd, 0) {
                            PollResult::DataAvailable => break,
                            _ => return Err(SupervisorError::WorkerCrashed(self.describe_exit())),
                        }
                    }
                }
                PollResult::PipeClosed => {
                    return Err(SupervisorError::WorkerCrashed(self.describe_exit()));
                }
                PollResult::Error(e) => {
                    return Err(SupervisorError::WorkerCrashed(format!("Pipe error: {}", e)));
                }
            }
        }

        match self.reader.read::<WorkerMessage>() {
            Ok(msg) => {
                debug!("worker pid {} sent {}", self.child.id(), msg.name());
                Ok(msg)
            }
            Err(FrameError::EndOfStream) => {
                Err(SupervisorError::WorkerCrashed(self.describe_exit()))
            }
            Err(e) => {
                if !self.is_alive() {
                    return Err(SupervisorError::WorkerCrashed(format!(
                        "{} (while reading: {})",
                        self.describe_exit(),
                        e
                    )));
                }
                Err(SupervisorError::IpcError(e.to_string()))
            }
        }
    }

    fn terminate(&mut self) {
        if !self.is_alive() {
            let _ = self.child.wait();
            return;
        }

        // Harmless for a worker that already ran; ends one still waiting for Start
        let _ = self.writer.write(&SupervisorCommand::Shutdown);
        if self.wait_for_exit(EXIT_GRACE) {
            return;
        }

        let _ = send_sigterm(self.child.id());
        if self.wait_for_exit(EXIT_GRACE) {
            return;
        }

        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        self.terminate();
    }
}

/// Spawns workers by re-executing a binary, by default the current one
#[derive(Debug, Clone)]
pub struct ProcessSpawner {
    binary: PathBuf,
    args: Vec<OsString>,
}

impl ProcessSpawner {
    /// Re-execute the current binary with the arguments it was started with
    pub fn current() -> Result<Self, SupervisorError> {
        let binary = env::current_exe().map_err(SupervisorError::SpawnFailed)?;
        let args = env::args_os().skip(1).collect();
        Ok(Self::new(binary, args))
    }

    /// Spawn workers from a specific binary
    pub fn new(binary: impl Into<PathBuf>, args: Vec<OsString>) -> Self {
        Self {
            binary: binary.into(),
            args,
        }
    }
}

impl WorkerSpawner for ProcessSpawner {
    type Link = WorkerHandle;

    fn spawn(&self, _worker: usize) -> Result<WorkerHandle, SupervisorError> {
        WorkerHandle::spawn(&self.binary, &self.args)
    }
}

/// Cluster parent
#[derive(Debug, Clone)]
pub struct Supervisor {
    parameters: RunParameters,
    workers: usize,
    timeout: Option<Duration>,
}

impl Supervisor {
    /// Split `config` across its cluster workers
    pub fn new(config: &BenchConfig) -> Self {
        Self {
            parameters: RunParameters {
                concurrency: config.per_worker_concurrency(),
                duration_nanos: config.duration.as_nanos() as u64,
                delay_nanos: config.delay.as_nanos() as u64,
            },
            workers: config.cluster.workers.max(1) as usize,
            timeout: config.cluster.timeout,
        }
    }

    /// Parameters every worker receives with `Start`
    pub fn parameters(&self) -> &RunParameters {
        &self.parameters
    }

    /// Run the whole registry on every worker and collect one result per worker.
    ///
    /// Only a failure to spawn the first worker is an error; anything that
    /// goes wrong later is recorded against the worker concerned.
    pub fn run<S: WorkerSpawner>(&self, spawner: &S) -> Result<Vec<WorkerResult>, SupervisorError> {
        let mut slots = Vec::with_capacity(self.workers);
        for worker in 0..self.workers {
            match spawner.spawn(worker) {
                Ok(link) => {
                    info!("spawned worker {} (pid {})", worker, link.pid());
                    slots.push(Ok(link));
                }
                Err(e) if worker == 0 => return Err(e),
                Err(e) => {
                    warn!("failed to spawn worker {}: {}", worker, e);
                    slots.push(Err(e));
                }
            }
        }

        let pool = ThreadPoolBuilder::new()
            .num_threads(self.workers)
            .build()
            .map_err(|e| SupervisorError::IpcError(format!("Failed to build worker pool: {}", e)))?;

        let mut outcomes: Vec<(Option<S::Link>, WorkerResult)> = pool.install(|| {
            slots
                .into_par_iter()
                .enumerate()
                .map(|(worker, slot)| match slot {
                    Ok(mut link) => {
                        let result = self.drive(worker, &mut link);
                        (Some(link), result)
                    }
                    Err(e) => (
                        None,
                        WorkerResult::Failed {
                            worker,
                            message: e.to_string(),
                        },
                    ),
                })
                .collect()
        });

        for link in outcomes.iter_mut().filter_map(|(link, _)| link.as_mut()) {
            link.terminate();
        }

        Ok(outcomes.into_iter().map(|(_, result)| result).collect())
    }

    fn drive<L: WorkerLink>(&self, worker: usize, link: &mut L) -> WorkerResult {
        match self.exchange(link) {
            Ok(report) => {
                info!(
                    "worker {} (pid {}) reported {} tasks",
                    worker,
                    report.pid,
                    report.tasks.len()
                );
                WorkerResult::Reported {
                    worker,
                    pid: report.pid,
                    tasks: report.tasks.into_iter().map(worker_task).collect(),
                }
            }
            Err(e) => {
                warn!("worker {} (pid {}) failed: {}", worker, link.pid(), e);
                WorkerResult::Failed {
                    worker,
                    message: e.to_string(),
                }
            }
        }
    }

    fn exchange<L: WorkerLink>(&self, link: &mut L) -> Result<WorkerReport, SupervisorError> {
        let deadline = self.timeout.map(|timeout| Instant::now() + timeout);

        match link.recv(deadline)? {
            WorkerMessage::Ready {
                protocol_version, ..
            } if protocol_version != PROTOCOL_VERSION => {
                return Err(SupervisorError::ProtocolError {
                    expected: format!("protocol version {}", PROTOCOL_VERSION),
                    got: format!("protocol version {}", protocol_version),
                });
            }
            WorkerMessage::Ready { .. } => {}
            other => {
                return Err(SupervisorError::ProtocolError {
                    expected: "Ready".to_string(),
                    got: other.name().to_string(),
                });
            }
        }

        link.send(&SupervisorCommand::Start(self.parameters))?;

        match link.recv(deadline)? {
            WorkerMessage::Result(report) => Ok(report),
            WorkerMessage::Error { message } => Err(SupervisorError::WorkerReported(message)),
            other => Err(SupervisorError::ProtocolError {
                expected: "Result/Error".to_string(),
                got: other.name().to_string(),
            }),
        }
    }
}

/// Worker's task record as a merge input
fn worker_task(record: TaskRecord) -> WorkerTask {
    let status = match record.outcome {
        RecordedOutcome::Completed {
            elapsed_nanos,
            count,
            concurrency,
        } => TaskStatus::Completed(Measurement::new(
            Duration::from_nanos(elapsed_nanos).as_secs_f64(),
            count,
            concurrency,
        )),
        RecordedOutcome::Failed { message } => TaskStatus::Failed { message },
    };
    WorkerTask {
        title: record.title,
        status,
    }
}
