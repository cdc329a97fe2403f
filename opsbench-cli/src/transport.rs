//! Cluster Transport
//!
//! The cluster orchestrator only talks to its peers through these traits. The
//! process implementation passes length-prefixed frames over two pipes (see
//! [`crate::supervisor::WorkerHandle`] and [`crate::worker::PipeSupervisorLink`]);
//! tests plug in an in-memory channel pair instead.

use opsbench_ipc::{FrameError, SupervisorCommand, WorkerMessage};
use std::time::Instant;
use thiserror::Error;

/// Failures talking to a cluster worker
#[derive(Debug, Error)]
pub enum SupervisorError {
    /// The worker process could not be started
    #[error("Failed to spawn worker: {0}")]
    SpawnFailed(#[from] std::io::Error),

    /// Reading or writing a frame failed
    #[error("IPC error: {0}")]
    IpcError(String),

    /// The worker went away before reporting
    #[error("Worker crashed: {0}")]
    WorkerCrashed(String),

    /// The worker missed its deadline
    #[error("Timeout waiting for worker")]
    Timeout,

    /// The worker sent an unexpected message
    #[error("Worker protocol error: expected {expected}, got {got}")]
    ProtocolError {
        /// What the parent was waiting for
        expected: String,
        /// What arrived instead
        got: String,
    },

    /// The worker answered with an error instead of results
    #[error("Worker reported an error: {0}")]
    WorkerReported(String),
}

impl From<FrameError> for SupervisorError {
    fn from(e: FrameError) -> Self {
        SupervisorError::IpcError(e.to_string())
    }
}

/// Parent's end of the connection to one worker
pub trait WorkerLink: Send {
    /// OS process id of the worker, or a stand-in for in-memory workers
    fn pid(&self) -> u32;

    /// Send a command to the worker
    fn send(&mut self, command: &SupervisorCommand) -> Result<(), SupervisorError>;

    /// Wait for the next message.
    ///
    /// Fails with [`SupervisorError::Timeout`] once `deadline` passes and with
    /// [`SupervisorError::WorkerCrashed`] if the worker goes away first.
    fn recv(&mut self, deadline: Option<Instant>) -> Result<WorkerMessage, SupervisorError>;

    /// Make sure the worker is gone; called once every worker has reported
    fn terminate(&mut self);
}

/// Creates workers for the cluster orchestrator
pub trait WorkerSpawner: Sync {
    /// Connection to a spawned worker
    type Link: WorkerLink;

    /// Start worker number `worker` of the cluster
    fn spawn(&self, worker: usize) -> Result<Self::Link, SupervisorError>;
}

/// Worker's end of the connection to its parent
pub trait SupervisorLink {
    /// Send a message to the parent
    fn send(&mut self, message: &WorkerMessage) -> Result<(), SupervisorError>;

    /// Block until the parent sends a command
    fn recv(&mut self) -> Result<SupervisorCommand, SupervisorError>;
}
