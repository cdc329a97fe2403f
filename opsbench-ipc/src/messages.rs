//! IPC Message Types
//!
//! All messages are serialized with rkyv and validated before they are
//! deserialized on the receiving side.

use rkyv::{Archive, Deserialize as RkyvDeserialize, Serialize as RkyvSerialize};

/// Run parameters handed to a worker with the `Start` command.
///
/// The parent divides its requested concurrency among the workers; duration
/// and delay travel along so a worker never depends on its own argv to agree
/// with the parent about the measurement window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Archive, RkyvSerialize, RkyvDeserialize)]
#[archive(check_bytes)]
pub struct RunParameters {
    /// Concurrency assigned to this worker
    pub concurrency: u32,
    /// Measurement duration per task in nanoseconds
    pub duration_nanos: u64,
    /// Delay before each task in nanoseconds
    pub delay_nanos: u64,
}

impl RunParameters {
    /// Validate parameter values, returning a description of the first error found.
    pub fn validate(&self) -> Result<(), String> {
        if self.concurrency == 0 {
            return Err("concurrency must be > 0".to_string());
        }
        if self.duration_nanos == 0 {
            return Err("duration_nanos must be > 0".to_string());
        }
        Ok(())
    }
}

/// Commands sent from the parent to a worker
#[derive(Debug, Clone, PartialEq, Eq, Archive, RkyvSerialize, RkyvDeserialize)]
#[archive(check_bytes)]
pub enum SupervisorCommand {
    /// Run the full task registry with these parameters
    Start(RunParameters),

    /// Exit without running
    Shutdown,
}

/// Outcome of one task as recorded by a worker
#[derive(Debug, Clone, PartialEq, Eq, Archive, RkyvSerialize, RkyvDeserialize)]
#[archive(check_bytes)]
pub enum RecordedOutcome {
    /// The task ran for its full duration
    Completed {
        /// Elapsed wall time in nanoseconds
        elapsed_nanos: u64,
        /// Operations counted
        count: u64,
        /// Effective concurrency the runner used
        concurrency: u32,
    },
    /// The task failed
    Failed {
        /// Human-readable error message
        message: String,
    },
}

/// One entry of a worker's report, in registration order
#[derive(Debug, Clone, PartialEq, Eq, Archive, RkyvSerialize, RkyvDeserialize)]
#[archive(check_bytes)]
pub struct TaskRecord {
    /// Task title, used by the parent to detect registry mismatches
    pub title: String,
    /// What happened
    pub outcome: RecordedOutcome,
}

/// A worker's complete report for one run
#[derive(Debug, Clone, PartialEq, Eq, Archive, RkyvSerialize, RkyvDeserialize)]
#[archive(check_bytes)]
pub struct WorkerReport {
    /// Worker process id
    pub pid: u32,
    /// Benchmark title as configured in the worker
    pub title: String,
    /// Parameters the worker actually ran with
    pub parameters: RunParameters,
    /// Per-task outcomes
    pub tasks: Vec<TaskRecord>,
}

/// Messages sent from a worker to the parent
#[derive(Debug, Clone, PartialEq, Eq, Archive, RkyvSerialize, RkyvDeserialize)]
#[archive(check_bytes)]
pub enum WorkerMessage {
    /// Worker is up and waiting for `Start`
    Ready {
        /// Protocol version for compatibility
        protocol_version: u32,
        /// Worker process id
        pid: u32,
    },

    /// Worker finished the run
    Result(WorkerReport),

    /// Worker could not complete the run
    Error {
        /// Human-readable error message
        message: String,
    },
}

impl WorkerMessage {
    /// Build a `Ready` message for the current process.
    pub fn ready() -> Self {
        WorkerMessage::Ready {
            protocol_version: crate::PROTOCOL_VERSION,
            pid: std::process::id(),
        }
    }

    /// Short name of the message kind, for protocol errors and logs.
    pub fn name(&self) -> &'static str {
        match self {
            WorkerMessage::Ready { .. } => "Ready",
            WorkerMessage::Result(_) => "Result",
            WorkerMessage::Error { .. } => "Error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> RunParameters {
        RunParameters {
            concurrency: 25,
            duration_nanos: 2_000_000_000,
            delay_nanos: 1_000_000_000,
        }
    }

    #[test]
    fn test_run_parameters_validate_default() {
        assert!(params().validate().is_ok());
    }

    #[test]
    fn test_run_parameters_validate_zero_concurrency() {
        let p = RunParameters {
            concurrency: 0,
            ..params()
        };
        assert!(p.validate().is_err());
    }

    #[test]
    fn test_run_parameters_validate_zero_duration() {
        let p = RunParameters {
            duration_nanos: 0,
            ..params()
        };
        assert!(p.validate().is_err());
    }

    #[test]
    fn test_run_parameters_zero_delay_is_allowed() {
        let p = RunParameters {
            delay_nanos: 0,
            ..params()
        };
        assert!(p.validate().is_ok());
    }

    #[test]
    fn test_ready_carries_protocol_version() {
        match WorkerMessage::ready() {
            WorkerMessage::Ready {
                protocol_version,
                pid,
            } => {
                assert_eq!(protocol_version, crate::PROTOCOL_VERSION);
                assert_eq!(pid, std::process::id());
            }
            other => panic!("unexpected message {:?}", other),
        }
    }

    #[test]
    fn test_message_names() {
        let error = WorkerMessage::Error {
            message: "boom".to_string(),
        };
        assert_eq!(WorkerMessage::ready().name(), "Ready");
        assert_eq!(error.name(), "Error");
    }
}
