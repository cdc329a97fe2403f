//! Task-level errors.
//!
//! None of these abort a run: the orchestrator turns each into a failed
//! task result and moves on to the next task.

use thiserror::Error;

/// Why a task produced no outcome
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaskError {
    /// Index outside the registry
    #[error("task #{index} does not exist")]
    NotFound {
        /// Requested index
        index: usize,
    },

    /// The work unit returned an error
    #[error("{message}")]
    WorkUnit {
        /// Error text reported by the work unit
        message: String,
    },

    /// The work unit panicked
    #[error("work unit panicked: {message}")]
    Panicked {
        /// Panic payload, if it was a string
        message: String,
    },

    /// A batched task was registered with a batch size of zero
    #[error("batch size must be a positive integer, got {0}")]
    InvalidBatchSize(u64),

    /// A callback work unit dropped its continuation without calling it
    #[error("continuation dropped without being called")]
    ContinuationDropped,
}

/// Extract a readable message from a panic payload.
pub fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "Unknown panic".to_string()
    }
}
