//! Task Registry
//!
//! A task is a titled unit of work tagged with one of four execution kinds.
//! The registry keeps tasks in registration order, which is also the order
//! they run in and the order they appear in a report.

use crate::TaskError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use tokio::sync::oneshot;

/// Default number of logical operations per call for [`TaskKind::SyncBatched`]
pub const DEFAULT_BATCH_SIZE: u64 = 10_000;

/// Execution discipline of a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskKind {
    /// Blocking call, counted once per invocation
    Sync,
    /// Blocking call performing a whole batch of operations per invocation
    SyncBatched,
    /// Future-returning call, run by a pool of concurrent workers
    Async,
    /// Continuation-passing call, run by a pool of concurrent call chains
    Callback,
}

impl TaskKind {
    /// Stable name used in reports and logs
    pub fn as_str(self) -> &'static str {
        match self {
            TaskKind::Sync => "sync",
            TaskKind::SyncBatched => "sync-batched",
            TaskKind::Async => "async",
            TaskKind::Callback => "callback",
        }
    }

    /// Whether the configured concurrency applies to this kind.
    ///
    /// Sync kinds always run with a concurrency of 1.
    pub fn is_concurrent(self) -> bool {
        matches!(self, TaskKind::Async | TaskKind::Callback)
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Conversion from a work unit's return value into pass/fail.
///
/// `()` always passes; `Result<T, E>` fails with the error's display text.
pub trait WorkResult {
    /// Collapse into `Ok(())` or an error message
    fn into_result(self) -> Result<(), String>;
}

impl WorkResult for () {
    #[inline]
    fn into_result(self) -> Result<(), String> {
        Ok(())
    }
}

impl<T, E: fmt::Display> WorkResult for Result<T, E> {
    #[inline]
    fn into_result(self) -> Result<(), String> {
        self.map(|_| ()).map_err(|e| e.to_string())
    }
}

/// Boxed future that need not be `Send`; workers run on a single-threaded scheduler
pub type LocalBoxFuture<T> = Pin<Box<dyn Future<Output = T>>>;

/// Zero-argument blocking work unit
pub type SyncFn = Box<dyn FnMut() -> Result<(), String>>;
/// Blocking work unit told how many logical operations to perform
pub type BatchedFn = Box<dyn FnMut(u64) -> Result<(), String>>;
/// Asynchronous work unit, shared by every worker of the pool
pub type AsyncFn = Rc<dyn Fn() -> LocalBoxFuture<Result<(), String>>>;
/// Continuation-passing work unit, shared by every call chain of the pool
pub type CallbackFn = Rc<dyn Fn(Done)>;

/// The work itself, one variant per [`TaskKind`]
pub enum WorkUnit {
    /// See [`TaskKind::Sync`]
    Sync(SyncFn),
    /// See [`TaskKind::SyncBatched`]
    SyncBatched {
        /// Operations performed per call; must be positive
        batch_size: u64,
        /// The work unit
        work: BatchedFn,
    },
    /// See [`TaskKind::Async`]
    Async(AsyncFn),
    /// See [`TaskKind::Callback`]
    Callback(CallbackFn),
}

impl WorkUnit {
    /// Wrap a blocking closure
    pub fn sync<F, R>(mut f: F) -> Self
    where
        F: FnMut() -> R + 'static,
        R: WorkResult,
    {
        WorkUnit::Sync(Box::new(move || f().into_result()))
    }

    /// Wrap a blocking closure that performs `batch_size` operations per call
    pub fn batched<F, R>(batch_size: u64, mut f: F) -> Self
    where
        F: FnMut(u64) -> R + 'static,
        R: WorkResult,
    {
        WorkUnit::SyncBatched {
            batch_size,
            work: Box::new(move |n| f(n).into_result()),
        }
    }

    /// Wrap a closure returning a future
    pub fn future<F, Fut, R>(f: F) -> Self
    where
        F: Fn() -> Fut + 'static,
        Fut: Future<Output = R> + 'static,
        R: WorkResult,
    {
        WorkUnit::Async(Rc::new(move || {
            let fut = f();
            Box::pin(async move { fut.await.into_result() }) as LocalBoxFuture<_>
        }))
    }

    /// Wrap a closure that signals completion through a [`Done`]
    pub fn callback<F>(f: F) -> Self
    where
        F: Fn(Done) + 'static,
    {
        WorkUnit::Callback(Rc::new(f))
    }

    /// Execution kind of this work unit
    pub fn kind(&self) -> TaskKind {
        match self {
            WorkUnit::Sync(_) => TaskKind::Sync,
            WorkUnit::SyncBatched { .. } => TaskKind::SyncBatched,
            WorkUnit::Async(_) => TaskKind::Async,
            WorkUnit::Callback(_) => TaskKind::Callback,
        }
    }
}

/// Continuation handed to a callback work unit.
///
/// Must be completed exactly once per invocation. It is consumed on use, so a
/// second call cannot compile; dropping it unused fails the task instead of
/// stalling the worker forever. `Done` is `Send` and may be completed from
/// another task or thread.
pub struct Done {
    tx: oneshot::Sender<Result<(), String>>,
}

impl Done {
    pub(crate) fn channel() -> (Self, oneshot::Receiver<Result<(), String>>) {
        let (tx, rx) = oneshot::channel();
        (Self { tx }, rx)
    }

    /// Signal that the invocation finished successfully
    pub fn done(self) {
        // The receiver only disappears if the runner itself was torn down
        let _ = self.tx.send(Ok(()));
    }

    /// Signal that the invocation failed
    pub fn fail(self, message: impl Into<String>) {
        let _ = self.tx.send(Err(message.into()));
    }
}

impl fmt::Debug for Done {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Done")
            .field("pending", &!self.tx.is_closed())
            .finish()
    }
}

/// Title and kind of a task, the part of a task that can cross a process boundary
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskHeader {
    /// Display title
    pub title: String,
    /// Execution kind
    pub kind: TaskKind,
}

/// A registered task
pub struct Task {
    title: String,
    work: WorkUnit,
}

impl Task {
    /// Create a task from a title and a work unit
    pub fn new(title: impl Into<String>, work: WorkUnit) -> Self {
        Self {
            title: title.into(),
            work,
        }
    }

    /// Display title; not required to be unique
    pub fn title(&self) -> &str {
        &self.title
    }

    /// Execution kind
    pub fn kind(&self) -> TaskKind {
        self.work.kind()
    }

    /// Mutable access to the work unit, for the runners
    pub fn work_mut(&mut self) -> &mut WorkUnit {
        &mut self.work
    }

    /// Title and kind
    pub fn header(&self) -> TaskHeader {
        TaskHeader {
            title: self.title.clone(),
            kind: self.kind(),
        }
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("title", &self.title)
            .field("kind", &self.kind())
            .finish()
    }
}

/// Ordered list of tasks
#[derive(Debug, Default)]
pub struct TaskRegistry {
    tasks: Vec<Task>,
}

impl TaskRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a task; registration order is execution order
    pub fn push(&mut self, task: Task) {
        self.tasks.push(task);
    }

    /// Number of registered tasks
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Whether no task is registered
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Task at `index`
    pub fn get_mut(&mut self, index: usize) -> Result<&mut Task, TaskError> {
        self.tasks
            .get_mut(index)
            .ok_or(TaskError::NotFound { index })
    }

    /// Iterate tasks in registration order
    pub fn iter(&self) -> impl Iterator<Item = &Task> {
        self.tasks.iter()
    }

    /// Titles and kinds in registration order
    pub fn headers(&self) -> Vec<TaskHeader> {
        self.tasks.iter().map(Task::header).collect()
    }
}
