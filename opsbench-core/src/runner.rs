//! Strategy Runners
//!
//! One time-budgeted loop per [`TaskKind`](crate::TaskKind):
//!
//! | Kind          | Loop                                                    | Concurrency |
//! |---------------|---------------------------------------------------------|-------------|
//! | `Sync`        | call, count 1, check the clock                          | always 1    |
//! | `SyncBatched` | call with the batch size, count the batch, check clock  | always 1    |
//! | `Async`       | `C` workers await the future until the stop flag is set | `C`         |
//! | `Callback`    | `C` call chains advance on each continuation until stop | `C`         |
//!
//! The clock is only consulted between invocations. A single slow invocation
//! can overrun the budget, and an in-flight invocation is never aborted.
//!
//! Async and Callback pools run on a [`LocalSet`]: every worker shares one
//! thread, so the stop flag is a plain `Cell`. Each worker keeps its own count
//! and hands it back through its join handle once it has exited; the total is
//! summed only after every handle resolved.

use crate::task::{AsyncFn, CallbackFn, Done, WorkUnit};
use crate::{TaskError, panic_message};
use std::cell::Cell;
use std::future::Future;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::rc::Rc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::{JoinHandle, LocalSet};

/// Result of one strategy runner invocation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExecutionOutcome {
    /// Wall time from start until every worker stopped
    pub elapsed: Duration,
    /// Logical operations performed
    pub count: u64,
    /// Concurrency the runner actually used
    pub concurrency: usize,
}

impl ExecutionOutcome {
    /// Elapsed time in seconds
    pub fn elapsed_secs(&self) -> f64 {
        self.elapsed.as_secs_f64()
    }

    /// Throughput; zero when no time elapsed
    pub fn ops_per_sec(&self) -> f64 {
        let secs = self.elapsed_secs();
        if secs > 0.0 {
            self.count as f64 / secs
        } else {
            0.0
        }
    }

    /// Mean wall time per operation, if any operation completed
    pub fn nanos_per_op(&self) -> Option<f64> {
        if self.count == 0 {
            None
        } else {
            Some(self.elapsed.as_nanos() as f64 / self.count as f64)
        }
    }
}

/// Run a work unit with the runner matching its kind.
///
/// `concurrency` is ignored by the sync kinds.
pub async fn execute(
    work: &mut WorkUnit,
    duration: Duration,
    concurrency: usize,
) -> Result<ExecutionOutcome, TaskError> {
    match work {
        WorkUnit::Sync(f) => run_sync(duration, f.as_mut()),
        WorkUnit::SyncBatched { batch_size, work } => {
            run_sync_batched(duration, *batch_size, work.as_mut())
        }
        WorkUnit::Async(f) => run_async(duration, concurrency, Rc::clone(f)).await,
        WorkUnit::Callback(f) => run_callback(duration, concurrency, Rc::clone(f)).await,
    }
}

/// Call `work` until `duration` has elapsed, counting one operation per call.
pub fn run_sync<F>(duration: Duration, work: &mut F) -> Result<ExecutionOutcome, TaskError>
where
    F: FnMut() -> Result<(), String> + ?Sized,
{
    timed_loop(duration, 1, || work())
}

/// Call `work(batch_size)` until `duration` has elapsed, counting `batch_size`
/// operations per call.
pub fn run_sync_batched<F>(
    duration: Duration,
    batch_size: u64,
    work: &mut F,
) -> Result<ExecutionOutcome, TaskError>
where
    F: FnMut(u64) -> Result<(), String> + ?Sized,
{
    if batch_size == 0 {
        return Err(TaskError::InvalidBatchSize(batch_size));
    }
    timed_loop(duration, batch_size, || work(batch_size))
}

fn timed_loop<F>(duration: Duration, per_call: u64, mut call: F) -> Result<ExecutionOutcome, TaskError>
where
    F: FnMut() -> Result<(), String>,
{
    let result = catch_unwind(AssertUnwindSafe(|| {
        let start = std::time::Instant::now();
        let mut count = 0u64;
        loop {
            call().map_err(|message| TaskError::WorkUnit { message })?;
            count += per_call;
            let elapsed = start.elapsed();
            if elapsed >= duration {
                return Ok(ExecutionOutcome {
                    elapsed,
                    count,
                    concurrency: 1,
                });
            }
        }
    }));

    result.unwrap_or_else(|payload| {
        Err(TaskError::Panicked {
            message: panic_message(payload.as_ref()),
        })
    })
}

/// Drive `concurrency` workers that each await `work()` in a loop until the
/// duration has passed.
pub async fn run_async(
    duration: Duration,
    concurrency: usize,
    work: AsyncFn,
) -> Result<ExecutionOutcome, TaskError> {
    run_pool(duration, concurrency, |stop| drive_async(Rc::clone(&work), stop)).await
}

/// Drive `concurrency` call chains, each invoking `work` again from the
/// previous invocation's continuation, until the duration has passed.
pub async fn run_callback(
    duration: Duration,
    concurrency: usize,
    work: CallbackFn,
) -> Result<ExecutionOutcome, TaskError> {
    run_pool(duration, concurrency, |stop| {
        drive_callback(Rc::clone(&work), stop)
    })
    .await
}

/// Set-once stop signal shared by the workers of one pool
#[derive(Clone, Default)]
struct StopFlag(Rc<StopState>);

#[derive(Default)]
struct StopState {
    stopped: Cell<bool>,
    notify: Notify,
}

impl StopFlag {
    fn set(&self) {
        if !self.0.stopped.replace(true) {
            // Only the pool owner waits; notify_one keeps the permit if it is not parked yet
            self.0.notify.notify_one();
        }
    }

    fn is_set(&self) -> bool {
        self.0.stopped.get()
    }

    async fn wait(&self) {
        if !self.is_set() {
            self.0.notify.notified().await;
        }
    }
}

/// Raises the stop flag when a worker goes away, including when its future is
/// dropped after a panic.
struct StopOnExit(StopFlag);

impl Drop for StopOnExit {
    fn drop(&mut self) {
        self.0.set();
    }
}

async fn run_pool<W, Fut>(
    duration: Duration,
    concurrency: usize,
    worker: W,
) -> Result<ExecutionOutcome, TaskError>
where
    W: Fn(StopFlag) -> Fut,
    Fut: Future<Output = Result<u64, TaskError>> + 'static,
{
    let concurrency = concurrency.max(1);
    let stop = StopFlag::default();
    let pool = LocalSet::new();

    let started = tokio::time::Instant::now();
    let deadline = started + duration;

    let handles: Vec<JoinHandle<Result<u64, TaskError>>> = (0..concurrency)
        .map(|_| pool.spawn_local(worker(stop.clone())))
        .collect();

    let count = pool
        .run_until(async {
            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => {}
                // A worker failed and raised the flag early
                _ = stop.wait() => {}
            }
            stop.set();
            join_workers(handles).await
        })
        .await?;

    Ok(ExecutionOutcome {
        elapsed: started.elapsed(),
        count,
        concurrency,
    })
}

/// Wait for every worker, then sum their counts or report the first failure
/// in worker order.
async fn join_workers(handles: Vec<JoinHandle<Result<u64, TaskError>>>) -> Result<u64, TaskError> {
    let mut total = 0u64;
    let mut first_error = None;

    for handle in handles {
        let result = match handle.await {
            Ok(result) => result,
            Err(e) if e.is_panic() => Err(TaskError::Panicked {
                message: panic_message(e.into_panic().as_ref()),
            }),
            Err(e) => Err(TaskError::WorkUnit {
                message: e.to_string(),
            }),
        };

        match result {
            Ok(count) => total += count,
            Err(e) => {
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
        }
    }

    first_error.map_or(Ok(total), Err)
}

async fn drive_async(work: AsyncFn, stop: StopFlag) -> Result<u64, TaskError> {
    let _exit = StopOnExit(stop.clone());
    let mut count = 0u64;

    while !stop.is_set() {
        work()
            .await
            .map_err(|message| TaskError::WorkUnit { message })?;
        count += 1;
        // A work unit that never suspends would otherwise starve the deadline timer
        tokio::task::yield_now().await;
    }

    Ok(count)
}

async fn drive_callback(work: CallbackFn, stop: StopFlag) -> Result<u64, TaskError> {
    let _exit = StopOnExit(stop.clone());
    let mut count = 0u64;

    while !stop.is_set() {
        let (done, signal) = Done::channel();
        work(done);

        match signal.await {
            Ok(Ok(())) => count += 1,
            Ok(Err(message)) => return Err(TaskError::WorkUnit { message }),
            Err(_) => return Err(TaskError::ContinuationDropped),
        }
        tokio::task::yield_now().await;
    }

    Ok(count)
}
