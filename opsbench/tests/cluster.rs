//! Cluster orchestration over an in-memory transport.
//!
//! Each worker is a thread that builds its own `Benchmark` and serves the
//! parent over a pair of channels, so the whole parent/worker protocol runs
//! without spawning processes.

use opsbench::ipc::{SupervisorCommand, WorkerMessage};
use opsbench::prelude::*;
use opsbench::{EngineError, Role, SupervisorError, SupervisorLink, WorkerLink, WorkerSpawner};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Worker end of the channel pair
struct ChannelParent {
    commands: Receiver<SupervisorCommand>,
    messages: Sender<WorkerMessage>,
}

impl SupervisorLink for ChannelParent {
    fn send(&mut self, message: &WorkerMessage) -> Result<(), SupervisorError> {
        self.messages
            .send(message.clone())
            .map_err(|_| SupervisorError::IpcError("parent went away".to_string()))
    }

    fn recv(&mut self) -> Result<SupervisorCommand, SupervisorError> {
        self.commands
            .recv()
            .map_err(|_| SupervisorError::IpcError("parent went away".to_string()))
    }
}

/// Parent end of the channel pair
struct ThreadLink {
    worker: usize,
    commands: Option<Sender<SupervisorCommand>>,
    messages: Receiver<WorkerMessage>,
    thread: Option<JoinHandle<()>>,
}

impl WorkerLink for ThreadLink {
    fn pid(&self) -> u32 {
        10_000 + self.worker as u32
    }

    fn send(&mut self, command: &SupervisorCommand) -> Result<(), SupervisorError> {
        self.commands
            .as_ref()
            .ok_or_else(|| SupervisorError::IpcError("link closed".to_string()))?
            .send(command.clone())
            .map_err(|_| SupervisorError::WorkerCrashed("worker thread exited".to_string()))
    }

    fn recv(&mut self, deadline: Option<Instant>) -> Result<WorkerMessage, SupervisorError> {
        let gone = || SupervisorError::WorkerCrashed("worker thread exited".to_string());
        match deadline {
            Some(deadline) => self
                .messages
                .recv_timeout(deadline.saturating_duration_since(Instant::now()))
                .map_err(|e| match e {
                    RecvTimeoutError::Timeout => SupervisorError::Timeout,
                    RecvTimeoutError::Disconnected => gone(),
                }),
            None => self.messages.recv().map_err(|_| gone()),
        }
    }

    fn terminate(&mut self) {
        // Unblocks a worker still waiting for Start
        self.commands.take();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

type WorkerBody = dyn Fn(usize, ChannelParent) + Send + Sync;

struct ThreadSpawner {
    body: Arc<WorkerBody>,
}

impl ThreadSpawner {
    fn new(body: impl Fn(usize, ChannelParent) + Send + Sync + 'static) -> Self {
        Self {
            body: Arc::new(body),
        }
    }

    /// Workers that run the benchmark built by `build`
    fn benchmarks(build: impl Fn(usize) -> Benchmark + Send + Sync + 'static) -> Self {
        Self::new(move |worker, parent| {
            let mut bench = build(worker);
            let _ = bench.run_worker(parent);
        })
    }
}

impl WorkerSpawner for ThreadSpawner {
    type Link = ThreadLink;

    fn spawn(&self, worker: usize) -> Result<ThreadLink, SupervisorError> {
        let (command_tx, command_rx) = mpsc::channel();
        let (message_tx, message_rx) = mpsc::channel();
        let body = Arc::clone(&self.body);

        let thread = std::thread::Builder::new()
            .name(format!("worker-{}", worker))
            .spawn(move || {
                body(
                    worker,
                    ChannelParent {
                        commands: command_rx,
                        messages: message_tx,
                    },
                )
            })?;

        Ok(ThreadLink {
            worker,
            commands: Some(command_tx),
            messages: message_rx,
            thread: Some(thread),
        })
    }
}

fn config(workers: u32) -> BenchConfig {
    BenchConfig::new("cluster")
        .with_duration(Duration::from_millis(50))
        .with_concurrency(6)
        .with_delay(Duration::ZERO)
        .with_cluster(workers)
}

fn standard(bench: Benchmark, calls: Arc<AtomicU64>) -> Benchmark {
    bench
        .add_sync("counted", move || {
            calls.fetch_add(1, Ordering::Relaxed);
        })
        .add_async("sleep", || tokio::time::sleep(Duration::from_millis(5)))
}

fn parent(workers: u32) -> Benchmark {
    standard(
        Benchmark::with_role(config(workers), Role::Parent),
        Arc::new(AtomicU64::new(0)),
    )
}

#[test]
fn test_merged_counts_sum_over_workers() {
    let calls = Arc::new(AtomicU64::new(0));
    let worker_calls = Arc::clone(&calls);
    let spawner = ThreadSpawner::benchmarks(move |_| {
        standard(
            Benchmark::new(BenchConfig::new("cluster")),
            Arc::clone(&worker_calls),
        )
    });

    let report = parent(3).run_parent(&spawner).unwrap();

    assert_eq!(report.results.len(), 2);
    assert_eq!(report.summary().completed, 2);

    let counted = report.results[0].measurement().unwrap();
    assert_eq!(counted.count, calls.load(Ordering::Relaxed));
    assert_eq!(counted.concurrency, 3);

    let sleep = report.results[1].measurement().unwrap();
    assert_eq!(sleep.concurrency, 6);
    assert!(sleep.count > 0);
    assert!(sleep.elapsed_secs >= 0.05);

    let cluster = report.config.cluster.as_ref().unwrap();
    assert_eq!(cluster.workers, 3);
    assert_eq!(cluster.per_worker_concurrency, 2);
}

#[test]
fn test_task_failure_on_one_worker_is_isolated() {
    let spawner = ThreadSpawner::benchmarks(|worker| {
        Benchmark::new(BenchConfig::new("cluster"))
            .add_sync("counted", || {})
            .add_async("sleep", move || async move {
                if worker == 1 {
                    Err("backend unavailable")
                } else {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    Ok(())
                }
            })
    });

    let report = parent(2).run_parent(&spawner).unwrap();

    assert!(report.results[0].is_success());
    assert_eq!(
        report.results[1].error(),
        Some("worker 1: backend unavailable")
    );
}

#[test]
fn test_crashed_worker_fails_every_task() {
    let spawner = ThreadSpawner::new(|worker, parent| {
        if worker == 2 {
            // Dropping the link without a word looks like a crash
            drop(parent);
            return;
        }
        let mut bench = standard(
            Benchmark::new(BenchConfig::new("cluster")),
            Arc::new(AtomicU64::new(0)),
        );
        let _ = bench.run_worker(parent);
    });

    let report = parent(3).run_parent(&spawner).unwrap();

    assert_eq!(report.summary().failed, 2);
    for result in &report.results {
        let message = result.error().unwrap();
        assert!(message.starts_with("worker 2: Worker crashed"), "{}", message);
    }
}

#[test]
fn test_slow_worker_times_out() {
    let spawner = ThreadSpawner::benchmarks(|_| {
        Benchmark::new(BenchConfig::new("cluster")).add_sync("slow", || {
            std::thread::sleep(Duration::from_millis(300));
        })
    });

    let mut config = config(1);
    config.cluster.timeout = Some(Duration::from_millis(100));
    let mut bench = Benchmark::with_role(config, Role::Parent).add_sync("slow", || {});

    let report = bench.run_parent(&spawner).unwrap();

    assert_eq!(
        report.results[0].error(),
        Some("worker 0: Timeout waiting for worker")
    );
}

#[test]
fn test_protocol_version_mismatch_fails_worker() {
    let spawner = ThreadSpawner::new(|_, mut parent| {
        let _ = parent.send(&WorkerMessage::Ready {
            protocol_version: u32::MAX,
            pid: 1,
        });
    });

    let report = parent(1).run_parent(&spawner).unwrap();

    let message = report.results[0].error().unwrap();
    assert!(message.contains("protocol version"), "{}", message);
}

#[test]
fn test_registry_mismatch_fails_only_that_task() {
    let spawner = ThreadSpawner::benchmarks(|_| {
        Benchmark::new(BenchConfig::new("cluster"))
            .add_sync("renamed", || {})
            .add_async("sleep", || async {})
    });

    let report = parent(2).run_parent(&spawner).unwrap();

    assert_eq!(
        report.results[0].error(),
        Some("worker 0: registry mismatch at task #0: expected 'counted', got 'renamed'")
    );
    assert!(report.results[1].is_success());
}

#[test]
fn test_first_spawn_failure_aborts_run() {
    struct Refusing;

    impl WorkerSpawner for Refusing {
        type Link = ThreadLink;

        fn spawn(&self, _worker: usize) -> Result<ThreadLink, SupervisorError> {
            Err(std::io::Error::other("fork refused").into())
        }
    }

    assert!(matches!(
        parent(2).run_parent(&Refusing),
        Err(EngineError::Spawn(_))
    ));
}
