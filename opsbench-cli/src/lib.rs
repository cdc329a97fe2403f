#![warn(missing_docs)]
//! opsbench CLI Library
//!
//! Orchestration and command-line front end for throughput benchmarks.
//! Build a [`Benchmark`], register tasks, and hand control to
//! [`Benchmark::run_and_exit`] from `main`:
//!
//! ```ignore
//! use opsbench::prelude::*;
//!
//! fn main() {
//!     Benchmark::new(BenchConfig::new("hashing"))
//!         .add_sync("fnv", || fnv(b"opsbench"))
//!         .add_async("lookup", || async { cache.get("key").await })
//!         .run_and_exit();
//! }
//! ```
//!
//! With cluster mode enabled the same binary is re-executed once per worker;
//! every worker rebuilds the same registry from `main`, so only configuration
//! and results cross process boundaries.

mod config;
mod engine;
mod executor;
mod supervisor;
mod transport;
mod worker;

pub use config::*;
pub use engine::{Benchmark, EngineError, Role};
pub use executor::{Executor, build_report_meta, format_human_output, system_info};
pub use supervisor::{ProcessSpawner, Supervisor, WorkerHandle};
pub use transport::{SupervisorError, SupervisorLink, WorkerLink, WorkerSpawner};
pub use worker::{PipeSupervisorLink, WorkerMain};

use clap::Parser;
use opsbench_report::{OutputFormat, generate_json_report};
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// opsbench CLI arguments
#[derive(Parser, Debug, Default)]
#[command(name = "opsbench")]
#[command(author, version, about = "opsbench - throughput of sync, async and callback workloads")]
pub struct Cli {
    /// Measurement budget per task (e.g. "2s", "500ms", "0.5")
    #[arg(long)]
    pub duration: Option<String>,

    /// Concurrent workers for async and callback tasks
    #[arg(short, long)]
    pub concurrency: Option<u32>,

    /// Pause before each task (e.g. "1s", "0")
    #[arg(long)]
    pub delay: Option<String>,

    /// Fan the run out over worker processes
    #[arg(long)]
    pub cluster: bool,

    /// Number of worker processes in cluster mode
    #[arg(long)]
    pub workers: Option<u32>,

    /// Give up on a worker that has not reported after this long
    #[arg(long)]
    pub timeout: Option<String>,

    /// Output format: human, json
    #[arg(long)]
    pub format: Option<String>,

    /// Output file (stdout if not specified)
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Configuration file (default: opsbench.toml, searched upwards)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long)]
    pub verbose: bool,

    /// Internal: marks a spawned cluster worker
    #[arg(long = "opsbench-worker", hide = true)]
    pub opsbench_worker: bool,

    /// Absorb cargo bench's --bench flag
    #[arg(long, hide = true)]
    pub bench: bool,
}

impl Cli {
    /// Overlay the flags that were given on `config`
    pub fn apply(&self, config: &mut BenchConfig) -> anyhow::Result<()> {
        if let Some(duration) = &self.duration {
            config.duration = Duration::from_nanos(FileConfig::parse_duration(duration)?);
        }
        if let Some(concurrency) = self.concurrency {
            config.concurrency = concurrency;
        }
        if let Some(delay) = &self.delay {
            config.delay = Duration::from_nanos(FileConfig::parse_duration(delay)?);
        }
        if self.cluster {
            config.cluster.enabled = true;
        }
        if let Some(workers) = self.workers {
            config.cluster.workers = workers;
        }
        if let Some(timeout) = &self.timeout {
            config.cluster.timeout = Some(Duration::from_nanos(FileConfig::parse_duration(timeout)?));
        }
        Ok(())
    }
}

/// Initialize stderr logging; `RUST_LOG` wins over the verbosity flag
pub fn init_tracing(verbose: bool) {
    let default = if verbose {
        "opsbench=debug"
    } else {
        "opsbench=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    // A subscriber may already be installed by an embedding application
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Run a benchmark with pre-parsed arguments.
///
/// Configuration is layered as code, then `opsbench.toml`, then flags. The
/// rendered report goes to `--output` (or `[output] path`) or stdout.
pub fn run_with_cli(mut bench: Benchmark, cli: Cli) -> anyhow::Result<()> {
    init_tracing(cli.verbose);

    let file = match &cli.config {
        Some(path) => FileConfig::load(path)?,
        None => FileConfig::discover().unwrap_or_default(),
    };
    bench.config_mut().apply_file(&file)?;
    cli.apply(bench.config_mut())?;

    let format: OutputFormat = cli
        .format
        .as_deref()
        .or(file.output.format.as_deref())
        .map(str::parse::<OutputFormat>)
        .transpose()
        .map_err(|e: String| anyhow::anyhow!(e))?
        .unwrap_or_default();
    let output = cli.output.clone().or(file.output.path.clone());

    // Workers exit inside run() after reporting to their parent
    let report = bench.run()?;

    let rendered = match format {
        OutputFormat::Human => format_human_output(&report),
        OutputFormat::Json => generate_json_report(&report)?,
    };

    match output {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&path, rendered)?;
            info!("report written to {}", path.display());
        }
        None => print!("{}", rendered),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_flags_override_config() {
        let cli = Cli::parse_from([
            "bench",
            "--duration",
            "250ms",
            "-c",
            "8",
            "--delay",
            "0",
            "--cluster",
            "--workers",
            "3",
            "--timeout",
            "30s",
        ]);

        let mut config = BenchConfig::new("flags");
        cli.apply(&mut config).unwrap();

        assert_eq!(config.duration, Duration::from_millis(250));
        assert_eq!(config.concurrency, 8);
        assert_eq!(config.delay, Duration::ZERO);
        assert!(config.cluster.enabled);
        assert_eq!(config.cluster.workers, 3);
        assert_eq!(config.cluster.timeout, Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_hidden_flags_are_absorbed() {
        let cli = Cli::parse_from(["bench", "--bench", "--opsbench-worker"]);
        assert!(cli.bench);
        assert!(cli.opsbench_worker);

        let mut config = BenchConfig::default();
        cli.apply(&mut config).unwrap();
        assert_eq!(config, BenchConfig::default());
    }

    #[test]
    fn test_invalid_duration_flag_is_an_error() {
        let cli = Cli::parse_from(["bench", "--duration", "soon"]);
        assert!(cli.apply(&mut BenchConfig::default()).is_err());
    }

    #[test]
    fn test_run_with_cli_writes_json_report() {
        let dir = std::env::temp_dir().join(format!("opsbench-cli-{}", std::process::id()));
        let path = dir.join("report.json");
        let config_path = dir.join("opsbench.toml");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(&config_path, "[runner]\ntitle = \"from-file\"\n").unwrap();

        let bench = Benchmark::with_role(BenchConfig::new("cli"), Role::Standalone)
            .add_sync("noop", || {});
        let args: Vec<std::ffi::OsString> = vec![
            "bench".into(),
            "--duration".into(),
            "10ms".into(),
            "--delay".into(),
            "0".into(),
            "--format".into(),
            "json".into(),
            "--config".into(),
            config_path.clone().into_os_string(),
            "--output".into(),
            path.clone().into_os_string(),
        ];
        let cli = Cli::parse_from(args);

        run_with_cli(bench, cli).unwrap();

        let json: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(json["config"]["title"], "from-file");
        assert_eq!(json["results"][0]["status"], "completed");

        let _ = std::fs::remove_dir_all(&dir);
    }
}
