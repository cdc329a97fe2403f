//! Configuration
//!
//! A run is configured in three layers, later ones winning:
//! 1. [`BenchConfig`] as built in code (defaults below)
//! 2. an `opsbench.toml` discovered by walking up from the current directory
//! 3. command-line flags
//!
//! ```toml
//! [runner]
//! title = "codec"
//! duration = "2s"
//! concurrency = 100
//! delay = "1s"
//!
//! [cluster]
//! enabled = true
//! workers = 8
//! timeout = "5m"
//!
//! [output]
//! format = "json"
//! path = "target/opsbench.json"
//! ```

use opsbench_report::{ClusterInfo, RunConfig};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Name of the configuration file looked up by [`FileConfig::discover`]
pub const CONFIG_FILE_NAME: &str = "opsbench.toml";

/// Rejected configuration values
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// The measurement budget is zero
    #[error("duration must be positive")]
    ZeroDuration,

    /// Concurrency is zero
    #[error("concurrency must be at least 1")]
    ZeroConcurrency,

    /// Cluster mode with zero workers
    #[error("cluster worker count must be at least 1")]
    ZeroWorkers,

    /// A seconds value is negative or not finite
    #[error("invalid {field} seconds: {value}")]
    InvalidSeconds {
        /// Setting the value was given for
        field: &'static str,
        /// Offending value as written
        value: String,
    },
}

/// Configuration of one run; immutable once the run starts
#[derive(Debug, Clone, PartialEq)]
pub struct BenchConfig {
    /// Report title
    pub title: String,
    /// Measurement budget per task
    pub duration: Duration,
    /// Concurrent workers for Async and Callback tasks; ignored by sync kinds
    pub concurrency: u32,
    /// Pause before each task
    pub delay: Duration,
    /// Multi-process fan-out
    pub cluster: ClusterConfig,
}

/// Multi-process fan-out settings
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterConfig {
    /// Run the registry in `workers` child processes and merge their results
    pub enabled: bool,
    /// Number of child processes
    pub workers: u32,
    /// Give up on a child that has not reported after this long
    pub timeout: Option<Duration>,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            workers: logical_cpus(),
            timeout: None,
        }
    }
}

impl Default for BenchConfig {
    fn default() -> Self {
        Self {
            title: "default".to_string(),
            duration: Duration::from_secs(2),
            concurrency: 100,
            delay: Duration::from_secs(1),
            cluster: ClusterConfig::default(),
        }
    }
}

impl BenchConfig {
    /// Defaults with the given title
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Self::default()
        }
    }

    /// Set the measurement budget per task
    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }

    /// Set the concurrency for Async and Callback tasks
    pub fn with_concurrency(mut self, concurrency: u32) -> Self {
        self.concurrency = concurrency;
        self
    }

    /// Set the pause before each task
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Enable cluster mode with `workers` child processes
    pub fn with_cluster(mut self, workers: u32) -> Self {
        self.cluster.enabled = true;
        self.cluster.workers = workers;
        self
    }

    /// Convert fractional seconds, rejecting negative and non-finite values
    pub fn seconds(field: &'static str, secs: f64) -> Result<Duration, ConfigError> {
        Duration::try_from_secs_f64(secs).map_err(|_| ConfigError::InvalidSeconds {
            field,
            value: secs.to_string(),
        })
    }

    /// Check the values a run depends on
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.duration.is_zero() {
            return Err(ConfigError::ZeroDuration);
        }
        if self.concurrency == 0 {
            return Err(ConfigError::ZeroConcurrency);
        }
        if self.cluster.enabled && self.cluster.workers == 0 {
            return Err(ConfigError::ZeroWorkers);
        }
        Ok(())
    }

    /// Concurrency assigned to each cluster worker: `ceil(concurrency / workers)`
    pub fn per_worker_concurrency(&self) -> u32 {
        self.concurrency.div_ceil(self.cluster.workers.max(1))
    }

    /// Overlay values present in a configuration file
    pub fn apply_file(&mut self, file: &FileConfig) -> anyhow::Result<()> {
        let runner = &file.runner;
        if let Some(title) = &runner.title {
            self.title = title.clone();
        }
        if let Some(duration) = &runner.duration {
            self.duration = Duration::from_nanos(FileConfig::parse_duration(duration)?);
        }
        if let Some(concurrency) = runner.concurrency {
            self.concurrency = concurrency;
        }
        if let Some(delay) = &runner.delay {
            self.delay = Duration::from_nanos(FileConfig::parse_duration(delay)?);
        }

        let cluster = &file.cluster;
        if let Some(enabled) = cluster.enabled {
            self.cluster.enabled = enabled;
        }
        if let Some(workers) = cluster.workers {
            self.cluster.workers = workers;
        }
        if let Some(timeout) = &cluster.timeout {
            self.cluster.timeout = Some(Duration::from_nanos(FileConfig::parse_duration(timeout)?));
        }
        Ok(())
    }

    /// Snapshot for the report
    pub fn run_config(&self) -> RunConfig {
        RunConfig {
            title: self.title.clone(),
            duration_secs: self.duration.as_secs_f64(),
            concurrency: self.concurrency,
            delay_secs: self.delay.as_secs_f64(),
            cluster: self.cluster.enabled.then(|| ClusterInfo {
                workers: self.cluster.workers,
                per_worker_concurrency: self.per_worker_concurrency(),
            }),
        }
    }
}

fn logical_cpus() -> u32 {
    std::thread::available_parallelism()
        .map(|n| n.get() as u32)
        .unwrap_or(1)
}

/// Contents of `opsbench.toml`; every key is optional
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FileConfig {
    /// Measurement settings
    #[serde(default)]
    pub runner: RunnerSection,
    /// Process fan-out settings
    #[serde(default)]
    pub cluster: ClusterSection,
    /// Report rendering settings
    #[serde(default)]
    pub output: OutputSection,
}

/// `[runner]` table
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunnerSection {
    /// Benchmark title shown in the report
    pub title: Option<String>,
    /// Measurement budget per task (e.g. "2s", "500ms")
    pub duration: Option<String>,
    /// Concurrent workers for async and callback tasks
    pub concurrency: Option<u32>,
    /// Pause before each task
    pub delay: Option<String>,
}

/// `[cluster]` table
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClusterSection {
    /// Fan the run out over worker processes
    pub enabled: Option<bool>,
    /// Number of worker processes
    pub workers: Option<u32>,
    /// Per-worker deadline (e.g. "5m")
    pub timeout: Option<String>,
}

/// `[output]` table
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OutputSection {
    /// "human" or "json"
    pub format: Option<String>,
    /// Write the rendered report here instead of stdout
    pub path: Option<PathBuf>,
}

impl FileConfig {
    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Try to discover and load configuration by walking up from current directory
    pub fn discover() -> Option<Self> {
        let mut dir = std::env::current_dir().ok()?;
        loop {
            let config_path = dir.join(CONFIG_FILE_NAME);
            if config_path.exists() {
                return match Self::load(&config_path) {
                    Ok(config) => Some(config),
                    Err(e) => {
                        tracing::warn!("ignoring {}: {}", config_path.display(), e);
                        None
                    }
                };
            }
            if !dir.pop() {
                break;
            }
        }
        None
    }

    /// Parse duration string (e.g., "3s", "500ms", "2m", bare "1.5") to nanoseconds
    pub fn parse_duration(s: &str) -> anyhow::Result<u64> {
        let s = s.trim();
        if s.is_empty() {
            return Err(anyhow::anyhow!("Empty duration string"));
        }

        // Find where the number ends and unit begins
        let (num_part, unit_part) = s
            .char_indices()
            .find(|(_, c)| c.is_alphabetic() || *c == 'µ')
            .map(|(i, _)| s.split_at(i))
            .unwrap_or((s, "s"));

        let value: f64 = num_part
            .trim()
            .parse()
            .map_err(|_| anyhow::anyhow!("Invalid duration number: {}", num_part))?;
        if !value.is_finite() || value < 0.0 {
            return Err(anyhow::anyhow!("Duration must be a non-negative number: {}", s));
        }

        let multiplier: u64 = match unit_part.to_lowercase().as_str() {
            "ns" => 1,
            "us" | "µs" => 1_000,
            "ms" => 1_000_000,
            "s" | "" => 1_000_000_000,
            "m" | "min" => 60_000_000_000,
            _ => return Err(anyhow::anyhow!("Unknown duration unit: {}", unit_part)),
        };

        Ok((value * multiplier as f64) as u64)
    }
}
