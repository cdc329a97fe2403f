//! Host and process metadata for the report header.
//!
//! CPU model and memory come from procfs; elsewhere they read as "Unknown"
//! and 0.

use chrono::Utc;
use opsbench_report::{ReportMeta, SystemInfo};

/// Metadata for a report produced by this process
pub fn build_report_meta() -> ReportMeta {
    ReportMeta {
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: Utc::now(),
        pid: std::process::id(),
        system: system_info(),
    }
}

/// Platform block shown above the results
pub fn system_info() -> SystemInfo {
    SystemInfo {
        os: std::env::consts::OS.to_string(),
        arch: std::env::consts::ARCH.to_string(),
        cpu: read_proc("/proc/cpuinfo")
            .and_then(|text| cpu_model(&text))
            .unwrap_or_else(|| "Unknown".to_string()),
        cpu_cores: std::thread::available_parallelism()
            .map(|n| n.get() as u32)
            .unwrap_or(1),
        memory_gb: read_proc("/proc/meminfo")
            .and_then(|text| total_memory_gb(&text))
            .unwrap_or(0.0),
    }
}

#[cfg(target_os = "linux")]
fn read_proc(path: &str) -> Option<String> {
    std::fs::read_to_string(path).ok()
}

#[cfg(not(target_os = "linux"))]
fn read_proc(_path: &str) -> Option<String> {
    None
}

/// Value of the first `key: value` line starting with `key`
fn field<'a>(text: &'a str, key: &str) -> Option<&'a str> {
    text.lines()
        .find(|line| line.starts_with(key))
        .and_then(|line| line.split_once(':'))
        .map(|(_, value)| value.trim())
}

fn cpu_model(cpuinfo: &str) -> Option<String> {
    field(cpuinfo, "model name").map(str::to_string)
}

/// `MemTotal` is reported in KiB
fn total_memory_gb(meminfo: &str) -> Option<f64> {
    let kib: u64 = field(meminfo, "MemTotal")?
        .split_whitespace()
        .next()?
        .parse()
        .ok()?;
    Some(kib as f64 / (1024.0 * 1024.0))
}
