//! Output Formatting
//!
//! Human-readable rendering of a report:
//! - title banner and platform block
//! - table of completed tasks (throughput, time per op, elapsed, count)
//! - table of failed tasks with their error
//! - cluster fan-out line, when the run used worker processes

use opsbench_report::{Report, SystemInfo};

const RULE_WIDTH: usize = 86;

/// Format a report for human-readable terminal display
pub fn format_human_output(report: &Report) -> String {
    let mut output = String::new();

    output.push('\n');
    output.push_str(&format!("opsbench: {}\n", report.config.title));
    output.push_str(&"=".repeat(RULE_WIDTH));
    output.push_str("\n\n");

    output.push_str(&format_platform(&report.meta.system));
    output.push('\n');

    let completed: Vec<_> = report.completed().collect();
    if !completed.is_empty() {
        let name_width = completed
            .iter()
            .map(|(r, _)| r.title.chars().count())
            .max()
            .unwrap_or(4)
            .max(4);

        output.push_str(&format!(
            "  {:<width$}  {:<12}  {:>16}  {:>12}  {:>9}  {:>14}  {:>5}\n",
            "Task",
            "Kind",
            "ops/sec",
            "ns/op",
            "elapsed",
            "count",
            "conc",
            width = name_width
        ));
        output.push_str(&format!("  {}\n", "-".repeat(name_width + 82)));

        for (result, m) in completed {
            let ns_per_op = m
                .nanos_per_op()
                .map(|ns| format!("{:.2}", ns))
                .unwrap_or_else(|| "-".to_string());
            output.push_str(&format!(
                "  {:<width$}  {:<12}  {:>16}  {:>12}  {:>8.3}s  {:>14}  {:>5}\n",
                result.title,
                result.kind.as_str(),
                group_digits(m.ops_per_sec.round() as u64),
                ns_per_op,
                m.elapsed_secs,
                group_digits(m.count),
                m.concurrency,
                width = name_width
            ));
        }
        output.push('\n');
    }

    let failed: Vec<_> = report.failed().collect();
    if !failed.is_empty() {
        output.push_str("Failed tasks\n");
        output.push_str(&"-".repeat(RULE_WIDTH));
        output.push('\n');
        for (result, message) in failed {
            output.push_str(&format!(
                "  ✗ #{} {} ({}): {}\n",
                result.index, result.title, result.kind, message
            ));
        }
        output.push('\n');
    }

    if let Some(cluster) = &report.config.cluster {
        output.push_str(&format!(
            "cluster: {} workers, {} concurrent per worker\n",
            cluster.workers, cluster.per_worker_concurrency
        ));
    }

    let summary = report.summary();
    output.push_str(&format!(
        "{} tasks: {} completed, {} failed\n",
        summary.total, summary.completed, summary.failed
    ));

    output
}

fn format_platform(system: &SystemInfo) -> String {
    let cores = match system.cpu_cores {
        1 => "1 logical core".to_string(),
        n => format!("{} logical cores", n),
    };
    format!(
        "  platform: {} {}\n  cpu:      {} ({})\n  memory:   {:.1} GB\n",
        system.os, system.arch, system.cpu, cores, system.memory_gb
    )
}

/// `1234567` as `1,234,567`
fn group_digits(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}
