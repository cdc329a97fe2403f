//! JSON Output

use crate::report::Report;

/// Generate a prettified JSON report.
pub fn generate_json_report(report: &Report) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::tests::sample_report;

    #[test]
    fn test_json_carries_status_tags() {
        let json = generate_json_report(&sample_report()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();

        let results = value["results"].as_array().unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0]["status"], "completed");
        assert_eq!(results[0]["kind"], "sync-batched");
        assert_eq!(results[0]["count"], 20_000);
        assert_eq!(results[1]["status"], "failed");
        assert_eq!(results[1]["message"], "socket closed");
        assert_eq!(value["config"]["title"], "codec");
    }

    #[test]
    fn test_json_parses_back() {
        let report = sample_report();
        let json = generate_json_report(&report).unwrap();
        let parsed: Report = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.results, report.results);
    }
}
