//! JSON and HTML run reports built from stored results.

use std::fmt::Write as _;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;

use super::storage::{ResultSink, ResultsSnapshot, StoreError};

const METRICS_FILE_NAME: &str = "metrics.json";
const HTML_FILE_NAME: &str = "report.html";
const RECENT_RESULTS: usize = 50;

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("failed to read results: {0}")]
    Store(#[from] StoreError),
    #[error("failed to write report: {0}")]
    Io(#[from] io::Error),
    #[error("failed to encode metrics: {0}")]
    Json(#[from] serde_json::Error),
}

/// Contents of `metrics.json`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportMetrics {
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub duration_seconds: f64,
    pub total_checked: u64,
    pub available_count: u64,
    pub taken_count: u64,
    pub unknown_count: u64,
    pub performance_identifiers_per_second: f64,
}

impl ReportMetrics {
    pub fn from_snapshot(snapshot: &ResultsSnapshot) -> Self {
        let duration = match (snapshot.first_checked_at, snapshot.last_checked_at) {
            (Some(start), Some(end)) => (end - start).num_milliseconds().max(0) as f64 / 1000.0,
            _ => 0.0,
        };
        let performance = if duration > 0.0 {
            snapshot.total as f64 / duration
        } else {
            0.0
        };

        Self {
            start_time: snapshot.first_checked_at.map(|t| t.to_rfc3339()),
            end_time: snapshot.last_checked_at.map(|t| t.to_rfc3339()),
            duration_seconds: round2(duration),
            total_checked: snapshot.total,
            available_count: snapshot.available,
            taken_count: snapshot.taken,
            unknown_count: snapshot.unknown,
            performance_identifiers_per_second: round2(performance),
        }
    }
}

/// Paths written by a successful report run.
#[derive(Debug, Clone)]
pub struct ReportFiles {
    pub metrics: PathBuf,
    pub html: PathBuf,
}

#[derive(Debug, Clone)]
pub struct ReportGenerator {
    output_dir: PathBuf,
}

impl ReportGenerator {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn generate(&self, sink: &dyn ResultSink) -> Result<ReportFiles, ReportError> {
        let snapshot = sink.snapshot(RECENT_RESULTS)?;
        let metrics = ReportMetrics::from_snapshot(&snapshot);
        fs::create_dir_all(&self.output_dir)?;

        let metrics_path = self.output_dir.join(METRICS_FILE_NAME);
        fs::write(&metrics_path, serde_json::to_string_pretty(&metrics)?)?;
        log::info!("json report written to {}", metrics_path.display());

        let html_path = self.output_dir.join(HTML_FILE_NAME);
        fs::write(&html_path, render_html(&metrics, &snapshot))?;
        log::info!("html report written to {}", html_path.display());

        Ok(ReportFiles {
            metrics: metrics_path,
            html: html_path,
        })
    }
}

fn render_html(metrics: &ReportMetrics, snapshot: &ResultsSnapshot) -> String {
    let mut rows = String::new();
    for result in &snapshot.recent {
        let _ = writeln!(
            rows,
            "      <tr class=\"{status}\"><td>{id}</td><td>{status}</td><td>{at}</td></tr>",
            id = html_escape::encode_text(&result.identifier),
            status = result.outcome,
            at = result.checked_at.to_rfc3339(),
        );
    }

    let start = metrics.start_time.as_deref().unwrap_or("-");
    let end = metrics.end_time.as_deref().unwrap_or("-");

    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
  <meta charset="utf-8">
  <title>Sweep report</title>
  <style>
    body {{ font-family: sans-serif; margin: 2rem; }}
    table {{ border-collapse: collapse; }}
    td, th {{ border: 1px solid #ccc; padding: 0.3rem 0.6rem; }}
    tr.available td {{ background: #e6f7e6; }}
    tr.unknown td {{ background: #fff7e0; }}
  </style>
</head>
<body>
  <h1>Sweep report</h1>
  <ul>
    <li>Total checked: {total}</li>
    <li>Available: {available}</li>
    <li>Taken: {taken}</li>
    <li>Unknown: {unknown}</li>
    <li>Window: {start} &rarr; {end} ({duration:.2}s)</li>
    <li>Throughput: {rate:.2} identifiers/s</li>
  </ul>
  <h2>Latest results</h2>
  <table>
    <thead><tr><th>Identifier</th><th>Status</th><th>Checked at</th></tr></thead>
    <tbody>
{rows}    </tbody>
  </table>
</body>
</html>
"#,
        total = metrics.total_checked,
        available = metrics.available_count,
        taken = metrics.taken_count,
        unknown = metrics.unknown_count,
        start = html_escape::encode_text(start),
        end = html_escape::encode_text(end),
        duration = metrics.duration_seconds,
        rate = metrics.performance_identifiers_per_second,
        rows = rows,
    )
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::storage::StoredResult;
    use crate::probe::Outcome;
    use chrono::{Duration, Utc};

    struct FixedSink(ResultsSnapshot);

    impl ResultSink for FixedSink {
        fn save(&self, _identifier: &str, _outcome: Outcome) -> Result<(), StoreError> {
            Ok(())
        }

        fn snapshot(&self, _recent: usize) -> Result<ResultsSnapshot, StoreError> {
            Ok(self.0.clone())
        }
    }

    fn sample_snapshot() -> ResultsSnapshot {
        let start = Utc::now();
        let end = start + Duration::seconds(4);
        ResultsSnapshot {
            total: 2,
            available: 1,
            taken: 1,
            unknown: 0,
            first_checked_at: Some(start),
            last_checked_at: Some(end),
            recent: vec![
                StoredResult {
                    identifier: "<script>".into(),
                    outcome: Outcome::Taken,
                    checked_at: end,
                },
                StoredResult {
                    identifier: "alpha".into(),
                    outcome: Outcome::Available,
                    checked_at: start,
                },
            ],
        }
    }

    #[test]
    fn metrics_compute_throughput() {
        let metrics = ReportMetrics::from_snapshot(&sample_snapshot());
        assert_eq!(metrics.duration_seconds, 4.0);
        assert_eq!(metrics.performance_identifiers_per_second, 0.5);
        assert_eq!(metrics.total_checked, 2);
    }

    #[test]
    fn empty_snapshot_has_zero_rates() {
        let metrics = ReportMetrics::from_snapshot(&ResultsSnapshot::default());
        assert_eq!(metrics.duration_seconds, 0.0);
        assert_eq!(metrics.performance_identifiers_per_second, 0.0);
        assert!(metrics.start_time.is_none());
    }

    #[test]
    fn writes_both_files_and_escapes_identifiers() {
        let dir = tempfile::tempdir().unwrap();
        let generator = ReportGenerator::new(dir.path().join("reports"));
        let files = generator.generate(&FixedSink(sample_snapshot())).unwrap();

        let metrics: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&files.metrics).unwrap()).unwrap();
        assert_eq!(metrics["available_count"], 1);

        let html = fs::read_to_string(&files.html).unwrap();
        assert!(html.contains("&lt;script&gt;"));
        assert!(!html.contains("<td><script>"));
        assert!(html.contains("<td>alpha</td>"));
    }
}
