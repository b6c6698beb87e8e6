//! Report sinks
//!
//! Where finished reports go. The core never does I/O itself; sinks are
//! handed a report by the caller.

use async_trait::async_trait;
use std::path::PathBuf;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::report::AnalysisReport;

/// Destination for analysis reports
#[async_trait]
pub trait ReportSink: Send + Sync {
    /// Sink name for logging
    fn name(&self) -> &'static str;

    async fn publish(&self, report: &AnalysisReport) -> Result<()>;
}

/// Writes the report as JSON to a file
pub struct JsonFileSink {
    path: PathBuf,
    pretty: bool,
}

impl JsonFileSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            pretty: true,
        }
    }

    pub fn compact(mut self) -> Self {
        self.pretty = false;
        self
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }
}

#[async_trait]
impl ReportSink for JsonFileSink {
    fn name(&self) -> &'static str {
        "json_file"
    }

    async fn publish(&self, report: &AnalysisReport) -> Result<()> {
        let data = if self.pretty {
            serde_json::to_string_pretty(report)?
        } else {
            serde_json::to_string(report)?
        };

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                Error::Sink(format!("Failed to create {}: {}", parent.display(), e))
            })?;
        }

        tokio::fs::write(&self.path, data).await.map_err(|e| {
            Error::Sink(format!("Failed to write {}: {}", self.path.display(), e))
        })?;

        debug!(path = %self.path.display(), run_id = %report.run_id, "Report written");
        Ok(())
    }
}

/// Logs a report summary and the top entries
pub struct LogSink {
    top: usize,
}

impl LogSink {
    pub fn new(top: usize) -> Self {
        Self { top }
    }
}

#[async_trait]
impl ReportSink for LogSink {
    fn name(&self) -> &'static str {
        "log"
    }

    async fn publish(&self, report: &AnalysisReport) -> Result<()> {
        let summary = &report.summary;
        info!(
            run_id = %report.run_id,
            profiles = report.profiles.len(),
            findings = report.findings.len(),
            errors = report.errors.len(),
            unpriced = summary.unpriced_transactions,
            suspicious = summary.suspicious_records,
            false_positives = summary.false_positives,
            profitable_traders = summary.profitable_traders,
            "Analysis complete"
        );

        for entry in report.top_profiles(self.top) {
            let profile = &entry.profile;
            info!(
                address = %profile.address(),
                score = %format!("{:.1}", profile.score),
                tier = %profile.tier,
                volume_usd = %profile.total_volume_usd.round_dp(2),
                transactions = profile.transaction_count,
                label = entry.label.as_ref().map(|l| l.name.as_str()).unwrap_or("-"),
                flagged = entry.false_positive.is_some(),
                "Whale"
            );
        }

        for finding in report.findings.iter().take(self.top) {
            info!(
                kind = %finding.pattern_kind,
                score = %format!("{:.1}", finding.suspicion_score),
                participants = finding.participants.len(),
                start = %finding.time_window.start,
                "Pattern"
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::tests::sample_report;

    #[tokio::test]
    async fn test_json_file_sink_writes_report() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out").join("report.json");
        let sink = JsonFileSink::new(&path);
        let report = sample_report();

        sink.publish(&report).await.unwrap();

        let written = tokio::fs::read_to_string(&path).await.unwrap();
        let back: AnalysisReport = serde_json::from_str(&written).unwrap();
        assert_eq!(back.run_id, report.run_id);
        assert_eq!(back.findings.len(), report.findings.len());
        assert!(written.contains('\n'));
    }

    #[tokio::test]
    async fn test_compact_output() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.json");
        JsonFileSink::new(&path)
            .compact()
            .publish(&sample_report())
            .await
            .unwrap();

        let written = std::fs::read_to_string(&path).unwrap();
        assert!(!written.contains('\n'));
    }

    #[tokio::test]
    async fn test_unwritable_path_is_sink_error() {
        let dir = tempfile::tempdir().unwrap();
        // A file where the parent directory should be
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, "x").unwrap();

        let err = JsonFileSink::new(blocker.join("report.json"))
            .publish(&sample_report())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Sink(_)));
    }

    #[tokio::test]
    async fn test_log_sink() {
        assert!(LogSink::new(3).publish(&sample_report()).await.is_ok());
    }
}
