//! CLI command implementations

use anyhow::{Context, Result};
use chrono::{TimeZone, Utc};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::detect::PatternFinding;
use crate::model::RawTransaction;
use crate::pipeline::Analyzer;
use crate::report::{AnalysisReport, JsonFileSink, LogSink, ReportSink};
use crate::valuation::{PriceOracle, StaticPriceOracle};

/// Options for the `analyze` command
#[derive(Debug, Clone)]
pub struct AnalyzeOptions {
    /// JSON array of raw transactions
    pub transactions: PathBuf,
    /// JSON array of `{symbol, timestamp, price_usd}`
    pub prices: Option<PathBuf>,
    /// Window end as unix seconds; defaults to the latest transaction
    pub window_end: Option<i64>,
    pub output: Option<PathBuf>,
    pub top: usize,
}

/// Run the full analysis over a transaction file
pub async fn analyze(config: &Config, options: AnalyzeOptions) -> Result<AnalysisReport> {
    let feed = tokio::fs::read_to_string(&options.transactions)
        .await
        .with_context(|| format!("Failed to read {}", options.transactions.display()))?;
    let records: Vec<RawTransaction> =
        serde_json::from_str(&feed).context("Transaction feed must be a JSON array")?;

    let oracle: Arc<dyn PriceOracle> = match &options.prices {
        Some(path) => {
            let data = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read {}", path.display()))?;
            let oracle = StaticPriceOracle::from_json(&data)?;
            info!(symbols = oracle.symbol_count(), "Loaded price points");
            Arc::new(oracle)
        }
        None => {
            warn!("No price file given, only pegged stablecoins will be priced");
            Arc::new(StaticPriceOracle::new())
        }
    };

    let mut analyzer = Analyzer::new(config.clone(), oracle)?;
    analyzer.ingest(&records);

    let window_end = match options.window_end {
        Some(secs) => Utc
            .timestamp_opt(secs, 0)
            .single()
            .with_context(|| format!("Invalid window end: {}", secs))?,
        None => analyzer.latest_timestamp().unwrap_or_else(Utc::now),
    };
    info!(window_end = %window_end, "Analyzing window");

    analyzer.refresh_scores(window_end);
    let snapshot = Arc::new(analyzer.snapshot(window_end));

    // Detectors are independent read-only passes over the snapshot
    let mut handles = Vec::new();
    for detector in analyzer.detectors() {
        let snapshot = snapshot.clone();
        handles.push(tokio::task::spawn_blocking(move || {
            let findings: Vec<PatternFinding> = detector.detect(&snapshot).collect();
            debug!(detector = detector.name(), findings = findings.len(), "Detector finished");
            findings
        }));
    }

    let mut findings = Vec::new();
    for handle in handles {
        findings.extend(handle.await.context("Detector task failed")?);
    }

    let top = (options.top > 0).then_some(options.top);
    let report = analyzer.report(&snapshot, findings, top);

    let mut sinks: Vec<Box<dyn ReportSink>> = vec![Box::new(LogSink::new(options.top.clamp(1, 10)))];
    if let Some(path) = &options.output {
        sinks.push(Box::new(JsonFileSink::new(path)));
    }
    for sink in &sinks {
        sink.publish(&report)
            .await
            .with_context(|| format!("Report sink {} failed", sink.name()))?;
    }

    Ok(report)
}

/// Print the effective configuration
pub fn show_config(config: &Config) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(config)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::PatternKind;

    fn addr(n: u64) -> String {
        format!("0x{n:040x}")
    }

    fn feed() -> String {
        let records: Vec<serde_json::Value> = (0..6u64)
            .map(|n| {
                let (from, to) = if n % 2 == 0 { (addr(1), addr(2)) } else { (addr(2), addr(1)) };
                serde_json::json!({
                    "chain": "eth",
                    "hash": format!("0x{n:064x}"),
                    "from": from,
                    "to": to,
                    "token_symbol": "USDC",
                    "amount": "10000",
                    "timestamp": 1_700_000_000 + n * 600,
                    "block_number": 18_000_000 + n,
                })
            })
            .chain(std::iter::once(serde_json::json!({ "chain": "eth", "hash": "0xbad" })))
            .collect();
        serde_json::to_string(&records).unwrap()
    }

    #[tokio::test]
    async fn test_analyze_writes_report() {
        let dir = tempfile::tempdir().unwrap();
        let transactions = dir.path().join("feed.json");
        let output = dir.path().join("report.json");
        std::fs::write(&transactions, feed()).unwrap();

        let report = analyze(
            &Config::default(),
            AnalyzeOptions {
                transactions,
                prices: None,
                window_end: None,
                output: Some(output.clone()),
                top: 0,
            },
        )
        .await
        .unwrap();

        // USDC is pegged, so no price file is needed
        assert_eq!(report.findings_of(PatternKind::WashTrading).count(), 1);
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.summary.unpriced_transactions, 0);

        let written: AnalysisReport =
            serde_json::from_str(&std::fs::read_to_string(&output).unwrap()).unwrap();
        assert_eq!(written.run_id, report.run_id);
    }

    #[tokio::test]
    async fn test_analyze_missing_feed_fails() {
        let dir = tempfile::tempdir().unwrap();
        let result = analyze(
            &Config::default(),
            AnalyzeOptions {
                transactions: dir.path().join("missing.json"),
                prices: None,
                window_end: None,
                output: None,
                top: 5,
            },
        )
        .await;
        assert!(result.is_err());
    }

    #[test]
    fn test_show_config() {
        assert!(show_config(&Config::default()).is_ok());
    }
}
