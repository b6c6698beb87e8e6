//! Analysis pipeline
//!
//! feed → ingestion ledger → valuation → profile book + relationship index
//! → window snapshot → detectors → report.
//!
//! Per-record failures are collected, never fatal.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::detect::{self, PatternDetector, PatternFinding, Snapshot};
use crate::error::{Error, RecordError, Result};
use crate::labels::AddressBook;
use crate::model::{Admission, Chain, IngestLedger, RawTransaction, Transaction};
use crate::relationship::RelationshipIndex;
use crate::report::{AnalysisReport, ReportAssembler, ReportInput};
use crate::scoring::{ProfileBook, ProfitabilityAnalyzer};
use crate::valuation::{PriceOracle, ValuationService};

/// Counts from one ingestion batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestStats {
    pub accepted: usize,
    pub duplicates: usize,
    pub rejected: usize,
    /// Accepted but left without a USD value
    pub unpriced: usize,
    /// Subset of `unpriced` held back for review
    pub suspicious: usize,
}

/// Owns the streaming state of one analysis session
pub struct Analyzer {
    config: Config,
    labels: Arc<AddressBook>,
    valuation: ValuationService,
    ledger: IngestLedger,
    profiles: ProfileBook,
    relationships: RelationshipIndex,
    transactions: Vec<Transaction>,
    errors: Vec<RecordError>,
}

impl Analyzer {
    pub fn new(config: Config, oracle: Arc<dyn PriceOracle>) -> Result<Self> {
        let labels = Arc::new(AddressBook::from_config(&config.labels)?);
        let valuation = ValuationService::new(oracle, config.valuation.clone());
        let profiles = ProfileBook::new(config.scoring.clone());

        Ok(Self {
            config,
            labels,
            valuation,
            ledger: IngestLedger::new(),
            profiles,
            relationships: RelationshipIndex::new(),
            transactions: Vec::new(),
            errors: Vec::new(),
        })
    }

    /// Validate, price and index a batch of raw records
    pub fn ingest<'a>(&mut self, records: impl IntoIterator<Item = &'a RawTransaction>) -> IngestStats {
        let mut stats = IngestStats::default();

        for raw in records {
            let tx = match self.ledger.admit(raw) {
                Ok(Admission::Accepted(tx)) => tx,
                Ok(Admission::Duplicate) => {
                    stats.duplicates += 1;
                    continue;
                }
                Err(e) => {
                    stats.rejected += 1;
                    warn!(hash = ?raw.hash, error = %e, "Rejected transaction");
                    let chain = raw.chain.as_deref().and_then(|c| c.parse::<Chain>().ok());
                    if let Some(record) = RecordError::from_error(chain, &e) {
                        self.errors.push(record);
                    }
                    continue;
                }
            };

            let tx = match self.valuation.price_transaction(tx) {
                Ok(priced) => priced,
                Err((unpriced, e)) => {
                    stats.unpriced += 1;
                    if matches!(e, Error::SuspiciousValue { .. }) {
                        stats.suspicious += 1;
                    }
                    if let Some(record) = RecordError::from_error(Some(unpriced.chain), &e) {
                        self.errors.push(record.with_hash(&unpriced.hash));
                    }
                    unpriced
                }
            };

            self.record(tx);
            stats.accepted += 1;
        }

        info!(
            accepted = stats.accepted,
            duplicates = stats.duplicates,
            rejected = stats.rejected,
            unpriced = stats.unpriced,
            suspicious = stats.suspicious,
            "Ingested batch"
        );
        stats
    }

    /// Index an already validated transaction
    pub fn record(&mut self, tx: Transaction) {
        self.profiles.record(&tx);
        self.relationships.record(&tx);
        self.transactions.push(tx);
    }

    /// End of the default window: the latest ingested timestamp
    pub fn latest_timestamp(&self) -> Option<DateTime<Utc>> {
        self.transactions.iter().map(|tx| tx.timestamp).max()
    }

    /// Freeze the window ending at `window_end`
    pub fn snapshot(&self, window_end: DateTime<Utc>) -> Snapshot {
        Snapshot::build(
            &self.transactions,
            &self.relationships,
            self.labels.clone(),
            window_end,
            &self.config.window,
        )
    }

    pub fn detectors(&self) -> Vec<Arc<dyn PatternDetector>> {
        detect::default_detectors(
            self.config.wash.clone(),
            self.config.coordinated.clone(),
            self.config.pump_dump.clone(),
        )
    }

    /// Rebalance scores and mark stale profiles as of `now`
    pub fn refresh_scores(&self, now: DateTime<Utc>) {
        self.profiles.rebalance();
        let stale = self.profiles.mark_stale(now);
        debug!(stale, "Profiles refreshed");
    }

    /// Assemble a report from findings produced over `snapshot`
    pub fn report(&self, snapshot: &Snapshot, findings: Vec<PatternFinding>, top: Option<usize>) -> AnalysisReport {
        let assembler = ReportAssembler::new(self.labels.clone(), self.config.scoring.false_positive.clone());
        let assembler = match top {
            Some(n) => assembler.with_top(n),
            None => assembler,
        };
        let traders = ProfitabilityAnalyzer::new(self.config.scoring.profitability.clone()).analyze(
            &self.transactions,
            &self.labels,
            self.config.scoring.identity,
        );

        assembler.assemble(ReportInput {
            window: snapshot.window(),
            oracle: self.valuation.oracle_name(),
            profiles: self.profiles.ranked(),
            findings,
            errors: self.errors.clone(),
            transactions: &self.transactions,
            duplicates: self.ledger.duplicates(),
            traders,
        })
    }

    /// Full synchronous run over the window ending at `window_end`
    pub fn analyze(&self, window_end: DateTime<Utc>, top: Option<usize>) -> AnalysisReport {
        self.refresh_scores(window_end);
        let snapshot = self.snapshot(window_end);
        let findings = detect::run_all(&self.detectors(), &snapshot);
        self.report(&snapshot, findings, top)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn profiles(&self) -> &ProfileBook {
        &self.profiles
    }

    pub fn relationships(&self) -> &RelationshipIndex {
        &self.relationships
    }

    pub fn errors(&self) -> &[RecordError] {
        &self.errors
    }

    pub fn transactions(&self) -> &[Transaction] {
        &self.transactions
    }
}
