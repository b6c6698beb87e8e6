//! Report Assembler
//!
//! Merges ranked profiles, findings and per-record errors into one
//! serialisable `AnalysisReport`.

pub mod sink;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::detect::{sort_findings, PatternFinding, PatternKind, TimeWindow};
use crate::error::{RecordError, RecordErrorKind};
use crate::labels::{AddressBook, AddressLabel};
use crate::model::{Chain, Transaction};
use crate::scoring::false_positive::{self, FalsePositiveConfig, FalsePositiveReason};
use crate::scoring::{AddressProfile, ProfileKey, TraderPerformance, WhaleTier};

pub use sink::{JsonFileSink, LogSink, ReportSink};

/// A profile with its label, exchange-likeness flag and trading record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileEntry {
    pub profile: AddressProfile,
    pub label: Option<AddressLabel>,
    pub false_positive: Option<FalsePositiveReason>,
    /// Present when the address closed at least one trading session
    pub trader: Option<TraderPerformance>,
}

/// Priced activity on one chain
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChainVolume {
    pub priced_transactions: u64,
    pub volume_usd: Decimal,
}

/// Aggregate counts for a report
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReportSummary {
    pub profiles_by_tier: BTreeMap<WhaleTier, usize>,
    pub findings_by_kind: BTreeMap<PatternKind, usize>,
    pub volume_by_chain: BTreeMap<Chain, ChainVolume>,
    /// Includes transactions held back as suspicious
    pub unpriced_transactions: u64,
    pub rejected_records: usize,
    pub suspicious_records: usize,
    pub duplicate_records: u64,
    pub false_positives: usize,
    pub profitable_traders: usize,
}

/// Output of one analysis run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub run_id: String,
    pub generated_at: DateTime<Utc>,
    pub window: TimeWindow,
    pub oracle: String,
    /// Score descending
    pub profiles: Vec<ProfileEntry>,
    /// Suspicion descending, then earliest start
    pub findings: Vec<PatternFinding>,
    pub errors: Vec<RecordError>,
    pub summary: ReportSummary,
}

impl AnalysisReport {
    pub fn top_profiles(&self, n: usize) -> &[ProfileEntry] {
        &self.profiles[..n.min(self.profiles.len())]
    }

    pub fn findings_of(&self, kind: PatternKind) -> impl Iterator<Item = &PatternFinding> {
        self.findings.iter().filter(move |f| f.pattern_kind == kind)
    }
}

/// Everything the assembler needs from a run
pub struct ReportInput<'a> {
    pub window: TimeWindow,
    pub oracle: &'a str,
    pub profiles: Vec<AddressProfile>,
    pub findings: Vec<PatternFinding>,
    pub errors: Vec<RecordError>,
    pub transactions: &'a [Transaction],
    pub duplicates: u64,
    pub traders: BTreeMap<ProfileKey, TraderPerformance>,
}

/// Builds reports with labels and false-positive flags attached
pub struct ReportAssembler {
    labels: Arc<AddressBook>,
    false_positive: FalsePositiveConfig,
    top: Option<usize>,
}

impl ReportAssembler {
    pub fn new(labels: Arc<AddressBook>, false_positive: FalsePositiveConfig) -> Self {
        Self {
            labels,
            false_positive,
            top: None,
        }
    }

    /// Keep only the `n` highest-scoring profiles
    pub fn with_top(mut self, n: usize) -> Self {
        self.top = Some(n);
        self
    }

    fn label_of(&self, profile: &AddressProfile) -> Option<AddressLabel> {
        match profile.key.chain {
            Some(chain) => self.labels.get(chain, profile.address()).cloned(),
            None => profile
                .distinct_chains
                .iter()
                .find_map(|chain| self.labels.get(*chain, profile.address()))
                .cloned(),
        }
    }

    pub fn assemble(&self, input: ReportInput<'_>) -> AnalysisReport {
        let ReportInput {
            window,
            oracle,
            mut profiles,
            mut findings,
            errors,
            transactions,
            duplicates,
            mut traders,
        } = input;

        profiles.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.key.cmp(&b.key)));
        sort_findings(&mut findings);

        let count_kind = |kind: RecordErrorKind| errors.iter().filter(|e| e.kind == kind).count();
        let mut summary = ReportSummary {
            rejected_records: count_kind(RecordErrorKind::MalformedTransaction),
            suspicious_records: count_kind(RecordErrorKind::SuspiciousValue),
            duplicate_records: duplicates,
            ..Default::default()
        };
        for tx in transactions {
            match tx.usd_value {
                Some(usd) => {
                    let chain = summary.volume_by_chain.entry(tx.chain).or_default();
                    chain.priced_transactions += 1;
                    chain.volume_usd = chain.volume_usd.saturating_add(usd);
                }
                None => summary.unpriced_transactions += 1,
            }
        }
        for finding in &findings {
            *summary.findings_by_kind.entry(finding.pattern_kind).or_default() += 1;
        }

        let entries: Vec<ProfileEntry> = profiles
            .into_iter()
            .map(|profile| {
                *summary.profiles_by_tier.entry(profile.tier).or_default() += 1;
                let false_positive = false_positive::check(&profile, &self.labels, &self.false_positive);
                if false_positive.is_some() {
                    summary.false_positives += 1;
                }
                let trader = traders.remove(&profile.key);
                if trader.as_ref().is_some_and(|t| t.profitable) {
                    summary.profitable_traders += 1;
                }
                ProfileEntry {
                    label: self.label_of(&profile),
                    false_positive,
                    trader,
                    profile,
                }
            })
            .collect();

        let profiles = match self.top {
            Some(n) => entries.into_iter().take(n).collect(),
            None => entries,
        };

        AnalysisReport {
            run_id: Uuid::new_v4().to_string(),
            generated_at: Utc::now(),
            window,
            oracle: oracle.to_string(),
            profiles,
            findings,
            errors,
            summary,
        }
    }
}
