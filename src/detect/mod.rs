//! Pattern Detection Engine
//!
//! Detectors are pure functions of a `Snapshot`: the priced transaction set
//! of one time window, the relationship edges built from it, and a frozen
//! copy of pair history. Running a detector twice over the same snapshot
//! yields the same findings in the same order.

pub mod coordinated;
pub mod pump_dump;
pub mod wash;

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

use crate::labels::AddressBook;
use crate::model::{Chain, Transaction};
use crate::relationship::{PairKey, RelationshipEdge, RelationshipIndex};

pub use coordinated::{trade_direction, CoordinatedConfig, CoordinatedDetector, TradeDirection};
pub use pump_dump::{PumpDumpConfig, PumpDumpDetector};
pub use wash::{WashConfig, WashDetector};

/// Kind of flagged behaviour
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternKind {
    WashTrading,
    CoordinatedTrading,
    PumpAndDump,
}

impl PatternKind {
    pub const ALL: [PatternKind; 3] = [
        PatternKind::WashTrading,
        PatternKind::CoordinatedTrading,
        PatternKind::PumpAndDump,
    ];
}

impl fmt::Display for PatternKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PatternKind::WashTrading => "wash_trading",
            PatternKind::CoordinatedTrading => "coordinated_trading",
            PatternKind::PumpAndDump => "pump_and_dump",
        };
        f.write_str(name)
    }
}

/// Closed time interval
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        at >= self.start && at <= self.end
    }
}

/// Detector-specific supporting data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum Evidence {
    WashTrading {
        chain: Chain,
        transaction_count: u64,
        total_volume_usd: Decimal,
        volume_a_to_b: Decimal,
        volume_b_to_a: Decimal,
        imbalance: f64,
        mean_gap_secs: Option<f64>,
    },
    CoordinatedTrading {
        chain: Chain,
        token_symbol: String,
        direction: TradeDirection,
        distinct_addresses: usize,
        span_secs: i64,
        fresh_pair_share: f64,
        volume_usd: Decimal,
    },
    PumpAndDump {
        chain: Chain,
        token_symbol: String,
        baseline_volume_usd: Decimal,
        spike_volume_usd: Decimal,
        decay_volume_usd: Decimal,
        spike_ratio: f64,
        spike_bucket_start: DateTime<Utc>,
        decay_bucket_start: DateTime<Utc>,
    },
}

impl Evidence {
    /// Chain and token (or "pair") the evidence is about, for tie-breaking
    pub fn subject(&self) -> (Chain, &str) {
        match self {
            Evidence::WashTrading { chain, .. } => (*chain, ""),
            Evidence::CoordinatedTrading {
                chain, token_symbol, ..
            }
            | Evidence::PumpAndDump {
                chain, token_symbol, ..
            } => (*chain, token_symbol),
        }
    }
}

/// One flagged multi-address pattern
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternFinding {
    pub pattern_kind: PatternKind,
    pub participants: BTreeSet<String>,
    /// 0 to 100
    pub suspicion_score: f64,
    pub evidence: Evidence,
    pub time_window: TimeWindow,
}

impl PatternFinding {
    /// Suspicion descending, then earliest window start; the rest only makes the order total
    pub fn report_order(&self, other: &Self) -> Ordering {
        other
            .suspicion_score
            .total_cmp(&self.suspicion_score)
            .then_with(|| self.time_window.start.cmp(&other.time_window.start))
            .then_with(|| self.pattern_kind.cmp(&other.pattern_kind))
            .then_with(|| self.evidence.subject().cmp(&other.evidence.subject()))
            .then_with(|| self.participants.cmp(&other.participants))
            .then_with(|| self.time_window.end.cmp(&other.time_window.end))
    }
}

pub fn sort_findings(findings: &mut [PatternFinding]) {
    findings.sort_by(|a, b| a.report_order(b));
}

/// Clamp a raw score into [0, 100]
pub(crate) fn clamp_score(score: f64) -> f64 {
    if score.is_nan() {
        0.0
    } else {
        score.clamp(0.0, 100.0)
    }
}

/// Analysis window length
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowConfig {
    #[serde(default = "default_lookback_days")]
    pub lookback_days: i64,
}

fn default_lookback_days() -> i64 {
    7
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            lookback_days: default_lookback_days(),
        }
    }
}

/// Immutable input of one analysis run
#[derive(Debug)]
pub struct Snapshot {
    window: TimeWindow,
    /// In-window transactions ordered by (timestamp, chain, hash)
    transactions: Vec<Transaction>,
    /// Edges built from the in-window transactions, ordered by key
    edges: Vec<RelationshipEdge>,
    /// First interaction of every known pair, across all history
    history: HashMap<PairKey, DateTime<Utc>>,
    labels: Arc<AddressBook>,
}

impl Snapshot {
    /// Freeze the window ending at `window_end`
    pub fn build<'a>(
        transactions: impl IntoIterator<Item = &'a Transaction>,
        history: &RelationshipIndex,
        labels: Arc<AddressBook>,
        window_end: DateTime<Utc>,
        config: &WindowConfig,
    ) -> Self {
        let window = TimeWindow {
            start: window_end - Duration::days(config.lookback_days.max(0)),
            end: window_end,
        };

        let mut transactions: Vec<Transaction> = transactions
            .into_iter()
            .filter(|tx| window.contains(tx.timestamp))
            .cloned()
            .collect();
        transactions.sort_by(|a, b| {
            (a.timestamp, a.chain, &a.hash).cmp(&(b.timestamp, b.chain, &b.hash))
        });

        let edges = RelationshipIndex::from_transactions(&transactions).edges_sorted();
        let history = history
            .edges_sorted()
            .into_iter()
            .map(|edge| (edge.key, edge.first_seen))
            .collect();

        debug!(
            start = %window.start,
            end = %window.end,
            transactions = transactions.len(),
            edges = edges.len(),
            "Snapshot built"
        );

        Self {
            window,
            transactions,
            edges,
            history,
            labels,
        }
    }

    pub fn window(&self) -> TimeWindow {
        self.window
    }

    pub fn transactions(&self) -> &[Transaction] {
        &self.transactions
    }

    pub fn edges(&self) -> &[RelationshipEdge] {
        &self.edges
    }

    pub fn labels(&self) -> &AddressBook {
        &self.labels
    }

    /// When a pair first interacted, according to full history
    pub fn first_seen(&self, chain: Chain, x: &str, y: &str) -> Option<DateTime<Utc>> {
        let key = PairKey::new(chain, x, y)?;
        self.history.get(&key).copied()
    }
}

/// A rule-based detector over a snapshot
pub trait PatternDetector: Send + Sync {
    fn name(&self) -> &'static str;

    fn kind(&self) -> PatternKind;

    /// Lazily yield findings. Calling again restarts from the beginning.
    fn detect<'a>(&'a self, snapshot: &'a Snapshot) -> Box<dyn Iterator<Item = PatternFinding> + 'a>;
}

/// Run detectors in sequence and return their findings in report order
pub fn run_all(detectors: &[Arc<dyn PatternDetector>], snapshot: &Snapshot) -> Vec<PatternFinding> {
    let mut findings: Vec<PatternFinding> = detectors
        .iter()
        .flat_map(|d| d.detect(snapshot))
        .collect();
    sort_findings(&mut findings);
    findings
}

/// The standard detector set
pub fn default_detectors(
    wash: WashConfig,
    coordinated: CoordinatedConfig,
    pump_dump: PumpDumpConfig,
) -> Vec<Arc<dyn PatternDetector>> {
    vec![
        Arc::new(WashDetector::new(wash)),
        Arc::new(CoordinatedDetector::new(coordinated)),
        Arc::new(PumpDumpDetector::new(pump_dump)),
    ]
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    pub fn addr(n: u64) -> String {
        format!("0x{n:040x}")
    }

    pub fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    pub fn priced(hash: u64, from: &str, to: &str, token: &str, usd: Decimal, secs: i64) -> Transaction {
        Transaction {
            hash: format!("0x{hash:064x}"),
            chain: Chain::Ethereum,
            from_address: from.to_string(),
            to_address: to.to_string(),
            token_symbol: token.to_string(),
            raw_amount: dec!(1),
            usd_value: Some(usd),
            timestamp: at(secs),
            block_number: hash,
        }
    }

    /// Snapshot whose window ends at `end` with all transactions as history
    pub fn snapshot(txs: &[Transaction], labels: AddressBook, end: i64) -> Snapshot {
        let history = RelationshipIndex::from_transactions(txs);
        Snapshot::build(txs, &history, Arc::new(labels), at(end), &WindowConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;
    use rust_decimal_macros::dec;

    fn finding(score: f64, start: i64, kind: PatternKind) -> PatternFinding {
        PatternFinding {
            pattern_kind: kind,
            participants: BTreeSet::from([addr(1)]),
            suspicion_score: score,
            evidence: Evidence::WashTrading {
                chain: Chain::Ethereum,
                transaction_count: 1,
                total_volume_usd: dec!(1),
                volume_a_to_b: dec!(1),
                volume_b_to_a: dec!(0),
                imbalance: 1.0,
                mean_gap_secs: None,
            },
            time_window: TimeWindow {
                start: at(start),
                end: at(start + 60),
            },
        }
    }

    #[test]
    fn test_report_order() {
        let mut findings = vec![
            finding(50.0, 300, PatternKind::WashTrading),
            finding(90.0, 500, PatternKind::PumpAndDump),
            finding(50.0, 100, PatternKind::CoordinatedTrading),
            finding(90.0, 200, PatternKind::WashTrading),
        ];
        sort_findings(&mut findings);

        let order: Vec<_> = findings
            .iter()
            .map(|f| (f.suspicion_score, f.time_window.start.timestamp()))
            .collect();
        assert_eq!(order, vec![(90.0, 200), (90.0, 500), (50.0, 100), (50.0, 300)]);
    }

    #[test]
    fn test_snapshot_window_filter_and_order() {
        let a = addr(1);
        let b = addr(2);
        let end = 10 * 86_400;
        let txs = vec![
            priced(3, &a, &b, "ETH", dec!(10), end - 60),
            priced(1, &a, &b, "ETH", dec!(10), end - 8 * 86_400),
            priced(2, &b, &a, "ETH", dec!(10), end - 60),
            priced(4, &b, &a, "ETH", dec!(10), end + 1),
        ];
        let snap = snapshot(&txs, AddressBook::default(), end);

        let hashes: Vec<_> = snap.transactions().iter().map(|t| t.block_number).collect();
        assert_eq!(hashes, vec![2, 3]);
        assert_eq!(snap.edges().len(), 1);
        assert_eq!(snap.edges()[0].transaction_count, 2);
        // History still knows the pre-window interaction
        assert_eq!(
            snap.first_seen(Chain::Ethereum, &b, &a),
            Some(at(end - 8 * 86_400))
        );
    }

    #[test]
    fn test_clamp_score() {
        assert_eq!(clamp_score(f64::NAN), 0.0);
        assert_eq!(clamp_score(140.0), 100.0);
        assert_eq!(clamp_score(-3.0), 0.0);
    }
}
