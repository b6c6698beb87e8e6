//! Wash trading detection
//!
//! Looks for address pairs that trade large, nearly symmetric volume back
//! and forth. Genuine trading between two specific counterparties is rarely
//! volume-balanced at high frequency.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::debug;

use crate::detect::{
    clamp_score, Evidence, PatternDetector, PatternFinding, PatternKind, Snapshot, TimeWindow,
};
use crate::relationship::RelationshipEdge;

/// Configuration for wash trading detection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WashConfig {
    /// Minimum pair volume in USD
    #[serde(default = "default_min_volume_usd")]
    pub min_volume_usd: Decimal,

    /// Maximum |a→b - b→a| / total to count as back-and-forth
    #[serde(default = "default_max_imbalance")]
    pub max_imbalance: f64,

    #[serde(default = "default_min_transactions")]
    pub min_transactions: u64,

    /// Transaction count at which the frequency term saturates
    #[serde(default = "default_saturation_transactions")]
    pub saturation_transactions: u64,
}

fn default_min_volume_usd() -> Decimal {
    Decimal::from(50_000)
}
fn default_max_imbalance() -> f64 {
    0.2
}
fn default_min_transactions() -> u64 {
    4
}
fn default_saturation_transactions() -> u64 {
    10
}

impl Default for WashConfig {
    fn default() -> Self {
        Self {
            min_volume_usd: default_min_volume_usd(),
            max_imbalance: default_max_imbalance(),
            min_transactions: default_min_transactions(),
            saturation_transactions: default_saturation_transactions(),
        }
    }
}

/// Flags symmetric high-volume pairs
pub struct WashDetector {
    config: WashConfig,
}

impl WashDetector {
    pub fn new(config: WashConfig) -> Self {
        Self { config }
    }

    /// Evaluate one edge
    pub fn evaluate(&self, edge: &RelationshipEdge) -> Option<PatternFinding> {
        if edge.total_volume_usd < self.config.min_volume_usd
            || edge.transaction_count < self.config.min_transactions
        {
            return None;
        }

        let imbalance = edge.imbalance()?.to_f64()?;
        if imbalance > self.config.max_imbalance {
            return None;
        }

        let frequency = (edge.transaction_count as f64
            / self.config.saturation_transactions.max(1) as f64)
            .min(1.0);
        let score = clamp_score(100.0 * (1.0 - imbalance) * frequency);

        debug!(
            a = %edge.key.a,
            b = %edge.key.b,
            volume = %edge.total_volume_usd,
            imbalance = %format!("{:.3}", imbalance),
            score = %format!("{:.1}", score),
            "Wash trading pair"
        );

        Some(PatternFinding {
            pattern_kind: PatternKind::WashTrading,
            participants: BTreeSet::from([edge.key.a.clone(), edge.key.b.clone()]),
            suspicion_score: score,
            evidence: Evidence::WashTrading {
                chain: edge.key.chain,
                transaction_count: edge.transaction_count,
                total_volume_usd: edge.total_volume_usd,
                volume_a_to_b: edge.volume_a_to_b,
                volume_b_to_a: edge.volume_b_to_a,
                imbalance,
                mean_gap_secs: edge.mean_gap_secs(),
            },
            time_window: TimeWindow {
                start: edge.first_seen,
                end: edge.last_seen,
            },
        })
    }
}

impl PatternDetector for WashDetector {
    fn name(&self) -> &'static str {
        "wash"
    }

    fn kind(&self) -> PatternKind {
        PatternKind::WashTrading
    }

    fn detect<'a>(&'a self, snapshot: &'a Snapshot) -> Box<dyn Iterator<Item = PatternFinding> + 'a> {
        Box::new(snapshot.edges().iter().filter_map(|edge| self.evaluate(edge)))
    }
}
