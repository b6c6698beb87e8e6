//! Coordinated trading detection
//!
//! Groups trades by (chain, token, time bucket, direction). Direction is
//! relative to a reference router or pool from the address book: tokens
//! leaving the pool are buys, tokens sent to it are sells. Inside each group
//! the tightest burst of distinct traders is found; if enough addresses
//! moved together the group is flagged. Addresses with no shared history
//! score higher than known counterparties.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

use crate::detect::{
    clamp_score, Evidence, PatternDetector, PatternFinding, PatternKind, Snapshot, TimeWindow,
};
use crate::labels::AddressBook;
use crate::model::{Chain, Transaction};

/// Configuration for coordinated trading detection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatedConfig {
    /// Grouping bucket width in seconds
    #[serde(default = "default_bucket_secs")]
    pub bucket_secs: i64,

    /// Maximum span of a coordinated burst in seconds
    #[serde(default = "default_sub_window_secs")]
    pub sub_window_secs: i64,

    #[serde(default = "default_min_addresses")]
    pub min_addresses: usize,

    /// Address count at which the base score saturates
    #[serde(default = "default_address_saturation")]
    pub address_saturation: usize,

    /// Extra weight for participants with no prior relationship
    #[serde(default = "default_fresh_boost")]
    pub fresh_boost: f64,
}

fn default_bucket_secs() -> i64 {
    600 // 10 minutes
}
fn default_sub_window_secs() -> i64 {
    120
}
fn default_min_addresses() -> usize {
    3
}
fn default_address_saturation() -> usize {
    10
}
fn default_fresh_boost() -> f64 {
    0.5
}

impl Default for CoordinatedConfig {
    fn default() -> Self {
        Self {
            bucket_secs: default_bucket_secs(),
            sub_window_secs: default_sub_window_secs(),
            min_addresses: default_min_addresses(),
            address_saturation: default_address_saturation(),
            fresh_boost: default_fresh_boost(),
        }
    }
}

/// Trade direction relative to a reference pool or router
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeDirection {
    Buy,
    Sell,
}

/// Direction and trader of a transfer against a reference address.
///
/// Tokens leaving a reference pool are a buy by the receiver, tokens sent
/// to one are a sell by the sender. The trader must be unlabelled.
pub fn trade_direction<'a>(labels: &AddressBook, tx: &'a Transaction) -> Option<(TradeDirection, &'a str)> {
    let from_reference = labels.is_reference(tx.chain, &tx.from_address);
    let to_reference = labels.is_reference(tx.chain, &tx.to_address);

    match (from_reference, to_reference) {
        (true, false) if !labels.is_labelled(tx.chain, &tx.to_address) => {
            Some((TradeDirection::Buy, &tx.to_address))
        }
        (false, true) if !labels.is_labelled(tx.chain, &tx.from_address) => {
            Some((TradeDirection::Sell, &tx.from_address))
        }
        _ => None,
    }
}

/// A directional trade by a non-labelled address
#[derive(Debug, Clone)]
struct Trade<'a> {
    trader: &'a str,
    at: DateTime<Utc>,
    usd: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct GroupKey<'a> {
    chain: Chain,
    token: &'a str,
    bucket: i64,
    direction: TradeDirection,
}

/// Flags bursts of same-direction trades by many addresses
pub struct CoordinatedDetector {
    config: CoordinatedConfig,
}

impl CoordinatedDetector {
    pub fn new(config: CoordinatedConfig) -> Self {
        Self { config }
    }

    /// Direction and trader of a transfer, if one side is a reference address
    pub fn classify<'a>(
        &self,
        snapshot: &Snapshot,
        tx: &'a Transaction,
    ) -> Option<(TradeDirection, &'a str)> {
        trade_direction(snapshot.labels(), tx)
    }

    fn groups<'a>(&self, snapshot: &'a Snapshot) -> BTreeMap<GroupKey<'a>, Vec<Trade<'a>>> {
        let width = self.config.bucket_secs.max(1);
        let mut groups: BTreeMap<GroupKey<'a>, Vec<Trade<'a>>> = BTreeMap::new();

        for tx in snapshot.transactions() {
            let Some((direction, trader)) = self.classify(snapshot, tx) else {
                continue;
            };
            let key = GroupKey {
                chain: tx.chain,
                token: &tx.token_symbol,
                bucket: tx.timestamp.timestamp().div_euclid(width),
                direction,
            };
            groups.entry(key).or_default().push(Trade {
                trader,
                at: tx.timestamp,
                usd: tx.usd_value.unwrap_or(Decimal::ZERO),
            });
        }
        groups
    }

    /// Sub-window holding the most distinct traders; earliest wins ties.
    /// Trades are already in time order.
    fn densest_burst<'t>(&self, trades: &'t [Trade<'t>]) -> Option<&'t [Trade<'t>]> {
        let mut best: Option<(usize, &[Trade])> = None;
        let mut end = 0;

        for start in 0..trades.len() {
            end = end.max(start);
            while end + 1 < trades.len()
                && (trades[end + 1].at - trades[start].at).num_seconds() <= self.config.sub_window_secs
            {
                end += 1;
            }

            let burst = &trades[start..=end];
            let distinct = burst.iter().map(|t| t.trader).collect::<BTreeSet<_>>().len();
            if best.map_or(true, |(n, _)| distinct > n) {
                best = Some((distinct, burst));
            }
        }
        best.map(|(_, burst)| burst)
    }

    /// Share of participant pairs with no relationship before `start`
    fn fresh_pair_share(
        snapshot: &Snapshot,
        chain: Chain,
        participants: &BTreeSet<String>,
        start: DateTime<Utc>,
    ) -> f64 {
        let members: Vec<&String> = participants.iter().collect();
        let mut pairs = 0usize;
        let mut fresh = 0usize;

        for (i, x) in members.iter().enumerate() {
            for y in &members[i + 1..] {
                pairs += 1;
                match snapshot.first_seen(chain, x, y) {
                    Some(first) if first < start => {}
                    _ => fresh += 1,
                }
            }
        }

        if pairs == 0 {
            0.0
        } else {
            fresh as f64 / pairs as f64
        }
    }

    fn evaluate(&self, snapshot: &Snapshot, key: &GroupKey, trades: &[Trade]) -> Option<PatternFinding> {
        let burst = self.densest_burst(trades)?;
        let participants: BTreeSet<String> = burst.iter().map(|t| t.trader.to_string()).collect();
        if participants.len() < self.config.min_addresses {
            return None;
        }

        let start = burst.first()?.at;
        let end = burst.last()?.at;
        let fresh_share = Self::fresh_pair_share(snapshot, key.chain, &participants, start);

        let base = (participants.len() as f64 / self.config.address_saturation.max(1) as f64).min(1.0) * 100.0;
        let score = clamp_score(base * (1.0 + self.config.fresh_boost * fresh_share));

        debug!(
            token = %key.token,
            direction = ?key.direction,
            addresses = participants.len(),
            fresh_share = %format!("{:.2}", fresh_share),
            score = %format!("{:.1}", score),
            "Coordinated trading burst"
        );

        Some(PatternFinding {
            pattern_kind: PatternKind::CoordinatedTrading,
            suspicion_score: score,
            evidence: Evidence::CoordinatedTrading {
                chain: key.chain,
                token_symbol: key.token.to_string(),
                direction: key.direction,
                distinct_addresses: participants.len(),
                span_secs: (end - start).num_seconds(),
                fresh_pair_share: fresh_share,
                volume_usd: burst.iter().fold(Decimal::ZERO, |acc, t| acc.saturating_add(t.usd)),
            },
            participants,
            time_window: TimeWindow { start, end },
        })
    }
}

impl PatternDetector for CoordinatedDetector {
    fn name(&self) -> &'static str {
        "coordinated"
    }

    fn kind(&self) -> PatternKind {
        PatternKind::CoordinatedTrading
    }

    fn detect<'a>(&'a self, snapshot: &'a Snapshot) -> Box<dyn Iterator<Item = PatternFinding> + 'a> {
        let groups = self.groups(snapshot);
        Box::new(
            groups
                .into_iter()
                .filter_map(move |(key, trades)| self.evaluate(snapshot, &key, &trades)),
        )
    }
}
