//! Relationship Index - per address pair interaction statistics
//!
//! Edges are unordered: `a` is always the lexicographically smaller address,
//! and direction is tracked with the `a_to_b` / `b_to_a` volume split.
//! The map's shard locks give one writer per pair at a time, so
//! `time_deltas` stays in arrival order while different pairs update in
//! parallel.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::model::{Chain, Transaction};

/// Unordered address pair on one chain
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PairKey {
    pub chain: Chain,
    pub a: String,
    pub b: String,
}

impl PairKey {
    /// None for self-transfers
    pub fn new(chain: Chain, x: &str, y: &str) -> Option<Self> {
        match x.cmp(y) {
            std::cmp::Ordering::Less => Some(Self {
                chain,
                a: x.to_string(),
                b: y.to_string(),
            }),
            std::cmp::Ordering::Greater => Some(Self {
                chain,
                a: y.to_string(),
                b: x.to_string(),
            }),
            std::cmp::Ordering::Equal => None,
        }
    }

    pub fn contains(&self, address: &str) -> bool {
        self.a == address || self.b == address
    }
}

/// Aggregated interaction between two addresses
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationshipEdge {
    pub key: PairKey,
    pub transaction_count: u64,
    pub total_volume_usd: Decimal,
    pub volume_a_to_b: Decimal,
    pub volume_b_to_a: Decimal,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    /// Seconds between consecutive records, in arrival order
    pub time_deltas: Vec<i64>,
}

impl RelationshipEdge {
    fn new(key: PairKey, at: DateTime<Utc>) -> Self {
        Self {
            key,
            transaction_count: 0,
            total_volume_usd: Decimal::ZERO,
            volume_a_to_b: Decimal::ZERO,
            volume_b_to_a: Decimal::ZERO,
            first_seen: at,
            last_seen: at,
            time_deltas: Vec::new(),
        }
    }

    fn apply(&mut self, tx: &Transaction) {
        if self.transaction_count > 0 {
            // Out-of-order records clamp to zero
            let gap = (tx.timestamp - self.last_seen).num_seconds().max(0);
            self.time_deltas.push(gap);
        }
        self.transaction_count += 1;

        // Unpriced transfers count as activity with no volume
        let usd = tx.usd_value.unwrap_or(Decimal::ZERO);
        self.total_volume_usd = self.total_volume_usd.saturating_add(usd);
        if tx.from_address == self.key.a {
            self.volume_a_to_b = self.volume_a_to_b.saturating_add(usd);
        } else {
            self.volume_b_to_a = self.volume_b_to_a.saturating_add(usd);
        }

        self.first_seen = self.first_seen.min(tx.timestamp);
        self.last_seen = self.last_seen.max(tx.timestamp);
    }

    /// |a→b - b→a| / total, or None when the edge carries no volume
    pub fn imbalance(&self) -> Option<Decimal> {
        if self.total_volume_usd.is_zero() {
            return None;
        }
        Some((self.volume_a_to_b - self.volume_b_to_a).abs() / self.total_volume_usd)
    }

    pub fn mean_gap_secs(&self) -> Option<f64> {
        if self.time_deltas.is_empty() {
            return None;
        }
        Some(self.time_deltas.iter().sum::<i64>() as f64 / self.time_deltas.len() as f64)
    }
}

/// Concurrent edge store
#[derive(Default)]
pub struct RelationshipIndex {
    edges: DashMap<PairKey, RelationshipEdge>,
}

impl RelationshipIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_transactions<'a>(transactions: impl IntoIterator<Item = &'a Transaction>) -> Self {
        let index = Self::new();
        for tx in transactions {
            index.record(tx);
        }
        index
    }

    /// Fold a transaction into its pair's edge. Self-transfers have no edge.
    pub fn record(&self, tx: &Transaction) -> bool {
        let Some(key) = PairKey::new(tx.chain, &tx.from_address, &tx.to_address) else {
            return false;
        };

        let mut edge = self
            .edges
            .entry(key.clone())
            .or_insert_with(|| RelationshipEdge::new(key, tx.timestamp));
        edge.apply(tx);

        trace!(
            chain = %tx.chain,
            a = %edge.key.a,
            b = %edge.key.b,
            count = edge.transaction_count,
            "Edge updated"
        );
        true
    }

    pub fn get(&self, chain: Chain, x: &str, y: &str) -> Option<RelationshipEdge> {
        let key = PairKey::new(chain, x, y)?;
        self.edges.get(&key).map(|e| e.clone())
    }

    /// When the pair first interacted, if ever
    pub fn first_seen(&self, chain: Chain, x: &str, y: &str) -> Option<DateTime<Utc>> {
        let key = PairKey::new(chain, x, y)?;
        self.edges.get(&key).map(|e| e.first_seen)
    }

    /// All edges ordered by key
    pub fn edges_sorted(&self) -> Vec<RelationshipEdge> {
        let mut edges: Vec<_> = self.edges.iter().map(|e| e.value().clone()).collect();
        edges.sort_by(|x, y| x.key.cmp(&y.key));
        edges
    }

    /// Heaviest `n` pairs, volume descending, ties by key. O(E log E).
    pub fn top_pairs_by_volume(&self, n: usize) -> Vec<RelationshipEdge> {
        let mut edges = self.edges_sorted();
        edges.sort_by(|x, y| y.total_volume_usd.cmp(&x.total_volume_usd));
        edges.truncate(n);
        edges
    }

    /// Pairs with at least `k` transactions, ordered by key. O(E).
    pub fn pairs_with_min_transactions(&self, k: u64) -> Vec<RelationshipEdge> {
        let mut edges: Vec<_> = self
            .edges
            .iter()
            .filter(|e| e.transaction_count >= k)
            .map(|e| e.value().clone())
            .collect();
        edges.sort_by(|x, y| x.key.cmp(&y.key));
        edges
    }

    pub fn len(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn tx(n: i64, from: &str, to: &str, usd: Option<Decimal>, secs: i64) -> Transaction {
        Transaction {
            hash: format!("0x{n:04x}"),
            chain: Chain::Ethereum,
            from_address: from.to_string(),
            to_address: to.to_string(),
            token_symbol: "ETH".to_string(),
            raw_amount: dec!(1),
            usd_value: usd,
            timestamp: Utc.timestamp_opt(secs, 0).unwrap(),
            block_number: n as u64,
        }
    }

    #[test]
    fn test_pair_key_is_unordered() {
        let forward = PairKey::new(Chain::Ethereum, "0xbb", "0xaa").unwrap();
        let backward = PairKey::new(Chain::Ethereum, "0xaa", "0xbb").unwrap();
        assert_eq!(forward, backward);
        assert_eq!(forward.a, "0xaa");
        assert!(PairKey::new(Chain::Ethereum, "0xaa", "0xaa").is_none());
        assert_ne!(forward, PairKey::new(Chain::Polygon, "0xaa", "0xbb").unwrap());
    }

    #[test]
    fn test_record_direction_and_deltas() {
        let index = RelationshipIndex::new();
        index.record(&tx(1, "0xbb", "0xaa", Some(dec!(100.25)), 1_000));
        index.record(&tx(2, "0xaa", "0xbb", Some(dec!(40)), 1_060));
        index.record(&tx(3, "0xaa", "0xbb", None, 1_500));
        // Late arrival
        index.record(&tx(4, "0xbb", "0xaa", Some(dec!(9.75)), 1_200));

        let edge = index.get(Chain::Ethereum, "0xaa", "0xbb").unwrap();
        assert_eq!(edge.transaction_count, 4);
        assert_eq!(edge.volume_a_to_b, dec!(40));
        assert_eq!(edge.volume_b_to_a, dec!(110));
        assert_eq!(edge.total_volume_usd, edge.volume_a_to_b + edge.volume_b_to_a);
        assert_eq!(edge.time_deltas, vec![60, 440, 0]);
        assert_eq!(edge.first_seen.timestamp(), 1_000);
        assert_eq!(edge.last_seen.timestamp(), 1_500);
    }

    #[test]
    fn test_volume_split_sums_to_total() {
        let index = RelationshipIndex::new();
        let parties = ["0x01", "0x02", "0x03", "0x04"];
        for n in 0..40i64 {
            let from = parties[(n % 4) as usize];
            let to = parties[((n * 3 + 1) % 4) as usize];
            index.record(&tx(n, from, to, Some(Decimal::new(n * 1_337 + 1, 2)), n * 30));
        }

        for edge in index.edges_sorted() {
            assert_eq!(edge.volume_a_to_b + edge.volume_b_to_a, edge.total_volume_usd);
            assert_eq!(edge.time_deltas.len() as u64, edge.transaction_count - 1);
        }
    }

    #[test]
    fn test_self_transfer_has_no_edge() {
        let index = RelationshipIndex::new();
        assert!(!index.record(&tx(1, "0xaa", "0xaa", Some(dec!(5)), 0)));
        assert!(index.is_empty());
    }

    #[test]
    fn test_queries() {
        let index = RelationshipIndex::new();
        index.record(&tx(1, "0x01", "0x02", Some(dec!(500)), 0));
        index.record(&tx(2, "0x02", "0x01", Some(dec!(500)), 10));
        index.record(&tx(3, "0x03", "0x04", Some(dec!(5000)), 20));
        index.record(&tx(4, "0x05", "0x06", Some(dec!(1000)), 30));

        let top = index.top_pairs_by_volume(2);
        assert_eq!(top.len(), 2);
        assert_eq!(top[0].key.a, "0x03");
        // 1000 vs 1000: key order breaks the tie
        assert_eq!(top[1].key.a, "0x01");

        let busy = index.pairs_with_min_transactions(2);
        assert_eq!(busy.len(), 1);
        assert_eq!(busy[0].key.b, "0x02");

        assert_eq!(index.top_pairs_by_volume(10).len(), 3);
        assert_eq!(
            index.first_seen(Chain::Ethereum, "0x02", "0x01").map(|t| t.timestamp()),
            Some(0)
        );
        assert!(index.first_seen(Chain::Ethereum, "0x01", "0x03").is_none());
    }

    #[test]
    fn test_imbalance() {
        let index = RelationshipIndex::new();
        index.record(&tx(1, "0x01", "0x02", Some(dec!(30000)), 0));
        index.record(&tx(2, "0x02", "0x01", Some(dec!(30000)), 10));
        let edge = index.get(Chain::Ethereum, "0x01", "0x02").unwrap();
        assert_eq!(edge.imbalance(), Some(Decimal::ZERO));
        assert_eq!(edge.mean_gap_secs(), Some(10.0));

        index.record(&tx(3, "0x03", "0x04", None, 0));
        assert_eq!(index.get(Chain::Ethereum, "0x03", "0x04").unwrap().imbalance(), None);
    }
}
