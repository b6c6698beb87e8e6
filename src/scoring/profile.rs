//! Per-address running aggregates and tier classification

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use crate::model::{Chain, Transaction};

/// Whale tier by average transaction size
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WhaleTier {
    Regular,
    Large,
    Mega,
    Ultra,
}

impl WhaleTier {
    pub const ALL: [WhaleTier; 4] = [
        WhaleTier::Regular,
        WhaleTier::Large,
        WhaleTier::Mega,
        WhaleTier::Ultra,
    ];

    /// Strict threshold ladder: each bound is inclusive on its own tier
    pub fn classify(avg_tx_size_usd: Decimal, thresholds: &TierThresholds) -> Self {
        if avg_tx_size_usd >= thresholds.ultra_usd {
            WhaleTier::Ultra
        } else if avg_tx_size_usd >= thresholds.mega_usd {
            WhaleTier::Mega
        } else if avg_tx_size_usd >= thresholds.large_usd {
            WhaleTier::Large
        } else {
            WhaleTier::Regular
        }
    }
}

impl fmt::Display for WhaleTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WhaleTier::Regular => "regular",
            WhaleTier::Large => "large",
            WhaleTier::Mega => "mega",
            WhaleTier::Ultra => "ultra",
        };
        f.write_str(name)
    }
}

/// Lower bounds (USD) of the Large, Mega and Ultra tiers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierThresholds {
    pub large_usd: Decimal,
    pub mega_usd: Decimal,
    pub ultra_usd: Decimal,
}

impl Default for TierThresholds {
    fn default() -> Self {
        Self {
            large_usd: Decimal::from(100_000),
            mega_usd: Decimal::from(500_000),
            ultra_usd: Decimal::from(1_000_000),
        }
    }
}

/// Identity of a profile: per chain, or merged across chains by address string
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProfileKey {
    pub chain: Option<Chain>,
    pub address: String,
}

/// Aggregated behaviour of one address
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddressProfile {
    pub key: ProfileKey,
    pub total_volume_usd: Decimal,
    /// Every observed transaction, priced or not
    pub transaction_count: u64,
    /// Transactions contributing to `total_volume_usd`
    pub priced_transaction_count: u64,
    pub distinct_tokens: BTreeSet<String>,
    pub distinct_chains: BTreeSet<Chain>,
    pub distinct_counterparties: BTreeSet<String>,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub avg_tx_size_usd: Decimal,
    pub score: f64,
    pub tier: WhaleTier,
    pub stale: bool,
}

impl AddressProfile {
    /// Empty profile, created on the first transaction that involves the address
    pub fn new(key: ProfileKey, seen_at: DateTime<Utc>) -> Self {
        Self {
            key,
            total_volume_usd: Decimal::ZERO,
            transaction_count: 0,
            priced_transaction_count: 0,
            distinct_tokens: BTreeSet::new(),
            distinct_chains: BTreeSet::new(),
            distinct_counterparties: BTreeSet::new(),
            first_seen: seen_at,
            last_seen: seen_at,
            avg_tx_size_usd: Decimal::ZERO,
            score: 0.0,
            tier: WhaleTier::Regular,
            stale: false,
        }
    }

    /// Build a profile from every transaction that involves it, in one fold.
    /// None for an empty group.
    pub fn from_transactions(
        key: ProfileKey,
        transactions: &[&Transaction],
        thresholds: &TierThresholds,
    ) -> Option<Self> {
        let first_seen = transactions.iter().map(|tx| tx.timestamp).min()?;
        let last_seen = transactions.iter().map(|tx| tx.timestamp).max()?;

        let priced: Vec<Decimal> = transactions.iter().filter_map(|tx| tx.usd_value).collect();
        let counterparties: BTreeSet<String> = transactions
            .iter()
            .map(|tx| tx.counterparty(&key.address))
            .filter(|counterparty| *counterparty != key.address)
            .map(str::to_string)
            .collect();

        let mut profile = Self {
            total_volume_usd: priced
                .iter()
                .fold(Decimal::ZERO, |acc, usd| acc.saturating_add(*usd)),
            transaction_count: transactions.len() as u64,
            priced_transaction_count: priced.len() as u64,
            distinct_tokens: transactions.iter().map(|tx| tx.token_symbol.clone()).collect(),
            distinct_chains: transactions.iter().map(|tx| tx.chain).collect(),
            distinct_counterparties: counterparties,
            first_seen,
            last_seen,
            avg_tx_size_usd: Decimal::ZERO,
            score: 0.0,
            tier: WhaleTier::Regular,
            stale: false,
            key,
        };
        profile.refresh_derived(thresholds);
        Some(profile)
    }

    pub fn address(&self) -> &str {
        &self.key.address
    }

    /// Fold one transaction into the running aggregates.
    ///
    /// Unpriced transactions count toward activity but not volume, so the
    /// average is taken over priced transactions only. Volume saturates at
    /// `Decimal::MAX` instead of overflowing.
    pub fn apply(&mut self, tx: &Transaction, thresholds: &TierThresholds) {
        self.transaction_count += 1;
        if let Some(usd) = tx.usd_value {
            self.total_volume_usd = self.total_volume_usd.saturating_add(usd);
            self.priced_transaction_count += 1;
        }

        if !self.distinct_tokens.contains(&tx.token_symbol) {
            self.distinct_tokens.insert(tx.token_symbol.clone());
        }
        self.distinct_chains.insert(tx.chain);

        let counterparty = tx.counterparty(&self.key.address);
        if counterparty != self.key.address && !self.distinct_counterparties.contains(counterparty) {
            self.distinct_counterparties.insert(counterparty.to_string());
        }

        self.first_seen = self.first_seen.min(tx.timestamp);
        self.last_seen = self.last_seen.max(tx.timestamp);
        self.stale = false;
        self.refresh_derived(thresholds);
    }

    /// Recompute average size and tier from the running sums
    pub fn refresh_derived(&mut self, thresholds: &TierThresholds) {
        self.avg_tx_size_usd = if self.priced_transaction_count > 0 {
            self.total_volume_usd / Decimal::from(self.priced_transaction_count)
        } else {
            Decimal::ZERO
        };
        self.tier = WhaleTier::classify(self.avg_tx_size_usd, thresholds);
    }

    /// No activity within `window` before `now`
    pub fn is_inactive(&self, now: DateTime<Utc>, window: Duration) -> bool {
        now - self.last_seen > window
    }

    /// Share of transactions with a distinct counterparty
    pub fn counterparty_ratio(&self) -> f64 {
        if self.transaction_count == 0 {
            return 0.0;
        }
        self.distinct_counterparties.len() as f64 / self.transaction_count as f64
    }
}
