//! Whale Scoring Engine
//!
//! Profiles are updated incrementally as transactions arrive (running sums,
//! O(1) per update). Each update rescores the touched profile against the
//! current population maxima. Rescoring everyone against fresh maxima is a
//! separate batch pass: `ProfileBook::rebalance`. `ProfileBook::from_batch`
//! recomputes everything from the raw transactions and must agree with the
//! streaming path followed by a rebalance.

pub mod engine;
pub mod false_positive;
pub mod profile;
pub mod profitability;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{PoisonError, RwLock};
use tracing::{debug, info};

use crate::model::{Chain, Transaction};

pub use engine::{PopulationStats, ScoreFactors, WhaleScorer};
pub use false_positive::{FalsePositiveConfig, FalsePositiveReason};
pub use profile::{AddressProfile, ProfileKey, TierThresholds, WhaleTier};
pub use profitability::{
    ProfitabilityAnalyzer, ProfitabilityConfig, SessionDirection, TraderPerformance, TraderTier,
    TradingSession, TradingStyle,
};

/// Component weights (must sum to 1.0)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoringWeights {
    #[serde(default = "default_volume_weight")]
    pub volume_weight: f64,
    #[serde(default = "default_activity_weight")]
    pub activity_weight: f64,
    #[serde(default = "default_diversity_weight")]
    pub chain_diversity_weight: f64,
    #[serde(default = "default_diversity_weight")]
    pub token_diversity_weight: f64,
}

fn default_volume_weight() -> f64 {
    0.45
}
fn default_activity_weight() -> f64 {
    0.25
}
fn default_diversity_weight() -> f64 {
    0.15
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            volume_weight: default_volume_weight(),
            activity_weight: default_activity_weight(),
            chain_diversity_weight: default_diversity_weight(),
            token_diversity_weight: default_diversity_weight(),
        }
    }
}

impl ScoringWeights {
    pub fn sum(&self) -> f64 {
        self.volume_weight
            + self.activity_weight
            + self.chain_diversity_weight
            + self.token_diversity_weight
    }
}

/// How addresses map to profiles
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentityMode {
    /// One profile per (chain, address)
    #[default]
    PerChain,
    /// Same address string on different chains is one profile
    AddressString,
}

impl IdentityMode {
    pub fn key(&self, chain: Chain, address: &str) -> ProfileKey {
        ProfileKey {
            chain: match self {
                IdentityMode::PerChain => Some(chain),
                IdentityMode::AddressString => None,
            },
            address: address.to_string(),
        }
    }
}

/// Configuration for whale scoring
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoringConfig {
    #[serde(default)]
    pub weights: ScoringWeights,

    /// Token count at which token diversity saturates
    #[serde(default = "default_token_saturation")]
    pub token_saturation: u32,

    /// Upper end of the score range
    #[serde(default = "default_score_scale")]
    pub score_scale: f64,

    #[serde(default = "default_large_tier_usd")]
    pub large_tier_usd: Decimal,
    #[serde(default = "default_mega_tier_usd")]
    pub mega_tier_usd: Decimal,
    #[serde(default = "default_ultra_tier_usd")]
    pub ultra_tier_usd: Decimal,

    /// Profiles without activity for this long are marked stale
    #[serde(default = "default_stale_after_days")]
    pub stale_after_days: i64,

    #[serde(default)]
    pub identity: IdentityMode,

    #[serde(default)]
    pub false_positive: FalsePositiveConfig,

    #[serde(default)]
    pub profitability: ProfitabilityConfig,
}

fn default_token_saturation() -> u32 {
    10
}
fn default_score_scale() -> f64 {
    1000.0
}
fn default_large_tier_usd() -> Decimal {
    Decimal::from(100_000)
}
fn default_mega_tier_usd() -> Decimal {
    Decimal::from(500_000)
}
fn default_ultra_tier_usd() -> Decimal {
    Decimal::from(1_000_000)
}
fn default_stale_after_days() -> i64 {
    30
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            weights: ScoringWeights::default(),
            token_saturation: default_token_saturation(),
            score_scale: default_score_scale(),
            large_tier_usd: default_large_tier_usd(),
            mega_tier_usd: default_mega_tier_usd(),
            ultra_tier_usd: default_ultra_tier_usd(),
            stale_after_days: default_stale_after_days(),
            identity: IdentityMode::default(),
            false_positive: FalsePositiveConfig::default(),
            profitability: ProfitabilityConfig::default(),
        }
    }
}

impl ScoringConfig {
    pub fn tier_thresholds(&self) -> TierThresholds {
        TierThresholds {
            large_usd: self.large_tier_usd,
            mega_usd: self.mega_tier_usd,
            ultra_usd: self.ultra_tier_usd,
        }
    }
}

/// Concurrent store of address profiles
///
/// Updates to different addresses proceed in parallel; the map's shard
/// locks serialize writers of the same profile.
pub struct ProfileBook {
    scorer: WhaleScorer,
    thresholds: TierThresholds,
    identity: IdentityMode,
    profiles: DashMap<ProfileKey, AddressProfile>,
    count: AtomicUsize,
    stats: RwLock<PopulationStats>,
}

impl ProfileBook {
    pub fn new(config: ScoringConfig) -> Self {
        Self {
            thresholds: config.tier_thresholds(),
            identity: config.identity,
            scorer: WhaleScorer::new(config),
            profiles: DashMap::new(),
            count: AtomicUsize::new(0),
            stats: RwLock::new(PopulationStats::default()),
        }
    }

    /// Recompute every profile from a full transaction set.
    ///
    /// Transactions are grouped by profile key, each group is folded once,
    /// and all profiles are scored against maxima of the finished set.
    pub fn from_batch<'a>(
        config: ScoringConfig,
        transactions: impl IntoIterator<Item = &'a Transaction>,
    ) -> Self {
        let book = Self::new(config);

        let mut groups: BTreeMap<ProfileKey, Vec<&Transaction>> = BTreeMap::new();
        for tx in transactions {
            let [from, to] = tx.participants();
            groups.entry(book.key_for(tx.chain, from)).or_default().push(tx);
            if to != from {
                groups.entry(book.key_for(tx.chain, to)).or_default().push(tx);
            }
        }

        let profiles: Vec<AddressProfile> = groups
            .into_iter()
            .filter_map(|(key, txs)| AddressProfile::from_transactions(key, &txs, &book.thresholds))
            .collect();
        let stats = PopulationStats::from_profiles(&profiles);

        for mut profile in profiles {
            profile.score = book.scorer.score(&profile, &stats);
            book.profiles.insert(profile.key.clone(), profile);
        }
        book.count.store(book.profiles.len(), Ordering::Relaxed);
        *book.stats.write().unwrap_or_else(PoisonError::into_inner) = stats;

        debug!(profiles = stats.profile_count, "Built profiles from batch");
        book
    }

    pub fn key_for(&self, chain: Chain, address: &str) -> ProfileKey {
        self.identity.key(chain, address)
    }

    /// Fold a transaction into the profiles of both parties
    pub fn record(&self, tx: &Transaction) {
        let [from, to] = tx.participants();
        self.record_for(tx, from);
        if to != from {
            self.record_for(tx, to);
        }
    }

    fn record_for(&self, tx: &Transaction, address: &str) {
        let key = self.key_for(tx.chain, address);
        let mut entry = self
            .profiles
            .entry(key.clone())
            .or_insert_with(|| {
                self.count.fetch_add(1, Ordering::Relaxed);
                AddressProfile::new(key, tx.timestamp)
            });
        entry.apply(tx, &self.thresholds);

        // The shard lock is held here, so the count comes from the counter
        let stats = {
            let mut stats = self.stats.write().unwrap_or_else(PoisonError::into_inner);
            stats.observe(&entry);
            stats.profile_count = self.count.load(Ordering::Relaxed);
            *stats
        };
        entry.score = self.scorer.score(&entry, &stats);
    }

    /// Recompute population maxima and rescore every profile
    pub fn rebalance(&self) -> PopulationStats {
        let stats = self.profiles.iter().fold(PopulationStats::default(), |mut stats, p| {
            stats.observe(p.value());
            stats.profile_count += 1;
            stats
        });
        for mut entry in self.profiles.iter_mut() {
            entry.score = self.scorer.score(&entry, &stats);
        }
        *self.stats.write().unwrap_or_else(PoisonError::into_inner) = stats;

        info!(
            profiles = stats.profile_count,
            max_volume_usd = %format!("{:.2}", stats.max_volume_usd),
            max_transactions = stats.max_transaction_count,
            "Rebalanced whale scores"
        );
        stats
    }

    /// Flag profiles with no activity inside the stale window; returns how many are stale
    pub fn mark_stale(&self, now: DateTime<Utc>) -> usize {
        let window = Duration::days(self.scorer.config().stale_after_days);
        let mut stale = 0;
        for mut entry in self.profiles.iter_mut() {
            entry.stale = entry.is_inactive(now, window);
            if entry.stale {
                stale += 1;
            }
        }
        debug!(stale, "Marked stale profiles");
        stale
    }

    pub fn get(&self, chain: Chain, address: &str) -> Option<AddressProfile> {
        self.profiles
            .get(&self.key_for(chain, address))
            .map(|p| p.clone())
    }

    /// All profiles, score descending, ties broken by key
    pub fn ranked(&self) -> Vec<AddressProfile> {
        let mut profiles: Vec<_> = self.profiles.iter().map(|r| r.value().clone()).collect();
        profiles.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.key.cmp(&b.key)));
        profiles
    }

    pub fn population(&self) -> PopulationStats {
        *self.stats.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn scorer(&self) -> &WhaleScorer {
        &self.scorer
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }
}
