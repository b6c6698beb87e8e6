//! Whale score computation
//!
//! Score = scale × weighted sum of four factors, each in [0, 1]:
//! - Volume: ln(volume) against the population maximum
//! - Activity: ln(transaction count) against the population maximum
//! - Chain diversity: chains used / supported chains
//! - Token diversity: tokens traded / saturation, capped at 1
//!
//! Log scaling keeps heavy-tailed volume from letting one outlier flatten
//! everyone else. Denominators are floored at 1.

use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::model::Chain;
use crate::scoring::profile::AddressProfile;
use crate::scoring::ScoringConfig;

/// Population maxima used for normalization
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PopulationStats {
    pub profile_count: usize,
    pub max_volume_usd: f64,
    pub max_transaction_count: u64,
}

impl PopulationStats {
    /// Recompute from scratch over a set of profiles
    pub fn from_profiles<'a>(profiles: impl IntoIterator<Item = &'a AddressProfile>) -> Self {
        profiles.into_iter().fold(Self::default(), |mut stats, p| {
            stats.observe(p);
            stats.profile_count += 1;
            stats
        })
    }

    /// Raise the maxima to cover `profile`. O(1); never lowers them.
    pub fn observe(&mut self, profile: &AddressProfile) {
        let volume = profile.total_volume_usd.to_f64().unwrap_or(0.0);
        self.max_volume_usd = self.max_volume_usd.max(volume);
        self.max_transaction_count = self.max_transaction_count.max(profile.transaction_count);
    }
}

/// Normalized factor breakdown for one profile
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreFactors {
    pub volume: f64,
    pub activity: f64,
    pub chain_diversity: f64,
    pub token_diversity: f64,
}

/// Weighted whale scorer
#[derive(Debug, Clone)]
pub struct WhaleScorer {
    config: ScoringConfig,
}

impl WhaleScorer {
    pub fn new(config: ScoringConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ScoringConfig {
        &self.config
    }

    /// Factor breakdown; fails on an empty population
    pub fn factors(&self, profile: &AddressProfile, stats: &PopulationStats) -> Result<ScoreFactors> {
        if stats.profile_count == 0 {
            return Err(Error::InsufficientPopulation);
        }

        let volume = profile.total_volume_usd.to_f64().unwrap_or(0.0);
        let volume_factor = log_ratio(volume, stats.max_volume_usd);
        let activity_factor = log_ratio(
            profile.transaction_count as f64,
            stats.max_transaction_count as f64,
        );

        let chain_diversity = profile.distinct_chains.len() as f64 / Chain::ALL.len() as f64;
        let token_diversity = profile.distinct_tokens.len() as f64
            / self.config.token_saturation.max(1) as f64;

        Ok(ScoreFactors {
            volume: volume_factor,
            activity: activity_factor,
            chain_diversity: chain_diversity.clamp(0.0, 1.0),
            token_diversity: token_diversity.clamp(0.0, 1.0),
        })
    }

    /// Score in [0, score_scale]; an empty population yields the neutral score 0
    pub fn score(&self, profile: &AddressProfile, stats: &PopulationStats) -> f64 {
        match self.factors(profile, stats) {
            Ok(factors) => self.combine(&factors),
            Err(_) => 0.0,
        }
    }

    /// Weighted sum scaled to the configured range
    pub fn combine(&self, factors: &ScoreFactors) -> f64 {
        let weights = &self.config.weights;
        let raw = factors.volume * weights.volume_weight
            + factors.activity * weights.activity_weight
            + factors.chain_diversity * weights.chain_diversity_weight
            + factors.token_diversity * weights.token_diversity_weight;

        (raw * self.config.score_scale).clamp(0.0, self.config.score_scale)
    }
}

/// ln(value) / ln(max), both floored so the result stays in [0, 1]
fn log_ratio(value: f64, max: f64) -> f64 {
    let numerator = value.max(1.0).ln();
    let denominator = max.max(1.0).ln().max(1.0);
    (numerator / denominator).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scoring::profile::ProfileKey;
    use chrono::Utc;
    use rust_decimal::Decimal;

    fn profile(volume: i64, count: u64, tokens: usize) -> AddressProfile {
        let mut p = AddressProfile::new(
            ProfileKey {
                chain: Some(Chain::Ethereum),
                address: "0xabc".to_string(),
            },
            Utc::now(),
        );
        p.total_volume_usd = Decimal::from(volume);
        p.transaction_count = count;
        p.priced_transaction_count = count;
        p.distinct_chains.insert(Chain::Ethereum);
        for i in 0..tokens {
            p.distinct_tokens.insert(format!("TOK{i}"));
        }
        p
    }

    fn stats() -> PopulationStats {
        PopulationStats {
            profile_count: 10,
            max_volume_usd: 50_000_000.0,
            max_transaction_count: 500,
        }
    }

    #[test]
    fn test_log_ratio_floors() {
        assert_eq!(log_ratio(0.0, 0.0), 0.0);
        assert_eq!(log_ratio(1.0, 100.0), 0.0);
        assert!((log_ratio(100.0, 100.0) - 1.0).abs() < 1e-12);
        // Tiny population max: denominator floored at 1
        assert!(log_ratio(2.0, 2.0) < 1.0);
    }

    #[test]
    fn test_single_transaction_has_zero_activity() {
        let scorer = WhaleScorer::new(ScoringConfig::default());
        let factors = scorer.factors(&profile(250_000, 1, 1), &stats()).unwrap();
        assert_eq!(factors.activity, 0.0);
        assert!(factors.volume > 0.0);
        assert!((factors.chain_diversity - 1.0 / 6.0).abs() < 1e-12);
        assert!((factors.token_diversity - 0.1).abs() < 1e-12);
    }

    #[test]
    fn test_score_monotonic_in_volume() {
        let scorer = WhaleScorer::new(ScoringConfig::default());
        let stats = stats();
        let mut previous = -1.0;
        for volume in [0, 1, 10, 1_000, 100_000, 1_000_000, 50_000_000, 90_000_000] {
            let score = scorer.score(&profile(volume, 20, 3), &stats);
            assert!(score >= previous, "score dropped at volume {volume}");
            assert!((0.0..=1000.0).contains(&score));
            previous = score;
        }
    }

    #[test]
    fn test_empty_population_is_neutral() {
        let scorer = WhaleScorer::new(ScoringConfig::default());
        let empty = PopulationStats::default();
        assert!(matches!(
            scorer.factors(&profile(1_000, 5, 1), &empty),
            Err(Error::InsufficientPopulation)
        ));
        assert_eq!(scorer.score(&profile(1_000, 5, 1), &empty), 0.0);
    }

    #[test]
    fn test_single_member_population() {
        let scorer = WhaleScorer::new(ScoringConfig::default());
        let p = profile(1_000_000, 1, 1);
        let stats = PopulationStats::from_profiles([&p]);

        let score = scorer.score(&p, &stats);
        assert!(score.is_finite());
        // Full volume factor, zero activity
        let expected = 1000.0 * (0.45 + 0.15 / 6.0 + 0.15 * 0.1);
        assert!((score - expected).abs() < 1e-9);
    }

    #[test]
    fn test_maximal_profile_hits_scale() {
        let scorer = WhaleScorer::new(ScoringConfig::default());
        let mut p = profile(50_000_000, 500, 12);
        for chain in Chain::ALL {
            p.distinct_chains.insert(chain);
        }
        assert!((scorer.score(&p, &stats()) - 1000.0).abs() < 1e-9);
    }
}
