//! Configuration loading and validation

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::Path;

pub use crate::detect::{CoordinatedConfig, PumpDumpConfig, WashConfig, WindowConfig};
pub use crate::labels::LabelsConfig;
pub use crate::scoring::{IdentityMode, ScoringConfig, ScoringWeights};
pub use crate::valuation::ValuationConfig;

/// Tolerance for the scoring weight sum
const WEIGHT_SUM_TOLERANCE: f64 = 1e-6;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub valuation: ValuationConfig,
    #[serde(default)]
    pub scoring: ScoringConfig,
    #[serde(default)]
    pub window: WindowConfig,
    #[serde(default)]
    pub wash: WashConfig,
    #[serde(default)]
    pub coordinated: CoordinatedConfig,
    #[serde(default)]
    pub pump_dump: PumpDumpConfig,
    #[serde(default)]
    pub labels: LabelsConfig,
}

impl Config {
    /// Load configuration from file and environment variables
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let settings = config::Config::builder()
            // Start with defaults
            .set_default("window.lookback_days", WindowConfig::default().lookback_days)?
            // Load from file if exists
            .add_source(config::File::from(path).required(false))
            // Override with environment variables (prefix WHALESCAN__)
            .add_source(
                config::Environment::with_prefix("WHALESCAN")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to build configuration")?;

        let config: Config = settings
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        // Validate configuration
        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        // Scoring weights
        let weights = &self.scoring.weights;
        if [
            weights.volume_weight,
            weights.activity_weight,
            weights.chain_diversity_weight,
            weights.token_diversity_weight,
        ]
        .iter()
        .any(|w| *w < 0.0 || !w.is_finite())
        {
            anyhow::bail!("scoring weights must be non-negative");
        }
        if (weights.sum() - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
            anyhow::bail!("scoring weights must sum to 1.0, got {}", weights.sum());
        }
        if self.scoring.score_scale <= 0.0 {
            anyhow::bail!("score_scale must be positive");
        }

        // Tier ladder
        let scoring = &self.scoring;
        if !(Decimal::ZERO < scoring.large_tier_usd
            && scoring.large_tier_usd < scoring.mega_tier_usd
            && scoring.mega_tier_usd < scoring.ultra_tier_usd)
        {
            anyhow::bail!(
                "tier thresholds must be positive and strictly increasing: {} / {} / {}",
                scoring.large_tier_usd,
                scoring.mega_tier_usd,
                scoring.ultra_tier_usd
            );
        }
        if scoring.stale_after_days <= 0 {
            anyhow::bail!("stale_after_days must be positive");
        }
        let trader = &scoring.profitability;
        if trader.min_session_usd < Decimal::ZERO {
            anyhow::bail!("profitability.min_session_usd cannot be negative");
        }
        if !(0.0..=1000.0).contains(&trader.profitable_score) {
            anyhow::bail!("profitability.profitable_score must be between 0 and 1000");
        }

        // Valuation
        if self.valuation.time_bucket_secs <= 0 {
            anyhow::bail!("valuation.time_bucket_secs must be positive");
        }
        if self.valuation.cache_capacity == 0 {
            anyhow::bail!("valuation.cache_capacity must be positive");
        }
        if self.valuation.suspicious_usd <= Decimal::ZERO {
            anyhow::bail!("valuation.suspicious_usd must be positive");
        }

        if self.window.lookback_days <= 0 {
            anyhow::bail!("window.lookback_days must be positive");
        }

        // Wash trading
        if !(0.0..=1.0).contains(&self.wash.max_imbalance) {
            anyhow::bail!("wash.max_imbalance must be between 0 and 1");
        }
        if self.wash.min_volume_usd < Decimal::ZERO {
            anyhow::bail!("wash.min_volume_usd cannot be negative");
        }

        // Coordinated trading
        if self.coordinated.bucket_secs <= 0 || self.coordinated.sub_window_secs <= 0 {
            anyhow::bail!("coordinated bucket and sub-window widths must be positive");
        }
        if self.coordinated.min_addresses < 2 {
            anyhow::bail!("coordinated.min_addresses must be at least 2");
        }
        if self.coordinated.fresh_boost < 0.0 {
            anyhow::bail!("coordinated.fresh_boost cannot be negative");
        }

        // Pump-and-dump
        let pump = &self.pump_dump;
        if pump.bucket_secs <= 0 {
            anyhow::bail!("pump_dump.bucket_secs must be positive");
        }
        if pump.trailing_buckets == 0 || pump.decay_window == 0 {
            anyhow::bail!("pump_dump.trailing_buckets and decay_window must be positive");
        }
        if pump.spike_multiplier <= 1.0 {
            anyhow::bail!("pump_dump.spike_multiplier must be greater than 1");
        }
        if pump.decay_threshold <= 0.0 || pump.decay_threshold >= 1.0 {
            anyhow::bail!("pump_dump.decay_threshold must be between 0 and 1");
        }
        if pump.score_saturation <= 0.0 {
            anyhow::bail!("pump_dump.score_saturation must be positive");
        }

        // Labels must be valid addresses on their chain
        for entry in &self.labels.entries {
            if entry.chain.normalize_address(&entry.address).is_none() {
                anyhow::bail!("Invalid {} address in labels: {}", entry.chain, entry.address);
            }
        }

        Ok(())
    }
}
