//! Price oracle collaborator

use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use crate::error::{Error, Result};

/// Source of token prices in USD.
///
/// Implementations return the nearest price at or before `at`, or `None`
/// when they have nothing for the symbol.
pub trait PriceOracle: Send + Sync {
    /// Oracle name for logging
    fn name(&self) -> &'static str;

    fn get_price(&self, symbol: &str, at: DateTime<Utc>) -> Option<Decimal>;
}

/// One historical price observation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricePoint {
    pub symbol: String,
    /// Unix seconds
    pub timestamp: i64,
    pub price_usd: Decimal,
}

/// In-memory oracle over a fixed set of price points
#[derive(Debug, Clone, Default)]
pub struct StaticPriceOracle {
    series: HashMap<String, BTreeMap<DateTime<Utc>, Decimal>>,
}

impl StaticPriceOracle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from a list of observations
    pub fn from_points(points: impl IntoIterator<Item = PricePoint>) -> Result<Self> {
        let mut oracle = Self::new();
        for point in points {
            let at = Utc
                .timestamp_opt(point.timestamp, 0)
                .single()
                .ok_or_else(|| {
                    Error::Serialization(format!(
                        "price point for {} has invalid timestamp {}",
                        point.symbol, point.timestamp
                    ))
                })?;
            oracle.insert(&point.symbol, at, point.price_usd);
        }
        Ok(oracle)
    }

    /// Parse a JSON array of `{symbol, timestamp, price_usd}`
    pub fn from_json(json: &str) -> Result<Self> {
        let points: Vec<PricePoint> = serde_json::from_str(json)?;
        Self::from_points(points)
    }

    pub fn insert(&mut self, symbol: &str, at: DateTime<Utc>, price_usd: Decimal) {
        self.series
            .entry(symbol.to_ascii_uppercase())
            .or_default()
            .insert(at, price_usd);
    }

    /// Number of symbols with at least one price
    pub fn symbol_count(&self) -> usize {
        self.series.len()
    }
}

impl PriceOracle for StaticPriceOracle {
    fn name(&self) -> &'static str {
        "static"
    }

    fn get_price(&self, symbol: &str, at: DateTime<Utc>) -> Option<Decimal> {
        self.series
            .get(&symbol.to_ascii_uppercase())?
            .range(..=at)
            .next_back()
            .map(|(_, price)| *price)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_nearest_at_or_before() {
        let oracle = StaticPriceOracle::from_json(
            r#"[
                {"symbol": "ETH", "timestamp": 1000, "price_usd": "2400"},
                {"symbol": "eth", "timestamp": 2000, "price_usd": 2500.5}
            ]"#,
        )
        .unwrap();

        let at = |secs| Utc.timestamp_opt(secs, 0).unwrap();
        assert_eq!(oracle.get_price("ETH", at(999)), None);
        assert_eq!(oracle.get_price("ETH", at(1000)), Some(dec!(2400)));
        assert_eq!(oracle.get_price("ETH", at(1999)), Some(dec!(2400)));
        assert_eq!(oracle.get_price("Eth", at(5000)), Some(dec!(2500.5)));
        assert_eq!(oracle.get_price("BTC", at(5000)), None);
        assert_eq!(oracle.symbol_count(), 1);
    }
}
