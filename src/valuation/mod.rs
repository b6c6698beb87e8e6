//! Valuation Service
//!
//! Converts raw token amounts to USD. Lookups go through a bounded cache
//! keyed by `(symbol, time bucket)`; on a miss the oracle is asked for the
//! exact instant, then for a bounded number of earlier buckets, then for
//! the current price. If all of that fails the caller gets
//! `PriceUnavailable` and must leave the transaction unpriced.
//!
//! Values above `suspicious_usd`, or too large to represent, are almost
//! always bad prices or bad feed amounts. They are held out of volume and
//! reported as `SuspiciousValue` for manual review.

pub mod cache;
pub mod oracle;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::model::Transaction;

pub use cache::{CacheStats, PriceCache};
pub use oracle::{PriceOracle, PricePoint, StaticPriceOracle};

/// Configuration for valuation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValuationConfig {
    /// Cache freshness in seconds
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,

    /// Width of a cache time bucket in seconds
    #[serde(default = "default_time_bucket_secs")]
    pub time_bucket_secs: i64,

    /// Earlier buckets to try before falling back to the current price
    #[serde(default = "default_max_lookback_steps")]
    pub max_lookback_steps: u32,

    /// Maximum cached entries
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,

    /// Stablecoins priced at exactly $1 without asking the oracle
    #[serde(default = "default_pegged_symbols")]
    pub pegged_symbols: Vec<String>,

    /// USD value above which a transaction is flagged instead of priced
    #[serde(default = "default_suspicious_usd")]
    pub suspicious_usd: Decimal,
}

fn default_cache_ttl_secs() -> u64 {
    300 // 5 minutes
}
fn default_time_bucket_secs() -> i64 {
    300
}
fn default_max_lookback_steps() -> u32 {
    3
}
fn default_cache_capacity() -> usize {
    10_000
}
fn default_suspicious_usd() -> Decimal {
    Decimal::from(1_000_000_000u64)
}
fn default_pegged_symbols() -> Vec<String> {
    ["USDT", "USDC", "DAI", "BUSD", "FRAX", "USDS", "sUSDe", "crvUSD"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

impl Default for ValuationConfig {
    fn default() -> Self {
        Self {
            cache_ttl_secs: default_cache_ttl_secs(),
            time_bucket_secs: default_time_bucket_secs(),
            max_lookback_steps: default_max_lookback_steps(),
            cache_capacity: default_cache_capacity(),
            pegged_symbols: default_pegged_symbols(),
            suspicious_usd: default_suspicious_usd(),
        }
    }
}

/// Prices transactions through an injected oracle
pub struct ValuationService {
    oracle: Arc<dyn PriceOracle>,
    config: ValuationConfig,
    pegged: HashSet<String>,
    cache: PriceCache,
}

impl ValuationService {
    pub fn new(oracle: Arc<dyn PriceOracle>, config: ValuationConfig) -> Self {
        let pegged = config
            .pegged_symbols
            .iter()
            .map(|s| s.to_ascii_uppercase())
            .collect();
        let cache = PriceCache::new(
            Duration::from_secs(config.cache_ttl_secs),
            config.cache_capacity,
        );

        Self {
            oracle,
            config,
            pegged,
            cache,
        }
    }

    /// USD value of `amount` units of `symbol` at `at`
    pub fn value(&self, symbol: &str, amount: Decimal, at: DateTime<Utc>) -> Result<Decimal> {
        let price = self.resolve_price(symbol, at)?;
        amount
            .checked_mul(price)
            .map(|v| v.max(Decimal::ZERO))
            .ok_or_else(|| Error::SuspiciousValue {
                symbol: symbol.to_string(),
                reason: format!("USD value of {amount} units overflows"),
            })
    }

    /// Return a priced copy of the transaction, or the reason it can't be priced
    pub fn price_transaction(&self, tx: Transaction) -> std::result::Result<Transaction, (Transaction, Error)> {
        match self.value(&tx.token_symbol, tx.raw_amount, tx.timestamp) {
            Ok(usd) if usd > self.config.suspicious_usd => {
                warn!(
                    hash = %tx.hash,
                    symbol = %tx.token_symbol,
                    usd = %usd,
                    "Flagging suspicious transaction value for review"
                );
                let reason = format!("${usd} exceeds review threshold ${}", self.config.suspicious_usd);
                let symbol = tx.token_symbol.clone();
                Err((tx, Error::SuspiciousValue { symbol, reason }))
            }
            Ok(usd) => Ok(tx.with_usd_value(usd)),
            Err(e) => {
                debug!(hash = %tx.hash, symbol = %tx.token_symbol, error = %e, "Leaving transaction unpriced");
                Err((tx, e))
            }
        }
    }

    /// Resolve a price with caching and bounded fallbacks
    pub fn resolve_price(&self, symbol: &str, at: DateTime<Utc>) -> Result<Decimal> {
        if self.pegged.contains(&symbol.to_ascii_uppercase()) {
            return Ok(Decimal::ONE);
        }

        let bucket = self.bucket_of(at);
        if let Some(price) = self.cache.get(symbol, bucket) {
            return Ok(price);
        }

        let step = ChronoDuration::seconds(self.config.time_bucket_secs.max(1));
        let historical = (0..=self.config.max_lookback_steps as i32)
            .map(|k| at - step * k)
            .find_map(|t| self.oracle.get_price(symbol, t));

        let price = match historical {
            Some(price) => price,
            None => {
                let current = self.oracle.get_price(symbol, Utc::now());
                if current.is_some() {
                    debug!(symbol = %symbol, at = %at, "Historical price missing, using current price");
                }
                current.ok_or_else(|| Error::PriceUnavailable {
                    symbol: symbol.to_string(),
                    timestamp: at,
                })?
            }
        };

        if price.is_sign_negative() {
            return Err(Error::PriceUnavailable {
                symbol: symbol.to_string(),
                timestamp: at,
            });
        }

        self.cache.insert(symbol, bucket, price);
        Ok(price)
    }

    fn bucket_of(&self, at: DateTime<Utc>) -> i64 {
        at.timestamp().div_euclid(self.config.time_bucket_secs.max(1))
    }

    pub fn oracle_name(&self) -> &'static str {
        self.oracle.name()
    }

    pub fn cache_stats(&self) -> &CacheStats {
        self.cache.stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Oracle that only knows exact timestamps and counts calls
    struct ExactOracle {
        at: DateTime<Utc>,
        price: Decimal,
        calls: AtomicU32,
    }

    impl PriceOracle for ExactOracle {
        fn name(&self) -> &'static str {
            "exact"
        }

        fn get_price(&self, symbol: &str, at: DateTime<Utc>) -> Option<Decimal> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            (symbol == "ETH" && at == self.at).then_some(self.price)
        }
    }

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn test_pegged_symbols_skip_oracle() {
        let oracle = Arc::new(StaticPriceOracle::new());
        let service = ValuationService::new(oracle, ValuationConfig::default());
        assert_eq!(service.value("usdc", dec!(1234.5), ts(1_700_000_000)).unwrap(), dec!(1234.5));
    }

    #[test]
    fn test_nearest_earlier_bucket_fallback() {
        let oracle = Arc::new(ExactOracle {
            at: ts(1_700_000_000),
            price: dec!(2000),
            calls: AtomicU32::new(0),
        });
        let service = ValuationService::new(oracle.clone(), ValuationConfig::default());

        // Two buckets later: found on the second lookback step
        let later = ts(1_700_000_600);
        assert_eq!(service.value("ETH", dec!(2), later).unwrap(), dec!(4000));

        // Cached: no further oracle calls
        let calls = oracle.calls.load(Ordering::Relaxed);
        assert_eq!(service.value("ETH", dec!(1), later).unwrap(), dec!(2000));
        assert_eq!(oracle.calls.load(Ordering::Relaxed), calls);
        assert_eq!(service.cache_stats().hits.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_unavailable_after_bounded_fallbacks() {
        let oracle = Arc::new(ExactOracle {
            at: ts(1_000),
            price: dec!(2000),
            calls: AtomicU32::new(0),
        });
        let service = ValuationService::new(oracle.clone(), ValuationConfig::default());

        let err = service.value("ETH", dec!(1), ts(1_700_000_000)).unwrap_err();
        assert!(matches!(err, Error::PriceUnavailable { .. }));
        // exact + 3 lookbacks + current
        assert_eq!(oracle.calls.load(Ordering::Relaxed), 5);
    }

    #[test]
    fn test_current_price_fallback() {
        let mut oracle = StaticPriceOracle::new();
        oracle.insert("SOL", Utc::now() - ChronoDuration::minutes(1), dec!(150));
        let service = ValuationService::new(Arc::new(oracle), ValuationConfig::default());

        // Historical price predates every known point
        let value = service.value("SOL", dec!(10), ts(1_600_000_000)).unwrap();
        assert_eq!(value, dec!(1500));
    }

    fn transfer(token: &str, amount: Decimal) -> Transaction {
        Transaction {
            hash: "0x01".to_string(),
            chain: crate::model::Chain::Ethereum,
            from_address: "a".to_string(),
            to_address: "b".to_string(),
            token_symbol: token.to_string(),
            raw_amount: amount,
            usd_value: None,
            timestamp: ts(1_700_000_000),
            block_number: 1,
        }
    }

    #[test]
    fn test_price_transaction_keeps_unpriced_record() {
        let service = ValuationService::new(Arc::new(StaticPriceOracle::new()), ValuationConfig::default());
        let tx = transfer("PEPE", dec!(1000));

        let (unpriced, err) = service.price_transaction(tx).unwrap_err();
        assert!(unpriced.usd_value.is_none());
        assert!(err.is_per_record());
    }

    #[test]
    fn test_value_above_review_threshold_is_flagged() {
        let service = ValuationService::new(Arc::new(StaticPriceOracle::new()), ValuationConfig::default());

        // Exactly at the threshold is still priced
        let at_limit = service.price_transaction(transfer("USDC", dec!(1000000000))).unwrap();
        assert_eq!(at_limit.usd_value, Some(dec!(1000000000)));

        let (held, err) = service
            .price_transaction(transfer("USDC", dec!(1000000000.01)))
            .unwrap_err();
        assert!(held.usd_value.is_none());
        assert!(matches!(err, Error::SuspiciousValue { .. }));
    }

    #[test]
    fn test_value_overflow_is_suspicious_not_malformed() {
        let mut oracle = StaticPriceOracle::new();
        oracle.insert("ETH", ts(1_600_000_000), dec!(2000));
        let service = ValuationService::new(Arc::new(oracle), ValuationConfig::default());

        let err = service
            .value("ETH", Decimal::MAX, ts(1_700_000_000))
            .unwrap_err();
        assert!(matches!(err, Error::SuspiciousValue { .. }));
    }
}
