//! Bounded-lifetime price cache
//!
//! Keyed by `(symbol, time bucket)`. Entries expire after the configured
//! freshness window; when full, roughly a tenth of the entries are evicted.

use dashmap::DashMap;
use rust_decimal::Decimal;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Cached price with TTL
#[derive(Debug, Clone)]
pub struct CachedPrice {
    pub price: Decimal,
    pub cached_at: Instant,
    pub ttl: Duration,
}

impl CachedPrice {
    pub fn new(price: Decimal, ttl: Duration) -> Self {
        Self {
            price,
            cached_at: Instant::now(),
            ttl,
        }
    }

    pub fn is_expired(&self) -> bool {
        self.cached_at.elapsed() > self.ttl
    }
}

/// Cache statistics for monitoring
#[derive(Debug, Default)]
pub struct CacheStats {
    pub hits: AtomicU64,
    pub misses: AtomicU64,
    pub evictions: AtomicU64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits.load(Ordering::Relaxed);
        let total = hits + self.misses.load(Ordering::Relaxed);
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }
}

pub struct PriceCache {
    entries: DashMap<(String, i64), CachedPrice>,
    ttl: Duration,
    capacity: usize,
    stats: CacheStats,
}

impl PriceCache {
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            entries: DashMap::with_capacity(capacity.min(1024)),
            ttl,
            capacity: capacity.max(1),
            stats: CacheStats::default(),
        }
    }

    /// Fresh price for a symbol and bucket
    pub fn get(&self, symbol: &str, bucket: i64) -> Option<Decimal> {
        let key = (symbol.to_ascii_uppercase(), bucket);
        if let Some(entry) = self.entries.get(&key) {
            if !entry.is_expired() {
                self.stats.hits.fetch_add(1, Ordering::Relaxed);
                return Some(entry.price);
            }
            // Expired, drop the guard before removing
            drop(entry);
            self.entries.remove(&key);
        }
        self.stats.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    pub fn insert(&self, symbol: &str, bucket: i64, price: Decimal) {
        if self.entries.len() >= self.capacity {
            self.evict();
        }
        self.entries.insert(
            (symbol.to_ascii_uppercase(), bucket),
            CachedPrice::new(price, self.ttl),
        );
    }

    /// Drop expired entries first, then ~10% of the rest if still full
    fn evict(&self) {
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired());

        if self.entries.len() >= self.capacity {
            let to_remove = (self.capacity / 10).max(1);
            let keys: Vec<_> = self
                .entries
                .iter()
                .take(to_remove)
                .map(|r| r.key().clone())
                .collect();
            for key in keys {
                self.entries.remove(&key);
            }
        }

        let removed = before.saturating_sub(self.entries.len());
        self.stats
            .evictions
            .fetch_add(removed as u64, Ordering::Relaxed);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }
}
