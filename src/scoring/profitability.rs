//! Profitable trader analysis
//!
//! A trader's buys and sells of one token on one chain form a trading
//! session: money in is the USD value of the buys, money out the USD value
//! of the sells. Only legs of at least `min_session_usd` count, and a
//! session needs both a buy and a sell. Sessions roll up into a win rate,
//! realised profit, a 0-1000 trader score, a tier and a holding style.
//!
//! Score = win rate × 400
//!       + min(total profit / 300, 350)
//!       + min(total volume / 3000, 150)
//!       + min(sessions × 25, 100)

use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use tracing::debug;

use crate::detect::{trade_direction, TradeDirection};
use crate::labels::AddressBook;
use crate::model::{Chain, Transaction};
use crate::scoring::{IdentityMode, ProfileKey};

const WIN_RATE_POINTS: f64 = 400.0;
const PROFIT_USD_PER_POINT: f64 = 300.0;
const MAX_PROFIT_POINTS: f64 = 350.0;
const VOLUME_USD_PER_POINT: f64 = 3000.0;
const MAX_VOLUME_POINTS: f64 = 150.0;
const POINTS_PER_SESSION: f64 = 25.0;
const MAX_CONSISTENCY_POINTS: f64 = 100.0;
const MAX_TRADER_SCORE: f64 = 1000.0;

const SECS_PER_DAY: f64 = 86_400.0;

/// How a transfer becomes a buy or a sell
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionDirection {
    /// Only trades against a labelled reference pool or router
    #[default]
    ReferencePools,
    /// From the trader's side: incoming is a buy, outgoing a sell
    Perspective,
}

/// Configuration for trader profitability
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfitabilityConfig {
    /// Smallest leg (USD) that takes part in a session
    #[serde(default = "default_min_session_usd")]
    pub min_session_usd: Decimal,

    #[serde(default)]
    pub direction: SessionDirection,

    /// Trader score at which a trader counts as profitable
    #[serde(default = "default_profitable_score")]
    pub profitable_score: f64,
}

fn default_min_session_usd() -> Decimal {
    Decimal::from(100_000)
}
fn default_profitable_score() -> f64 {
    400.0
}

impl Default for ProfitabilityConfig {
    fn default() -> Self {
        Self {
            min_session_usd: default_min_session_usd(),
            direction: SessionDirection::default(),
            profitable_score: default_profitable_score(),
        }
    }
}

/// Trader tier by realised profit and win rate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraderTier {
    Emerging,
    Proficient,
    Advanced,
    Elite,
}

impl TraderTier {
    /// Highest tier whose profit and win-rate floors are both met
    pub fn classify(total_profit_usd: Decimal, win_rate: f64) -> Self {
        const LADDER: [(TraderTier, i64, f64); 3] = [
            (TraderTier::Elite, 100_000, 0.7),
            (TraderTier::Advanced, 50_000, 0.6),
            (TraderTier::Proficient, 25_000, 0.5),
        ];

        LADDER
            .iter()
            .find(|(_, profit, rate)| total_profit_usd >= Decimal::from(*profit) && win_rate >= *rate)
            .map(|(tier, _, _)| *tier)
            .unwrap_or(TraderTier::Emerging)
    }
}

impl fmt::Display for TraderTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TraderTier::Emerging => "emerging",
            TraderTier::Proficient => "proficient",
            TraderTier::Advanced => "advanced",
            TraderTier::Elite => "elite",
        };
        f.write_str(name)
    }
}

/// Holding style by average session length
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradingStyle {
    /// Under 2 days
    DayTrader,
    /// 2 to 30 days
    SwingTrader,
    /// Over 30 days
    PositionTrader,
}

impl TradingStyle {
    pub fn classify(avg_hold_days: f64) -> Self {
        if avg_hold_days < 2.0 {
            TradingStyle::DayTrader
        } else if avg_hold_days <= 30.0 {
            TradingStyle::SwingTrader
        } else {
            TradingStyle::PositionTrader
        }
    }
}

/// Paired buys and sells of one token
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradingSession {
    pub chain: Chain,
    pub token_symbol: String,
    pub buys: u64,
    pub sells: u64,
    /// First buy
    pub entry_at: DateTime<Utc>,
    /// Last sell
    pub exit_at: DateTime<Utc>,
    pub invested_usd: Decimal,
    pub received_usd: Decimal,
    pub profit_usd: Decimal,
    pub profit_pct: f64,
}

impl TradingSession {
    pub fn is_profitable(&self) -> bool {
        self.profit_usd > Decimal::ZERO
    }

    /// Entry to exit; a sell-before-buy session holds for zero days
    pub fn hold_days(&self) -> f64 {
        (self.exit_at - self.entry_at).num_seconds().max(0) as f64 / SECS_PER_DAY
    }
}

/// Buy and sell legs collected for one (trader, chain, token)
#[derive(Debug, Default)]
struct Legs {
    buys: u64,
    sells: u64,
    invested: Decimal,
    received: Decimal,
    first_buy: Option<DateTime<Utc>>,
    last_sell: Option<DateTime<Utc>>,
}

impl Legs {
    fn push(&mut self, direction: TradeDirection, usd: Decimal, at: DateTime<Utc>) {
        match direction {
            TradeDirection::Buy => {
                self.buys += 1;
                self.invested = self.invested.saturating_add(usd);
                self.first_buy = Some(self.first_buy.map_or(at, |t| t.min(at)));
            }
            TradeDirection::Sell => {
                self.sells += 1;
                self.received = self.received.saturating_add(usd);
                self.last_sell = Some(self.last_sell.map_or(at, |t| t.max(at)));
            }
        }
    }

    /// A session needs at least one buy and one sell
    fn into_session(self, chain: Chain, token_symbol: String) -> Option<TradingSession> {
        let entry_at = self.first_buy?;
        let exit_at = self.last_sell?;
        let profit_usd = self.received.saturating_sub(self.invested);

        let invested = self.invested.to_f64().unwrap_or(0.0);
        let profit_pct = if invested > 0.0 {
            profit_usd.to_f64().unwrap_or(0.0) / invested * 100.0
        } else {
            0.0
        };

        Some(TradingSession {
            chain,
            token_symbol,
            buys: self.buys,
            sells: self.sells,
            entry_at,
            exit_at,
            invested_usd: self.invested,
            received_usd: self.received,
            profit_usd,
            profit_pct,
        })
    }
}

/// Roll-up of a trader's sessions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraderPerformance {
    pub sessions: Vec<TradingSession>,
    pub win_rate: f64,
    pub total_profit_usd: Decimal,
    pub avg_profit_usd: Decimal,
    /// USD invested across all sessions
    pub total_volume_usd: Decimal,
    pub avg_hold_days: f64,
    pub score: f64,
    pub tier: TraderTier,
    pub style: TradingStyle,
    pub profitable: bool,
}

impl TraderPerformance {
    /// None without sessions
    pub fn from_sessions(sessions: Vec<TradingSession>, profitable_score: f64) -> Option<Self> {
        if sessions.is_empty() {
            return None;
        }
        let count = sessions.len();

        let wins = sessions.iter().filter(|s| s.is_profitable()).count();
        let win_rate = wins as f64 / count as f64;
        let total_profit_usd = sessions
            .iter()
            .fold(Decimal::ZERO, |acc, s| acc.saturating_add(s.profit_usd));
        let total_volume_usd = sessions
            .iter()
            .fold(Decimal::ZERO, |acc, s| acc.saturating_add(s.invested_usd));
        let avg_profit_usd = total_profit_usd / Decimal::from(count as u64);
        let avg_hold_days = sessions.iter().map(TradingSession::hold_days).sum::<f64>() / count as f64;

        let score = trader_score(win_rate, total_profit_usd, total_volume_usd, count);

        Some(Self {
            win_rate,
            total_profit_usd,
            avg_profit_usd,
            total_volume_usd,
            avg_hold_days,
            score,
            tier: TraderTier::classify(total_profit_usd, win_rate),
            style: TradingStyle::classify(avg_hold_days),
            profitable: score >= profitable_score,
            sessions,
        })
    }
}

/// Trader score in [0, 1000]
pub fn trader_score(win_rate: f64, total_profit_usd: Decimal, total_volume_usd: Decimal, sessions: usize) -> f64 {
    let profit = total_profit_usd.to_f64().unwrap_or(0.0);
    let volume = total_volume_usd.to_f64().unwrap_or(0.0);

    let raw = win_rate * WIN_RATE_POINTS
        + (profit / PROFIT_USD_PER_POINT).min(MAX_PROFIT_POINTS)
        + (volume / VOLUME_USD_PER_POINT).min(MAX_VOLUME_POINTS)
        + (sessions as f64 * POINTS_PER_SESSION).min(MAX_CONSISTENCY_POINTS);

    raw.clamp(0.0, MAX_TRADER_SCORE)
}

/// Builds trading sessions and trader performance from transfers
pub struct ProfitabilityAnalyzer {
    config: ProfitabilityConfig,
}

impl ProfitabilityAnalyzer {
    pub fn new(config: ProfitabilityConfig) -> Self {
        Self { config }
    }

    /// Buy and sell legs carried by one transfer
    fn legs<'a>(&self, labels: &AddressBook, tx: &'a Transaction) -> Vec<(TradeDirection, &'a str)> {
        match self.config.direction {
            SessionDirection::ReferencePools => trade_direction(labels, tx).into_iter().collect(),
            SessionDirection::Perspective if tx.from_address != tx.to_address => vec![
                (TradeDirection::Sell, tx.from_address.as_str()),
                (TradeDirection::Buy, tx.to_address.as_str()),
            ],
            SessionDirection::Perspective => Vec::new(),
        }
    }

    /// Performance of every trader with at least one session, keyed like profiles
    pub fn analyze<'a>(
        &self,
        transactions: impl IntoIterator<Item = &'a Transaction>,
        labels: &AddressBook,
        identity: IdentityMode,
    ) -> BTreeMap<ProfileKey, TraderPerformance> {
        let mut legs: BTreeMap<(ProfileKey, Chain, &'a str), Legs> = BTreeMap::new();

        for tx in transactions {
            let Some(usd) = tx.usd_value else {
                continue;
            };
            if usd < self.config.min_session_usd {
                continue;
            }
            for (direction, trader) in self.legs(labels, tx) {
                legs.entry((identity.key(tx.chain, trader), tx.chain, tx.token_symbol.as_str()))
                    .or_default()
                    .push(direction, usd, tx.timestamp);
            }
        }

        let mut sessions: BTreeMap<ProfileKey, Vec<TradingSession>> = BTreeMap::new();
        for ((key, chain, token), legs) in legs {
            if let Some(session) = legs.into_session(chain, token.to_string()) {
                sessions.entry(key).or_default().push(session);
            }
        }

        let traders: BTreeMap<ProfileKey, TraderPerformance> = sessions
            .into_iter()
            .filter_map(|(key, sessions)| {
                TraderPerformance::from_sessions(sessions, self.config.profitable_score)
                    .map(|performance| (key, performance))
            })
            .collect();

        debug!(
            traders = traders.len(),
            profitable = traders.values().filter(|t| t.profitable).count(),
            "Trader profitability analysed"
        );
        traders
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::labels::LabelsConfig;
    use chrono::{Duration, TimeZone};
    use rust_decimal_macros::dec;

    const ROUTER: &str = "0x7a250d5630b4cf539739df2c5dacb4c659f2488d";
    const T0: i64 = 1_700_000_000;

    fn addr(n: u64) -> String {
        format!("0x{n:040x}")
    }

    fn tx(n: i64, from: &str, to: &str, token: &str, usd: Decimal, secs: i64) -> Transaction {
        Transaction {
            hash: format!("0x{n:064x}"),
            chain: Chain::Ethereum,
            from_address: from.to_string(),
            to_address: to.to_string(),
            token_symbol: token.to_string(),
            raw_amount: dec!(1),
            usd_value: Some(usd),
            timestamp: Utc.timestamp_opt(secs, 0).unwrap(),
            block_number: n as u64,
        }
    }

    fn session(invested: Decimal, profit: Decimal, hold_days: i64) -> TradingSession {
        let entry_at = Utc.timestamp_opt(T0, 0).unwrap();
        TradingSession {
            chain: Chain::Ethereum,
            token_symbol: "WETH".to_string(),
            buys: 1,
            sells: 1,
            entry_at,
            exit_at: entry_at + Duration::days(hold_days),
            invested_usd: invested,
            received_usd: invested + profit,
            profit_usd: profit,
            profit_pct: 0.0,
        }
    }

    fn perspective() -> ProfitabilityAnalyzer {
        ProfitabilityAnalyzer::new(ProfitabilityConfig {
            direction: SessionDirection::Perspective,
            ..Default::default()
        })
    }

    #[test]
    fn test_sessions_pair_buys_with_sells_per_token() {
        let (trader, desk) = (addr(1), addr(2));
        let day = 86_400;
        let txs = vec![
            tx(1, &desk, &trader, "WETH", dec!(150000), T0),
            tx(2, &trader, &desk, "WETH", dec!(175000), T0 + 5 * day),
            tx(3, &desk, &trader, "UNI", dec!(120000), T0 + day),
            tx(4, &trader, &desk, "UNI", dec!(100000), T0 + 3 * day),
        ];

        let traders = perspective().analyze(&txs, &AddressBook::default(), IdentityMode::PerChain);
        let performance = &traders[&IdentityMode::PerChain.key(Chain::Ethereum, &trader)];

        assert_eq!(performance.sessions.len(), 2);
        let uni = &performance.sessions[0];
        assert_eq!(uni.token_symbol, "UNI");
        assert_eq!(uni.profit_usd, dec!(-20000));
        assert!(!uni.is_profitable());

        let weth = &performance.sessions[1];
        assert_eq!(weth.invested_usd, dec!(150000));
        assert_eq!(weth.received_usd, dec!(175000));
        assert_eq!(weth.profit_usd, dec!(25000));
        assert!((weth.profit_pct - 16.666_666).abs() < 1e-3);
        assert!((weth.hold_days() - 5.0).abs() < 1e-9);

        assert_eq!(performance.win_rate, 0.5);
        assert_eq!(performance.total_profit_usd, dec!(5000));
        assert_eq!(performance.avg_profit_usd, dec!(2500));

        // The counterparty sold then bought back, so it has sessions too
        assert!(traders.contains_key(&IdentityMode::PerChain.key(Chain::Ethereum, &desk)));
    }

    #[test]
    fn test_small_legs_are_ignored() {
        let (trader, desk) = (addr(1), addr(2));
        let txs = vec![
            tx(1, &desk, &trader, "WETH", dec!(50000), T0),
            tx(2, &trader, &desk, "WETH", dec!(60000), T0 + 600),
        ];
        assert!(perspective()
            .analyze(&txs, &AddressBook::default(), IdentityMode::PerChain)
            .is_empty());
    }

    #[test]
    fn test_buy_without_sell_is_not_a_session() {
        let (trader, desk) = (addr(1), addr(2));
        let txs = vec![tx(1, &desk, &trader, "WETH", dec!(500000), T0)];
        assert!(perspective()
            .analyze(&txs, &AddressBook::default(), IdentityMode::PerChain)
            .is_empty());
    }

    #[test]
    fn test_reference_pool_direction() {
        let labels = AddressBook::from_config(&LabelsConfig::default()).unwrap();
        let (trader, friend) = (addr(1), addr(2));
        let txs = vec![
            tx(1, ROUTER, &trader, "PEPE", dec!(200000), T0),
            tx(2, &trader, ROUTER, "PEPE", dec!(260000), T0 + 3_600),
            // Wallet-to-wallet transfers are not trades
            tx(3, &friend, &trader, "PEPE", dec!(900000), T0 + 60),
        ];

        let analyzer = ProfitabilityAnalyzer::new(ProfitabilityConfig::default());
        let traders = analyzer.analyze(&txs, &labels, IdentityMode::PerChain);

        assert_eq!(traders.len(), 1);
        let performance = &traders[&IdentityMode::PerChain.key(Chain::Ethereum, &trader)];
        assert_eq!(performance.sessions[0].invested_usd, dec!(200000));
        assert_eq!(performance.sessions[0].profit_usd, dec!(60000));
        assert_eq!(performance.style, TradingStyle::DayTrader);
    }

    #[test]
    fn test_strong_trader_scores_elite() {
        let sessions = vec![
            session(dec!(150000), dec!(25000), 5),
            session(dec!(200000), dec!(50000), 10),
            session(dec!(150000), dec!(30000), 7),
            session(dec!(250000), dec!(75000), 14),
            session(dec!(150000), dec!(-15000), 3),
        ];
        let performance = TraderPerformance::from_sessions(sessions, 400.0).unwrap();

        assert_eq!(performance.win_rate, 0.8);
        assert_eq!(performance.total_profit_usd, dec!(165000));
        // 320 win rate + 350 profit (capped) + 150 volume (capped) + 100 consistency (capped)
        assert!((performance.score - 920.0).abs() < 1e-9);
        assert_eq!(performance.tier, TraderTier::Elite);
        assert_eq!(performance.style, TradingStyle::SwingTrader);
        assert!(performance.profitable);
    }

    #[test]
    fn test_average_trader_scores_emerging() {
        let sessions = vec![
            session(dec!(120000), dec!(10000), 1),
            session(dec!(120000), dec!(-8000), 1),
            session(dec!(120000), dec!(15000), 1),
            session(dec!(120000), dec!(-12000), 1),
        ];
        let performance = TraderPerformance::from_sessions(sessions, 400.0).unwrap();

        assert_eq!(performance.win_rate, 0.5);
        assert_eq!(performance.total_profit_usd, dec!(5000));
        assert!((performance.score - 466.666_666).abs() < 1e-3);
        assert_eq!(performance.tier, TraderTier::Emerging);
        assert_eq!(performance.style, TradingStyle::DayTrader);
    }

    #[test]
    fn test_losing_trader_score_floors_at_zero() {
        let sessions = vec![session(dec!(100000), dec!(-100000), 40)];
        let performance = TraderPerformance::from_sessions(sessions, 400.0).unwrap();

        assert_eq!(performance.score, 0.0);
        assert!(!performance.profitable);
        assert_eq!(performance.style, TradingStyle::PositionTrader);
    }

    #[test]
    fn test_tier_ladder() {
        assert_eq!(TraderTier::classify(dec!(100000), 0.7), TraderTier::Elite);
        assert_eq!(TraderTier::classify(dec!(100000), 0.65), TraderTier::Advanced);
        assert_eq!(TraderTier::classify(dec!(49999), 0.9), TraderTier::Proficient);
        assert_eq!(TraderTier::classify(dec!(30000), 0.4), TraderTier::Emerging);
        assert_eq!(TraderTier::classify(dec!(-1), 1.0), TraderTier::Emerging);
    }
}
