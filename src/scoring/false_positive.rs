//! Exchange-like address detection
//!
//! Hot wallets of exchanges and routers move whale-sized volume without
//! being whales. These heuristics flag them so consumers can filter.

use serde::{Deserialize, Serialize};

use crate::labels::{AddressBook, LabelKind};
use crate::scoring::profile::AddressProfile;

/// Thresholds for exchange-like behaviour
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FalsePositiveConfig {
    /// Transaction count above which high counterparty counts look like an exchange
    #[serde(default = "default_busy_transaction_count")]
    pub busy_transaction_count: u64,

    #[serde(default = "default_busy_counterparties")]
    pub busy_counterparties: usize,

    /// Counterparty ratio above which a moderately active address looks like a service
    #[serde(default = "default_max_counterparty_ratio")]
    pub max_counterparty_ratio: f64,

    #[serde(default = "default_ratio_min_transactions")]
    pub ratio_min_transactions: u64,
}

fn default_busy_transaction_count() -> u64 {
    1000
}
fn default_busy_counterparties() -> usize {
    800
}
fn default_max_counterparty_ratio() -> f64 {
    0.95
}
fn default_ratio_min_transactions() -> u64 {
    50
}

impl Default for FalsePositiveConfig {
    fn default() -> Self {
        Self {
            busy_transaction_count: default_busy_transaction_count(),
            busy_counterparties: default_busy_counterparties(),
            max_counterparty_ratio: default_max_counterparty_ratio(),
            ratio_min_transactions: default_ratio_min_transactions(),
        }
    }
}

/// Why a profile looks like a service rather than a whale
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "reason")]
pub enum FalsePositiveReason {
    /// Address is a labelled exchange, protocol or system address
    Labelled { kind: LabelKind },
    /// Very high activity with very many counterparties
    ExchangeLike { transactions: u64, counterparties: usize },
    /// Almost every transaction has a new counterparty
    UniqueCounterparties { ratio: f64 },
}

/// Check a profile against the heuristics
pub fn check(
    profile: &AddressProfile,
    labels: &AddressBook,
    config: &FalsePositiveConfig,
) -> Option<FalsePositiveReason> {
    if let Some(chain) = profile.key.chain {
        if let Some(kind) = labels.kind_of(chain, profile.address()) {
            return Some(FalsePositiveReason::Labelled { kind });
        }
    } else if let Some(kind) = profile
        .distinct_chains
        .iter()
        .find_map(|chain| labels.kind_of(*chain, profile.address()))
    {
        return Some(FalsePositiveReason::Labelled { kind });
    }

    let counterparties = profile.distinct_counterparties.len();
    if profile.transaction_count > config.busy_transaction_count
        && counterparties > config.busy_counterparties
    {
        return Some(FalsePositiveReason::ExchangeLike {
            transactions: profile.transaction_count,
            counterparties,
        });
    }

    let ratio = profile.counterparty_ratio();
    if profile.transaction_count > config.ratio_min_transactions
        && ratio > config.max_counterparty_ratio
    {
        return Some(FalsePositiveReason::UniqueCounterparties { ratio });
    }

    None
}
