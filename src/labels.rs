//! Known address labels
//!
//! Maps addresses to exchanges, protocols (routers / pools) and system
//! addresses. Protocol entries double as the reference set the coordinated
//! trading detector uses to tell buys from sells.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::info;

use crate::error::{Error, Result};
use crate::model::Chain;

/// Category of a labelled address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LabelKind {
    /// Centralized exchange hot/cold wallet
    Exchange,
    /// DEX router, aggregator or liquidity pool
    Protocol,
    /// Null / burn addresses
    System,
}

/// A single configured label
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelEntry {
    pub chain: Chain,
    pub address: String,
    pub name: String,
    pub kind: LabelKind,
}

/// Label attached to an address
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressLabel {
    pub name: String,
    pub kind: LabelKind,
}

/// Label configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabelsConfig {
    #[serde(default = "default_entries")]
    pub entries: Vec<LabelEntry>,
}

impl Default for LabelsConfig {
    fn default() -> Self {
        Self {
            entries: default_entries(),
        }
    }
}

fn default_entries() -> Vec<LabelEntry> {
    let entry = |address: &str, name: &str, kind| LabelEntry {
        chain: Chain::Ethereum,
        address: address.to_string(),
        name: name.to_string(),
        kind,
    };

    vec![
        entry(
            "0x7a250d5630b4cf539739df2c5dacb4c659f2488d",
            "Uniswap V2: Router",
            LabelKind::Protocol,
        ),
        entry(
            "0xe592427a0aece92de3edee1f18e0157c05861564",
            "Uniswap V3: Router",
            LabelKind::Protocol,
        ),
        entry(
            "0xd9e1ce17f2641f24ae83637ab66a2cca9c378b9f",
            "SushiSwap: Router",
            LabelKind::Protocol,
        ),
        entry(
            "0x1111111254fb6c44bac0bed2854e76f90643097d",
            "1inch V4: Router",
            LabelKind::Protocol,
        ),
        entry(
            "0x0000000000000000000000000000000000000000",
            "Null Address",
            LabelKind::System,
        ),
    ]
}

/// Lookup table of labelled addresses, keyed per chain
#[derive(Debug, Clone, Default)]
pub struct AddressBook {
    labels: HashMap<(Chain, String), AddressLabel>,
}

impl AddressBook {
    /// Build from config, normalizing every address for its chain
    pub fn from_config(config: &LabelsConfig) -> Result<Self> {
        let mut book = Self::default();
        for entry in &config.entries {
            book.insert(entry)?;
        }

        info!(labels = book.len(), "Address book loaded");
        Ok(book)
    }

    /// Add or replace a label
    pub fn insert(&mut self, entry: &LabelEntry) -> Result<()> {
        let address = entry.chain.normalize_address(&entry.address).ok_or_else(|| {
            Error::Config(format!(
                "invalid {} address in labels: {}",
                entry.chain, entry.address
            ))
        })?;

        self.labels.insert(
            (entry.chain, address),
            AddressLabel {
                name: entry.name.clone(),
                kind: entry.kind,
            },
        );
        Ok(())
    }

    /// Label for an address, if known
    pub fn get(&self, chain: Chain, address: &str) -> Option<&AddressLabel> {
        self.labels.get(&(chain, address.to_string()))
    }

    pub fn is_labelled(&self, chain: Chain, address: &str) -> bool {
        self.get(chain, address).is_some()
    }

    /// Routers and pools: reference points for trade direction
    pub fn is_reference(&self, chain: Chain, address: &str) -> bool {
        self.kind_of(chain, address) == Some(LabelKind::Protocol)
    }

    pub fn is_exchange(&self, chain: Chain, address: &str) -> bool {
        self.kind_of(chain, address) == Some(LabelKind::Exchange)
    }

    pub fn kind_of(&self, chain: Chain, address: &str) -> Option<LabelKind> {
        self.get(chain, address).map(|l| l.kind)
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}
