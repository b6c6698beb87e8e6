//! Canonical, chain-agnostic transfer record

use chrono::{DateTime, TimeZone, Utc};
use lazy_static::lazy_static;
use regex::Regex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

lazy_static! {
    static ref EVM_ADDRESS: Regex = Regex::new(r"^0x[0-9a-fA-F]{40}$").expect("valid regex");
}

/// Supported chains
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Chain {
    Ethereum,
    Polygon,
    Bsc,
    Arbitrum,
    Optimism,
    Solana,
}

impl Chain {
    /// Every supported chain, in declaration order
    pub const ALL: [Chain; 6] = [
        Chain::Ethereum,
        Chain::Polygon,
        Chain::Bsc,
        Chain::Arbitrum,
        Chain::Optimism,
        Chain::Solana,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Chain::Ethereum => "ethereum",
            Chain::Polygon => "polygon",
            Chain::Bsc => "bsc",
            Chain::Arbitrum => "arbitrum",
            Chain::Optimism => "optimism",
            Chain::Solana => "solana",
        }
    }

    pub fn is_evm(&self) -> bool {
        !matches!(self, Chain::Solana)
    }

    /// Validate and normalize an address for this chain.
    ///
    /// EVM addresses are case-insensitive and normalized to lowercase.
    /// Solana addresses are base58 and must decode to 32 bytes.
    pub fn normalize_address(&self, address: &str) -> Option<String> {
        let address = address.trim();
        if self.is_evm() {
            EVM_ADDRESS
                .is_match(address)
                .then(|| address.to_ascii_lowercase())
        } else {
            match bs58::decode(address).into_vec() {
                Ok(bytes) if bytes.len() == 32 => Some(address.to_string()),
                _ => None,
            }
        }
    }
}

impl fmt::Display for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Chain {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ethereum" | "eth" => Ok(Chain::Ethereum),
            "polygon" | "matic" => Ok(Chain::Polygon),
            "bsc" | "bnb" | "binance" => Ok(Chain::Bsc),
            "arbitrum" | "arb" => Ok(Chain::Arbitrum),
            "optimism" | "op" => Ok(Chain::Optimism),
            "solana" | "sol" => Ok(Chain::Solana),
            other => Err(Error::Config(format!("unsupported chain: {other}"))),
        }
    }
}

/// A record as delivered by an external feed, before validation
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawTransaction {
    #[serde(default)]
    pub chain: Option<String>,
    #[serde(default)]
    pub hash: Option<String>,
    #[serde(default, alias = "from_address")]
    pub from: Option<String>,
    #[serde(default, alias = "to_address")]
    pub to: Option<String>,
    #[serde(default, alias = "token")]
    pub token_symbol: Option<String>,
    #[serde(default, alias = "raw_amount", alias = "value")]
    pub amount: Option<Decimal>,
    /// Unix seconds
    #[serde(default)]
    pub timestamp: Option<i64>,
    #[serde(default, alias = "block")]
    pub block_number: Option<u64>,
}

/// Immutable transfer event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub hash: String,
    pub chain: Chain,
    pub from_address: String,
    pub to_address: String,
    pub token_symbol: String,
    pub raw_amount: Decimal,
    /// Filled by valuation, `None` while unpriced
    pub usd_value: Option<Decimal>,
    pub timestamp: DateTime<Utc>,
    pub block_number: u64,
}

impl Transaction {
    /// Validate a raw feed record.
    ///
    /// Fails with `MalformedTransaction` when a required field is missing,
    /// the chain is unknown, the amount is negative, or an address is not
    /// valid for the chain. EVM hashes are lowercased and token symbols
    /// uppercased, so re-deliveries that differ only in case compare equal.
    pub fn from_raw(raw: &RawTransaction) -> Result<Self> {
        let raw_hash = required(&raw.hash).ok_or_else(|| Error::malformed("", "missing hash"))?;

        let chain_name =
            required(&raw.chain).ok_or_else(|| Error::malformed(raw_hash.clone(), "missing chain"))?;
        let chain: Chain = chain_name.parse().map_err(|_| {
            Error::malformed(raw_hash.clone(), format!("unsupported chain '{chain_name}'"))
        })?;

        let hash = if chain.is_evm() {
            raw_hash.to_ascii_lowercase()
        } else {
            raw_hash
        };
        let malformed = |reason: &str| Error::malformed(hash.clone(), reason);

        let from = required(&raw.from).ok_or_else(|| malformed("missing from address"))?;
        let to = required(&raw.to).ok_or_else(|| malformed("missing to address"))?;
        let from_address = chain
            .normalize_address(&from)
            .ok_or_else(|| malformed(&format!("invalid {chain} address '{from}'")))?;
        let to_address = chain
            .normalize_address(&to)
            .ok_or_else(|| malformed(&format!("invalid {chain} address '{to}'")))?;

        let token_symbol = required(&raw.token_symbol)
            .ok_or_else(|| malformed("missing token symbol"))?
            .to_ascii_uppercase();

        let raw_amount = raw.amount.ok_or_else(|| malformed("missing amount"))?;
        if raw_amount.is_sign_negative() && !raw_amount.is_zero() {
            return Err(malformed("negative amount"));
        }

        let secs = raw.timestamp.ok_or_else(|| malformed("missing timestamp"))?;
        let timestamp = Utc
            .timestamp_opt(secs, 0)
            .single()
            .filter(|_| secs > 0)
            .ok_or_else(|| malformed(&format!("timestamp {secs} out of range")))?;

        let block_number = raw.block_number.ok_or_else(|| malformed("missing block number"))?;

        Ok(Self {
            hash,
            chain,
            from_address,
            to_address,
            token_symbol,
            raw_amount,
            usd_value: None,
            timestamp,
            block_number,
        })
    }

    /// Attach the USD value. Consumes self so a priced record is never mutated again.
    pub fn with_usd_value(self, usd_value: Decimal) -> Self {
        Self {
            usd_value: Some(usd_value.max(Decimal::ZERO)),
            ..self
        }
    }

    pub fn is_priced(&self) -> bool {
        self.usd_value.is_some()
    }

    /// Both sides of the transfer
    pub fn participants(&self) -> [&str; 2] {
        [&self.from_address, &self.to_address]
    }

    /// The counterparty of `address` in this transfer
    pub fn counterparty(&self, address: &str) -> &str {
        if self.from_address == address {
            &self.to_address
        } else {
            &self.from_address
        }
    }
}

fn required(field: &Option<String>) -> Option<String> {
    field
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    const ALICE: &str = "0x742d35Cc6634C0532925a3b844Bc454e4438f44e";
    const BOB: &str = "0x28c6c06298d514db089934071355e5743bf21d60";

    fn raw() -> RawTransaction {
        RawTransaction {
            chain: Some("ethereum".to_string()),
            hash: Some("0x01".to_string()),
            from: Some(ALICE.to_string()),
            to: Some(BOB.to_string()),
            token_symbol: Some("USDT".to_string()),
            amount: Some(dec!(150000.25)),
            timestamp: Some(1_700_000_000),
            block_number: Some(18_000_000),
        }
    }

    #[test]
    fn test_from_raw_normalizes_evm_addresses() {
        let tx = Transaction::from_raw(&raw()).unwrap();
        assert_eq!(tx.chain, Chain::Ethereum);
        assert_eq!(tx.from_address, ALICE.to_ascii_lowercase());
        assert_eq!(tx.raw_amount, dec!(150000.25));
        assert!(!tx.is_priced());
    }

    #[test]
    fn test_from_raw_rejects_missing_fields() {
        let mut missing_token = raw();
        missing_token.token_symbol = Some("  ".to_string());
        let err = Transaction::from_raw(&missing_token).unwrap_err();
        assert!(err.to_string().contains("missing token symbol"));

        let mut missing_hash = raw();
        missing_hash.hash = None;
        assert!(Transaction::from_raw(&missing_hash).is_err());
    }

    #[test]
    fn test_from_raw_rejects_bad_addresses_and_amounts() {
        let mut bad_address = raw();
        bad_address.to = Some("0x1234".to_string());
        assert!(Transaction::from_raw(&bad_address).is_err());

        let mut negative = raw();
        negative.amount = Some(dec!(-1));
        assert!(Transaction::from_raw(&negative).is_err());

        let mut unknown_chain = raw();
        unknown_chain.chain = Some("dogechain".to_string());
        assert!(Transaction::from_raw(&unknown_chain).is_err());
    }

    #[test]
    fn test_solana_addresses() {
        let wallet = "DYw8jCTfwHNRJhhmFcbXvVDTqWMEVFBX6ZKUmG5CNSKK";
        assert_eq!(
            Chain::Solana.normalize_address(wallet).as_deref(),
            Some(wallet)
        );
        assert!(Chain::Solana.normalize_address(ALICE).is_none());
        assert!(Chain::Ethereum.normalize_address(wallet).is_none());
    }

    #[test]
    fn test_chain_aliases() {
        assert_eq!("ETH".parse::<Chain>().unwrap(), Chain::Ethereum);
        assert_eq!("bnb".parse::<Chain>().unwrap(), Chain::Bsc);
        assert_eq!("sol".parse::<Chain>().unwrap(), Chain::Solana);
        assert!("btc".parse::<Chain>().is_err());
    }

    #[test]
    fn test_usd_value_never_negative() {
        let tx = Transaction::from_raw(&raw()).unwrap().with_usd_value(dec!(-5));
        assert_eq!(tx.usd_value, Some(Decimal::ZERO));
    }

    #[test]
    fn test_from_raw_normalizes_case() {
        let mut shouted = raw();
        shouted.hash = Some("0xABCDEF".to_string());
        shouted.token_symbol = Some("usdt".to_string());
        let tx = Transaction::from_raw(&shouted).unwrap();
        assert_eq!(tx.hash, "0xabcdef");
        assert_eq!(tx.token_symbol, "USDT");

        // Solana signatures are base58, so case is significant
        let mut solana = raw();
        solana.chain = Some("solana".to_string());
        solana.hash = Some("5VERv8NMvzbJMEkV8xnrLkEaWRtSz9CosKDYjCJjBRnb".to_string());
        solana.from = Some("DYw8jCTfwHNRJhhmFcbXvVDTqWMEVFBX6ZKUmG5CNSKK".to_string());
        solana.to = Some("9WzDXwBbmkg8ZTbNMqUxvQRAyrZzDsGYdLVL9zYtAWWM".to_string());
        let tx = Transaction::from_raw(&solana).unwrap();
        assert_eq!(tx.hash, "5VERv8NMvzbJMEkV8xnrLkEaWRtSz9CosKDYjCJjBRnb");
    }
}
