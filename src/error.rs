//! Error types for the whale scanner

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::Chain;

/// Result type alias using our custom Error
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the whale scanner
#[derive(Error, Debug)]
pub enum Error {
    // Per-record errors (never fatal to a batch)
    #[error("No price for {symbol} at {timestamp}")]
    PriceUnavailable {
        symbol: String,
        timestamp: DateTime<Utc>,
    },

    #[error("Malformed transaction {hash}: {reason}")]
    MalformedTransaction { hash: String, reason: String },

    #[error("Suspicious USD value for {symbol}: {reason}")]
    SuspiciousValue { symbol: String, reason: String },

    // Scoring
    #[error("Normalization attempted over an empty population")]
    InsufficientPopulation,

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    // Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(String),

    #[error("Report sink failed: {0}")]
    Sink(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl Error {
    /// Shorthand for a malformed-record rejection
    pub fn malformed(hash: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::MalformedTransaction {
            hash: hash.into(),
            reason: reason.into(),
        }
    }

    /// Check if this error belongs to a single record and must not abort the batch
    pub fn is_per_record(&self) -> bool {
        matches!(
            self,
            Error::PriceUnavailable { .. }
                | Error::MalformedTransaction { .. }
                | Error::SuspiciousValue { .. }
        )
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e.to_string())
    }
}

impl From<config::ConfigError> for Error {
    fn from(e: config::ConfigError) -> Self {
        Error::Config(e.to_string())
    }
}

/// Kind of a per-record failure reported alongside successful results
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordErrorKind {
    PriceUnavailable,
    MalformedTransaction,
    /// Accepted but held out of volume pending review
    SuspiciousValue,
}

/// A per-record failure collected during ingestion or valuation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordError {
    pub chain: Option<Chain>,
    pub hash: Option<String>,
    pub kind: RecordErrorKind,
    pub message: String,
}

impl RecordError {
    /// Build a record error from a per-record `Error`.
    ///
    /// Returns `None` for errors that are not scoped to a single record.
    pub fn from_error(chain: Option<Chain>, error: &Error) -> Option<Self> {
        let (kind, hash) = match error {
            Error::PriceUnavailable { .. } => (RecordErrorKind::PriceUnavailable, None),
            Error::SuspiciousValue { .. } => (RecordErrorKind::SuspiciousValue, None),
            Error::MalformedTransaction { hash, .. } => (
                RecordErrorKind::MalformedTransaction,
                Some(hash.clone()).filter(|h| !h.is_empty()),
            ),
            _ => return None,
        };

        Some(Self {
            chain,
            hash,
            kind,
            message: error.to_string(),
        })
    }

    /// Attach the transaction hash (valuation errors don't carry one)
    pub fn with_hash(mut self, hash: &str) -> Self {
        self.hash = Some(hash.to_string());
        self
    }
}
