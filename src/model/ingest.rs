//! Ingestion boundary: validation and duplicate detection
//!
//! Every accepted record is fingerprinted per `(chain, hash)`. A repeated
//! delivery with the same payload is a harmless duplicate; the same hash
//! carrying a different payload is rejected as malformed.

use sha2::{Digest, Sha256};
use std::collections::HashMap;
use tracing::debug;

use crate::error::{Error, Result};
use crate::model::transaction::{Chain, RawTransaction, Transaction};

/// Outcome of admitting one record
#[derive(Debug, Clone, PartialEq)]
pub enum Admission {
    /// First time this hash is seen
    Accepted(Transaction),
    /// Identical payload already ingested
    Duplicate,
}

/// Fingerprint ledger of ingested transactions
#[derive(Debug, Default)]
pub struct IngestLedger {
    fingerprints: HashMap<(Chain, String), [u8; 32]>,
    duplicates: u64,
}

impl IngestLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate a raw record and check it against previously seen hashes
    pub fn admit(&mut self, raw: &RawTransaction) -> Result<Admission> {
        let tx = Transaction::from_raw(raw)?;
        let fingerprint = fingerprint(&tx);
        let key = (tx.chain, tx.hash.clone());

        match self.fingerprints.get(&key) {
            Some(existing) if *existing == fingerprint => {
                self.duplicates += 1;
                debug!(chain = %tx.chain, hash = %tx.hash, "Skipping duplicate transaction");
                Ok(Admission::Duplicate)
            }
            Some(_) => Err(Error::malformed(
                tx.hash.clone(),
                "hash collision with a different payload",
            )),
            None => {
                self.fingerprints.insert(key, fingerprint);
                Ok(Admission::Accepted(tx))
            }
        }
    }

    /// Number of distinct transactions admitted
    pub fn len(&self) -> usize {
        self.fingerprints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fingerprints.is_empty()
    }

    /// Number of identical re-deliveries skipped
    pub fn duplicates(&self) -> u64 {
        self.duplicates
    }
}

/// SHA-256 over the validated payload (excluding the USD value, which is derived)
fn fingerprint(tx: &Transaction) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(tx.chain.as_str().as_bytes());
    hasher.update([0u8]);
    hasher.update(tx.hash.as_bytes());
    hasher.update([0u8]);
    hasher.update(tx.from_address.as_bytes());
    hasher.update([0u8]);
    hasher.update(tx.to_address.as_bytes());
    hasher.update([0u8]);
    hasher.update(tx.token_symbol.as_bytes());
    hasher.update([0u8]);
    hasher.update(tx.raw_amount.normalize().to_string().as_bytes());
    hasher.update([0u8]);
    hasher.update(tx.timestamp.timestamp().to_be_bytes());
    hasher.update(tx.block_number.to_be_bytes());
    hasher.finalize().into()
}
