//! Transaction model and ingestion boundary

pub mod ingest;
pub mod transaction;

pub use ingest::{Admission, IngestLedger};
pub use transaction::{Chain, RawTransaction, Transaction};
