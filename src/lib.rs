//! Whale Scan Library
//!
//! Scores addresses for whale behaviour and flags wash trading, coordinated
//! trading and pump-and-dump patterns across EVM chains and Solana.

pub mod cli;
pub mod config;
pub mod detect;
pub mod error;
pub mod labels;
pub mod model;
pub mod pipeline;
pub mod relationship;
pub mod report;
pub mod scoring;
pub mod valuation;

// Re-export commonly used types
pub use config::Config;
pub use error::{Error, Result};
pub use pipeline::Analyzer;
