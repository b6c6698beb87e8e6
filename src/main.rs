//! Whale Scan - whale scoring and trading pattern detection
//!
//! Reads a transaction feed, prices it, scores every address and flags
//! wash trading, coordinated trading and pump-and-dump patterns.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{error, info};

// Use the library crate
use whale_scan::cli::commands::{self, AnalyzeOptions};
use whale_scan::config::Config;

/// Whale Scan - on-chain whale scoring and pattern detection
#[derive(Parser)]
#[command(name = "whalescan")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Emit logs as JSON
    #[arg(long, env = "WHALESCAN_JSON_LOGS")]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Score addresses and detect patterns in a transaction feed
    Analyze {
        /// JSON array of raw transactions
        #[arg(short, long)]
        transactions: PathBuf,

        /// JSON array of price points
        #[arg(short, long)]
        prices: Option<PathBuf>,

        /// Window end (unix seconds, default: latest transaction)
        #[arg(long)]
        window_end: Option<i64>,

        /// Write the report to this file
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Keep only the top N profiles (0 = all)
        #[arg(long, default_value = "0")]
        top: usize,
    },

    /// Show the effective configuration
    ShowConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    // Parse CLI arguments
    let cli = Cli::parse();

    // Initialize tracing
    let filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive("whale_scan=info".parse()?);
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);
    if cli.json_logs {
        builder.json().init();
    } else {
        builder.init();
    }

    // Load configuration
    let config = match Config::load(&cli.config) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    // Execute command
    let result = match cli.command {
        Commands::Analyze {
            transactions,
            prices,
            window_end,
            output,
            top,
        } => commands::analyze(
            &config,
            AnalyzeOptions {
                transactions,
                prices,
                window_end,
                output,
                top,
            },
        )
        .await
        .map(|report| {
            info!(
                run_id = %report.run_id,
                findings = report.findings.len(),
                "Done"
            )
        }),
        Commands::ShowConfig => commands::show_config(&config),
    };

    if let Err(e) = result {
        error!("Command failed: {:#}", e);
        std::process::exit(1);
    }

    Ok(())
}
