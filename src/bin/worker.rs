//! # Comparator Worker Binary Entry Point
//!
//! ```bash
//! cargo run --bin worker -- --config config/worker1.toml
//! ```

use clap::Parser;
use log::LevelFilter;
use std::sync::Arc;

use histmatch::common::config::{load_config, WorkerConfig};
use histmatch::common::logging::init_logger;
use histmatch::worker::ComparatorServer;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the worker configuration file (TOML format)
    ///
    /// Example: config/worker1.toml
    #[arg(short, long)]
    config: String,

    /// Override the configured match threshold
    #[arg(long)]
    threshold: Option<f64>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logger(LevelFilter::Info)?;
    let args = Args::parse();

    let mut config: WorkerConfig = load_config(&args.config)?;
    if let Some(threshold) = args.threshold {
        config.comparison.threshold = threshold;
    }
    config.validate()?;

    Arc::new(ComparatorServer::new(config)).run().await
}
