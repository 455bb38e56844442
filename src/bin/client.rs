//! # Client Binary Entry Point
//!
//! Sends a reference image and candidates to a dispatcher and prints the answer.
//!
//! ```bash
//! cargo run --bin client -- --address 127.0.0.1:5000 \
//!   --reference ref.png cand1.png cand2.png cand3.png
//! ```
//!
//! Prints the 1-based position of the first matching candidate, or `0` for no match,
//! matching the dispatcher's wire answer.

use anyhow::Context;
use clap::Parser;
use log::{info, LevelFilter};
use std::time::Duration;

use histmatch::client::MatchClient;
use histmatch::common::logging::init_logger;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Dispatcher address
    #[arg(short, long, default_value = "127.0.0.1:5000")]
    address: String,

    /// Reference image file
    #[arg(short, long)]
    reference: String,

    /// Candidate image files, in order
    candidates: Vec<String>,

    /// Give up after this many seconds
    #[arg(long)]
    timeout_secs: Option<u64>,
}

fn read_image(path: &str) -> anyhow::Result<Vec<u8>> {
    std::fs::read(path).with_context(|| format!("failed to read {}", path))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logger(LevelFilter::Warn)?;
    let args = Args::parse();

    let reference = read_image(&args.reference)?;
    let candidates = args
        .candidates
        .iter()
        .map(|path| read_image(path))
        .collect::<anyhow::Result<Vec<_>>>()?;

    let mut client = MatchClient::new(args.address);
    if let Some(secs) = args.timeout_secs {
        client = client.with_timeout(Duration::from_secs(secs));
    }

    match client.submit(&reference, &candidates).await? {
        Some(index) => {
            info!("✅ First match: {}", args.candidates[index]);
            println!("{}", index + 1);
        }
        None => println!("0"),
    }
    Ok(())
}
