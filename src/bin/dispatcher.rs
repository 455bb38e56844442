//! # Dispatcher Binary Entry Point
//!
//! ```bash
//! cargo run --bin dispatcher -- --config config/dispatcher.toml
//! ```
//!
//! On Unix, `SIGHUP` reloads the worker list from the same file. Sessions already
//! running keep the list they started with; an invalid file leaves the current list
//! in place.

use clap::Parser;
use log::{error, info, LevelFilter};
use std::sync::Arc;

use histmatch::common::config::{load_config, DispatcherConfig};
use histmatch::common::logging::init_logger;
use histmatch::server::{DispatchServer, RegistryHandle, WorkerRegistry};
use histmatch::worker::RpcComparatorClient;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the dispatcher configuration file (TOML format)
    ///
    /// Example: config/dispatcher.toml
    #[arg(short, long)]
    config: String,
}

fn load_registry(path: &str) -> anyhow::Result<WorkerRegistry> {
    let config: DispatcherConfig = load_config(path)?;
    config.validate()?;
    Ok(WorkerRegistry::from_config(&config.workers)?)
}

#[cfg(unix)]
fn spawn_reload_handler(path: String, registry: RegistryHandle) -> anyhow::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut hangups = signal(SignalKind::hangup())?;
    tokio::spawn(async move {
        while hangups.recv().await.is_some() {
            match load_registry(&path) {
                Ok(next) => {
                    info!("🔄 Reloaded worker registry: {} workers", next.len());
                    registry.replace(next);
                }
                Err(e) => error!("❌ Reload of {} failed, keeping current workers: {}", path, e),
            }
        }
    });
    Ok(())
}

#[cfg(not(unix))]
fn spawn_reload_handler(_path: String, _registry: RegistryHandle) -> anyhow::Result<()> {
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logger(LevelFilter::Info)?;
    let args = Args::parse();

    let config: DispatcherConfig = load_config(&args.config)?;
    config.validate()?;

    let client = RpcComparatorClient::new(config.dispatch.connect_timeout());
    let server = Arc::new(DispatchServer::new(config, client)?);

    spawn_reload_handler(args.config.clone(), server.registry())?;

    server.run().await
}
