//! Helpers for spinning up workers and dispatchers on loopback ports.

#![allow(dead_code)]

use std::io::Cursor;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use image::{DynamicImage, ImageBuffer, Luma};
use tokio::net::TcpListener;

use histmatch::common::config::{DispatcherConfig, WorkerConfig};
use histmatch::server::DispatchServer;
use histmatch::worker::{ComparatorServer, RpcComparatorClient};

/// A uniformly gray PNG. Different levels never correlate above the default threshold.
pub fn flat_png(level: u8) -> Vec<u8> {
    let img = DynamicImage::ImageLuma8(ImageBuffer::from_pixel(16, 16, Luma([level])));
    let mut out = Vec::new();
    img.write_to(&mut Cursor::new(&mut out), image::ImageFormat::Png)
        .unwrap();
    out
}

pub async fn start_worker() -> SocketAddr {
    start_worker_with_limit(None).await
}

/// Start a worker, optionally with a smaller RPC message limit.
pub async fn start_worker_with_limit(max_message_bytes: Option<usize>) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let mut config: WorkerConfig = toml::from_str(&format!(
        "[worker]\naddress = \"{}\"\n\n[comparison]\nthreshold = 0.9\n",
        addr
    ))
    .unwrap();
    if let Some(limit) = max_message_bytes {
        config.worker.max_message_bytes = limit;
    }
    config.validate().unwrap();
    let server = Arc::new(ComparatorServer::new(config));
    tokio::spawn(server.serve(listener));
    addr
}

/// A loopback port with nothing listening on it.
pub async fn dead_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

pub fn dispatcher_config(ports: &[u16]) -> DispatcherConfig {
    let mut toml_text = String::from(
        "[server]\naddress = \"127.0.0.1:0\"\n\n[dispatch]\ncall_timeout_ms = 2000\nconnect_timeout_ms = 500\n",
    );
    for port in ports {
        toml_text.push_str(&format!(
            "\n[[workers.endpoints]]\nhost = \"127.0.0.1\"\nport = {}\n",
            port
        ));
    }
    let config: DispatcherConfig = toml::from_str(&toml_text).unwrap();
    config.validate().unwrap();
    config
}

pub async fn start_dispatcher(
    ports: &[u16],
) -> (SocketAddr, Arc<DispatchServer<RpcComparatorClient>>) {
    start_dispatcher_with(dispatcher_config(ports)).await
}

pub async fn start_dispatcher_with(
    config: DispatcherConfig,
) -> (SocketAddr, Arc<DispatchServer<RpcComparatorClient>>) {
    config.validate().unwrap();
    let client = RpcComparatorClient::new(Duration::from_millis(500));
    let server = Arc::new(DispatchServer::new(config, client).unwrap());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(Arc::clone(&server).serve(listener));
    (addr, server)
}
