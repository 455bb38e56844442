//! # Comparator Worker Server
//!
//! The worker process answers `CompareRequest`s from dispatchers. Its only job is to
//! run [`HistogramComparator`] over the shard it was sent; partitioning, retries and
//! aggregation all live in the dispatcher.
//!
//! Each connection is served by its own task. The comparison itself is CPU-bound, so it
//! runs on tokio's blocking pool, and a semaphore caps how many run at once.

use std::sync::Arc;

use anyhow::Result;
use log::{debug, error, info, warn};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;

use crate::common::batch::ImageBlob;
use crate::common::config::WorkerConfig;
use crate::common::connection::Connection;
use crate::common::messages::Message;
use crate::processing::HistogramComparator;

/// Comparator worker listening for dispatcher RPCs.
pub struct ComparatorServer {
    config: WorkerConfig,
    comparator: HistogramComparator,
    /// Permits for concurrent comparisons on the blocking pool
    permits: Arc<Semaphore>,
}

impl ComparatorServer {
    pub fn new(config: WorkerConfig) -> Self {
        let comparator = HistogramComparator::new(config.comparison.threshold);
        let permits = Arc::new(Semaphore::new(config.worker.max_parallel_requests));
        Self {
            config,
            comparator,
            permits,
        }
    }

    /// Bind the configured address and serve forever.
    pub async fn run(self: Arc<Self>) -> Result<()> {
        let listener = TcpListener::bind(&self.config.worker.address).await?;
        self.serve(listener).await
    }

    /// Serve connections from an already-bound listener.
    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> Result<()> {
        info!(
            "📡 Comparator worker listening on {} (threshold {:.2})",
            listener.local_addr()?,
            self.comparator.threshold()
        );

        loop {
            match listener.accept().await {
                Ok((socket, addr)) => {
                    debug!("🔗 Worker accepted connection from {}", addr);
                    let server = Arc::clone(&self);
                    tokio::spawn(async move {
                        server.handle_connection(socket).await;
                    });
                }
                Err(e) => error!("❌ Accept error: {}", e),
            }
        }
    }

    /// Read requests from one dispatcher connection until it closes.
    async fn handle_connection(&self, socket: TcpStream) {
        let mut conn = Connection::with_limit(socket, self.config.worker.max_message_bytes);

        loop {
            match conn.read_message().await {
                Ok(Some(Message::CompareRequest {
                    request_id,
                    reference,
                    candidates,
                })) => {
                    // Without a response the dispatcher sees a closed connection and
                    // reassigns the shard.
                    let Some(response) = self.process(request_id, reference, candidates).await
                    else {
                        break;
                    };
                    if let Err(e) = conn.write_message(&response).await {
                        error!("❌ Failed to send response for request #{}: {}", request_id, e);
                        break;
                    }
                }
                Ok(Some(other)) => {
                    warn!("⚠️  Ignoring unexpected message {:?}", other);
                }
                Ok(None) => {
                    debug!("🔌 Connection closed");
                    break;
                }
                Err(e) => {
                    error!("❌ Error reading message: {}", e);
                    break;
                }
            }
        }
    }

    /// Run one comparison on the blocking pool and build the response.
    async fn process(
        &self,
        request_id: u64,
        reference: ImageBlob,
        candidates: Vec<ImageBlob>,
    ) -> Option<Message> {
        info!(
            "📷 Processing request #{} with {} candidates",
            request_id,
            candidates.len()
        );

        let outcome = match Arc::clone(&self.permits).acquire_owned().await {
            Ok(permit) => {
                let comparator = self.comparator;
                tokio::task::spawn_blocking(move || {
                    let _permit = permit;
                    comparator.find_match(reference.as_bytes(), &candidates)
                })
                .await
                .map_err(|e| format!("comparison task panicked: {}", e))
            }
            Err(e) => Err(format!("worker is shutting down: {}", e)),
        };

        match outcome {
            Ok(Ok(comparison)) => {
                info!(
                    "✅ Request #{} done: match {:?}, {} skipped",
                    request_id,
                    comparison.matching_index,
                    comparison.skipped.len()
                );
                Some(Message::CompareResponse {
                    request_id,
                    matching_index: comparison.matching_index.map(|i| i as u32),
                    skipped: comparison.skipped.into_iter().map(|i| i as u32).collect(),
                    reference_error: None,
                })
            }
            Ok(Err(decode_error)) => {
                warn!(
                    "⚠️  Request #{}: reference image rejected: {}",
                    request_id, decode_error
                );
                Some(Message::CompareResponse {
                    request_id,
                    matching_index: None,
                    skipped: Vec::new(),
                    reference_error: Some(decode_error.to_string()),
                })
            }
            Err(reason) => {
                error!("❌ Request #{} failed: {}", request_id, reason);
                None
            }
        }
    }
}
