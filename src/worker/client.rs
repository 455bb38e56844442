//! # Comparator Client
//!
//! The dispatcher's view of a comparator worker: hand over a reference image and a
//! slice of candidates, get back the local index of the first match.
//!
//! [`ComparatorClient`] is the seam the dispatcher is generic over. Production code
//! uses [`RpcComparatorClient`], which speaks the JSON RPC over TCP; tests plug in
//! scripted implementations.
//!
//! A failed call is an ordinary `Err(WorkerError)`. The dispatcher decides whether to
//! reassign the shard; the client never retries on its own.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, warn};
use tokio::net::TcpStream;

use crate::common::batch::ImageBlob;
use crate::common::config::WorkerEndpoint;
use crate::common::connection::Connection;
use crate::common::error::WorkerError;
use crate::common::frame::DEFAULT_MAX_FRAME_BYTES;
use crate::common::messages::Message;

/// Remote comparison contract.
///
/// Implementations return `Ok(Some(i))` with `i < candidates.len()` for a match,
/// `Ok(None)` when nothing matched, and `Err` when the worker could not answer.
#[async_trait]
pub trait ComparatorClient: Send + Sync {
    async fn compare(
        &self,
        endpoint: &WorkerEndpoint,
        reference: &ImageBlob,
        candidates: &[ImageBlob],
    ) -> Result<Option<usize>, WorkerError>;
}

/// TCP/JSON stub for remote comparator workers. One connection per call.
pub struct RpcComparatorClient {
    connect_timeout: Duration,
    max_message_bytes: usize,
    next_request_id: AtomicU64,
}

impl RpcComparatorClient {
    pub fn new(connect_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            max_message_bytes: DEFAULT_MAX_FRAME_BYTES,
            next_request_id: AtomicU64::new(1),
        }
    }

    async fn connect(&self, endpoint: &WorkerEndpoint) -> Result<Connection, WorkerError> {
        let address = endpoint.address();
        let stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(&address))
            .await
            .map_err(|_| WorkerError::Timeout(self.connect_timeout))?
            .map_err(|source| WorkerError::Connect {
                endpoint: address,
                source,
            })?;
        Ok(Connection::with_limit(stream, self.max_message_bytes))
    }
}

#[async_trait]
impl ComparatorClient for RpcComparatorClient {
    async fn compare(
        &self,
        endpoint: &WorkerEndpoint,
        reference: &ImageBlob,
        candidates: &[ImageBlob],
    ) -> Result<Option<usize>, WorkerError> {
        let request_id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
        let mut conn = self.connect(endpoint).await?;

        let request = Message::CompareRequest {
            request_id,
            reference: reference.clone(),
            candidates: candidates.to_vec(),
        };
        conn.write_message(&request)
            .await
            .map_err(|e| WorkerError::Rpc(e.to_string()))?;

        let response = conn
            .read_message()
            .await
            .map_err(|e| WorkerError::Rpc(e.to_string()))?
            .ok_or(WorkerError::Closed)?;

        match response {
            Message::CompareResponse {
                request_id: answered,
                matching_index,
                skipped,
                reference_error,
            } => {
                if answered != request_id {
                    return Err(WorkerError::MalformedResponse(format!(
                        "answer for request #{} while waiting for #{}",
                        answered, request_id
                    )));
                }
                if !skipped.is_empty() {
                    warn!(
                        "⚠️  Worker {} skipped undecodable candidates {:?} in request #{}",
                        endpoint, skipped, request_id
                    );
                }
                if let Some(reason) = reference_error {
                    warn!(
                        "⚠️  Worker {} could not decode the reference for request #{}: {}",
                        endpoint, request_id, reason
                    );
                }

                match matching_index {
                    Some(index) if (index as usize) >= candidates.len() => {
                        Err(WorkerError::MalformedResponse(format!(
                            "local index {} outside shard of {} candidates",
                            index,
                            candidates.len()
                        )))
                    }
                    Some(index) => {
                        debug!("Worker {} matched local index {}", endpoint, index);
                        Ok(Some(index as usize))
                    }
                    None => Ok(None),
                }
            }
            other => Err(WorkerError::MalformedResponse(format!(
                "unexpected message {:?}",
                other
            ))),
        }
    }
}
