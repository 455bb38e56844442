//! # Session Handler
//!
//! One client connection, one batch, one answer:
//!
//! ```text
//! ingest frames -> partition -> dispatch -> aggregate -> write u32 answer
//! ```
//!
//! The session works on any `AsyncRead + AsyncWrite` stream. If ingestion fails, no
//! answer is written and the connection is dropped, so a half-sent batch is never
//! answered with a number.

use std::sync::Arc;

use log::{debug, error, info, warn};
use tokio::io::{AsyncRead, AsyncWrite};
use uuid::Uuid;

use crate::common::batch::{CompareBatch, ImageBlob};
use crate::common::error::{IngestError, SessionError};
use crate::common::frame::{read_frame, write_answer, Frame};
use crate::server::aggregate::{aggregate_reports, unavailable_shards, AggregateResult};
use crate::server::dispatcher::Dispatcher;
use crate::server::metrics::DispatchMetrics;
use crate::server::partition::{assign, partition};
use crate::server::registry::WorkerRegistry;
use crate::worker::client::ComparatorClient;

/// Largest batch whose answer still fits the 4-byte wire value.
pub const MAX_CANDIDATES: usize = u32::MAX as usize - 1;

/// Read a reference image, then candidates until the zero-length terminator.
pub async fn ingest_batch<R>(reader: &mut R, max_frame_bytes: usize) -> Result<CompareBatch, IngestError>
where
    R: AsyncRead + Unpin,
{
    ingest_with_cap(reader, max_frame_bytes, MAX_CANDIDATES).await
}

async fn ingest_with_cap<R>(
    reader: &mut R,
    max_frame_bytes: usize,
    max_candidates: usize,
) -> Result<CompareBatch, IngestError>
where
    R: AsyncRead + Unpin,
{
    let reference = match read_frame(reader, max_frame_bytes).await? {
        Frame::Image(bytes) => ImageBlob::from(bytes),
        Frame::EndOfBatch => return Err(IngestError::MissingReference),
    };

    let mut candidates = Vec::new();
    loop {
        match read_frame(reader, max_frame_bytes).await? {
            Frame::Image(bytes) => {
                if candidates.len() == max_candidates {
                    return Err(IngestError::TooManyCandidates {
                        max: max_candidates,
                    });
                }
                candidates.push(ImageBlob::from(bytes));
            }
            Frame::EndOfBatch => break,
        }
    }

    Ok(CompareBatch::new(reference, candidates))
}

/// State for serving one client connection.
pub struct Session<C> {
    id: Uuid,
    registry: Arc<WorkerRegistry>,
    dispatcher: Arc<Dispatcher<C>>,
    metrics: DispatchMetrics,
    max_frame_bytes: usize,
}

impl<C: ComparatorClient> Session<C> {
    /// # Arguments
    /// - `registry`: Snapshot taken when the connection was accepted
    /// - `dispatcher`: Shared fan-out engine
    /// - `metrics`: Counters shared with the server
    /// - `max_frame_bytes`: Upper bound for any single image frame
    pub fn new(
        registry: Arc<WorkerRegistry>,
        dispatcher: Arc<Dispatcher<C>>,
        metrics: DispatchMetrics,
        max_frame_bytes: usize,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            registry,
            dispatcher,
            metrics,
            max_frame_bytes,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Serve the connection to completion.
    ///
    /// # Returns
    /// - `Ok(result)`: the answer was written
    /// - `Err(SessionError::Ingest)`: the batch was incomplete; nothing was written
    /// - `Err(SessionError::Respond)`: the answer could not be written
    pub async fn run<S>(self, mut stream: S) -> Result<AggregateResult, SessionError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        self.metrics.session_started();
        let label = self.id.to_string();

        let batch = match ingest_batch(&mut stream, self.max_frame_bytes).await {
            Ok(batch) => batch,
            Err(e) => {
                warn!("⚠️  [{}] Aborting session: {}", label, e);
                self.metrics.session_aborted();
                return Err(e.into());
            }
        };

        info!(
            "📥 [{}] Received batch: {} candidates, {} bytes",
            label,
            batch.candidate_count(),
            batch.total_bytes()
        );

        let result = self.resolve(&label, batch).await;

        if let Err(e) = write_answer(&mut stream, result.wire_value()).await {
            error!("❌ [{}] Failed to write answer: {}", label, e);
            self.metrics.session_aborted();
            return Err(SessionError::Respond(e));
        }

        self.metrics.session_completed();
        info!("📤 [{}] Answered {}", label, result.wire_value());
        Ok(result)
    }

    /// Partition, dispatch and aggregate one batch. The batch is released before
    /// returning.
    async fn resolve(&self, label: &str, batch: CompareBatch) -> AggregateResult {
        if batch.candidates.is_empty() {
            debug!("[{}] Empty batch, nothing to compare", label);
            return AggregateResult::NoMatch;
        }

        let shards = partition(batch.candidate_count(), self.registry.len());
        let assignments = assign(&shards);
        let round = self.registry.begin_round();

        let reports = self
            .dispatcher
            .dispatch(label, &batch, &round, &assignments)
            .await;
        drop(batch);

        let reachable = round.reachable_count();
        if reachable < self.registry.len() {
            warn!(
                "⚠️  [{}] {} of {} workers failed during this round",
                label,
                self.registry.len() - reachable,
                self.registry.len()
            );
        }

        let unavailable = unavailable_shards(&reports);
        if !unavailable.is_empty() {
            let missing: usize = unavailable.iter().map(|shard| shard.len()).sum();
            error!(
                "❌ [{}] {} of {} shards unavailable ({} candidates unexamined); answer may be a false no-match",
                label,
                unavailable.len(),
                reports.len(),
                missing
            );
        }

        let result = aggregate_reports(&reports);
        if let AggregateResult::Match(index) = result {
            self.metrics.match_found();
            debug!("[{}] First match at global index {}", label, index);
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::config::WorkerEndpoint;
    use crate::common::error::WorkerError;
    use crate::common::frame::{read_answer, write_frame, write_terminator};
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::time::Duration;
    use tokio::io::{duplex, AsyncWriteExt};

    /// Matches candidates byte-for-byte against `target`.
    struct EqualityClient {
        target: Vec<u8>,
        failing: HashSet<u16>,
    }

    #[async_trait]
    impl ComparatorClient for EqualityClient {
        async fn compare(
            &self,
            endpoint: &WorkerEndpoint,
            _reference: &ImageBlob,
            candidates: &[ImageBlob],
        ) -> Result<Option<usize>, WorkerError> {
            if self.failing.contains(&endpoint.port) {
                return Err(WorkerError::Closed);
            }
            Ok(candidates
                .iter()
                .position(|c| c.as_bytes() == self.target.as_slice()))
        }
    }

    fn session(workers: u16, target: &[u8], failing: &[u16]) -> (Session<EqualityClient>, DispatchMetrics) {
        let registry = WorkerRegistry::new(
            (0..workers)
                .map(|i| WorkerEndpoint::new("127.0.0.1", 9000 + i))
                .collect(),
        )
        .unwrap();
        let metrics = DispatchMetrics::new();
        let client = EqualityClient {
            target: target.to_vec(),
            failing: failing.iter().copied().collect(),
        };
        let dispatcher = Dispatcher::new(client, Duration::from_secs(1), metrics.clone());
        (
            Session::new(Arc::new(registry), Arc::new(dispatcher), metrics.clone(), 1024),
            metrics,
        )
    }

    async fn submit(session: Session<EqualityClient>, frames: &[&[u8]]) -> u32 {
        let (mut client, server) = duplex(64);
        let handle = tokio::spawn(session.run(server));
        for frame in frames {
            write_frame(&mut client, frame).await.unwrap();
        }
        write_terminator(&mut client).await.unwrap();
        let answer = read_answer(&mut client).await.unwrap();
        handle.await.unwrap().unwrap();
        answer
    }

    #[tokio::test]
    async fn no_match_answers_zero() {
        let (session, metrics) = session(2, b"nothing", &[]);
        let answer = submit(session, &[b"ref", b"a", b"b", b"c"]).await;
        assert_eq!(answer, 0);
        assert_eq!(metrics.snapshot().sessions_completed, 1);
    }

    #[tokio::test]
    async fn single_worker_match_is_one_based() {
        let (session, _) = session(1, b"b", &[]);
        assert_eq!(submit(session, &[b"ref", b"a", b"b"]).await, 2);
    }

    #[tokio::test]
    async fn first_match_wins_across_shards() {
        let (session, metrics) = session(3, b"x", &[]);
        // Matches at global 3 and 5 land in different shards.
        let answer = submit(session, &[b"ref", b"a", b"b", b"c", b"x", b"d", b"x", b"e"]).await;
        assert_eq!(answer, 4);
        assert_eq!(metrics.snapshot().matches_found, 1);
    }

    #[tokio::test]
    async fn failed_worker_does_not_change_the_answer() {
        let (session, metrics) = session(2, b"x", &[9000]);
        let answer = submit(session, &[b"ref", b"a", b"x", b"c", b"d"]).await;
        assert_eq!(answer, 2);
        assert_eq!(metrics.snapshot().shard_reassignments, 1);
    }

    #[tokio::test]
    async fn empty_batch_answers_zero() {
        let (session, metrics) = session(2, b"x", &[]);
        assert_eq!(submit(session, &[b"ref"]).await, 0);
        assert_eq!(metrics.snapshot().shards_dispatched, 0);
    }

    #[tokio::test]
    async fn truncated_stream_aborts_without_answer() {
        let (session, metrics) = session(2, b"x", &[]);
        let (mut client, server) = duplex(64);
        let handle = tokio::spawn(session.run(server));

        write_frame(&mut client, b"ref").await.unwrap();
        client.write_all(&10u32.to_be_bytes()).await.unwrap();
        client.write_all(b"abc").await.unwrap();
        client.shutdown().await.unwrap();

        let result = handle.await.unwrap();
        assert!(matches!(
            result,
            Err(SessionError::Ingest(IngestError::Truncated { .. }))
        ));
        assert_eq!(metrics.snapshot().sessions_aborted, 1);
        assert_eq!(metrics.snapshot().sessions_completed, 0);
    }

    #[tokio::test]
    async fn terminator_in_place_of_reference_is_rejected() {
        let mut reader: &[u8] = &[0, 0, 0, 0];
        assert!(matches!(
            ingest_batch(&mut reader, 1024).await,
            Err(IngestError::MissingReference)
        ));
    }

    #[tokio::test]
    async fn candidate_cap_is_enforced() {
        let mut bytes = Vec::new();
        for frame in [&b"ref"[..], b"a", b"b", b"c"] {
            write_frame(&mut bytes, frame).await.unwrap();
        }
        write_terminator(&mut bytes).await.unwrap();

        let mut reader = bytes.as_slice();
        assert!(matches!(
            ingest_with_cap(&mut reader, 1024, 2).await,
            Err(IngestError::TooManyCandidates { max: 2 })
        ));
    }
}
