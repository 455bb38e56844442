//! # Dispatcher
//!
//! Sends every shard of a batch to a comparator worker at the same time and waits for
//! all of them.
//!
//! ## Per-shard flow
//!
//! 1. Call the shard's assigned worker, bounded by `call_timeout`
//! 2. On any failure (refused, timed out, malformed answer):
//!    - mark the worker unreachable for this round
//!    - move to the next worker in registry order that has not failed this round
//! 3. Stop at the first worker that answers
//! 4. If every worker fails, report the shard as [`ShardOutcome::Unavailable`]
//!
//! A shard tries each worker at most once, so the walk ends after at most
//! `registry.len()` workers. Candidates are never dropped silently: an unavailable shard
//! is logged, counted and returned as its own outcome, so callers can tell it apart
//! from a content non-match.
//!
//! ## Message size
//!
//! A worker drops any RPC message larger than its limit. A shard whose encoded request
//! would exceed `max_rpc_bytes` is sent to its worker as several consecutive calls, in
//! candidate order, stopping at the first call that reports a match. When a worker fails
//! part way through, the next worker resumes from the call that failed.
//!
//! ## Concurrency
//!
//! Shards are polled together with `join_all`, which is also the fan-in barrier. Each
//! call has its own timeout, so a hung worker only holds up its own shard.

use std::ops::Range;
use std::time::Duration;

use futures::future::join_all;
use log::{debug, error, info, warn};

use crate::common::batch::{CompareBatch, ImageBlob};
use crate::common::config::WorkerEndpoint;
use crate::common::error::WorkerError;
use crate::common::messages::{compare_request_size_bound, encoded_image_size, DEFAULT_MAX_RPC_BYTES};
use crate::server::metrics::DispatchMetrics;
use crate::server::partition::{split_by_size, Assignment};
use crate::server::registry::DispatchRound;
use crate::worker::client::ComparatorClient;

/// A worker's answer for one shard: the local index of the first match, if any.
pub type PartialResult = Option<usize>;

/// How a shard's dispatch ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShardOutcome {
    /// A worker answered.
    Answered {
        /// Registry slot of the worker that answered
        worker: usize,
        result: PartialResult,
    },
    /// Every reachable worker failed for this shard.
    Unavailable { attempts: usize },
}

/// A shard's assignment together with how its dispatch ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShardReport {
    pub assignment: Assignment,
    pub outcome: ShardOutcome,
}

/// Fans shards out to comparator workers through a [`ComparatorClient`].
pub struct Dispatcher<C> {
    client: C,
    call_timeout: Duration,
    /// Largest encoded request sent in one call
    max_rpc_bytes: usize,
    metrics: DispatchMetrics,
}

impl<C: ComparatorClient> Dispatcher<C> {
    pub fn new(client: C, call_timeout: Duration, metrics: DispatchMetrics) -> Self {
        Self {
            client,
            call_timeout,
            max_rpc_bytes: DEFAULT_MAX_RPC_BYTES,
            metrics,
        }
    }

    /// Cap the encoded size of a single worker call.
    pub fn with_max_rpc_bytes(mut self, max_rpc_bytes: usize) -> Self {
        self.max_rpc_bytes = max_rpc_bytes;
        self
    }

    /// Dispatch every assignment concurrently and wait for all of them.
    ///
    /// # Arguments
    /// - `label`: Prefix for log lines (the session id)
    /// - `batch`: The client's batch; shards borrow their candidates from it
    /// - `round`: Reachability view shared by this batch's shards
    /// - `assignments`: Shards and their initial worker slots
    ///
    /// # Returns
    /// One report per assignment, in the same order as `assignments`.
    pub async fn dispatch(
        &self,
        label: &str,
        batch: &CompareBatch,
        round: &DispatchRound<'_>,
        assignments: &[Assignment],
    ) -> Vec<ShardReport> {
        debug!(
            "[{}] Dispatching {} shards across {} workers",
            label,
            assignments.len(),
            round.endpoints().len()
        );

        join_all(
            assignments
                .iter()
                .map(|assignment| self.run_shard(label, batch, round, *assignment)),
        )
        .await
    }

    /// Drive one shard through the registry until a worker answers or all have failed.
    async fn run_shard(
        &self,
        label: &str,
        batch: &CompareBatch,
        round: &DispatchRound<'_>,
        assignment: Assignment,
    ) -> ShardReport {
        let shard = assignment.shard;
        let candidates = &batch.candidates[shard.as_range()];
        let calls = self.split_calls(batch.reference.len(), candidates);
        let slots = round.endpoints().len();
        let mut attempts = 0;
        let mut next_call = 0;

        self.metrics.shard_dispatched();
        if calls.len() > 1 {
            debug!(
                "[{}] Shard [{}, {}) split into {} calls",
                label,
                shard.start,
                shard.end,
                calls.len()
            );
        }

        for step in 0..slots {
            let slot = (assignment.worker + step) % slots;
            if round.is_unreachable(slot) {
                continue;
            }

            let endpoint = round.endpoint(slot);
            if slot != assignment.worker {
                self.metrics.shard_reassigned();
                info!(
                    "🔄 [{}] Reassigning shard [{}, {}) to worker {}",
                    label, shard.start, shard.end, endpoint
                );
            }
            attempts += 1;

            match self
                .scan(endpoint, &batch.reference, candidates, &calls[next_call..])
                .await
            {
                Ok(result) => {
                    debug!(
                        "[{}] Shard [{}, {}) answered by {}: {:?}",
                        label, shard.start, shard.end, endpoint, result
                    );
                    return ShardReport {
                        assignment,
                        outcome: ShardOutcome::Answered {
                            worker: slot,
                            result,
                        },
                    };
                }
                Err((completed, e)) => {
                    warn!(
                        "⚠️  [{}] Worker {} failed on shard [{}, {}): {}",
                        label, endpoint, shard.start, shard.end, e
                    );
                    next_call += completed;
                    self.metrics.worker_failed();
                    round.mark_unreachable(slot);
                }
            }
        }

        error!(
            "❌ [{}] Shard [{}, {}) UNAVAILABLE after {} attempts; its {} candidates count as no match",
            label,
            shard.start,
            shard.end,
            attempts,
            shard.len()
        );
        self.metrics.shard_unavailable();
        ShardReport {
            assignment,
            outcome: ShardOutcome::Unavailable { attempts },
        }
    }
}

impl<C: ComparatorClient> Dispatcher<C> {
    /// Local candidate ranges, one per call, each within `max_rpc_bytes` once encoded.
    fn split_calls(&self, reference_len: usize, candidates: &[ImageBlob]) -> Vec<Range<usize>> {
        let fixed = compare_request_size_bound(reference_len, std::iter::empty());
        let costs: Vec<usize> = candidates
            .iter()
            .map(|candidate| encoded_image_size(candidate.len()))
            .collect();
        split_by_size(&costs, fixed, self.max_rpc_bytes)
    }

    /// Run `calls` against one worker in order until one reports a match.
    ///
    /// # Returns
    /// - `Ok(local)`: the shard-local index of the first match, or `None`
    /// - `Err((completed, error))`: the worker failed after `completed` calls came back
    ///   without a match
    async fn scan(
        &self,
        endpoint: &WorkerEndpoint,
        reference: &ImageBlob,
        candidates: &[ImageBlob],
        calls: &[Range<usize>],
    ) -> Result<PartialResult, (usize, WorkerError)> {
        for (completed, range) in calls.iter().enumerate() {
            let part = &candidates[range.clone()];
            let call = self.client.compare(endpoint, reference, part);
            let result = match tokio::time::timeout(self.call_timeout, call).await {
                Ok(result) => result,
                Err(_) => Err(WorkerError::Timeout(self.call_timeout)),
            };

            match result.and_then(|local| check_local_index(local, part.len())) {
                Ok(Some(local)) => return Ok(Some(range.start + local)),
                Ok(None) => {}
                Err(e) => return Err((completed, e)),
            }
        }
        Ok(None)
    }
}

/// Reject answers that point outside the shard.
fn check_local_index(local: PartialResult, shard_len: usize) -> Result<PartialResult, WorkerError> {
    match local {
        Some(index) if index >= shard_len => Err(WorkerError::MalformedResponse(format!(
            "local index {} outside shard of {} candidates",
            index, shard_len
        ))),
        other => Ok(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::batch::ImageBlob;
    use crate::common::config::WorkerEndpoint;
    use crate::server::partition::{assign, partition, ShardRange};
    use crate::server::registry::WorkerRegistry;
    use async_trait::async_trait;
    use std::collections::{HashMap, HashSet};
    use std::sync::Mutex;
    use std::time::Instant;

    /// Finds the candidate whose bytes equal `target`, like a worker would.
    #[derive(Default)]
    struct ScriptedClient {
        target: Vec<u8>,
        failing: HashSet<u16>,
        hanging: HashSet<u16>,
        bogus_index: HashSet<u16>,
        /// Port -> number of calls it answers before failing
        fail_after: HashMap<u16, usize>,
        calls: Mutex<Vec<(u16, usize)>>,
    }

    #[async_trait]
    impl ComparatorClient for ScriptedClient {
        async fn compare(
            &self,
            endpoint: &WorkerEndpoint,
            _reference: &ImageBlob,
            candidates: &[ImageBlob],
        ) -> Result<Option<usize>, WorkerError> {
            let earlier = {
                let mut calls = self.calls.lock().unwrap();
                let earlier = calls.iter().filter(|(port, _)| *port == endpoint.port).count();
                calls.push((endpoint.port, candidates.len()));
                earlier
            };
            if self
                .fail_after
                .get(&endpoint.port)
                .is_some_and(|&limit| earlier >= limit)
            {
                return Err(WorkerError::Closed);
            }
            if self.hanging.contains(&endpoint.port) {
                tokio::time::sleep(Duration::from_secs(30)).await;
            }
            if self.failing.contains(&endpoint.port) {
                return Err(WorkerError::Rpc("connection refused".into()));
            }
            if self.bogus_index.contains(&endpoint.port) {
                return Ok(Some(candidates.len() + 5));
            }
            Ok(candidates
                .iter()
                .position(|c| c.as_bytes() == self.target.as_slice()))
        }
    }

    fn registry(workers: u16) -> WorkerRegistry {
        WorkerRegistry::new(
            (0..workers)
                .map(|i| WorkerEndpoint::new("127.0.0.1", 7000 + i))
                .collect(),
        )
        .unwrap()
    }

    fn batch(n: usize) -> CompareBatch {
        CompareBatch::new(
            ImageBlob::from(b"reference".to_vec()),
            (0..n)
                .map(|i| ImageBlob::from(format!("candidate-{i}").into_bytes()))
                .collect(),
        )
    }

    fn dispatcher(client: ScriptedClient, timeout: Duration) -> Dispatcher<ScriptedClient> {
        Dispatcher::new(client, timeout, DispatchMetrics::new())
    }

    #[tokio::test]
    async fn healthy_workers_answer_their_own_shards() {
        let registry = registry(3);
        let batch = batch(10);
        let assignments = assign(&partition(10, 3));
        let dispatcher = dispatcher(
            ScriptedClient {
                target: b"candidate-5".to_vec(),
                ..Default::default()
            },
            Duration::from_secs(1),
        );

        let round = registry.begin_round();
        let reports = dispatcher.dispatch("t", &batch, &round, &assignments).await;

        assert_eq!(reports.len(), 3);
        assert_eq!(
            reports[1],
            ShardReport {
                assignment: Assignment {
                    shard: ShardRange::new(4, 7),
                    worker: 1
                },
                outcome: ShardOutcome::Answered {
                    worker: 1,
                    result: Some(1)
                },
            }
        );
        assert!(matches!(
            reports[0].outcome,
            ShardOutcome::Answered { worker: 0, result: None }
        ));
        assert_eq!(dispatcher.metrics.snapshot().shard_reassignments, 0);
    }

    #[tokio::test]
    async fn failed_shard_moves_to_the_next_worker() {
        let registry = registry(2);
        let batch = batch(4);
        let assignments = assign(&partition(4, 2));
        let dispatcher = dispatcher(
            ScriptedClient {
                target: b"candidate-1".to_vec(),
                failing: HashSet::from([7000]),
                ..Default::default()
            },
            Duration::from_secs(1),
        );

        let round = registry.begin_round();
        let reports = dispatcher.dispatch("t", &batch, &round, &assignments).await;

        // Shard 0 holds the match and must still be answered, by worker 1.
        assert_eq!(
            reports[0].outcome,
            ShardOutcome::Answered {
                worker: 1,
                result: Some(1)
            }
        );
        assert_eq!(
            reports[1].outcome,
            ShardOutcome::Answered {
                worker: 1,
                result: None
            }
        );

        let calls = dispatcher.client.calls.lock().unwrap().clone();
        assert_eq!(calls.iter().filter(|(port, _)| *port == 7000).count(), 1);
        assert_eq!(calls.iter().filter(|(port, _)| *port == 7001).count(), 2);
        assert!(round.is_unreachable(0));

        let snapshot = dispatcher.metrics.snapshot();
        assert_eq!(snapshot.shard_reassignments, 1);
        assert_eq!(snapshot.worker_failures, 1);
        assert_eq!(snapshot.shards_unavailable, 0);
    }

    #[tokio::test]
    async fn exhausted_shard_is_reported_unavailable() {
        let registry = registry(2);
        let batch = batch(2);
        let assignments = assign(&partition(2, 2));
        let dispatcher = dispatcher(
            ScriptedClient {
                target: b"candidate-0".to_vec(),
                failing: HashSet::from([7000, 7001]),
                ..Default::default()
            },
            Duration::from_secs(1),
        );

        let round = registry.begin_round();
        let reports = dispatcher.dispatch("t", &batch, &round, &assignments).await;

        for report in &reports {
            assert!(matches!(report.outcome, ShardOutcome::Unavailable { .. }));
        }
        // Each worker is tried at most once per shard.
        let calls = dispatcher.client.calls.lock().unwrap().len();
        assert!(calls <= 4, "{} calls", calls);
        assert_eq!(dispatcher.metrics.snapshot().shards_unavailable, 2);
    }

    #[tokio::test]
    async fn hung_worker_times_out_without_blocking_siblings() {
        let registry = registry(3);
        let batch = batch(3);
        let assignments = assign(&partition(3, 3));
        let dispatcher = dispatcher(
            ScriptedClient {
                target: b"candidate-0".to_vec(),
                hanging: HashSet::from([7000]),
                ..Default::default()
            },
            Duration::from_millis(100),
        );

        let round = registry.begin_round();
        let started = Instant::now();
        let reports = dispatcher.dispatch("t", &batch, &round, &assignments).await;

        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(
            reports[0].outcome,
            ShardOutcome::Answered {
                worker: 1,
                result: Some(0)
            }
        );
    }

    #[tokio::test]
    async fn out_of_range_answer_counts_as_failure() {
        let registry = registry(2);
        let batch = batch(2);
        let assignments = assign(&partition(2, 2));
        let dispatcher = dispatcher(
            ScriptedClient {
                target: b"candidate-0".to_vec(),
                bogus_index: HashSet::from([7000]),
                ..Default::default()
            },
            Duration::from_secs(1),
        );

        let round = registry.begin_round();
        let reports = dispatcher.dispatch("t", &batch, &round, &assignments).await;

        assert_eq!(
            reports[0].outcome,
            ShardOutcome::Answered {
                worker: 1,
                result: Some(0)
            }
        );
    }

    fn sized_batch(n: u8, size: usize) -> CompareBatch {
        CompareBatch::new(
            ImageBlob::from(vec![255u8; size]),
            (0..n).map(|i| ImageBlob::from(vec![i; size])).collect(),
        )
    }

    #[tokio::test]
    async fn large_shard_is_sent_in_bounded_calls() {
        let registry = registry(1);
        let batch = sized_batch(10, 300);
        let assignments = assign(&partition(10, 1));
        let budget = compare_request_size_bound(300, [300, 300, 300]);
        let dispatcher = dispatcher(
            ScriptedClient {
                target: vec![7u8; 300],
                ..Default::default()
            },
            Duration::from_secs(1),
        )
        .with_max_rpc_bytes(budget);

        let round = registry.begin_round();
        let reports = dispatcher.dispatch("t", &batch, &round, &assignments).await;

        assert_eq!(
            reports[0].outcome,
            ShardOutcome::Answered {
                worker: 0,
                result: Some(7)
            }
        );
        // Calls stop at the one holding the match.
        let calls = dispatcher.client.calls.lock().unwrap().clone();
        assert_eq!(calls, vec![(7000, 3), (7000, 3), (7000, 3)]);
    }

    #[tokio::test]
    async fn failed_worker_is_resumed_from_the_failed_call() {
        let registry = registry(2);
        let batch = sized_batch(10, 300);
        let assignments = vec![Assignment {
            shard: ShardRange::new(0, 10),
            worker: 0,
        }];
        let budget = compare_request_size_bound(300, [300, 300, 300]);
        let dispatcher = dispatcher(
            ScriptedClient {
                target: vec![7u8; 300],
                fail_after: HashMap::from([(7000, 1)]),
                ..Default::default()
            },
            Duration::from_secs(1),
        )
        .with_max_rpc_bytes(budget);

        let round = registry.begin_round();
        let reports = dispatcher.dispatch("t", &batch, &round, &assignments).await;

        assert_eq!(
            reports[0].outcome,
            ShardOutcome::Answered {
                worker: 1,
                result: Some(7)
            }
        );
        let calls = dispatcher.client.calls.lock().unwrap().clone();
        assert_eq!(calls, vec![(7000, 3), (7000, 3), (7001, 3), (7001, 3)]);
    }
}
