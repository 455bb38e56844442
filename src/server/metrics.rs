//! # Dispatch Metrics
//!
//! Lock-free counters shared by every session. These are how operators tell
//! "no candidate matched" apart from "no worker could answer": the wire answer is `0`
//! in both cases, but only the second bumps `shards_unavailable`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default)]
pub struct DispatchMetrics {
    sessions_started: Arc<AtomicU64>,
    sessions_completed: Arc<AtomicU64>,
    sessions_aborted: Arc<AtomicU64>,
    shards_dispatched: Arc<AtomicU64>,
    shard_reassignments: Arc<AtomicU64>,
    worker_failures: Arc<AtomicU64>,
    shards_unavailable: Arc<AtomicU64>,
    matches_found: Arc<AtomicU64>,
}

/// Point-in-time copy of the counters, serializable for the periodic report.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub sessions_started: u64,
    pub sessions_completed: u64,
    pub sessions_aborted: u64,
    pub shards_dispatched: u64,
    pub shard_reassignments: u64,
    pub worker_failures: u64,
    pub shards_unavailable: u64,
    pub matches_found: u64,
}

impl DispatchMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn session_started(&self) {
        self.sessions_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn session_completed(&self) {
        self.sessions_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn session_aborted(&self) {
        self.sessions_aborted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn shard_dispatched(&self) {
        self.shards_dispatched.fetch_add(1, Ordering::Relaxed);
    }

    pub fn shard_reassigned(&self) {
        self.shard_reassignments.fetch_add(1, Ordering::Relaxed);
    }

    pub fn worker_failed(&self) {
        self.worker_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn shard_unavailable(&self) {
        self.shards_unavailable.fetch_add(1, Ordering::Relaxed);
    }

    pub fn match_found(&self) {
        self.matches_found.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            sessions_started: self.sessions_started.load(Ordering::Relaxed),
            sessions_completed: self.sessions_completed.load(Ordering::Relaxed),
            sessions_aborted: self.sessions_aborted.load(Ordering::Relaxed),
            shards_dispatched: self.shards_dispatched.load(Ordering::Relaxed),
            shard_reassignments: self.shard_reassignments.load(Ordering::Relaxed),
            worker_failures: self.worker_failures.load(Ordering::Relaxed),
            shards_unavailable: self.shards_unavailable.load(Ordering::Relaxed),
            matches_found: self.matches_found.load(Ordering::Relaxed),
        }
    }
}
