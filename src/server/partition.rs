//! # Partitioner
//!
//! Splits an ordered candidate list into contiguous shards, one per worker.
//!
//! With `N` candidates and `W` workers:
//! - `W >= N`: every candidate is its own shard and the extra workers sit idle
//! - otherwise: `W` shards, the first `N mod W` holding `ceil(N/W)` candidates and
//!   the rest `floor(N/W)`
//!
//! Shards are recorded by their start offset, so a worker's local answer maps back
//! with `start + local`. That stays correct when shard sizes differ, which
//! `shard_number * shard_size` does not.

use std::ops::Range;

/// Half-open range `[start, end)` of global candidate indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ShardRange {
    pub start: usize,
    pub end: usize,
}

impl ShardRange {
    pub fn new(start: usize, end: usize) -> Self {
        debug_assert!(start <= end);
        Self { start, end }
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    pub fn as_range(&self) -> Range<usize> {
        self.start..self.end
    }

    /// Translate a shard-local index into the client's global index.
    pub fn global_index(&self, local: usize) -> usize {
        self.start + local
    }
}

/// A shard and the registry slot it is sent to first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Assignment {
    pub shard: ShardRange,
    pub worker: usize,
}

/// Split `candidate_count` candidates across `worker_count` workers.
///
/// A `worker_count` of zero is treated as one. Zero candidates produce no shards.
pub fn partition(candidate_count: usize, worker_count: usize) -> Vec<ShardRange> {
    let workers = worker_count.max(1);
    if candidate_count == 0 {
        return Vec::new();
    }

    let shards = workers.min(candidate_count);
    let base = candidate_count / shards;
    let remainder = candidate_count % shards;

    let mut ranges = Vec::with_capacity(shards);
    let mut start = 0;
    for i in 0..shards {
        let size = if i < remainder { base + 1 } else { base };
        ranges.push(ShardRange::new(start, start + size));
        start += size;
    }
    ranges
}

/// Pair each shard with its initial worker: shard `i` goes to slot `i`.
pub fn assign(shards: &[ShardRange]) -> Vec<Assignment> {
    shards
        .iter()
        .enumerate()
        .map(|(worker, shard)| Assignment {
            shard: *shard,
            worker,
        })
        .collect()
}

/// Split a shard into consecutive local ranges whose summed cost stays within `budget`.
///
/// `fixed` is the cost every range pays once (the reference and the message envelope),
/// `costs` the per-candidate cost. A candidate that does not fit even on its own still
/// gets a range of its own, so every candidate is covered exactly once.
pub fn split_by_size(costs: &[usize], fixed: usize, budget: usize) -> Vec<Range<usize>> {
    let mut ranges = Vec::new();
    let mut start = 0;
    let mut used = fixed;
    for (i, cost) in costs.iter().enumerate() {
        if i > start && used + cost > budget {
            ranges.push(start..i);
            start = i;
            used = fixed;
        }
        used += cost;
    }
    if start < costs.len() {
        ranges.push(start..costs.len());
    }
    ranges
}
