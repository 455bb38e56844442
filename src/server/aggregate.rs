//! # Aggregator
//!
//! Folds per-shard answers into one global answer. Each answered shard contributes
//! `start + local`; the smallest contribution wins, so the result does not depend on
//! which shard finished first.

use crate::server::dispatcher::{PartialResult, ShardOutcome, ShardReport};
use crate::server::partition::ShardRange;

/// The final answer for a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateResult {
    NoMatch,
    /// Zero-based global index of the first matching candidate.
    Match(usize),
}

impl AggregateResult {
    pub fn index(self) -> Option<usize> {
        match self {
            AggregateResult::NoMatch => None,
            AggregateResult::Match(index) => Some(index),
        }
    }

    /// Encode for the wire: `0` for no match, otherwise the index plus one.
    ///
    /// Ingestion caps batches at `u32::MAX - 1` candidates, so the value always fits.
    pub fn wire_value(self) -> u32 {
        match self {
            AggregateResult::NoMatch => 0,
            AggregateResult::Match(index) => u32::try_from(index + 1).unwrap_or(u32::MAX),
        }
    }

    pub fn from_wire(value: u32) -> Self {
        match value {
            0 => AggregateResult::NoMatch,
            k => AggregateResult::Match(k as usize - 1),
        }
    }
}

/// Combine `(shard, local answer)` pairs into the global answer.
pub fn aggregate<I>(results: I) -> AggregateResult
where
    I: IntoIterator<Item = (ShardRange, PartialResult)>,
{
    results
        .into_iter()
        .filter_map(|(shard, local)| local.map(|l| shard.global_index(l)))
        .min()
        .map_or(AggregateResult::NoMatch, AggregateResult::Match)
}

/// Combine dispatch reports. Unavailable shards contribute nothing.
pub fn aggregate_reports(reports: &[ShardReport]) -> AggregateResult {
    aggregate(reports.iter().map(|report| {
        let local = match report.outcome {
            ShardOutcome::Answered { result, .. } => result,
            ShardOutcome::Unavailable { .. } => None,
        };
        (report.assignment.shard, local)
    }))
}

/// Shards no worker could answer.
pub fn unavailable_shards(reports: &[ShardReport]) -> Vec<ShardRange> {
    reports
        .iter()
        .filter(|report| matches!(report.outcome, ShardOutcome::Unavailable { .. }))
        .map(|report| report.assignment.shard)
        .collect()
}
