//! Partial result tracking
//!
//! Aggregates per-shard failure and self-reported partial signals into one result-level
//! flag. A merged answer flagged partial carries a correctness caveat: counts and
//! ranking are not guaranteed complete, and consumers must surface that.
//!
//! When per-shard diagnostics are enabled, the tracker also keeps one [`ShardInfo`]
//! entry per shard (local count, max score, address, error text, elapsed time), the
//! report a client asks for to debug a slow or failing shard.

use crate::identifiers::ShardAddress;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Duration;
use tracing::warn;

/// Which pass of the merge a failure happened in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergePass {
    /// The main query round trip
    Query,
    /// The sort value resolution round trip
    Resolution,
}

/// A shard that failed outright, with its cause
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardFailureRecord {
    pub shard: ShardAddress,
    pub cause: String,
    pub pass: MergePass,
}

/// Diagnostic entry for one shard
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShardInfo {
    pub shard: ShardAddress,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_found: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_score: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub elapsed: Option<Duration>,
}

/// Snapshot of the tracker attached to a merged result
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PartialResultsReport {
    pub failed_shards: Vec<ShardFailureRecord>,
    pub self_reported_partial: Vec<ShardAddress>,
    /// Present only when per-shard diagnostics were requested
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shards_info: Option<Vec<ShardInfo>>,
}

impl PartialResultsReport {
    pub fn is_partial(&self) -> bool {
        !self.failed_shards.is_empty() || !self.self_reported_partial.is_empty()
    }
}

/// Accumulates partial signals for one merge
#[derive(Debug, Clone, Default)]
pub struct PartialResultTracker {
    failed: Vec<ShardFailureRecord>,
    self_reported: BTreeSet<ShardAddress>,
    shards_info: Option<Vec<ShardInfo>>,
}

impl PartialResultTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a tracker that also collects per-shard diagnostics
    pub fn with_shards_info() -> Self {
        Self {
            shards_info: Some(Vec::new()),
            ..Self::default()
        }
    }

    /// Record a shard that failed outright
    pub fn record_failure(&mut self, shard: &ShardAddress, cause: impl Into<String>, pass: MergePass) {
        let cause = cause.into();
        warn!(shard = %shard, ?pass, cause = %cause, "shard failed; result will be flagged partial");
        self.failed.push(ShardFailureRecord {
            shard: shard.clone(),
            cause,
            pass,
        });
    }

    /// Record a shard that flagged its own answer as partial
    pub fn record_self_reported_partial(&mut self, shard: &ShardAddress) {
        self.self_reported.insert(shard.clone());
    }

    /// Record diagnostics for a shard, if diagnostics are enabled
    pub fn record_info(&mut self, info: ShardInfo) {
        if let Some(infos) = self.shards_info.as_mut() {
            infos.push(info);
        }
    }

    /// Any shard failed or self-reported partial results
    pub fn is_partial(&self) -> bool {
        !self.failed.is_empty() || !self.self_reported.is_empty()
    }

    pub fn failed_count(&self) -> usize {
        self.failed.len()
    }

    pub fn report(&self) -> PartialResultsReport {
        PartialResultsReport {
            failed_shards: self.failed.clone(),
            self_reported_partial: self.self_reported.iter().cloned().collect(),
            shards_info: self.shards_info.clone(),
        }
    }
}
