//! Core data structures for the merge engine
//!
//! This module provides the data model shared by every merge component:
//! - ShardResponse: one shard's answer (success payload or failure)
//! - DocumentRef: a surviving document while a merge is in progress
//! - MergedResult: the final, immutable answer handed to the response assembler
//! - MergeValues: the wire extension carrying marshaled sort values

use crate::error::{MergeError, Result};
use crate::identifiers::{DocumentKey, ShardAddress};
use crate::sort_value::SortValue;
use crate::tracker::PartialResultsReport;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::time::Duration;

/// Stored fields of one returned document
pub type StoredDocument = Map<String, Value>;

/// Successful result of one shard's local query
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ShardPayload {
    /// Documents in local rank order
    pub documents: Vec<StoredDocument>,
    /// Locally reported hit count; `None` is treated as zero
    pub num_found: Option<u64>,
    /// Locally reported maximum score; `None` is ignored
    pub max_score: Option<f32>,
    /// The shard flagged its own answer as partial
    #[serde(default)]
    pub partial_results: bool,
    /// Sort values already carried with this response, positionally correlated
    /// with `documents`
    #[serde(default)]
    pub merge_values: Option<MergeValues>,
    /// Time the shard took to answer, when the executor measured it
    #[serde(default)]
    pub elapsed: Option<Duration>,
}

impl ShardPayload {
    /// Create a payload from documents, filling the count from their number
    pub fn new(documents: Vec<StoredDocument>) -> Self {
        let num_found = Some(documents.len() as u64);
        Self {
            documents,
            num_found,
            ..Default::default()
        }
    }

    pub fn with_num_found(mut self, num_found: Option<u64>) -> Self {
        self.num_found = num_found;
        self
    }

    pub fn with_max_score(mut self, max_score: Option<f32>) -> Self {
        self.max_score = max_score;
        self
    }

    pub fn with_partial_results(mut self, partial: bool) -> Self {
        self.partial_results = partial;
        self
    }

    pub fn with_merge_values(mut self, merge_values: MergeValues) -> Self {
        self.merge_values = Some(merge_values);
        self
    }

    pub fn with_elapsed(mut self, elapsed: Duration) -> Self {
        self.elapsed = Some(elapsed);
        self
    }
}

/// A shard that did not produce a usable response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShardFailure {
    /// Human-readable cause (error text, timeout, ...)
    pub error: String,
    /// The shard reported partial results before failing
    #[serde(default)]
    pub partial_results: Option<bool>,
    #[serde(default)]
    pub elapsed: Option<Duration>,
}

/// Exactly one of success or failure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShardOutcome {
    Success(ShardPayload),
    Failure(ShardFailure),
}

/// One shard's response for one pass of one query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShardResponse {
    pub shard: ShardAddress,
    pub outcome: ShardOutcome,
}

impl ShardResponse {
    pub fn success(shard: impl Into<ShardAddress>, payload: ShardPayload) -> Self {
        Self {
            shard: shard.into(),
            outcome: ShardOutcome::Success(payload),
        }
    }

    pub fn failure(shard: impl Into<ShardAddress>, error: impl Into<String>) -> Self {
        Self {
            shard: shard.into(),
            outcome: ShardOutcome::Failure(ShardFailure {
                error: error.into(),
                partial_results: None,
                elapsed: None,
            }),
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self.outcome, ShardOutcome::Failure(_))
    }

    pub fn payload(&self) -> Option<&ShardPayload> {
        match &self.outcome {
            ShardOutcome::Success(payload) => Some(payload),
            ShardOutcome::Failure(_) => None,
        }
    }
}

/// A surviving document while a merge is in progress
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentRef {
    pub key: DocumentKey,
    pub shard: ShardAddress,
    /// Rank within the originating shard's local response
    pub order_in_shard: usize,
    pub score: Option<f32>,
    /// Resolved values of the marshaled sort fields, in sort precedence order
    pub sort_values: Option<Vec<SortValue>>,
    /// Final 0-based position in the merged order
    pub position: usize,
}

impl DocumentRef {
    pub fn new(key: DocumentKey, shard: ShardAddress, order_in_shard: usize, score: Option<f32>) -> Self {
        Self {
            key,
            shard,
            order_in_shard,
            score,
            sort_values: None,
            position: 0,
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.sort_values.is_some()
    }
}

/// Requested slice of the merged order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultWindow {
    pub offset: usize,
    pub length: usize,
}

impl Default for ResultWindow {
    fn default() -> Self {
        Self { offset: 0, length: 10 }
    }
}

impl ResultWindow {
    pub fn new(offset: usize, length: usize) -> Self {
        Self { offset, length }
    }

    /// Index one past the last requested position
    pub fn end(&self) -> usize {
        self.offset.saturating_add(self.length)
    }

    /// Range of `total` sorted documents that falls inside this window
    pub fn clamp(&self, total: usize) -> std::ops::Range<usize> {
        let start = self.offset.min(total);
        let end = self.end().min(total);
        start..end
    }
}

/// One entry of the sort value wire extension
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeValuesEntry {
    pub field: String,
    pub values: Vec<Value>,
}

/// Named, ordered collection of marshaled sort values
///
/// One entry per marshaled sort field in sort precedence order. Values within an entry
/// are positionally correlated with the document order of the request that produced
/// them, not keyed by document id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MergeValues {
    pub entries: Vec<MergeValuesEntry>,
}

impl MergeValues {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, field: impl Into<String>, values: Vec<Value>) {
        self.entries.push(MergeValuesEntry {
            field: field.into(),
            values,
        });
    }

    pub fn with_field(mut self, field: impl Into<String>, values: Vec<Value>) -> Self {
        self.push(field, values);
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Per-merge statistics, built fresh for every query
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MergeStats {
    pub shards_total: usize,
    pub shards_failed: usize,
    pub documents_scanned: usize,
    pub duplicates_removed: usize,
    pub documents_resolved: usize,
    pub elapsed: Duration,
}

/// Final merged answer for one query
///
/// Immutable once built: the response assembler reads it, hydrates the window using
/// the lookup table and renders it.
#[derive(Debug, Clone)]
pub struct MergedResult {
    /// Global hit count, corrected for duplicates
    pub num_found: u64,
    /// Maximum of the locally reported maximum scores
    pub max_score: Option<f32>,
    /// Offset of the first materialized document
    pub start: usize,
    /// Materialized window, in merged order
    pub ordered_keys: Vec<DocumentKey>,
    /// Stringified key to DocumentRef, for materialized documents only
    pub result_ids: HashMap<String, DocumentRef>,
    /// Any shard failed or reported partial results
    pub partial_results: bool,
    pub partial_report: PartialResultsReport,
    pub stats: MergeStats,
}

impl MergedResult {
    /// Number of materialized documents
    pub fn len(&self) -> usize {
        self.ordered_keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ordered_keys.is_empty()
    }

    /// Look up a materialized document by its stringified key
    pub fn get(&self, key: &str) -> Option<&DocumentRef> {
        self.result_ids.get(key)
    }

    /// Materialized DocumentRefs in merged order
    pub fn documents(&self) -> impl Iterator<Item = &DocumentRef> {
        self.ordered_keys.iter().filter_map(|k| self.result_ids.get(k.as_str()))
    }

    /// Fill the placeholder slots with stored fields fetched for each document
    ///
    /// `fetch` is invoked once per materialized document in merged order; documents it
    /// cannot provide stay `None`.
    pub fn hydrate<F>(&self, mut fetch: F) -> Vec<Option<StoredDocument>>
    where
        F: FnMut(&DocumentRef) -> Option<StoredDocument>,
    {
        self.ordered_keys
            .iter()
            .map(|k| self.result_ids.get(k.as_str()).and_then(&mut fetch))
            .collect()
    }

    /// Check the counting invariants of a merge result
    pub fn check_invariants(&self) -> Result<()> {
        if (self.len() as u64) > self.num_found {
            return Err(MergeError::invalid_input(
                "merged_result",
                format!("{} materialized documents exceed num_found {}", self.len(), self.num_found),
                "Report this merge input; the dedup accounting is inconsistent",
            ));
        }
        if self.result_ids.len() != self.ordered_keys.len() {
            return Err(MergeError::invalid_input(
                "merged_result",
                "lookup table and ordered window disagree",
                "Report this merge input; the window was built inconsistently",
            ));
        }
        Ok(())
    }
}
