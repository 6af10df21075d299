//! Shard response merging
//!
//! [`ShardResponseMerger`] turns the per-shard answers for one query into a single
//! globally ordered, deduplicated result. Merging runs in two steps so the sort value
//! resolution pass can slot in between them:
//!
//! 1. [`ShardResponseMerger::collect`] walks every response in input order, records
//!    failures, aggregates counts and scores, and deduplicates documents by unique key
//!    into a [`CandidateSet`]. The first shard in input order wins a duplicate.
//! 2. [`ShardResponseMerger::finish`] sorts the survivors with the strategy comparator,
//!    assigns global positions and materializes the requested window.
//!
//! When the strategy needs sort values, [`crate::resolver::FieldValueResolver`] attaches
//! them to the candidate set between the two steps.
//!
//! # Usage Examples
//!
//! ```rust
//! use shardmerge::config::MergeConfig;
//! use shardmerge::merger::ShardResponseMerger;
//! use shardmerge::sort_spec::SortSpec;
//! use shardmerge::structures::{ResultWindow, ShardPayload, ShardResponse};
//! use serde_json::json;
//!
//! # fn example() -> Result<(), shardmerge::MergeError> {
//! let doc = |id: &str, score: f64| json!({"id": id, "score": score}).as_object().unwrap().clone();
//! let responses = vec![
//!     ShardResponse::success("shard1", ShardPayload::new(vec![doc("1", 5.0), doc("2", 3.0)])),
//!     ShardResponse::success("shard2", ShardPayload::new(vec![doc("3", 4.0)])),
//! ];
//!
//! let config = MergeConfig::default();
//! let spec = SortSpec::relevance();
//! let merger = ShardResponseMerger::new(&config, &spec, ResultWindow::default())?;
//! let result = merger.merge(&responses)?;
//!
//! let keys: Vec<&str> = result.ordered_keys.iter().map(|k| k.as_str()).collect();
//! assert_eq!(keys, vec!["1", "3", "2"]);
//! assert_eq!(result.num_found, 3);
//! # Ok(())
//! # }
//! ```

use crate::config::MergeConfig;
use crate::error::{MergeError, Result};
use crate::identifiers::{DocumentKey, MergeId, ShardAddress};
use crate::resolver::FieldValueResolver;
use crate::sort_spec::SortSpec;
use crate::strategy::MergeStrategy;
use crate::structures::{
    DocumentRef, MergeStats, MergeValues, MergedResult, ResultWindow, ShardOutcome, ShardResponse, StoredDocument,
};
use crate::tracker::{MergePass, PartialResultTracker, ShardInfo};
use rustc_hash::FxHashMap;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Instant;
use tracing::{debug, info};

/// Sort values a shard returned with its first-pass payload
#[derive(Debug, Clone)]
pub struct InBandValues {
    pub shard: ShardAddress,
    pub values: MergeValues,
    /// Number of documents in the shard's local response
    pub local_len: usize,
}

/// Deduplicated survivors of the query pass, before final ordering
#[derive(Debug)]
pub struct CandidateSet {
    pub(crate) merge_id: MergeId,
    pub(crate) survivors: Vec<DocumentRef>,
    index: FxHashMap<String, usize>,
    pub(crate) tracker: PartialResultTracker,
    pub(crate) num_found: u64,
    pub(crate) max_score: Option<f32>,
    pub(crate) stats: MergeStats,
    pub(crate) in_band: Vec<InBandValues>,
    started: Instant,
}

impl CandidateSet {
    fn new(merge_id: MergeId, tracker: PartialResultTracker) -> Self {
        Self {
            merge_id,
            survivors: Vec::new(),
            index: FxHashMap::default(),
            tracker,
            num_found: 0,
            max_score: None,
            stats: MergeStats::default(),
            in_band: Vec::new(),
            started: Instant::now(),
        }
    }

    pub fn merge_id(&self) -> MergeId {
        self.merge_id
    }

    /// Surviving documents in insertion order
    pub fn survivors(&self) -> &[DocumentRef] {
        &self.survivors
    }

    pub fn len(&self) -> usize {
        self.survivors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.survivors.is_empty()
    }

    /// Dedup-corrected hit count so far
    pub fn num_found(&self) -> u64 {
        self.num_found
    }

    pub fn max_score(&self) -> Option<f32> {
        self.max_score
    }

    pub fn get(&self, key: &str) -> Option<&DocumentRef> {
        self.index.get(key).map(|&i| &self.survivors[i])
    }

    pub(crate) fn get_mut(&mut self, key: &str) -> Option<&mut DocumentRef> {
        match self.index.get(key) {
            Some(&i) => self.survivors.get_mut(i),
            None => None,
        }
    }

    pub fn tracker(&self) -> &PartialResultTracker {
        &self.tracker
    }

    pub(crate) fn tracker_mut(&mut self) -> &mut PartialResultTracker {
        &mut self.tracker
    }

    /// In-band sort values carried with first-pass payloads
    pub fn in_band_values(&self) -> &[InBandValues] {
        &self.in_band
    }

    pub(crate) fn take_in_band_values(&mut self) -> Vec<InBandValues> {
        std::mem::take(&mut self.in_band)
    }

    /// Number of survivors that still lack sort values
    pub fn unresolved_count(&self) -> usize {
        self.survivors.iter().filter(|d| !d.is_resolved()).count()
    }

    pub(crate) fn record_resolved(&mut self, count: usize) {
        self.stats.documents_resolved += count;
    }

    /// Insert a document unless its key was already seen
    ///
    /// Returns `false` for a duplicate; the caller's copy is discarded.
    fn insert(&mut self, doc: DocumentRef) -> bool {
        let key = doc.key.as_str().to_string();
        if self.index.contains_key(&key) {
            return false;
        }
        self.index.insert(key, self.survivors.len());
        self.survivors.push(doc);
        true
    }
}

/// Merges per-shard responses for one query
#[derive(Debug, Clone)]
pub struct ShardResponseMerger<'a> {
    config: &'a MergeConfig,
    sort_spec: &'a SortSpec,
    strategy: MergeStrategy,
    window: ResultWindow,
}

impl<'a> ShardResponseMerger<'a> {
    /// Create a merger using the strategy selected for `sort_spec`
    pub fn new(config: &'a MergeConfig, sort_spec: &'a SortSpec, window: ResultWindow) -> Result<Self> {
        Self::with_strategy(config, sort_spec, window, MergeStrategy::for_sort_spec(sort_spec))
    }

    /// Create a merger with an explicit strategy
    pub fn with_strategy(
        config: &'a MergeConfig,
        sort_spec: &'a SortSpec,
        window: ResultWindow,
        strategy: MergeStrategy,
    ) -> Result<Self> {
        sort_spec.validate()?;
        if !strategy.is_eligible(sort_spec) {
            return Err(MergeError::invalid_input(
                "strategy",
                format!("{} cannot order by the requested sort", strategy.description()),
                "Use MergeStrategy::for_sort_spec to pick an eligible strategy",
            ));
        }
        if window.end() > config.max_window_end {
            return Err(MergeError::invalid_input(
                "window",
                format!(
                    "offset {} + length {} exceeds max_window_end {}",
                    window.offset, window.length, config.max_window_end
                ),
                "Request a shallower page or raise max_window_end",
            ));
        }

        Ok(Self {
            config,
            sort_spec,
            strategy,
            window,
        })
    }

    pub fn strategy(&self) -> MergeStrategy {
        self.strategy
    }

    pub fn sort_spec(&self) -> &SortSpec {
        self.sort_spec
    }

    pub fn config(&self) -> &MergeConfig {
        self.config
    }

    /// Merge a complete response set without a second round trip
    ///
    /// For field value merges this applies any in-band sort values; documents without
    /// values rank after resolved ones.
    pub fn merge(&self, responses: &[ShardResponse]) -> Result<MergedResult> {
        let mut candidates = self.collect(responses)?;
        if self.strategy.requires_field_resolution() {
            FieldValueResolver::new(self.sort_spec).prepare(&mut candidates)?;
        }
        Ok(self.finish(candidates))
    }

    /// Query pass: dedup documents, aggregate counts and record shard signals
    pub fn collect(&self, responses: &[ShardResponse]) -> Result<CandidateSet> {
        let merge_id = MergeId::new();
        let tracker = if self.config.shards_info {
            PartialResultTracker::with_shards_info()
        } else {
            PartialResultTracker::new()
        };
        let mut candidates = CandidateSet::new(merge_id, tracker);
        candidates.stats.shards_total = responses.len();

        debug!(
            merge_id = %merge_id,
            shards = responses.len(),
            strategy = ?self.strategy,
            "collecting shard responses"
        );

        for response in responses {
            match &response.outcome {
                ShardOutcome::Failure(failure) => {
                    candidates.tracker.record_failure(
                        &response.shard,
                        failure.error.clone(),
                        MergePass::Query,
                    );
                    if failure.partial_results == Some(true) {
                        candidates.tracker.record_self_reported_partial(&response.shard);
                    }
                    candidates.tracker.record_info(ShardInfo {
                        shard: response.shard.clone(),
                        num_found: None,
                        max_score: None,
                        error: Some(failure.error.clone()),
                        elapsed: failure.elapsed,
                    });
                    candidates.stats.shards_failed += 1;
                }
                ShardOutcome::Success(payload) => {
                    if payload.partial_results {
                        candidates.tracker.record_self_reported_partial(&response.shard);
                    }
                    candidates.tracker.record_info(ShardInfo {
                        shard: response.shard.clone(),
                        num_found: payload.num_found,
                        max_score: payload.max_score,
                        error: None,
                        elapsed: payload.elapsed,
                    });

                    // a shard never found fewer documents than it returned
                    let local_found = payload.num_found.unwrap_or(0).max(payload.documents.len() as u64);
                    candidates.num_found += local_found;
                    if let Some(score) = payload.max_score {
                        candidates.max_score = Some(match candidates.max_score {
                            Some(current) => current.max(score),
                            None => score,
                        });
                    }

                    for (order, document) in payload.documents.iter().enumerate() {
                        candidates.stats.documents_scanned += 1;
                        let doc = self.document_ref(&response.shard, order, document)?;
                        let key = doc.key.clone();
                        if !candidates.insert(doc) {
                            candidates.num_found = candidates.num_found.saturating_sub(1);
                            candidates.stats.duplicates_removed += 1;
                            debug!(merge_id = %merge_id, key = %key, shard = %response.shard, "discarding duplicate document");
                        }
                    }

                    if let Some(values) = &payload.merge_values {
                        candidates.in_band.push(InBandValues {
                            shard: response.shard.clone(),
                            values: values.clone(),
                            local_len: payload.documents.len(),
                        });
                    }
                }
            }
        }

        Ok(candidates)
    }

    /// Final ordering: sort survivors, assign positions, materialize the window
    pub fn finish(&self, candidates: CandidateSet) -> MergedResult {
        let CandidateSet {
            merge_id,
            mut survivors,
            tracker,
            num_found,
            max_score,
            mut stats,
            started,
            ..
        } = candidates;

        survivors.sort_by(|a, b| self.strategy.compare(self.sort_spec, a, b));

        let range = self.window.clamp(survivors.len());
        let mut ordered_keys = Vec::with_capacity(range.len());
        let mut result_ids = HashMap::with_capacity(range.len());
        for (position, mut doc) in survivors.into_iter().enumerate() {
            if !range.contains(&position) {
                continue;
            }
            doc.position = position;
            ordered_keys.push(doc.key.clone());
            result_ids.insert(doc.key.as_str().to_string(), doc);
        }

        stats.elapsed = started.elapsed();
        let partial_report = tracker.report();
        let partial_results = partial_report.is_partial();

        info!(
            merge_id = %merge_id,
            num_found,
            materialized = ordered_keys.len(),
            duplicates = stats.duplicates_removed,
            failed_shards = tracker.failed_count(),
            partial = partial_results,
            "merge complete"
        );

        MergedResult {
            num_found,
            max_score,
            start: self.window.offset,
            ordered_keys,
            result_ids,
            partial_results,
            partial_report,
            stats,
        }
    }

    fn document_ref(&self, shard: &ShardAddress, order: usize, document: &StoredDocument) -> Result<DocumentRef> {
        let key_value = document.get(&self.config.unique_key_field).ok_or_else(|| {
            MergeError::malformed_document(
                shard,
                order,
                format!("missing unique key field '{}'", self.config.unique_key_field),
            )
        })?;
        let key = DocumentKey::from_field_value(key_value)
            .map_err(|e| MergeError::malformed_document(shard, order, format!("bad unique key: {}", e)))?;
        let score = self.read_score(shard, order, document)?;

        Ok(DocumentRef::new(key, shard.clone(), order, score))
    }

    fn read_score(&self, shard: &ShardAddress, order: usize, document: &StoredDocument) -> Result<Option<f32>> {
        match document.get(&self.config.score_field) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Number(n)) => Ok(n.as_f64().map(|s| s as f32)),
            Some(Value::String(s)) => s.trim().parse::<f32>().map(Some).map_err(|_| {
                MergeError::malformed_document(shard, order, format!("score '{}' is not numeric", s))
            }),
            Some(other) => Err(MergeError::malformed_document(
                shard,
                order,
                format!("score must be a number, got {}", other),
            )),
        }
    }
}
