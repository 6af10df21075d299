//! Async merge coordination
//!
//! [`MergeCoordinator`] drives both passes of a distributed merge against a
//! [`ShardExecutor`]. Per-shard calls run in parallel on a tokio `JoinSet`, each under
//! its own timeout. An error, a timeout or a lost task all become a failure response
//! for that shard, so the merger always sees exactly one response per configured shard.
//!
//! Responses are put back into configured shard order before merging: duplicate
//! resolution keeps the copy from the first shard in input order, and that order must
//! not depend on which shard answered first.
//!
//! # Usage Examples
//!
//! ```rust
//! use async_trait::async_trait;
//! use shardmerge::coordinator::{MergeCoordinator, ShardExecutor};
//! use shardmerge::config::MergeConfig;
//! use shardmerge::identifiers::ShardAddress;
//! use shardmerge::resolver::{FieldResolutionRequest, FieldResolutionResponse};
//! use shardmerge::sort_spec::SortSpec;
//! use shardmerge::structures::{ResultWindow, ShardPayload};
//! use shardmerge::MergeError;
//! use std::sync::Arc;
//!
//! struct OneDocPerShard;
//!
//! #[async_trait]
//! impl ShardExecutor for OneDocPerShard {
//!     async fn query(&self, shard: &ShardAddress) -> Result<ShardPayload, MergeError> {
//!         let doc = serde_json::json!({"id": shard.as_str(), "score": 1.0});
//!         Ok(ShardPayload::new(vec![doc.as_object().unwrap().clone()]))
//!     }
//!
//!     async fn resolve_sort_values(
//!         &self,
//!         request: &FieldResolutionRequest,
//!     ) -> Result<FieldResolutionResponse, MergeError> {
//!         Err(MergeError::shard_failure(&request.shard, "not supported"))
//!     }
//! }
//!
//! # async fn example() -> Result<(), MergeError> {
//! let shards = vec![ShardAddress::new("a"), ShardAddress::new("b")];
//! let coordinator = MergeCoordinator::new(Arc::new(OneDocPerShard), MergeConfig::default(), shards)?;
//! let result = coordinator.merge(&SortSpec::relevance(), ResultWindow::default()).await?;
//! assert_eq!(result.num_found, 2);
//! # Ok(())
//! # }
//! ```

use crate::config::MergeConfig;
use crate::error::{MergeError, Result};
use crate::identifiers::ShardAddress;
use crate::merger::ShardResponseMerger;
use crate::resolver::{FieldResolutionRequest, FieldResolutionResponse, FieldValueResolver};
use crate::sort_spec::SortSpec;
use crate::structures::{MergedResult, ResultWindow, ShardFailure, ShardOutcome, ShardPayload, ShardResponse};
use async_trait::async_trait;
use rustc_hash::FxHashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Transport to the shards of one query
///
/// `query` runs the shard-local query and returns its ranked documents.
/// `resolve_sort_values` runs the second round trip; implementations typically call
/// [`crate::resolver::SortValueDeriver`] on the shard.
#[async_trait]
pub trait ShardExecutor: Send + Sync + 'static {
    async fn query(&self, shard: &ShardAddress) -> Result<ShardPayload>;

    async fn resolve_sort_values(&self, request: &FieldResolutionRequest) -> Result<FieldResolutionResponse>;
}

/// Runs both merge passes against a set of shards
pub struct MergeCoordinator<E: ShardExecutor> {
    executor: Arc<E>,
    config: MergeConfig,
    shards: Vec<ShardAddress>,
}

impl<E: ShardExecutor> MergeCoordinator<E> {
    /// Create a coordinator over `shards`, queried in the given order
    pub fn new(executor: Arc<E>, config: MergeConfig, shards: Vec<ShardAddress>) -> Result<Self> {
        config.validate()?;

        let mut seen = FxHashSet::default();
        for shard in &shards {
            if !seen.insert(shard) {
                return Err(MergeError::invalid_input(
                    "shards",
                    format!("shard {} is listed more than once", shard),
                    "List every shard address exactly once",
                ));
            }
        }

        Ok(Self {
            executor,
            config,
            shards,
        })
    }

    pub fn shards(&self) -> &[ShardAddress] {
        &self.shards
    }

    pub fn config(&self) -> &MergeConfig {
        &self.config
    }

    /// Run the query pass and, when the sort needs it, the resolution pass
    pub async fn merge(&self, sort_spec: &SortSpec, window: ResultWindow) -> Result<MergedResult> {
        let merger = ShardResponseMerger::new(&self.config, sort_spec, window)?;
        let responses = self.query_pass().await;
        let mut candidates = merger
            .collect(&responses)
            .map_err(|e| e.with_operation_context("query pass", "collecting shard responses"))?;

        if merger.strategy().requires_field_resolution() {
            let resolver = FieldValueResolver::new(sort_spec);
            resolver.prepare(&mut candidates)?;

            let requests = resolver.plan(&candidates);
            for (request, outcome) in self.resolution_pass(requests).await {
                match outcome {
                    Ok(response) => {
                        resolver.apply(&mut candidates, &request, &response)?;
                    }
                    Err(e) if e.is_resolution_error() => return Err(e),
                    Err(e) => resolver.record_failure(&mut candidates, &request.shard, e.to_string()),
                }
            }
        }

        Ok(merger.finish(candidates))
    }

    /// Query every shard in parallel; one response per shard in configured order
    pub async fn query_pass(&self) -> Vec<ShardResponse> {
        let limit = self.config.shard_timeout();
        let mut tasks = JoinSet::new();

        for (slot, shard) in self.shards.iter().cloned().enumerate() {
            let executor = Arc::clone(&self.executor);
            tasks.spawn(async move {
                let started = Instant::now();
                let outcome = match timeout(limit, executor.query(&shard)).await {
                    Ok(Ok(mut payload)) => {
                        payload.elapsed.get_or_insert(started.elapsed());
                        ShardOutcome::Success(payload)
                    }
                    Ok(Err(e)) => failure(e.to_string(), started),
                    Err(_) => failure(timeout_message(limit), started),
                };
                (slot, ShardResponse { shard, outcome })
            });
        }

        let mut slots: Vec<Option<ShardResponse>> = vec![None; self.shards.len()];
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((slot, response)) => slots[slot] = Some(response),
                Err(e) => warn!(error = %e, "shard query task did not complete"),
            }
        }

        let responses: Vec<ShardResponse> = slots
            .into_iter()
            .zip(&self.shards)
            .map(|(response, shard)| {
                response.unwrap_or_else(|| ShardResponse::failure(shard.clone(), "shard query task did not complete"))
            })
            .collect();

        debug!(
            shards = responses.len(),
            failed = responses.iter().filter(|r| r.is_failure()).count(),
            "query pass complete"
        );
        responses
    }

    /// Send every resolution request in parallel; outcomes come back in request order
    pub async fn resolution_pass(
        &self,
        requests: Vec<FieldResolutionRequest>,
    ) -> Vec<(FieldResolutionRequest, Result<FieldResolutionResponse>)> {
        let limit = self.config.resolution_timeout();
        let mut tasks = JoinSet::new();

        for (slot, request) in requests.iter().cloned().enumerate() {
            let executor = Arc::clone(&self.executor);
            tasks.spawn(async move {
                let outcome = match timeout(limit, executor.resolve_sort_values(&request)).await {
                    Ok(outcome) => outcome,
                    Err(_) => Err(MergeError::shard_failure(&request.shard, timeout_message(limit))),
                };
                (slot, outcome)
            });
        }

        let mut slots: Vec<Option<Result<FieldResolutionResponse>>> = (0..requests.len()).map(|_| None).collect();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((slot, outcome)) => slots[slot] = Some(outcome),
                Err(e) => warn!(error = %e, "resolution task did not complete"),
            }
        }

        requests
            .into_iter()
            .zip(slots)
            .map(|(request, outcome)| {
                let outcome = outcome.unwrap_or_else(|| {
                    Err(MergeError::shard_failure(&request.shard, "resolution task did not complete"))
                });
                (request, outcome)
            })
            .collect()
    }
}

fn failure(error: String, started: Instant) -> ShardOutcome {
    ShardOutcome::Failure(ShardFailure {
        error,
        partial_results: None,
        elapsed: Some(started.elapsed()),
    })
}

fn timeout_message(limit: Duration) -> String {
    format!("timed out after {}ms", limit.as_millis())
}
