//! Operation implementations for the shardmerge API
//!
//! Each operation works with the [`MergeContext`] and its parameter structure.
//!
//! # Operations
//!
//! - [`ValidateConfig`]: Validate a MergeConfig without side effects
//! - [`MergeResponses`]: Merge an already collected response set
//! - [`PlanResolution`]: Plan the sort value resolution round trip for a response set
//! - [`DeriveSortValues`]: Answer a resolution request on the shard side
//! - [`CoordinatedMerge`]: Run both passes through a shard executor
//!
//! A synchronous caller that owns its own transport runs a field value merge in three
//! steps: `PlanResolution`, one `DeriveSortValues` per shard (remotely), then
//! `MergeResponses` with the replies. Planning is deterministic for a given response
//! set, so `MergeResponses` re-derives the same plan and matches replies by shard.
//!
//! # Usage Examples
//!
//! ```rust
//! use shardmerge::api::{ApiOperation, MergeContext, MergeParams, MergeResponses};
//! use shardmerge::structures::{ShardPayload, ShardResponse};
//! use serde_json::json;
//!
//! let mut context = MergeContext::new();
//! let doc = json!({"id": "1", "score": 2.0}).as_object().unwrap().clone();
//! let params = MergeParams::builder()
//!     .response(ShardResponse::success("shard1", ShardPayload::new(vec![doc])))
//!     .response(ShardResponse::failure("shard2", "connection refused"))
//!     .build()?;
//!
//! let result = MergeResponses::execute(&mut context, &params)?;
//! assert_eq!(result.num_found, 1);
//! assert!(result.partial_results);
//! # Ok::<(), shardmerge::MergeError>(())
//! ```

use crate::api::context::MergeContext;
use crate::api::parameters::{
    CoordinatedMergeParams, DeriveSortValuesParams, MergeParams, ResolutionReply, ValidateConfigParams,
};
use crate::coordinator::{MergeCoordinator, ShardExecutor};
use crate::error::MergeError;
use crate::merger::{CandidateSet, ShardResponseMerger};
use crate::resolver::{FieldResolutionRequest, FieldResolutionResponse, FieldValueResolver, SegmentedIndex, SortValueDeriver};
use crate::structures::MergedResult;
use apithing::ApiOperation;
use std::sync::{Arc, OnceLock};
use tokio::runtime::Runtime;

/// Shared runtime for running the async coordinator from synchronous callers
static RUNTIME: OnceLock<Runtime> = OnceLock::new();

/// Execute an async operation synchronously using the shared runtime
///
/// NOTE: must not be called from within a tokio runtime; block_on panics there.
fn execute_sync<F, T>(future: F) -> Result<T, MergeError>
where
    F: std::future::Future<Output = Result<T, MergeError>>,
{
    let rt = match RUNTIME.get() {
        Some(rt) => rt,
        None => {
            let built = tokio::runtime::Builder::new_multi_thread().enable_all().build()?;
            RUNTIME.get_or_init(|| built)
        }
    };
    rt.block_on(future)
}

fn collect_candidates<'a>(
    context: &'a MergeContext,
    parameters: &'a MergeParams,
) -> Result<(ShardResponseMerger<'a>, CandidateSet), MergeError> {
    parameters.validate()?;

    let merger = ShardResponseMerger::with_strategy(
        context.config(),
        &parameters.sort_spec,
        parameters.window,
        parameters.effective_strategy(),
    )?;
    let mut candidates = merger.collect(&parameters.responses)?;
    if merger.strategy().requires_field_resolution() {
        FieldValueResolver::new(&parameters.sort_spec).prepare(&mut candidates)?;
    }
    Ok((merger, candidates))
}

/// Validate Config operation
///
/// Returns whether the configuration is valid, without touching the context.
pub struct ValidateConfig;

impl ApiOperation<MergeContext, ValidateConfigParams> for ValidateConfig {
    type Output = bool;
    type Error = MergeError;

    fn execute(_context: &mut MergeContext, parameters: &ValidateConfigParams) -> Result<Self::Output, Self::Error> {
        Ok(parameters.config.validate().is_ok())
    }
}

/// Merge Responses operation
///
/// Merges one response per shard into a MergedResult. For field value merges, sort
/// values come from in-band merge values and from the resolution replies in the
/// parameters; a planned shard without a reply is recorded as a resolution failure.
///
/// # Example
///
/// ```rust
/// use shardmerge::api::{ApiOperation, MergeContext, MergeParams, MergeResponses};
/// use shardmerge::structures::{ShardPayload, ShardResponse};
/// use serde_json::json;
///
/// let mut context = MergeContext::new();
/// let doc = |id: &str, score: f64| json!({"id": id, "score": score}).as_object().unwrap().clone();
/// let params = MergeParams::builder()
///     .response(ShardResponse::success("shard1", ShardPayload::new(vec![doc("5", 2.0)])))
///     .response(ShardResponse::success("shard2", ShardPayload::new(vec![doc("5", 2.0)])))
///     .build()?;
///
/// let result = MergeResponses::execute(&mut context, &params)?;
/// assert_eq!(result.num_found, 1);
/// assert_eq!(result.get("5").unwrap().shard.as_str(), "shard1");
/// # Ok::<(), shardmerge::MergeError>(())
/// ```
pub struct MergeResponses;

impl ApiOperation<MergeContext, MergeParams> for MergeResponses {
    type Output = MergedResult;
    type Error = MergeError;

    fn execute(context: &mut MergeContext, parameters: &MergeParams) -> Result<Self::Output, Self::Error> {
        let result = {
            let (merger, mut candidates) = collect_candidates(context, parameters)?;

            if merger.strategy().requires_field_resolution() && !parameters.resolutions.is_empty() {
                let resolver = FieldValueResolver::new(&parameters.sort_spec);
                let requests = resolver.plan(&candidates);
                for request in &requests {
                    match parameters.resolutions.iter().find(|r| r.shard() == &request.shard) {
                        Some(ResolutionReply::Resolved(response)) => {
                            resolver.apply(&mut candidates, request, response)?;
                        }
                        Some(ResolutionReply::Failed { shard, error }) => {
                            resolver.record_failure(&mut candidates, shard, error.clone())
                        }
                        None => resolver.record_failure(&mut candidates, &request.shard, "no resolution reply"),
                    }
                }
            }

            merger.finish(candidates)
        };

        context.record_merge(&result.stats, result.partial_results);
        Ok(result)
    }
}

/// Plan Resolution operation
///
/// Returns the resolution requests a field value merge of these responses needs. Empty
/// for score merges and when every survivor already has values.
pub struct PlanResolution;

impl ApiOperation<MergeContext, MergeParams> for PlanResolution {
    type Output = Vec<FieldResolutionRequest>;
    type Error = MergeError;

    fn execute(context: &mut MergeContext, parameters: &MergeParams) -> Result<Self::Output, Self::Error> {
        let (merger, candidates) = collect_candidates(context, parameters)?;
        if !merger.strategy().requires_field_resolution() {
            return Ok(Vec::new());
        }

        Ok(FieldValueResolver::new(&parameters.sort_spec).plan(&candidates))
    }
}

/// Derive Sort Values operation
///
/// Shard side of the resolution pass over the shard's segmented index.
pub struct DeriveSortValues;

impl<'a, I: SegmentedIndex> ApiOperation<MergeContext, DeriveSortValuesParams<'a, I>> for DeriveSortValues {
    type Output = FieldResolutionResponse;
    type Error = MergeError;

    fn execute(
        _context: &mut MergeContext,
        parameters: &DeriveSortValuesParams<'a, I>,
    ) -> Result<Self::Output, Self::Error> {
        parameters.validate()?;
        SortValueDeriver::new(parameters.index).derive(&parameters.request)
    }
}

/// Coordinated Merge operation
///
/// Runs the query pass and, when needed, the resolution pass through the executor on
/// a shared runtime. Must be called from synchronous code.
pub struct CoordinatedMerge;

impl<E: ShardExecutor> ApiOperation<MergeContext, CoordinatedMergeParams<E>> for CoordinatedMerge {
    type Output = MergedResult;
    type Error = MergeError;

    fn execute(context: &mut MergeContext, parameters: &CoordinatedMergeParams<E>) -> Result<Self::Output, Self::Error> {
        parameters.validate()?;

        let coordinator = MergeCoordinator::new(
            Arc::clone(&parameters.executor),
            context.config().clone(),
            parameters.shards.clone(),
        )?;
        let result = execute_sync(coordinator.merge(&parameters.sort_spec, parameters.window))?;

        context.record_merge(&result.stats, result.partial_results);
        Ok(result)
    }
}
