//! API module for shardmerge
//!
//! The rest of the service drives the merge engine through one context object and a
//! parameter object per operation. Each operation implements [`ApiOperation`] for the
//! [`MergeContext`] and its parameter type.

pub mod context;
pub mod operations;
pub mod parameters;

pub use apithing::ApiOperation;
pub use context::MergeContext;
pub use operations::{CoordinatedMerge, DeriveSortValues, MergeResponses, PlanResolution, ValidateConfig};
pub use parameters::{
    CoordinatedMergeParams, DeriveSortValuesParams, MergeParams, MergeParamsBuilder, ResolutionReply,
    ValidateConfigParams,
};
