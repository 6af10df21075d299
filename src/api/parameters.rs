//! Parameter objects for API operations
//!
//! Each operation takes one parameter object. Parameters validate themselves; builders
//! run the same validation in `build()`.

use crate::config::MergeConfig;
use crate::coordinator::ShardExecutor;
use crate::error::MergeError;
use crate::identifiers::ShardAddress;
use crate::resolver::{FieldResolutionRequest, FieldResolutionResponse, SegmentedIndex};
use crate::sort_spec::SortSpec;
use crate::strategy::MergeStrategy;
use crate::structures::{ResultWindow, ShardResponse};
use std::sync::Arc;

/// Outcome of one shard's resolution round trip, as reported by the caller's transport
#[derive(Debug, Clone, PartialEq)]
pub enum ResolutionReply {
    Resolved(FieldResolutionResponse),
    Failed { shard: ShardAddress, error: String },
}

impl ResolutionReply {
    pub fn shard(&self) -> &ShardAddress {
        match self {
            Self::Resolved(response) => &response.shard,
            Self::Failed { shard, .. } => shard,
        }
    }
}

/// Parameters for merging a collected response set
#[derive(Debug, Clone)]
pub struct MergeParams {
    /// One response per shard, in configured shard order
    pub responses: Vec<ShardResponse>,
    pub sort_spec: SortSpec,
    pub window: ResultWindow,
    /// Strategy override; selected from the sort spec when absent
    pub strategy: Option<MergeStrategy>,
    /// Replies to a previously planned resolution pass
    pub resolutions: Vec<ResolutionReply>,
}

impl MergeParams {
    pub fn builder() -> MergeParamsBuilder {
        MergeParamsBuilder::default()
    }

    /// Relevance merge of `responses` with the default window
    pub fn new(responses: Vec<ShardResponse>) -> Result<Self, MergeError> {
        let params = Self {
            responses,
            sort_spec: SortSpec::relevance(),
            window: ResultWindow::default(),
            strategy: None,
            resolutions: Vec::new(),
        };
        params.validate()?;
        Ok(params)
    }

    /// Strategy the merge will run with
    pub fn effective_strategy(&self) -> MergeStrategy {
        self.strategy
            .unwrap_or_else(|| MergeStrategy::for_sort_spec(&self.sort_spec))
    }

    /// Validate the merge parameters
    pub fn validate(&self) -> Result<(), MergeError> {
        self.sort_spec.validate()?;

        if let Some(strategy) = self.strategy {
            if !strategy.is_eligible(&self.sort_spec) {
                return Err(MergeError::config_error(
                    "strategy",
                    format!("{:?} cannot order by the requested sort", strategy),
                    "Leave strategy unset to select one from the sort spec",
                ));
            }
        }

        let mut seen = std::collections::HashSet::new();
        for response in &self.responses {
            if !seen.insert(&response.shard) {
                return Err(MergeError::config_error(
                    "responses",
                    format!("shard {} answered more than once", response.shard),
                    "Pass exactly one response per shard",
                ));
            }
        }

        if !self.resolutions.is_empty() && !self.effective_strategy().requires_field_resolution() {
            return Err(MergeError::config_error(
                "resolutions",
                "given for a merge that needs no sort value resolution",
                "Only pass resolution replies for field value merges",
            ));
        }

        Ok(())
    }
}

/// Builder for MergeParams
#[derive(Debug, Clone, Default)]
pub struct MergeParamsBuilder {
    responses: Vec<ShardResponse>,
    sort_spec: Option<SortSpec>,
    window: Option<ResultWindow>,
    strategy: Option<MergeStrategy>,
    resolutions: Vec<ResolutionReply>,
}

impl MergeParamsBuilder {
    pub fn responses(mut self, responses: Vec<ShardResponse>) -> Self {
        self.responses = responses;
        self
    }

    /// Append one shard response
    pub fn response(mut self, response: ShardResponse) -> Self {
        self.responses.push(response);
        self
    }

    pub fn sort_spec(mut self, sort_spec: SortSpec) -> Self {
        self.sort_spec = Some(sort_spec);
        self
    }

    pub fn window(mut self, offset: usize, length: usize) -> Self {
        self.window = Some(ResultWindow::new(offset, length));
        self
    }

    pub fn strategy(mut self, strategy: MergeStrategy) -> Self {
        self.strategy = Some(strategy);
        self
    }

    pub fn resolutions(mut self, resolutions: Vec<ResolutionReply>) -> Self {
        self.resolutions = resolutions;
        self
    }

    /// Build the MergeParams with validation
    pub fn build(self) -> Result<MergeParams, MergeError> {
        let params = MergeParams {
            responses: self.responses,
            sort_spec: self.sort_spec.unwrap_or_default(),
            window: self.window.unwrap_or_default(),
            strategy: self.strategy,
            resolutions: self.resolutions,
        };
        params.validate()?;
        Ok(params)
    }
}

/// Parameters for validating a configuration without side effects
#[derive(Debug, Clone)]
pub struct ValidateConfigParams {
    pub config: MergeConfig,
}

impl ValidateConfigParams {
    pub fn new(config: MergeConfig) -> Self {
        Self { config }
    }
}

/// Parameters for the shard side of the resolution pass
pub struct DeriveSortValuesParams<'a, I: SegmentedIndex> {
    pub index: &'a I,
    pub request: FieldResolutionRequest,
}

impl<'a, I: SegmentedIndex> DeriveSortValuesParams<'a, I> {
    pub fn new(index: &'a I, request: FieldResolutionRequest) -> Result<Self, MergeError> {
        let params = Self { index, request };
        params.validate()?;
        Ok(params)
    }

    pub fn validate(&self) -> Result<(), MergeError> {
        if self.request.fields.is_empty() {
            return Err(MergeError::config_error(
                "request.fields",
                "cannot be empty",
                "Only score and ordinal sorts need no resolution; do not send a request for them",
            ));
        }
        Ok(())
    }
}

/// Parameters for a full two-pass merge driven through a shard executor
pub struct CoordinatedMergeParams<E: ShardExecutor> {
    pub executor: Arc<E>,
    pub shards: Vec<ShardAddress>,
    pub sort_spec: SortSpec,
    pub window: ResultWindow,
}

impl<E: ShardExecutor> CoordinatedMergeParams<E> {
    pub fn new(executor: Arc<E>, shards: Vec<ShardAddress>, sort_spec: SortSpec, window: ResultWindow) -> Result<Self, MergeError> {
        let params = Self {
            executor,
            shards,
            sort_spec,
            window,
        };
        params.validate()?;
        Ok(params)
    }

    pub fn validate(&self) -> Result<(), MergeError> {
        if self.shards.is_empty() {
            return Err(MergeError::config_error(
                "shards",
                "cannot be empty",
                "Provide at least one shard address to query",
            ));
        }
        self.sort_spec.validate()
    }
}
