//! shardmerge - distributed result merging for sharded search
//!
//! A partitioned search service answers one logical query by asking every shard for its
//! local top results. shardmerge turns those independent, locally ranked answers into one
//! globally consistent top-N: it deduplicates documents seen on several shards, orders
//! them by relevance score or by an arbitrary field sort, and reports when the answer is
//! incomplete because a shard failed.
//!
//! # Key Features
//!
//! - **Deduplication**: one document per unique key, the first shard in input order wins,
//!   and the global hit count is corrected for every duplicate dropped
//! - **Pluggable Ranking**: a closed set of merge strategies selected from the sort spec
//! - **Sort Value Resolution**: field sorts whose values are not carried with the first
//!   response are resolved in a second round trip, marshaled through a typed codec
//! - **Partial Results**: failed and self-reported partial shards flag the merged answer
//! - **Async Coordination**: a tokio driver queries shards in parallel with timeouts
//!
//! # Quick Start
//!
//! ```rust
//! use shardmerge::{MergeConfig, ResultWindow, ShardPayload, ShardResponse, ShardResponseMerger, SortSpec};
//! use serde_json::json;
//!
//! # fn example() -> Result<(), shardmerge::MergeError> {
//! let doc = |id: &str, score: f64| json!({"id": id, "score": score}).as_object().unwrap().clone();
//! let responses = vec![
//!     ShardResponse::success("shard1", ShardPayload::new(vec![doc("1", 5.0)])),
//!     ShardResponse::failure("shard2", "connection refused"),
//! ];
//!
//! let config = MergeConfig::default();
//! let spec = SortSpec::relevance();
//! let result = ShardResponseMerger::new(&config, &spec, ResultWindow::default())?.merge(&responses)?;
//!
//! assert_eq!(result.num_found, 1);
//! assert!(result.partial_results);
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod identifiers;
pub mod merger;
pub mod resolver;
pub mod sort_spec;
pub mod sort_value;
pub mod strategy;
pub mod structures;
pub mod tracker;

#[cfg(test)]
pub mod test_utils;

pub use config::MergeConfig;
pub use coordinator::{MergeCoordinator, ShardExecutor};
pub use error::{MergeError, Result};
pub use identifiers::{DocumentKey, MergeId, ShardAddress};
pub use merger::{CandidateSet, ShardResponseMerger};
pub use resolver::{
    FieldResolutionRequest, FieldResolutionResponse, FieldValueResolver, LeafComparator, RequestedField,
    SegmentInfo, SegmentedIndex, SortValueDeriver,
};
pub use sort_spec::{SortDirection, SortField, SortFieldKind, SortSpec};
pub use sort_value::{FieldType, SortValue, SortValueCodec};
pub use strategy::MergeStrategy;
pub use structures::{
    DocumentRef, MergeStats, MergeValues, MergedResult, ResultWindow, ShardFailure, ShardOutcome, ShardPayload,
    ShardResponse, StoredDocument,
};
pub use tracker::{MergePass, PartialResultTracker, PartialResultsReport, ShardInfo};
