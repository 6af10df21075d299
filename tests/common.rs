//! Common test utilities for integration tests
//!
//! This module provides shared utilities for integration tests that cannot
//! access the main crate's test_utils module.

#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::json;
use shardmerge::{
    DocumentKey, FieldResolutionRequest, FieldResolutionResponse, LeafComparator, MergeConfig, MergeError,
    MergedResult, RequestedField, SegmentInfo, SegmentedIndex, ShardAddress, ShardExecutor,
    ShardPayload, SortValue, SortValueDeriver, StoredDocument,
};
use std::collections::HashMap;
use std::time::Duration;
use tempfile::TempDir;

/// Test constants for consistent test configuration across integration tests
pub mod test_constants {
    pub const KEY_FIELD: &str = "id";
    pub const SCORE_FIELD: &str = "score";
}

/// Error messages for consistent test error reporting
pub mod test_error_messages {
    pub const FAILED_TO_CREATE_TEMP_DIR: &str = "Failed to create test temporary directory";
}

/// Creates a temporary directory for test use with proper error handling
pub fn create_temp_dir_for_test() -> TempDir {
    TempDir::new().expect(test_error_messages::FAILED_TO_CREATE_TEMP_DIR)
}

/// Stored document with only a unique key
pub fn doc(id: &str) -> StoredDocument {
    let mut fields = StoredDocument::new();
    fields.insert(test_constants::KEY_FIELD.to_string(), json!(id));
    fields
}

/// Stored document with a unique key and score
pub fn scored_doc(id: &str, score: f64) -> StoredDocument {
    let mut fields = doc(id);
    fields.insert(test_constants::SCORE_FIELD.to_string(), json!(score));
    fields
}

/// Keys of the materialized window, in merged order
pub fn keys(result: &MergedResult) -> Vec<String> {
    result.ordered_keys.iter().map(|k| k.as_str().to_string()).collect()
}

/// Small deterministic generator so property-style tests need no extra crates
pub struct Lcg(u64);

impl Lcg {
    pub fn new(seed: u64) -> Self {
        Self(seed)
    }

    pub fn next_u32(&mut self) -> u32 {
        self.0 = self.0.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        (self.0 >> 33) as u32
    }

    pub fn below(&mut self, bound: u32) -> u32 {
        self.next_u32() % bound
    }
}

/// Builder pattern for standardized test setup (integration test version)
pub struct TestSetupBuilder {
    test_name: String,
    shards_info: bool,
    resolution_timeout_ms: u64,
    shard_timeout_ms: u64,
}

impl TestSetupBuilder {
    pub fn new(test_name: &str) -> Self {
        Self {
            test_name: test_name.to_string(),
            shards_info: false,
            resolution_timeout_ms: 5_000,
            shard_timeout_ms: 5_000,
        }
    }

    pub fn with_shards_info(mut self, enabled: bool) -> Self {
        self.shards_info = enabled;
        self
    }

    pub fn with_resolution_timeout_ms(mut self, ms: u64) -> Self {
        self.resolution_timeout_ms = ms;
        self
    }

    pub fn with_shard_timeout_ms(mut self, ms: u64) -> Self {
        self.shard_timeout_ms = ms;
        self
    }

    /// Build a temp directory and a configuration saved into it
    pub fn build(self) -> (TempDir, MergeConfig) {
        let temp_dir = create_temp_dir_for_test();
        let config = MergeConfig::new()
            .shards_info(self.shards_info)
            .resolution_timeout_ms(self.resolution_timeout_ms)
            .shard_timeout_ms(self.shard_timeout_ms);
        let path = temp_dir.path().join(format!("{}.json", self.test_name));
        config.save(&path).expect("Failed to save test config");
        (temp_dir, config)
    }
}

/// Segmented index held in memory, laid out from segment sizes
pub struct MemoryIndex {
    segments: Vec<SegmentInfo>,
    ids: HashMap<DocumentKey, u32>,
    values: HashMap<(u32, String), SortValue>,
}

impl MemoryIndex {
    pub fn new(segment_sizes: &[u32]) -> Self {
        let mut doc_base = 0;
        let mut segments = Vec::new();
        for &max_doc in segment_sizes {
            segments.push(SegmentInfo { doc_base, max_doc });
            doc_base += max_doc;
        }
        Self {
            segments,
            ids: HashMap::new(),
            values: HashMap::new(),
        }
    }

    pub fn with_value(mut self, key: &str, internal_id: u32, field: &str, value: SortValue) -> Self {
        self.ids.insert(DocumentKey::new(key), internal_id);
        self.values.insert((internal_id, field.to_string()), value);
        self
    }
}

struct MemoryLeaf<'a> {
    index: &'a MemoryIndex,
    doc_base: u32,
    field: String,
}

impl LeafComparator for MemoryLeaf<'_> {
    fn value(&mut self, local_doc: u32) -> Result<SortValue, MergeError> {
        Ok(self
            .index
            .values
            .get(&(self.doc_base + local_doc, self.field.clone()))
            .cloned()
            .unwrap_or(SortValue::Missing))
    }
}

impl SegmentedIndex for MemoryIndex {
    fn segments(&self) -> &[SegmentInfo] {
        &self.segments
    }

    fn internal_id(&self, key: &DocumentKey) -> Option<u32> {
        self.ids.get(key).copied()
    }

    fn leaf_comparator(&self, segment: usize, field: &RequestedField) -> Result<Box<dyn LeafComparator + '_>, MergeError> {
        Ok(Box::new(MemoryLeaf {
            index: self,
            doc_base: self.segments[segment].doc_base,
            field: field.name.clone(),
        }))
    }
}

/// How a scripted shard answers the query pass
pub enum QueryScript {
    Answer(ShardPayload),
    Delayed(ShardPayload, Duration),
    Fail(&'static str),
}

/// Executor whose shards answer from scripts; resolution runs against in-memory indexes
#[derive(Default)]
pub struct ScriptedExecutor {
    queries: HashMap<String, QueryScript>,
    indexes: HashMap<String, MemoryIndex>,
    resolution_failures: HashMap<String, &'static str>,
}

impl ScriptedExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shard(mut self, name: &str, script: QueryScript) -> Self {
        self.queries.insert(name.to_string(), script);
        self
    }

    pub fn index(mut self, name: &str, index: MemoryIndex) -> Self {
        self.indexes.insert(name.to_string(), index);
        self
    }

    pub fn failing_resolution(mut self, name: &str, reason: &'static str) -> Self {
        self.resolution_failures.insert(name.to_string(), reason);
        self
    }
}

#[async_trait]
impl ShardExecutor for ScriptedExecutor {
    async fn query(&self, shard: &ShardAddress) -> Result<ShardPayload, MergeError> {
        match self.queries.get(shard.as_str()) {
            Some(QueryScript::Answer(payload)) => Ok(payload.clone()),
            Some(QueryScript::Delayed(payload, delay)) => {
                tokio::time::sleep(*delay).await;
                Ok(payload.clone())
            }
            Some(QueryScript::Fail(reason)) => Err(MergeError::shard_failure(shard, *reason)),
            None => Err(MergeError::shard_failure(shard, "no such shard")),
        }
    }

    async fn resolve_sort_values(&self, request: &FieldResolutionRequest) -> Result<FieldResolutionResponse, MergeError> {
        if let Some(reason) = self.resolution_failures.get(request.shard.as_str()) {
            return Err(MergeError::shard_failure(&request.shard, *reason));
        }
        match self.indexes.get(request.shard.as_str()) {
            Some(index) => SortValueDeriver::new(index).derive(request),
            None => Err(MergeError::shard_failure(&request.shard, "no index for shard")),
        }
    }
}
