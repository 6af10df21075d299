//! Test utilities for shardmerge testing
//!
//! This module provides common helpers for unit tests: stored document builders and an
//! in-memory segmented index that stands in for a shard's index reader during the
//! shard-side resolution pass.

use crate::error::{MergeError, Result};
use crate::identifiers::DocumentKey;
use crate::resolver::{LeafComparator, RequestedField, SegmentInfo, SegmentedIndex};
use crate::sort_value::SortValue;
use crate::structures::StoredDocument;
use serde_json::{json, Value};
use std::cell::Cell;
use std::collections::HashMap;

/// Test constants shared across unit tests
pub mod test_constants {
    pub const DEFAULT_KEY_FIELD: &str = "id";
    pub const DEFAULT_SCORE_FIELD: &str = "score";
}

/// Stored document carrying only a unique key
pub fn doc(id: &str) -> StoredDocument {
    let mut fields = StoredDocument::new();
    fields.insert(test_constants::DEFAULT_KEY_FIELD.to_string(), Value::String(id.to_string()));
    fields
}

/// Stored document with a unique key and a relevance score
pub fn scored_doc(id: &str, score: f64) -> StoredDocument {
    let mut fields = doc(id);
    fields.insert(test_constants::DEFAULT_SCORE_FIELD.to_string(), json!(score));
    fields
}

/// Segmented index held in memory
///
/// Segments are laid out back to back from the sizes given at construction; documents
/// are placed at explicit internal ids so tests control which segment they land in.
pub struct InMemorySegmentedIndex {
    segments: Vec<SegmentInfo>,
    ids: HashMap<DocumentKey, u32>,
    values: HashMap<(u32, String), SortValue>,
    comparators_created: Cell<usize>,
}

impl InMemorySegmentedIndex {
    pub fn new(segment_sizes: &[u32]) -> Self {
        let mut doc_base = 0;
        let segments = segment_sizes
            .iter()
            .map(|&max_doc| {
                let info = SegmentInfo { doc_base, max_doc };
                doc_base += max_doc;
                info
            })
            .collect();

        Self {
            segments,
            ids: HashMap::new(),
            values: HashMap::new(),
            comparators_created: Cell::new(0),
        }
    }

    pub fn with_document(mut self, key: &str, internal_id: u32, fields: &[(&str, SortValue)]) -> Self {
        self.ids.insert(DocumentKey::new(key), internal_id);
        for (field, value) in fields {
            self.values.insert((internal_id, field.to_string()), value.clone());
        }
        self
    }

    /// How many leaf comparators the resolution pass asked for
    pub fn comparators_created(&self) -> usize {
        self.comparators_created.get()
    }
}

struct InMemoryLeafComparator<'a> {
    index: &'a InMemorySegmentedIndex,
    doc_base: u32,
    field: String,
}

impl LeafComparator for InMemoryLeafComparator<'_> {
    fn value(&mut self, local_doc: u32) -> Result<SortValue> {
        let key = (self.doc_base + local_doc, self.field.clone());
        Ok(self.index.values.get(&key).cloned().unwrap_or(SortValue::Missing))
    }
}

impl SegmentedIndex for InMemorySegmentedIndex {
    fn segments(&self) -> &[SegmentInfo] {
        &self.segments
    }

    fn internal_id(&self, key: &DocumentKey) -> Option<u32> {
        self.ids.get(key).copied()
    }

    fn leaf_comparator(&self, segment: usize, field: &RequestedField) -> Result<Box<dyn LeafComparator + '_>> {
        let info = self.segments.get(segment).ok_or_else(|| {
            MergeError::invalid_input("segment", format!("no segment {}", segment), "Use a valid segment ordinal")
        })?;
        self.comparators_created.set(self.comparators_created.get() + 1);
        Ok(Box::new(InMemoryLeafComparator {
            index: self,
            doc_base: info.doc_base,
            field: field.name.clone(),
        }))
    }
}
