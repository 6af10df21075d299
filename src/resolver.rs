//! Sort value resolution
//!
//! Field value merges rank by a tuple of sort field values that the first pass does not
//! carry. This module implements the second pass on both sides of the wire:
//!
//! - Coordinator side, [`FieldValueResolver`] plans one [`FieldResolutionRequest`] per
//!   shard, then validates and unmarshals each [`FieldResolutionResponse`] and attaches
//!   the tuples to the surviving documents.
//! - Shard side, [`SortValueDeriver`] walks the requested documents in internal id order
//!   over a [`SegmentedIndex`], reusing one leaf comparator per segment, and answers with
//!   marshaled values positionally correlated with the request.
//!
//! A malformed value or a field name/shape mismatch aborts the pass before anything is
//! attached; the merge then returns the error instead of a partially resolved ordering.

use crate::error::{MergeError, Result};
use crate::identifiers::{DocumentKey, ShardAddress};
use crate::merger::CandidateSet;
use crate::sort_spec::SortSpec;
use crate::sort_value::{FieldType, SortValue, SortValueCodec};
use crate::structures::MergeValues;
use crate::tracker::MergePass;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

/// A marshaled sort field named in a resolution request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestedField {
    pub name: String,
    pub field_type: FieldType,
}

/// Second pass request for one shard
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldResolutionRequest {
    pub shard: ShardAddress,
    /// Marshaled sort fields in sort precedence order
    pub fields: Vec<RequestedField>,
    /// Documents to resolve; their index here is their request position
    pub documents: Vec<DocumentKey>,
}

impl FieldResolutionRequest {
    pub fn field_names(&self) -> Vec<&str> {
        self.fields.iter().map(|f| f.name.as_str()).collect()
    }
}

/// Second pass answer from one shard
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldResolutionResponse {
    pub shard: ShardAddress,
    pub merge_values: MergeValues,
}

/// Coordinator side of the resolution pass
#[derive(Debug, Clone, Copy)]
pub struct FieldValueResolver<'a> {
    sort_spec: &'a SortSpec,
}

impl<'a> FieldValueResolver<'a> {
    pub fn new(sort_spec: &'a SortSpec) -> Self {
        Self { sort_spec }
    }

    fn requested_fields(&self) -> Vec<RequestedField> {
        self.sort_spec
            .marshaled_fields()
            .map(|f| RequestedField {
                name: f.name.to_string(),
                field_type: f.field_type,
            })
            .collect()
    }

    /// Resolve what can be resolved without a round trip
    ///
    /// Applies sort values carried in-band with first-pass payloads. When the sort has
    /// no marshaled fields every survivor is resolved with an empty tuple.
    pub fn prepare(&self, candidates: &mut CandidateSet) -> Result<()> {
        if self.sort_spec.marshaled_field_count() == 0 {
            let count = candidates.survivors.len();
            for doc in candidates.survivors.iter_mut() {
                doc.sort_values = Some(Vec::new());
            }
            candidates.record_resolved(count);
            return Ok(());
        }
        self.apply_in_band(candidates)
    }

    /// Apply in-band sort values to the documents of the shards that sent them
    pub fn apply_in_band(&self, candidates: &mut CandidateSet) -> Result<()> {
        let fields = self.requested_fields();

        for in_band in candidates.take_in_band_values() {
            let tuples = decode_tuples(&in_band.shard, &fields, &in_band.values, in_band.local_len)?;

            let mut resolved = 0;
            for doc in candidates.survivors.iter_mut() {
                if doc.shard != in_band.shard {
                    continue;
                }
                if let Some(tuple) = tuples.get(doc.order_in_shard) {
                    doc.sort_values = Some(tuple.clone());
                    resolved += 1;
                }
            }
            debug!(shard = %in_band.shard, resolved, "applied in-band sort values");
            candidates.record_resolved(resolved);
        }

        Ok(())
    }

    /// Plan the second pass: one request per shard with unresolved survivors
    ///
    /// Shards appear in the order their first survivor was collected. Survivors are
    /// collected in local rank order, so documents within a request follow it too.
    pub fn plan(&self, candidates: &CandidateSet) -> Vec<FieldResolutionRequest> {
        let fields = self.requested_fields();
        if fields.is_empty() {
            return Vec::new();
        }

        let mut requests: Vec<FieldResolutionRequest> = Vec::new();
        let mut by_shard: FxHashMap<&ShardAddress, usize> = FxHashMap::default();

        for doc in candidates.survivors() {
            if doc.is_resolved() {
                continue;
            }

            let slot = *by_shard.entry(&doc.shard).or_insert_with(|| {
                requests.push(FieldResolutionRequest {
                    shard: doc.shard.clone(),
                    fields: fields.clone(),
                    documents: Vec::new(),
                });
                requests.len() - 1
            });
            requests[slot].documents.push(doc.key.clone());
        }

        debug!(
            merge_id = %candidates.merge_id(),
            requests = requests.len(),
            "planned sort value resolution"
        );
        requests
    }

    /// Validate a shard's answer and attach its tuples
    ///
    /// Returns the number of documents resolved. Nothing is attached when validation or
    /// unmarshaling fails.
    pub fn apply(
        &self,
        candidates: &mut CandidateSet,
        request: &FieldResolutionRequest,
        response: &FieldResolutionResponse,
    ) -> Result<usize> {
        if response.shard != request.shard {
            return Err(MergeError::protocol_mismatch(
                &request.shard,
                format!("values from shard {}", request.shard),
                format!("values from shard {}", response.shard),
            ));
        }

        let tuples = decode_tuples(
            &request.shard,
            &request.fields,
            &response.merge_values,
            request.documents.len(),
        )?;

        let mut resolved = 0;
        for (key, tuple) in request.documents.iter().zip(tuples) {
            if let Some(doc) = candidates.get_mut(key.as_str()) {
                if doc.shard == request.shard {
                    doc.sort_values = Some(tuple);
                    resolved += 1;
                }
            }
        }
        candidates.record_resolved(resolved);

        debug!(shard = %request.shard, resolved, "applied resolved sort values");
        Ok(resolved)
    }

    /// Record a shard whose resolution round trip failed
    ///
    /// Its documents keep missing sort values and the result is flagged partial.
    pub fn record_failure(&self, candidates: &mut CandidateSet, shard: &ShardAddress, cause: impl Into<String>) {
        candidates
            .tracker_mut()
            .record_failure(shard, cause, MergePass::Resolution);
    }
}

/// Unmarshal merge values into one tuple per document, checking names and shapes
fn decode_tuples(
    shard: &ShardAddress,
    fields: &[RequestedField],
    values: &MergeValues,
    expected_len: usize,
) -> Result<Vec<Vec<SortValue>>> {
    let expected_names: Vec<&str> = fields.iter().map(|f| f.name.as_str()).collect();
    let actual_names: Vec<&str> = values.entries.iter().map(|e| e.field.as_str()).collect();
    if expected_names != actual_names {
        return Err(MergeError::protocol_mismatch(
            shard,
            format!("fields [{}]", expected_names.join(", ")),
            format!("fields [{}]", actual_names.join(", ")),
        ));
    }

    let mut tuples: Vec<Vec<SortValue>> = vec![Vec::with_capacity(fields.len()); expected_len];
    for (field, entry) in fields.iter().zip(&values.entries) {
        if entry.values.len() != expected_len {
            return Err(MergeError::protocol_mismatch(
                shard,
                format!("{} values for field '{}'", expected_len, field.name),
                format!("{} values", entry.values.len()),
            ));
        }
        for (tuple, wire) in tuples.iter_mut().zip(&entry.values) {
            tuple.push(SortValueCodec::unmarshal_field(&field.name, field.field_type, wire)?);
        }
    }

    Ok(tuples)
}

/// A sub-reader of a shard's index
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentInfo {
    /// Internal id of the segment's first document
    pub doc_base: u32,
    /// Number of document slots in the segment
    pub max_doc: u32,
}

/// Per-segment comparator producing sort values for segment-local doc ids
pub trait LeafComparator {
    fn value(&mut self, local_doc: u32) -> Result<SortValue>;
}

/// The view of a shard's index the shard-side resolution needs
pub trait SegmentedIndex {
    /// Segments in ascending doc base order
    fn segments(&self) -> &[SegmentInfo];

    /// Internal id of a document, if the shard holds it
    fn internal_id(&self, key: &DocumentKey) -> Option<u32>;

    /// Create a comparator for `field` bound to one segment
    fn leaf_comparator(&self, segment: usize, field: &RequestedField) -> Result<Box<dyn LeafComparator + '_>>;
}

/// Shard side of the resolution pass
pub struct SortValueDeriver<'a, I: SegmentedIndex> {
    index: &'a I,
}

impl<'a, I: SegmentedIndex> SortValueDeriver<'a, I> {
    pub fn new(index: &'a I) -> Self {
        Self { index }
    }

    /// Derive marshaled sort values for every requested document
    ///
    /// Documents the shard does not hold get `null` for every field.
    pub fn derive(&self, request: &FieldResolutionRequest) -> Result<FieldResolutionResponse> {
        let doc_count = request.documents.len();
        let mut columns: Vec<Vec<Value>> = vec![vec![Value::Null; doc_count]; request.fields.len()];

        // (internal id, request position), walked in index order
        let mut sorted_ids: Vec<(u32, usize)> = request
            .documents
            .iter()
            .enumerate()
            .filter_map(|(position, key)| self.index.internal_id(key).map(|id| (id, position)))
            .collect();
        sorted_ids.sort_unstable();

        let segments = self.index.segments();
        let mut current_segment: Option<usize> = None;
        let mut comparators: Vec<Option<Box<dyn LeafComparator + '_>>> =
            (0..request.fields.len()).map(|_| None).collect();

        for (internal_id, position) in sorted_ids {
            let segment = locate_segment(segments, internal_id).ok_or_else(|| {
                MergeError::invalid_input(
                    "internal_id",
                    format!("document {} lies outside every segment", internal_id),
                    "Check that the index view's segments cover its internal ids",
                )
            })?;

            if current_segment != Some(segment) {
                for comparator in comparators.iter_mut() {
                    *comparator = None;
                }
                current_segment = Some(segment);
            }

            let local_doc = internal_id - segments[segment].doc_base;
            for (field_index, field) in request.fields.iter().enumerate() {
                let comparator = match comparators[field_index].take() {
                    Some(comparator) => comparator,
                    None => self.index.leaf_comparator(segment, field)?,
                };
                let comparator = comparators[field_index].insert(comparator);
                let value = comparator.value(local_doc)?;
                columns[field_index][position] = SortValueCodec::marshal(field.field_type, &value)?;
            }
        }

        let mut merge_values = MergeValues::new();
        for (field, values) in request.fields.iter().zip(columns) {
            merge_values.push(field.name.clone(), values);
        }

        Ok(FieldResolutionResponse {
            shard: request.shard.clone(),
            merge_values,
        })
    }
}

/// Index of the segment holding `internal_id`, by doc base
fn locate_segment(segments: &[SegmentInfo], internal_id: u32) -> Option<usize> {
    let after = segments.partition_point(|s| s.doc_base <= internal_id);
    if after == 0 {
        return None;
    }
    let segment = after - 1;
    let info = segments[segment];
    if internal_id - info.doc_base < info.max_doc {
        Some(segment)
    } else {
        warn!(internal_id, doc_base = info.doc_base, "internal id past segment end");
        None
    }
}
