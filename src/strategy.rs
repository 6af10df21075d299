//! Merge strategies
//!
//! A merge strategy decides how per-shard results are combined into one ranking. The
//! set of strategies is a closed enum selected from the query's sort configuration;
//! adding a strategy means adding a variant.
//!
//! # Usage Examples
//!
//! ```rust
//! use shardmerge::strategy::MergeStrategy;
//! use shardmerge::sort_spec::{SortDirection, SortSpec};
//! use shardmerge::sort_value::FieldType;
//!
//! // Plain relevance ranking can use the cheap score merge
//! assert_eq!(MergeStrategy::for_sort_spec(&SortSpec::relevance()), MergeStrategy::ScoreMerge);
//!
//! // Any declared sort field needs the field value merge and its second pass
//! let spec = SortSpec::new(vec![]).then_field("popularity", FieldType::Int, SortDirection::Descending);
//! let strategy = MergeStrategy::for_sort_spec(&spec);
//! assert_eq!(strategy, MergeStrategy::FieldValueMerge);
//! assert!(strategy.requires_field_resolution());
//! ```

use crate::sort_spec::{SortFieldKind, SortSpec};
use crate::sort_value::SortValue;
use crate::structures::DocumentRef;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

static MISSING: SortValue = SortValue::Missing;

/// Closed set of merge strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeStrategy {
    /// Rank by the relevance score each shard already returned
    ScoreMerge,
    /// Rank by the tuple of declared sort field values, resolved in a second pass
    FieldValueMerge,
}

impl MergeStrategy {
    /// Every strategy, in declaration order
    pub const ALL: [MergeStrategy; 2] = [Self::ScoreMerge, Self::FieldValueMerge];

    /// Get a human-readable description of this strategy
    pub fn description(&self) -> &'static str {
        match self {
            Self::ScoreMerge => "Merge by relevance score",
            Self::FieldValueMerge => "Merge by resolved sort field values",
        }
    }

    /// Static cost used to choose among strategies with equivalent semantics
    pub fn cost(&self) -> u32 {
        match self {
            Self::ScoreMerge => 1,
            Self::FieldValueMerge => 2,
        }
    }

    /// Whether duplicates are detected by shared document identity
    pub fn merges_ids(&self) -> bool {
        true
    }

    /// Whether a sort value resolution pass is needed before final ordering
    pub fn requires_field_resolution(&self) -> bool {
        matches!(self, Self::FieldValueMerge)
    }

    /// Whether this strategy can produce the ranking `spec` asks for
    pub fn is_eligible(&self, spec: &SortSpec) -> bool {
        match self {
            Self::ScoreMerge => spec.is_relevance_only(),
            Self::FieldValueMerge => true,
        }
    }

    /// Cheapest eligible strategy among `candidates`
    pub fn cheapest(candidates: &[MergeStrategy], spec: &SortSpec) -> Option<MergeStrategy> {
        candidates
            .iter()
            .copied()
            .filter(|s| s.is_eligible(spec))
            .min_by_key(|s| s.cost())
    }

    /// Strategy selected for a sort specification
    pub fn for_sort_spec(spec: &SortSpec) -> MergeStrategy {
        Self::cheapest(&Self::ALL, spec).unwrap_or(Self::FieldValueMerge)
    }

    /// Total order over surviving documents
    ///
    /// `Less` means `a` ranks earlier. Exact ties fall back to byte order of the
    /// stringified key; callers use a stable sort so insertion order decides the rest.
    pub fn compare(&self, spec: &SortSpec, a: &DocumentRef, b: &DocumentRef) -> Ordering {
        let ranked = match self {
            Self::ScoreMerge => rank_score(b.score)
                .partial_cmp(&rank_score(a.score))
                .unwrap_or(Ordering::Equal),
            Self::FieldValueMerge => compare_sort_tuples(spec, a, b),
        };
        ranked.then_with(|| a.key.cmp(&b.key))
    }
}

impl Default for MergeStrategy {
    fn default() -> Self {
        Self::ScoreMerge
    }
}

/// Score used for ranking: missing and NaN rank last, signed zeros are equal
fn rank_score(score: Option<f32>) -> f32 {
    match score {
        Some(s) if s.is_nan() => f32::NEG_INFINITY,
        Some(s) if s == 0.0 => 0.0,
        Some(s) => s,
        None => f32::NEG_INFINITY,
    }
}

fn compare_sort_tuples(spec: &SortSpec, a: &DocumentRef, b: &DocumentRef) -> Ordering {
    // documents whose values could not be resolved rank after every resolved one
    match (a.is_resolved(), b.is_resolved()) {
        (true, false) => return Ordering::Less,
        (false, true) => return Ordering::Greater,
        _ => {}
    }

    let mut marshaled_index = 0;
    for clause in &spec.fields {
        let natural = match &clause.kind {
            SortFieldKind::Score => rank_score(a.score)
                .partial_cmp(&rank_score(b.score))
                .unwrap_or(Ordering::Equal),
            SortFieldKind::Ordinal => a.order_in_shard.cmp(&b.order_in_shard),
            SortFieldKind::Field { .. } => {
                let left = tuple_value(a, marshaled_index);
                let right = tuple_value(b, marshaled_index);
                marshaled_index += 1;
                left.cmp(right)
            }
        };
        let ordering = clause.direction.apply(natural);
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}

fn tuple_value(doc: &DocumentRef, index: usize) -> &SortValue {
    doc.sort_values
        .as_ref()
        .and_then(|values| values.get(index))
        .unwrap_or(&MISSING)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identifiers::{DocumentKey, ShardAddress};
    use crate::sort_spec::{SortDirection, SortField};
    use crate::sort_value::FieldType;

    fn doc(key: &str, score: Option<f32>) -> DocumentRef {
        DocumentRef::new(DocumentKey::new(key), ShardAddress::new("s1"), 0, score)
    }

    fn resolved(key: &str, values: Vec<SortValue>) -> DocumentRef {
        let mut d = doc(key, None);
        d.sort_values = Some(values);
        d
    }

    #[test]
    fn test_strategy_descriptors() {
        assert!(MergeStrategy::ScoreMerge.merges_ids());
        assert!(MergeStrategy::FieldValueMerge.merges_ids());
        assert!(!MergeStrategy::ScoreMerge.requires_field_resolution());
        assert!(MergeStrategy::FieldValueMerge.requires_field_resolution());
        assert!(MergeStrategy::ScoreMerge.cost() < MergeStrategy::FieldValueMerge.cost());
        assert_eq!(MergeStrategy::ScoreMerge.description(), "Merge by relevance score");
    }

    #[test]
    fn test_cheapest_eligible_wins() {
        let relevance = SortSpec::relevance();
        assert_eq!(
            MergeStrategy::cheapest(&MergeStrategy::ALL, &relevance),
            Some(MergeStrategy::ScoreMerge)
        );
        assert_eq!(
            MergeStrategy::cheapest(&[MergeStrategy::FieldValueMerge], &relevance),
            Some(MergeStrategy::FieldValueMerge)
        );

        let by_field = SortSpec::new(vec![SortField::field("a", FieldType::Long, SortDirection::Ascending)]);
        assert_eq!(MergeStrategy::cheapest(&[MergeStrategy::ScoreMerge], &by_field), None);
        assert_eq!(MergeStrategy::for_sort_spec(&by_field), MergeStrategy::FieldValueMerge);
    }

    #[test]
    fn test_score_ordering_law() {
        let spec = SortSpec::relevance();
        let s = MergeStrategy::ScoreMerge;
        assert_eq!(s.compare(&spec, &doc("b", Some(5.0)), &doc("a", Some(3.0))), Ordering::Less);
        // exact tie: lexicographically smaller key first
        assert_eq!(s.compare(&spec, &doc("a", Some(2.0)), &doc("b", Some(2.0))), Ordering::Less);
        assert_eq!(s.compare(&spec, &doc("a", Some(0.0)), &doc("b", Some(-0.0))), Ordering::Less);
        // missing and NaN scores rank last
        assert_eq!(s.compare(&spec, &doc("z", Some(-100.0)), &doc("a", None)), Ordering::Less);
        assert_eq!(s.compare(&spec, &doc("z", Some(-100.0)), &doc("a", Some(f32::NAN))), Ordering::Less);
    }

    #[test]
    fn test_field_value_ordering_with_precedence() {
        let spec = SortSpec::new(vec![
            SortField::field("category", FieldType::String, SortDirection::Ascending),
            SortField::field("popularity", FieldType::Int, SortDirection::Descending),
        ]);
        let s = MergeStrategy::FieldValueMerge;

        let a = resolved("1", vec![SortValue::Str("books".into()), SortValue::Int(1)]);
        let b = resolved("2", vec![SortValue::Str("books".into()), SortValue::Int(9)]);
        let c = resolved("3", vec![SortValue::Str("art".into()), SortValue::Int(0)]);

        assert_eq!(s.compare(&spec, &c, &a), Ordering::Less);
        assert_eq!(s.compare(&spec, &b, &a), Ordering::Less);
        assert_eq!(s.compare(&spec, &a, &a.clone()), Ordering::Equal);
    }

    #[test]
    fn test_field_value_unresolved_rank_last() {
        let spec = SortSpec::new(vec![SortField::field("p", FieldType::Int, SortDirection::Ascending)]);
        let s = MergeStrategy::FieldValueMerge;
        let unresolved = doc("0", None);
        let r = resolved("9", vec![SortValue::Int(100)]);
        assert_eq!(s.compare(&spec, &r, &unresolved), Ordering::Less);
    }

    #[test]
    fn test_field_value_mixed_score_clause() {
        let spec = SortSpec::new(vec![
            SortField::field("p", FieldType::Int, SortDirection::Descending),
            SortField::score(SortDirection::Descending),
        ]);
        let s = MergeStrategy::FieldValueMerge;
        let mut a = resolved("a", vec![SortValue::Int(1)]);
        a.score = Some(1.0);
        let mut b = resolved("b", vec![SortValue::Int(1)]);
        b.score = Some(2.0);
        assert_eq!(s.compare(&spec, &b, &a), Ordering::Less);
    }

    #[test]
    fn test_missing_values_sort_first_ascending() {
        let spec = SortSpec::new(vec![SortField::field("p", FieldType::Int, SortDirection::Ascending)]);
        let s = MergeStrategy::FieldValueMerge;
        let missing = resolved("b", vec![SortValue::Missing]);
        let present = resolved("a", vec![SortValue::Int(i32::MIN)]);
        assert_eq!(s.compare(&spec, &missing, &present), Ordering::Less);
    }
}
