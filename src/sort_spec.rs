//! Sort specifications
//!
//! A [`SortSpec`] is the ordered list of (field, direction) pairs that defines global
//! ranking. Relevance score and internal document ordinal are special sort kinds: they
//! are never marshaled across shards, only declared fields with a [`FieldType`] are.

use crate::error::{MergeError, Result};
use crate::sort_value::FieldType;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashSet;

/// Direction of a single sort clause
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[serde(alias = "asc")]
    Ascending,
    #[serde(alias = "desc")]
    Descending,
}

impl SortDirection {
    /// Apply this direction to a natural (ascending) ordering
    pub fn apply(self, natural: Ordering) -> Ordering {
        match self {
            Self::Ascending => natural,
            Self::Descending => natural.reverse(),
        }
    }
}

/// What a sort clause sorts on
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SortFieldKind {
    /// Relevance score, reported out-of-band with each document
    Score,
    /// Internal document ordinal; only meaningful within one shard
    Ordinal,
    /// A declared index field whose comparator values must be marshaled
    Field { name: String, field_type: FieldType },
}

/// One clause of a sort specification
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SortField {
    #[serde(flatten)]
    pub kind: SortFieldKind,
    pub direction: SortDirection,
}

impl SortField {
    pub fn score(direction: SortDirection) -> Self {
        Self {
            kind: SortFieldKind::Score,
            direction,
        }
    }

    pub fn ordinal(direction: SortDirection) -> Self {
        Self {
            kind: SortFieldKind::Ordinal,
            direction,
        }
    }

    pub fn field(name: impl Into<String>, field_type: FieldType, direction: SortDirection) -> Self {
        Self {
            kind: SortFieldKind::Field {
                name: name.into(),
                field_type,
            },
            direction,
        }
    }

    /// Whether values for this clause travel through the sort value codec
    pub fn is_marshaled(&self) -> bool {
        matches!(self.kind, SortFieldKind::Field { .. })
    }
}

/// A declared field whose values are marshaled, with its position among marshaled fields
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MarshaledField<'a> {
    pub name: &'a str,
    pub field_type: FieldType,
    pub direction: SortDirection,
}

/// Ordered list of sort clauses
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SortSpec {
    pub fields: Vec<SortField>,
}

impl Default for SortSpec {
    fn default() -> Self {
        Self::relevance()
    }
}

impl SortSpec {
    /// Plain relevance ranking: score descending
    pub fn relevance() -> Self {
        Self {
            fields: vec![SortField::score(SortDirection::Descending)],
        }
    }

    /// Create a spec from explicit clauses
    pub fn new(fields: Vec<SortField>) -> Self {
        Self { fields }
    }

    /// Append a declared field clause
    pub fn then_field(mut self, name: impl Into<String>, field_type: FieldType, direction: SortDirection) -> Self {
        self.fields.push(SortField::field(name, field_type, direction));
        self
    }

    /// Append a score clause
    pub fn then_score(mut self, direction: SortDirection) -> Self {
        self.fields.push(SortField::score(direction));
        self
    }

    /// True when ranking is by descending score alone
    pub fn is_relevance_only(&self) -> bool {
        matches!(
            self.fields.as_slice(),
            [SortField {
                kind: SortFieldKind::Score,
                direction: SortDirection::Descending,
            }]
        )
    }

    /// Declared fields that are marshaled, in sort precedence order
    pub fn marshaled_fields(&self) -> impl Iterator<Item = MarshaledField<'_>> {
        self.fields.iter().filter_map(|f| match &f.kind {
            SortFieldKind::Field { name, field_type } => Some(MarshaledField {
                name: name.as_str(),
                field_type: *field_type,
                direction: f.direction,
            }),
            _ => None,
        })
    }

    pub fn marshaled_field_count(&self) -> usize {
        self.marshaled_fields().count()
    }

    /// Validate the sort specification
    pub fn validate(&self) -> Result<()> {
        if self.fields.is_empty() {
            return Err(MergeError::invalid_input(
                "sort_spec",
                "must contain at least one clause",
                "Use SortSpec::relevance() for plain score ranking",
            ));
        }

        let mut seen = HashSet::new();
        for field in self.marshaled_fields() {
            if field.name.trim().is_empty() {
                return Err(MergeError::invalid_input(
                    "sort_spec",
                    "field name cannot be empty",
                    "Name every sorted field explicitly",
                ));
            }
            if !seen.insert(field.name) {
                return Err(MergeError::invalid_input(
                    "sort_spec",
                    format!("field '{}' appears more than once", field.name),
                    "Remove the duplicate sort clause; later clauses could never break a tie",
                ));
            }
        }

        Ok(())
    }
}
