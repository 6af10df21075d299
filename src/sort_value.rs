//! Sort value codec
//!
//! Sort-field values computed on one shard have to travel to the coordinating node and
//! be re-interpreted there with identical ordering. This module defines the comparable
//! in-memory representation ([`SortValue`]), the field types that drive the transform
//! ([`FieldType`]), and the [`SortValueCodec`] that converts between the two and the
//! transport-safe JSON scalar used on the wire.
//!
//! # Wire representation
//!
//! | Field type | In memory            | On the wire                                   |
//! |------------|----------------------|-----------------------------------------------|
//! | `int`      | `i32`                | JSON integer                                  |
//! | `long`     | `i64`                | JSON integer                                  |
//! | `float`    | `f32`                | JSON number, or `"NaN"` / `"Infinity"` / `"-Infinity"` |
//! | `double`   | `f64`                | same as `float`                               |
//! | `date`     | epoch millis (`i64`) | JSON integer                                  |
//! | `string`   | `String`             | JSON string                                   |
//! | `binary`   | bytes                | lowercase hex string                          |
//! | `boolean`  | `bool`               | JSON boolean                                  |
//!
//! A missing value (document without a value for the field) is `null` for every type.
//!
//! # Usage Examples
//!
//! ```rust
//! use shardmerge::sort_value::{FieldType, SortValue, SortValueCodec};
//!
//! let wire = SortValueCodec::marshal(FieldType::Float, &SortValue::Float(f32::NAN))?;
//! assert_eq!(wire, serde_json::json!("NaN"));
//!
//! let back = SortValueCodec::unmarshal(FieldType::Float, &wire)?;
//! assert_eq!(back, SortValue::Float(f32::NAN));
//! # Ok::<(), shardmerge::MergeError>(())
//! ```

use crate::error::{MergeError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};
use std::cmp::Ordering;
use std::fmt::{self, Display, Formatter};

const NAN_TOKEN: &str = "NaN";
const POS_INF_TOKEN: &str = "Infinity";
const NEG_INF_TOKEN: &str = "-Infinity";

/// Field types that can appear in a sort specification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Int,
    Long,
    Float,
    Double,
    Date,
    String,
    Binary,
    Boolean,
}

impl FieldType {
    /// Name used in error messages and configuration
    pub fn name(&self) -> &'static str {
        match self {
            Self::Int => "int",
            Self::Long => "long",
            Self::Float => "float",
            Self::Double => "double",
            Self::Date => "date",
            Self::String => "string",
            Self::Binary => "binary",
            Self::Boolean => "boolean",
        }
    }

    /// Whether a value is of the shape this field type's comparator produces
    pub fn accepts(&self, value: &SortValue) -> bool {
        matches!(
            (self, value),
            (_, SortValue::Missing)
                | (Self::Int, SortValue::Int(_))
                | (Self::Long, SortValue::Long(_))
                | (Self::Float, SortValue::Float(_))
                | (Self::Double, SortValue::Double(_))
                | (Self::Date, SortValue::Date(_))
                | (Self::String, SortValue::Str(_))
                | (Self::Binary, SortValue::Bytes(_))
                | (Self::Boolean, SortValue::Bool(_))
        )
    }
}

impl Display for FieldType {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A comparator value for one sort field of one document
///
/// Values of the same variant compare naturally; floating point values use IEEE total
/// ordering so that signed zero is stable, except that all NaNs are one value sorting
/// above +Infinity regardless of sign or payload. `Missing` sorts before every
/// present value in ascending order.
#[derive(Debug, Clone)]
pub enum SortValue {
    Missing,
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    /// Milliseconds since the Unix epoch
    Date(i64),
    Str(String),
    Bytes(Vec<u8>),
    Bool(bool),
}

impl SortValue {
    fn variant_rank(&self) -> u8 {
        match self {
            Self::Missing => 0,
            Self::Bool(_) => 1,
            Self::Int(_) => 2,
            Self::Long(_) => 3,
            Self::Float(_) => 4,
            Self::Double(_) => 5,
            Self::Date(_) => 6,
            Self::Str(_) => 7,
            Self::Bytes(_) => 8,
        }
    }

    pub fn is_missing(&self) -> bool {
        matches!(self, Self::Missing)
    }
}

impl Ord for SortValue {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::Missing, Self::Missing) => Ordering::Equal,
            (Self::Int(a), Self::Int(b)) => a.cmp(b),
            (Self::Long(a), Self::Long(b)) => a.cmp(b),
            (Self::Float(a), Self::Float(b)) => cmp_float(f64::from(*a), f64::from(*b)),
            (Self::Double(a), Self::Double(b)) => cmp_float(*a, *b),
            (Self::Date(a), Self::Date(b)) => a.cmp(b),
            (Self::Str(a), Self::Str(b)) => a.cmp(b),
            (Self::Bytes(a), Self::Bytes(b)) => a.cmp(b),
            (Self::Bool(a), Self::Bool(b)) => a.cmp(b),
            _ => self.variant_rank().cmp(&other.variant_rank()),
        }
    }
}

/// IEEE total order with every NaN collapsed into one value above +Infinity
fn cmp_float(a: f64, b: f64) -> Ordering {
    match (a.is_nan(), b.is_nan()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => a.total_cmp(&b),
    }
}

impl PartialOrd for SortValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for SortValue {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for SortValue {}

/// Converts sort values to and from their wire representation
pub struct SortValueCodec;

impl SortValueCodec {
    /// Marshal a comparator value into its wire form
    ///
    /// Total for every value the field type's comparator can produce. A value of the
    /// wrong shape for `field_type` is rejected with `InvalidInput`.
    pub fn marshal(field_type: FieldType, value: &SortValue) -> Result<Value> {
        if !field_type.accepts(value) {
            return Err(MergeError::invalid_input(
                "sort_value",
                format!("{:?} is not a {} comparator value", value, field_type),
                "Make sure the comparator for this field matches the declared field type",
            ));
        }

        let wire = match value {
            SortValue::Missing => Value::Null,
            SortValue::Int(v) => Value::from(*v),
            SortValue::Long(v) | SortValue::Date(v) => Value::from(*v),
            SortValue::Float(v) => float_to_wire(f64::from(*v)),
            SortValue::Double(v) => float_to_wire(*v),
            SortValue::Str(v) => Value::String(v.clone()),
            SortValue::Bytes(v) => Value::String(hex::encode(v)),
            SortValue::Bool(v) => Value::Bool(*v),
        };
        Ok(wire)
    }

    /// Unmarshal a wire value back into a comparator value
    ///
    /// Fails with `MalformedSortValue` when `wire` is not something [`Self::marshal`]
    /// could have produced for `field_type`. The field name is only used for error
    /// reporting.
    pub fn unmarshal(field_type: FieldType, wire: &Value) -> Result<SortValue> {
        Self::unmarshal_field("", field_type, wire)
    }

    /// Unmarshal a wire value, naming the sort field in any error
    pub fn unmarshal_field(field: &str, field_type: FieldType, wire: &Value) -> Result<SortValue> {
        let malformed = |reason: &str| MergeError::malformed_sort_value(field, field_type, wire, reason);

        if wire.is_null() {
            return Ok(SortValue::Missing);
        }

        match field_type {
            FieldType::Int => {
                let v = wire.as_i64().ok_or_else(|| malformed("expected an integer"))?;
                let v = i32::try_from(v).map_err(|_| malformed("integer out of range for int"))?;
                Ok(SortValue::Int(v))
            }
            FieldType::Long => wire
                .as_i64()
                .map(SortValue::Long)
                .ok_or_else(|| malformed("expected a 64-bit integer")),
            FieldType::Date => wire
                .as_i64()
                .map(SortValue::Date)
                .ok_or_else(|| malformed("expected epoch milliseconds")),
            FieldType::Float => {
                let v = float_from_wire(wire).ok_or_else(|| malformed("expected a number or non-finite token"))?;
                let narrowed = v as f32;
                if v.is_finite() && f64::from(narrowed) != v {
                    return Err(malformed("number is not exactly representable as a float"));
                }
                Ok(SortValue::Float(narrowed))
            }
            FieldType::Double => float_from_wire(wire)
                .map(SortValue::Double)
                .ok_or_else(|| malformed("expected a number or non-finite token")),
            FieldType::String => wire
                .as_str()
                .map(|s| SortValue::Str(s.to_string()))
                .ok_or_else(|| malformed("expected a string")),
            FieldType::Binary => {
                let text = wire.as_str().ok_or_else(|| malformed("expected a hex string"))?;
                // marshal always emits lowercase, so anything else was not produced by it
                if text.chars().any(|c| c.is_ascii_uppercase()) {
                    return Err(malformed("hex string must be lowercase"));
                }
                hex::decode(text)
                    .map(SortValue::Bytes)
                    .map_err(|e| malformed(&format!("invalid hex: {}", e)))
            }
            FieldType::Boolean => wire
                .as_bool()
                .map(SortValue::Bool)
                .ok_or_else(|| malformed("expected a boolean")),
        }
    }
}

fn float_to_wire(v: f64) -> Value {
    if v.is_nan() {
        Value::String(NAN_TOKEN.to_string())
    } else if v == f64::INFINITY {
        Value::String(POS_INF_TOKEN.to_string())
    } else if v == f64::NEG_INFINITY {
        Value::String(NEG_INF_TOKEN.to_string())
    } else {
        // finite values always have a JSON number form
        Number::from_f64(v).map(Value::Number).unwrap_or(Value::Null)
    }
}

fn float_from_wire(wire: &Value) -> Option<f64> {
    match wire {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => match s.as_str() {
            NAN_TOKEN => Some(f64::NAN),
            POS_INF_TOKEN => Some(f64::INFINITY),
            NEG_INF_TOKEN => Some(f64::NEG_INFINITY),
            _ => None,
        },
        _ => None,
    }
}
