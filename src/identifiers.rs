//! Identifier types for the merge engine
//!
//! Type-safe wrappers that keep shard addresses, document keys and merge identifiers
//! from being mixed up at compile time.

use crate::error::MergeError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;
use ulid::Ulid;

/// Address of the shard (or replica) a response came from
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ShardAddress(String);

impl ShardAddress {
    /// Create a shard address from any string-like value
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    /// Borrow the address as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for ShardAddress {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ShardAddress {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for ShardAddress {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Stringified unique key of a document
///
/// Keys are stored in their string form because downstream hydration (highlighting,
/// explain output) correlates by string. Ordering is byte order of the UTF-8 string,
/// which is the deterministic tie-break used by every merge strategy.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentKey(String);

impl DocumentKey {
    /// Create a key from an already stringified value
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Derive a key from the value of a document's unique key field
    ///
    /// Strings are used as-is and numbers by their canonical decimal form, so the number
    /// `1` and the string `"1"` name the same document. Null, booleans, arrays and
    /// objects cannot act as unique keys.
    pub fn from_field_value(value: &Value) -> Result<Self, MergeError> {
        match value {
            Value::String(s) if !s.is_empty() => Ok(Self(s.clone())),
            Value::String(_) => Err(MergeError::invalid_input(
                "unique_key",
                "value is an empty string",
                "Every document must carry a non-empty unique key",
            )),
            Value::Number(n) => Ok(Self(n.to_string())),
            other => Err(MergeError::invalid_input(
                "unique_key",
                format!("value {} cannot act as a unique key", other),
                "Unique keys must be strings or numbers",
            )),
        }
    }

    /// Borrow the stringified key
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for DocumentKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DocumentKey {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Identifier of one merge run, used to correlate log lines
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct MergeId(u128);

impl MergeId {
    /// Generate a new ULID-based merge identifier
    pub fn new() -> Self {
        Self(Ulid::new().0)
    }

    /// Create a MergeId from a ULID
    pub fn from_ulid(ulid: Ulid) -> Self {
        Self(ulid.0)
    }

    /// Convert to ULID
    pub fn as_ulid(self) -> Ulid {
        Ulid(self.0)
    }

    /// Get the raw u128 value (mainly for testing)
    pub fn raw(self) -> u128 {
        self.0
    }
}

impl Default for MergeId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for MergeId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_ulid())
    }
}

impl FromStr for MergeId {
    type Err = ulid::DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::from_ulid(Ulid::from_str(s)?))
    }
}
