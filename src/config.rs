//! Configuration for the merge engine
//!
//! This module provides the configuration system for shardmerge, including parameter
//! validation, a builder pattern implementation and JSON persistence.

use crate::error::MergeError;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

/// Current version of the persisted configuration format
pub const CONFIG_VERSION: u32 = 1;

/// Configuration for the merge engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MergeConfig {
    /// Stored field holding the unique document key
    pub unique_key_field: String,
    /// Stored field holding the relevance score
    pub score_field: String,
    /// Collect per-shard diagnostics into the partial results report
    pub shards_info: bool,
    /// Per-shard timeout for the query pass in milliseconds
    pub shard_timeout_ms: u64,
    /// Per-shard timeout for the resolution pass in milliseconds
    pub resolution_timeout_ms: u64,
    /// Upper bound on `offset + length` of a requested window
    pub max_window_end: usize,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            unique_key_field: "id".to_string(),
            score_field: "score".to_string(),
            shards_info: false,
            shard_timeout_ms: 5_000,
            resolution_timeout_ms: 5_000,
            max_window_end: 10_000,
        }
    }
}

impl MergeConfig {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the unique key field
    pub fn unique_key_field(mut self, field: impl Into<String>) -> Self {
        self.unique_key_field = field.into();
        self
    }

    /// Set the score field
    pub fn score_field(mut self, field: impl Into<String>) -> Self {
        self.score_field = field.into();
        self
    }

    /// Enable or disable per-shard diagnostics
    pub fn shards_info(mut self, enabled: bool) -> Self {
        self.shards_info = enabled;
        self
    }

    /// Set the query pass timeout
    pub fn shard_timeout_ms(mut self, ms: u64) -> Self {
        self.shard_timeout_ms = ms;
        self
    }

    /// Set the resolution pass timeout
    pub fn resolution_timeout_ms(mut self, ms: u64) -> Self {
        self.resolution_timeout_ms = ms;
        self
    }

    /// Set the maximum window end
    pub fn max_window_end(mut self, end: usize) -> Self {
        self.max_window_end = end;
        self
    }

    pub fn shard_timeout(&self) -> Duration {
        Duration::from_millis(self.shard_timeout_ms)
    }

    pub fn resolution_timeout(&self) -> Duration {
        Duration::from_millis(self.resolution_timeout_ms)
    }

    /// Validate the configuration parameters
    pub fn validate(&self) -> Result<()> {
        if self.unique_key_field.trim().is_empty() {
            return Err(MergeError::config_error(
                "unique_key_field",
                "cannot be empty",
                "Set unique_key_field to the schema's unique key (usually \"id\")",
            ));
        }

        if self.score_field.trim().is_empty() {
            return Err(MergeError::config_error(
                "score_field",
                "cannot be empty",
                "Set score_field to the pseudo-field shards return scores in (usually \"score\")",
            ));
        }

        if self.unique_key_field == self.score_field {
            return Err(MergeError::config_error(
                "score_field",
                format!("'{}' is also the unique key field", self.score_field),
                "Use distinct fields for the document key and the relevance score",
            ));
        }

        if self.shard_timeout_ms == 0 {
            return Err(MergeError::config_error(
                "shard_timeout_ms",
                "must be greater than 0",
                "Set shard_timeout_ms to a positive value in milliseconds (recommended: 1000-30000ms)",
            ));
        }

        if self.resolution_timeout_ms == 0 {
            return Err(MergeError::config_error(
                "resolution_timeout_ms",
                "must be greater than 0",
                "Set resolution_timeout_ms to a positive value in milliseconds (recommended: 1000-30000ms)",
            ));
        }

        if self.max_window_end == 0 {
            return Err(MergeError::config_error(
                "max_window_end",
                "must be greater than 0",
                "Set max_window_end to the deepest page you allow (recommended: 10000)",
            ));
        }

        Ok(())
    }

    /// Build the configuration after validation
    pub fn build(self) -> Result<Self> {
        self.validate()?;
        Ok(self)
    }

    /// Save the configuration to a JSON file atomically
    pub fn save(&self, path: &Path) -> Result<()> {
        self.validate()?;

        let persisted = PersistedConfig {
            version: CONFIG_VERSION,
            config: self.clone(),
        };
        let json_content = serde_json::to_string_pretty(&persisted)
            .map_err(|e| MergeError::Config(format!("Failed to serialize configuration: {}", e)))?;

        let temp_path = path.with_extension("tmp");
        fs::write(&temp_path, json_content).map_err(|e| {
            MergeError::Io(std::io::Error::new(
                e.kind(),
                format!("Failed to write temporary config file {}: {}", temp_path.display(), e),
            ))
        })?;
        fs::rename(&temp_path, path)?;

        debug!(path = %path.display(), "saved merge configuration");
        Ok(())
    }

    /// Load and validate a configuration from a JSON file
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(MergeError::Config(format!(
                "Configuration file not found: {}",
                path.display()
            )));
        }

        let content = fs::read_to_string(path)?;
        let persisted: PersistedConfig = serde_json::from_str(&content)
            .map_err(|e| MergeError::Config(format!("Failed to parse configuration: {}", e)))?;

        if persisted.version > CONFIG_VERSION {
            return Err(MergeError::Config(format!(
                "Configuration version {} is newer than supported version {}",
                persisted.version, CONFIG_VERSION
            )));
        }

        persisted.config.build()
    }
}

/// On-disk envelope for a configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct PersistedConfig {
    version: u32,
    config: MergeConfig,
}
