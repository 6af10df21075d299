//! MergeContext - central context object for API operations
//!
//! The context holds the merge configuration shared by every operation a caller runs,
//! and a small history of the merges it completed. Nothing in it is shared between
//! contexts; each caller owns its own.
//!
//! # Usage Examples
//!
//! ```rust
//! use shardmerge::api::MergeContext;
//! use shardmerge::config::MergeConfig;
//!
//! let context = MergeContext::new();
//! assert_eq!(context.config().unique_key_field, "id");
//!
//! let mut context = MergeContext::with_config(MergeConfig::new().shards_info(true));
//! assert!(context.config().shards_info);
//!
//! context.update_config(MergeConfig::new().score_field("relevance")).expect("Valid config");
//! assert_eq!(context.config().score_field, "relevance");
//! ```

use crate::config::MergeConfig;
use crate::error::MergeError;
use crate::structures::MergeStats;
use tracing::debug;

/// Running totals over the merges completed through one context
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MergeHistory {
    pub merges_completed: u64,
    pub partial_merges: u64,
    pub last_stats: Option<MergeStats>,
}

/// Central context for merge operations
#[derive(Debug, Clone, Default)]
pub struct MergeContext {
    config: MergeConfig,
    history: MergeHistory,
}

impl MergeContext {
    /// Create a context with the default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a context with a specific configuration
    pub fn with_config(config: MergeConfig) -> Self {
        Self {
            config,
            history: MergeHistory::default(),
        }
    }

    pub fn config(&self) -> &MergeConfig {
        &self.config
    }

    /// Replace the configuration after validating it
    pub fn update_config(&mut self, config: MergeConfig) -> Result<(), MergeError> {
        config.validate()?;
        self.config = config;
        Ok(())
    }

    pub fn history(&self) -> &MergeHistory {
        &self.history
    }

    /// Record a completed merge
    pub fn record_merge(&mut self, stats: &MergeStats, partial: bool) {
        self.history.merges_completed += 1;
        if partial {
            self.history.partial_merges += 1;
        }
        self.history.last_stats = Some(stats.clone());
        debug!(
            merges_completed = self.history.merges_completed,
            partial, "recorded merge in context"
        );
    }
}
