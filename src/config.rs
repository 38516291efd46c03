//! Configuration for SegKV
//!
//! Centralized configuration with sensible defaults.

use std::path::PathBuf;

use crate::error::{Result, SegKvError};

/// Main configuration for a SegKV engine instance
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Storage Configuration
    // -------------------------------------------------------------------------
    /// Directory holding all segment files
    /// Internal structure:
    ///   {data_dir}/
    ///     ├── segment.0        (closed, oldest)
    ///     ├── segment.1        (closed)
    ///     └── segment.active   (open for appends)
    pub data_dir: PathBuf,

    /// Size in bytes at which the active segment is rotated.
    /// Checked after each append, so a segment may end slightly larger.
    pub max_segment_bytes: u64,

    // -------------------------------------------------------------------------
    // Durability Configuration
    // -------------------------------------------------------------------------
    /// Sync strategy: how often to fsync the active segment
    pub sync_strategy: SyncStrategy,

    // -------------------------------------------------------------------------
    // Compaction Configuration
    // -------------------------------------------------------------------------
    /// Whether closed segments are merged automatically
    pub merge_policy: MergePolicy,
}

/// Active segment sync strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStrategy {
    /// fsync after every append (safest, slowest)
    EveryWrite,

    /// fsync after N unsynced appends (balanced durability/performance)
    EveryNEntries { count: usize },
}

/// When closed segments get merged
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergePolicy {
    /// Only when `Engine::merge` is called
    Manual,

    /// A background worker merges after a rotation leaves at least
    /// `min_closed_segments` closed segments
    Background { min_closed_segments: usize },
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./segkv_data"),
            max_segment_bytes: 10 * 1024 * 1024, // 10 MB
            sync_strategy: SyncStrategy::EveryNEntries { count: 100 },
            merge_policy: MergePolicy::Manual,
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Reject settings the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.data_dir.as_os_str().is_empty() {
            return Err(SegKvError::Config("data_dir must not be empty".to_string()));
        }

        if self.max_segment_bytes == 0 {
            return Err(SegKvError::Config(
                "max_segment_bytes must be positive".to_string(),
            ));
        }

        if let SyncStrategy::EveryNEntries { count: 0 } = self.sync_strategy {
            return Err(SegKvError::Config(
                "sync count must be positive".to_string(),
            ));
        }

        if let MergePolicy::Background {
            min_closed_segments: 0,
        } = self.merge_policy
        {
            return Err(SegKvError::Config(
                "min_closed_segments must be positive".to_string(),
            ));
        }

        Ok(())
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the data directory
    pub fn data_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.data_dir = path.into();
        self
    }

    /// Set the rotation threshold (in bytes)
    pub fn max_segment_bytes(mut self, size: u64) -> Self {
        self.config.max_segment_bytes = size;
        self
    }

    /// Set the sync strategy
    pub fn sync_strategy(mut self, strategy: SyncStrategy) -> Self {
        self.config.sync_strategy = strategy;
        self
    }

    /// Set the merge policy
    pub fn merge_policy(mut self, policy: MergePolicy) -> Self {
        self.config.merge_policy = policy;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
