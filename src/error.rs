//! Error types for SegKV
//!
//! Provides a unified error type for all engine operations.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias using SegKvError
pub type Result<T> = std::result::Result<T, SegKvError>;

/// Unified error type for SegKV operations
///
/// A missing key is not an error: `Engine::get` returns `Ok(None)`.
#[derive(Debug, Error)]
pub enum SegKvError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // Record Errors
    // -------------------------------------------------------------------------
    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    // -------------------------------------------------------------------------
    // Startup Errors
    // -------------------------------------------------------------------------
    #[error("Open failed: {0}")]
    Open(String),

    #[error("Recovery failed for {}: {reason}", path.display())]
    RecoveryFailed { path: PathBuf, reason: String },

    // -------------------------------------------------------------------------
    // Segment I/O Errors
    // -------------------------------------------------------------------------
    #[error("Write failed: {0}")]
    Write(#[source] std::io::Error),

    #[error("Read failed: {0}")]
    Read(#[source] std::io::Error),

    #[error("Segment is sealed: {}", .0.display())]
    SegmentSealed(PathBuf),

    // -------------------------------------------------------------------------
    // Compaction Errors
    // -------------------------------------------------------------------------
    #[error("Merge failed: {0}")]
    Merge(String),

    // -------------------------------------------------------------------------
    // Lifecycle Errors
    // -------------------------------------------------------------------------
    #[error("Engine is closed")]
    EngineClosed,

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),
}

impl SegKvError {
    /// Wrap a failure hit while recovering the given file
    pub(crate) fn recovery(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        SegKvError::RecoveryFailed {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}
