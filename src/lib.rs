//! # SegKV
//!
//! An embedded, log-structured key-value store with:
//! - Append-only segment files with an in-memory offset index
//! - Size-based segment rotation
//! - Crash recovery with partial write handling
//! - Compaction of closed segments (manual or background)
//! - Single-writer/multi-reader concurrency model
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    Host Service (in-process)                 │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │ put / get / merge / close
//! ┌─────────────────────▼───────────────────────────────────────┐
//! │                         Engine                               │
//! │          (Single Writer / Multi Reader, COW list)            │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//!          ┌────────────┴─────────────────────────┐
//!          │                                      │
//!          ▼                                      ▼
//!   ┌──────────────┐   rotate    ┌──────────────────────────────┐
//!   │    Active    │ ──────────▶ │  Closed segments (oldest →)  │
//!   │   Segment    │             │  segment.0  segment.1  ...   │
//!   └──────────────┘             └──────────────┬───────────────┘
//!                                               │ merge
//!                                               ▼
//!                                       ┌──────────────┐
//!                                       │  Compactor   │
//!                                       └──────────────┘
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use segkv::Engine;
//!
//! let engine = Engine::open_path("./data", 1024 * 1024)?;
//! engine.put(b"hello", b"world")?;
//! assert_eq!(engine.get(b"hello")?, Some(b"world".to_vec()));
//! engine.close()?;
//! # Ok::<(), segkv::SegKvError>(())
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod record;
pub mod segment;
pub mod directory;
pub mod compaction;
pub mod engine;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{SegKvError, Result};
pub use config::{Config, MergePolicy, SyncStrategy};
pub use compaction::MergeStats;
pub use engine::{Engine, EngineStats};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of SegKV
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
