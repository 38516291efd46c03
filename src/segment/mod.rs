//! Segment Module
//!
//! One append-only log file plus an in-memory offset index.
//!
//! ## Responsibilities
//! - Append records at the end of the file (active segment only)
//! - O(1) point lookups through the offset index
//! - Rebuild the index by scanning the file (recovery)
//! - Seal: stop accepting appends, fsync, drop the write handle
//!
//! ## Lifecycle
//! ```text
//!   create / open_active ──append*──▶ seal ──▶ read-only (closed)
//!                                              │
//!   open_sealed ───────────────────────────────┘
//! ```
//!
//! The index maps each key to the offset of its *latest* record in the file.
//! Records are only ever appended, so the latest record is the one at the
//! highest offset; `rebuild_index` enforces this explicitly.

mod file;
mod iterator;

pub use file::{ScanSummary, Segment};
pub use iterator::SegmentIterator;
