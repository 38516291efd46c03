//! Segment Directory
//!
//! File naming, discovery, and crash recovery for a data directory.
//!
//! ## Layout
//! ```text
//! {data_dir}/
//!   ├── segment.0        closed, oldest
//!   ├── segment.1        closed
//!   ├── ...
//!   ├── segment.active   the single segment open for appends
//!   └── segment.merge    merge output not yet committed (only after a crash)
//! ```
//!
//! ## Recovery
//! 1. Create the directory if it doesn't exist
//! 2. Classify files; delete a leftover `segment.merge`
//! 3. Open closed segments in ascending id order, rebuilding each index
//! 4. Reopen `segment.active` (or create it) as the active segment

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::SyncStrategy;
use crate::error::{Result, SegKvError};
use crate::segment::Segment;

/// Prefix shared by every segment file name
pub const SEGMENT_PREFIX: &str = "segment.";

/// Suffix of the active segment file
pub const ACTIVE_SUFFIX: &str = "active";

/// Suffix of the merge output before it is committed
pub const MERGE_SUFFIX: &str = "merge";

/// Kinds of file the directory knows about
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentFile {
    /// `segment.<id>`
    Closed(u64),
    /// `segment.active`
    Active,
    /// `segment.merge`
    MergeScratch,
}

/// A sealed segment together with its creation sequence number
#[derive(Clone)]
pub struct ClosedSegment {
    pub id: u64,
    pub segment: Arc<Segment>,
}

/// Statistics from a recovery pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryStats {
    /// Segment files opened (closed + active)
    pub segments_recovered: u64,

    /// Complete records scanned across all segments
    pub records_recovered: u64,

    /// Segments whose scan ended on a partial record
    pub truncated_segments: u64,

    /// Whether an uncommitted merge output was deleted
    pub removed_merge_scratch: bool,

    /// Whether a fresh active segment had to be created
    pub created_active: bool,
}

/// Everything the engine needs to start serving
pub struct Recovered {
    /// Closed segments, oldest first
    pub closed: Vec<ClosedSegment>,

    pub active: Segment,

    /// Id the next rotated segment will get
    pub next_segment_id: u64,

    pub stats: RecoveryStats,
}

/// A data directory holding segment files
#[derive(Debug, Clone)]
pub struct SegmentDirectory {
    root: PathBuf,
}

impl SegmentDirectory {
    /// Open (creating if needed) a data directory
    pub fn open(path: &Path) -> Result<Self> {
        fs::create_dir_all(path).map_err(|e| {
            SegKvError::Open(format!("cannot create {}: {}", path.display(), e))
        })?;

        if !path.is_dir() {
            return Err(SegKvError::Open(format!(
                "{} is not a directory",
                path.display()
            )));
        }

        Ok(Self {
            root: path.to_path_buf(),
        })
    }

    /// Discover and reopen every segment in the directory
    pub fn recover(&self, sync_strategy: SyncStrategy) -> Result<Recovered> {
        let mut stats = RecoveryStats::default();
        let mut closed_ids = Vec::new();
        let mut has_active = false;

        let entries = fs::read_dir(&self.root).map_err(|e| {
            SegKvError::Open(format!("cannot list {}: {}", self.root.display(), e))
        })?;

        for entry in entries {
            let entry = entry.map_err(|e| {
                SegKvError::Open(format!("cannot list {}: {}", self.root.display(), e))
            })?;
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };

            match Self::parse_file_name(name) {
                Ok(Some(SegmentFile::Closed(id))) => closed_ids.push(id),
                Ok(Some(SegmentFile::Active)) => has_active = true,
                Ok(Some(SegmentFile::MergeScratch)) => {
                    tracing::warn!("Removing uncommitted merge output {}", path.display());
                    fs::remove_file(&path).map_err(|e| SegKvError::recovery(&path, e))?;
                    stats.removed_merge_scratch = true;
                }
                Ok(None) => {}
                Err(reason) => return Err(SegKvError::recovery(&path, reason)),
            }
        }

        closed_ids.sort_unstable();

        let mut closed = Vec::with_capacity(closed_ids.len());
        for id in &closed_ids {
            let path = self.closed_path(*id);
            let (segment, summary) =
                Segment::open_sealed(&path).map_err(|e| SegKvError::recovery(&path, e))?;

            tracing::debug!(
                "Recovered {}: {} records, {} keys, {} bytes",
                path.display(),
                summary.records,
                segment.key_count(),
                summary.valid_len
            );

            stats.segments_recovered += 1;
            stats.records_recovered += summary.records;
            if summary.truncated {
                stats.truncated_segments += 1;
            }

            closed.push(ClosedSegment {
                id: *id,
                segment: Arc::new(segment),
            });
        }

        let active_path = self.active_path();
        let active = if has_active {
            let (segment, summary) = Segment::open_active(&active_path, sync_strategy)
                .map_err(|e| SegKvError::recovery(&active_path, e))?;

            stats.segments_recovered += 1;
            stats.records_recovered += summary.records;
            if summary.truncated {
                stats.truncated_segments += 1;
            }
            segment
        } else {
            stats.created_active = true;
            Segment::create(&active_path, sync_strategy)
                .map_err(|e| SegKvError::recovery(&active_path, e))?
        };

        let next_segment_id = closed_ids.last().map(|&id| id + 1).unwrap_or(0);

        Ok(Recovered {
            closed,
            active,
            next_segment_id,
            stats,
        })
    }

    // =========================================================================
    // Naming
    // =========================================================================

    pub fn path(&self) -> &Path {
        &self.root
    }

    /// `{root}/segment.active`
    pub fn active_path(&self) -> PathBuf {
        self.root.join(format!("{}{}", SEGMENT_PREFIX, ACTIVE_SUFFIX))
    }

    /// `{root}/segment.<id>`
    pub fn closed_path(&self, id: u64) -> PathBuf {
        self.root.join(format!("{}{}", SEGMENT_PREFIX, id))
    }

    /// `{root}/segment.merge`
    pub fn merge_path(&self) -> PathBuf {
        self.root.join(format!("{}{}", SEGMENT_PREFIX, MERGE_SUFFIX))
    }

    /// Classify a file name
    ///
    /// - "segment.42"     → `Ok(Some(Closed(42)))`
    /// - "segment.active" → `Ok(Some(Active))`
    /// - "notes.txt"      → `Ok(None)`
    /// - "segment.x1"     → `Err(..)`: looks like ours but can't be parsed
    /// - "segment.007"    → `Err(..)`: leading zeros are not a valid id
    pub fn parse_file_name(name: &str) -> std::result::Result<Option<SegmentFile>, String> {
        let Some(suffix) = name.strip_prefix(SEGMENT_PREFIX) else {
            return Ok(None);
        };

        match suffix {
            ACTIVE_SUFFIX => Ok(Some(SegmentFile::Active)),
            MERGE_SUFFIX => Ok(Some(SegmentFile::MergeScratch)),
            digits if !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()) => {
                let id: u64 = digits
                    .parse()
                    .map_err(|e| format!("bad segment number {:?}: {}", digits, e))?;
                // Only the canonical spelling maps back to `closed_path(id)`;
                // "segment.00" would alias "segment.0".
                if id.to_string() != digits {
                    return Err(format!("non-canonical segment number {:?}", digits));
                }
                Ok(Some(SegmentFile::Closed(id)))
            }
            other => Err(format!("unrecognized segment suffix {:?}", other)),
        }
    }
}
