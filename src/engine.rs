//! Engine Module
//!
//! The storage engine that coordinates segments, rotation, and compaction.
//!
//! ## Responsibilities
//! - Recover the segment list from the data directory on startup
//! - Serialize writes and rotate the active segment on a size threshold
//! - Resolve reads newest → oldest across all segments
//! - Merge closed segments and publish the result atomically

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};

use crate::compaction::{self, BackgroundMerger, MergeStats};
use crate::config::{Config, MergePolicy};
use crate::directory::{ClosedSegment, SegmentDirectory};
use crate::error::{Result, SegKvError};
use crate::record;
use crate::segment::Segment;

/// The main storage engine
///
/// ## Concurrency Model: Single-Writer / Multiple-Reader (SWMR)
///
/// - **Writes** (put + rotation): Serialized by `writer`
///   - Only ONE append or rotation at a time
///   - Only the active segment's index is ever mutated
///
/// - **Reads** (get): Lock-free with respect to the writer
///   - Clone the current `Arc<SegmentList>` under a momentary read lock
///   - Search that snapshot; it never changes underneath the reader
///
/// - **List replacement** (rotation, merge): build a new `SegmentList`, then
///   publish it with one assignment under the write lock. Readers see either
///   the old list or the new one, never a mix.
///
/// - **Merge**: scans a snapshot of the closed segments without holding the
///   writer lock; only the commit (rename, delete, publish) takes it.
pub struct Engine {
    shared: Arc<Shared>,

    /// Present only with `MergePolicy::Background`
    merger: Mutex<Option<BackgroundMerger>>,
}

/// State reachable from both the engine and the background merge worker
struct Shared {
    config: Config,

    directory: SegmentDirectory,

    /// Current segment list; `None` once the engine is closed
    segments: RwLock<Option<Arc<SegmentList>>>,

    /// Serializes put/rotation and guards segment numbering
    writer: Mutex<WriterState>,

    /// Serializes merges
    merge_lock: Mutex<()>,
}

struct WriterState {
    /// Id the next rotated segment will be renamed to
    next_segment_id: u64,
}

/// Immutable snapshot of the segments: `[closed oldest..newest] + active`
struct SegmentList {
    closed: Vec<ClosedSegment>,
    active: Arc<Segment>,
}

/// Point-in-time engine statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineStats {
    /// Number of closed segments
    pub closed_segments: usize,

    /// Bytes in the active segment
    pub active_bytes: u64,

    /// Bytes across all segments
    pub total_bytes: u64,

    /// Sum of distinct keys indexed per segment (a key in two segments counts twice)
    pub indexed_keys: usize,
}

impl Engine {
    /// Open or create an engine with the given config
    ///
    /// On startup:
    /// 1. Validate the config
    /// 2. Open/create the data directory
    /// 3. Recover closed segments and the active segment
    /// 4. Start the merge worker if the policy asks for one
    pub fn open(config: Config) -> Result<Self> {
        config.validate()?;

        let directory = SegmentDirectory::open(&config.data_dir)?;
        let recovered = directory.recover(config.sync_strategy)?;

        tracing::info!(
            "Opened {}: {} segments, {} records recovered, {} truncated tails",
            directory.path().display(),
            recovered.stats.segments_recovered,
            recovered.stats.records_recovered,
            recovered.stats.truncated_segments
        );

        let closed_count = recovered.closed.len();
        let shared = Arc::new(Shared {
            config,
            directory,
            segments: RwLock::new(Some(Arc::new(SegmentList {
                closed: recovered.closed,
                active: Arc::new(recovered.active),
            }))),
            writer: Mutex::new(WriterState {
                next_segment_id: recovered.next_segment_id,
            }),
            merge_lock: Mutex::new(()),
        });

        let merger = match shared.config.merge_policy {
            MergePolicy::Manual => None,
            MergePolicy::Background { .. } => {
                let weak: Weak<Shared> = Arc::downgrade(&shared);
                Some(BackgroundMerger::spawn(move || match weak.upgrade() {
                    Some(shared) => shared.merge(),
                    None => Err(SegKvError::EngineClosed),
                })?)
            }
        };

        let engine = Self {
            shared,
            merger: Mutex::new(merger),
        };
        engine.request_merge_if_due(closed_count);

        Ok(engine)
    }

    /// Open with a path and rotation threshold (convenience method)
    ///
    /// Uses the default config for everything else
    pub fn open_path(path: impl AsRef<Path>, max_segment_bytes: u64) -> Result<Self> {
        let config = Config::builder()
            .data_dir(path.as_ref())
            .max_segment_bytes(max_segment_bytes)
            .build();
        Self::open(config)
    }

    /// Get a value by key
    ///
    /// Search order:
    /// 1. Active segment (most recent writes)
    /// 2. Closed segments (newest to oldest)
    ///
    /// Returns `Ok(None)` if no segment holds the key.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        record::validate_key(key)?;

        let list = self.shared.snapshot()?;

        if let Some(value) = list.active.get(key)? {
            return Ok(Some(value));
        }

        for closed in list.closed.iter().rev() {
            if let Some(value) = closed.segment.get(key)? {
                return Ok(Some(value));
            }
        }

        Ok(None)
    }

    /// Put a key-value pair
    ///
    /// Steps:
    /// 1. Acquire the writer lock
    /// 2. Append to the active segment
    /// 3. Rotate if the active segment reached `max_segment_bytes`
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        record::validate_key(key)?;

        if let Some(closed_count) = self.shared.put(key, value)? {
            self.request_merge_if_due(closed_count);
        }

        Ok(())
    }

    /// Merge all closed segments into one
    ///
    /// The active segment is untouched. Runs concurrently with put/get and
    /// blocks writers only while the result is committed.
    pub fn merge(&self) -> Result<MergeStats> {
        self.shared.merge()
    }

    /// Close the engine
    ///
    /// Stops the merge worker, seals the active segment (fsync), and releases
    /// the segment list. Every later call fails with `EngineClosed`.
    pub fn close(&self) -> Result<()> {
        let merger = self.merger.lock().take();
        if let Some(merger) = merger {
            merger.shutdown();
        }

        let _writer = self.shared.writer.lock();
        let list = self
            .shared
            .segments
            .write()
            .take()
            .ok_or(SegKvError::EngineClosed)?;

        list.active.seal()?;

        tracing::info!("Closed {}", self.shared.directory.path().display());
        Ok(())
    }

    // =========================================================================
    // Accessors (for testing and debugging)
    // =========================================================================

    /// Current segment statistics
    pub fn stats(&self) -> Result<EngineStats> {
        let list = self.shared.snapshot()?;

        let closed_bytes: u64 = list.closed.iter().map(|c| c.segment.size()).sum();
        let closed_keys: usize = list.closed.iter().map(|c| c.segment.key_count()).sum();

        Ok(EngineStats {
            closed_segments: list.closed.len(),
            active_bytes: list.active.size(),
            total_bytes: closed_bytes + list.active.size(),
            indexed_keys: closed_keys + list.active.key_count(),
        })
    }

    /// Get the number of closed segments (0 once closed)
    pub fn closed_segment_count(&self) -> usize {
        self.shared
            .snapshot()
            .map(|list| list.closed.len())
            .unwrap_or(0)
    }

    /// Get the active segment size in bytes (0 once closed)
    pub fn active_segment_size(&self) -> u64 {
        self.shared
            .snapshot()
            .map(|list| list.active.size())
            .unwrap_or(0)
    }

    /// Paths of the closed segments, oldest first
    pub fn closed_segment_paths(&self) -> Vec<PathBuf> {
        self.shared
            .snapshot()
            .map(|list| list.closed.iter().map(|c| c.segment.path()).collect())
            .unwrap_or_default()
    }

    pub fn is_closed(&self) -> bool {
        self.shared.segments.read().is_none()
    }

    /// Get the data directory path
    pub fn data_dir(&self) -> &Path {
        self.shared.directory.path()
    }

    /// Get the configuration
    pub fn config(&self) -> &Config {
        &self.shared.config
    }

    fn request_merge_if_due(&self, closed_count: usize) {
        if let MergePolicy::Background {
            min_closed_segments,
        } = self.shared.config.merge_policy
        {
            if closed_count >= min_closed_segments {
                if let Some(merger) = self.merger.lock().as_ref() {
                    merger.request();
                }
            }
        }
    }
}

impl Shared {
    /// Clone the current list, or fail if the engine is closed
    fn snapshot(&self) -> Result<Arc<SegmentList>> {
        self.segments.read().clone().ok_or(SegKvError::EngineClosed)
    }

    /// Replace the list in one step
    fn publish(&self, list: SegmentList) {
        *self.segments.write() = Some(Arc::new(list));
    }

    /// Append and maybe rotate; returns the closed count if a rotation happened
    fn put(&self, key: &[u8], value: &[u8]) -> Result<Option<usize>> {
        let mut writer = self.writer.lock();
        let list = self.snapshot()?;

        list.active.append(key, value)?;

        // Post-check: the record that crosses the threshold stays in this segment.
        if list.active.size() < self.config.max_segment_bytes {
            return Ok(None);
        }

        self.rotate(&mut writer, &list).map(Some)
    }

    /// Seal the active segment and start a new one (writer lock held)
    ///
    /// 1. fsync the active file
    /// 2. Rename `segment.active` → `segment.<next>`
    /// 3. Create a fresh `segment.active`
    /// 4. Publish `[closed..., sealed] + fresh`
    ///
    /// A failure in 1-3 leaves the current active segment in place.
    fn rotate(&self, writer: &mut WriterState, list: &SegmentList) -> Result<usize> {
        let id = writer.next_segment_id;
        let sealed_path = self.directory.closed_path(id);
        let active_path = self.directory.active_path();

        list.active.sync()?;
        list.active
            .relocate(&sealed_path)
            .map_err(SegKvError::Write)?;

        let fresh = match Segment::create(&active_path, self.config.sync_strategy) {
            Ok(segment) => segment,
            Err(e) => {
                if let Err(undo) = list.active.relocate(&active_path) {
                    tracing::warn!(
                        "Failed to restore {} after rotation error: {}",
                        active_path.display(),
                        undo
                    );
                }
                return Err(match e {
                    SegKvError::Io(io) => SegKvError::Write(io),
                    other => other,
                });
            }
        };

        // Data was synced in step 1; sealing only drops the write handle.
        if let Err(e) = list.active.seal() {
            tracing::warn!("Final sync of {} failed: {}", sealed_path.display(), e);
        }

        let mut closed = list.closed.clone();
        closed.push(ClosedSegment {
            id,
            segment: Arc::clone(&list.active),
        });
        let closed_count = closed.len();

        self.publish(SegmentList {
            closed,
            active: Arc::new(fresh),
        });
        writer.next_segment_id = id + 1;

        tracing::debug!(
            "Rotated active segment to {} ({} bytes)",
            sealed_path.display(),
            list.active.size()
        );

        Ok(closed_count)
    }

    /// Merge the closed segments that exist right now
    ///
    /// 1. Snapshot the closed segments (no writer lock)
    /// 2. Write the freshest records to `segment.merge` and seal it
    /// 3. Under the writer lock: rename it over the oldest input, delete the
    ///    other inputs oldest-first, publish the new list
    ///
    /// Anything failing before the rename leaves the old segments in charge.
    fn merge(&self) -> Result<MergeStats> {
        let _merging = self.merge_lock.lock();

        let inputs = self.snapshot()?.closed.clone();
        let (Some(first), Some(last)) = (inputs.first(), inputs.last()) else {
            return Ok(MergeStats::default());
        };
        let target_id = first.id;
        let last_input_id = last.id;

        let scratch = self.directory.merge_path();
        let (merged, stats) = match compaction::write_merged(&inputs, &scratch) {
            Ok(done) => done,
            Err(e) => {
                discard_scratch(&scratch);
                return Err(SegKvError::Merge(format!(
                    "writing {}: {}",
                    scratch.display(),
                    e
                )));
            }
        };

        let mut writer = self.writer.lock();
        let current = match self.snapshot() {
            Ok(list) => list,
            Err(e) => {
                drop(merged);
                discard_scratch(&scratch);
                return Err(e);
            }
        };

        let target = self.directory.closed_path(target_id);
        if let Err(e) = merged.relocate(&target) {
            drop(merged);
            discard_scratch(&scratch);
            return Err(SegKvError::Merge(format!(
                "renaming merge output to {}: {}",
                target.display(),
                e
            )));
        }

        // Committed. Delete the remaining inputs oldest-first: if one fails,
        // the survivors are a suffix of the inputs and still resolve every key
        // to its freshest value, so they stay in the list.
        let mut leftovers = Vec::new();
        let mut failure = None;
        for input in &inputs[1..] {
            if failure.is_none() {
                let path = input.segment.path();
                match fs::remove_file(&path) {
                    Ok(()) => continue,
                    Err(e) => failure = Some(format!("removing {}: {}", path.display(), e)),
                }
            }
            leftovers.push(input.clone());
        }

        let mut closed = Vec::with_capacity(1 + leftovers.len() + current.closed.len());
        closed.push(ClosedSegment {
            id: target_id,
            segment: Arc::new(merged),
        });
        closed.extend(leftovers);
        closed.extend(
            current
                .closed
                .iter()
                .filter(|segment| segment.id > last_input_id)
                .cloned(),
        );

        writer.next_segment_id = closed.last().map(|c| c.id + 1).unwrap_or(target_id + 1);
        self.publish(SegmentList {
            closed,
            active: Arc::clone(&current.active),
        });
        drop(writer);

        tracing::info!(
            "Merged {} segments into {}: {} keys, {} → {} bytes",
            stats.input_segments,
            target.display(),
            stats.keys_written,
            stats.bytes_before,
            stats.bytes_after
        );

        match failure {
            Some(reason) => Err(SegKvError::Merge(reason)),
            None => Ok(stats),
        }
    }
}

/// Best-effort removal of an uncommitted merge output
fn discard_scratch(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!("Failed to remove {}: {}", path.display(), e);
        }
    }
}
