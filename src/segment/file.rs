//! Segment File
//!
//! Append, lookup, and index rebuild for a single segment file.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Mutex, RwLock};

use crate::config::SyncStrategy;
use crate::error::{Result, SegKvError};
use crate::record::{self, Decoded, Record};

use super::SegmentIterator;

/// Result of scanning a segment file from offset 0
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanSummary {
    /// Number of complete records found
    pub records: u64,

    /// Length of the valid prefix (end of the last complete record)
    pub valid_len: u64,

    /// Whether a partial record followed the valid prefix
    pub truncated: bool,
}

/// One append-only segment file with its offset index
///
/// ## Concurrency:
/// - `writer`: only the engine's single writer touches it; `None` once sealed
/// - `reader`: shared positioned-read handle, locked per lookup
/// - `index`: RwLock (many concurrent lookups, one appender)
/// - All methods use `&self` so segments can be shared through `Arc`
pub struct Segment {
    /// Current location on disk (changes when rotation or merge renames it)
    path: RwLock<PathBuf>,

    /// Write handle, present while the segment is active
    writer: Mutex<Option<SegmentWriter>>,

    /// Read handle for point lookups (seek + read)
    reader: Mutex<File>,

    /// key → offset of the latest record for that key
    index: RwLock<HashMap<Vec<u8>, u64>>,

    /// Bytes of complete records in the file
    size: AtomicU64,
}

/// Write side of an active segment
struct SegmentWriter {
    file: File,
    sync_strategy: SyncStrategy,
    unsynced: usize,
}

impl SegmentWriter {
    fn new(file: File, sync_strategy: SyncStrategy) -> Self {
        Self {
            file,
            sync_strategy,
            unsynced: 0,
        }
    }

    /// Write `bytes` at `offset` and apply the sync strategy
    fn write_at(&mut self, offset: u64, bytes: &[u8]) -> io::Result<()> {
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(bytes)?;
        self.unsynced += 1;

        let due = match self.sync_strategy {
            SyncStrategy::EveryWrite => true,
            SyncStrategy::EveryNEntries { count } => self.unsynced >= count,
        };
        if due {
            self.sync()?;
        }
        Ok(())
    }

    fn sync(&mut self) -> io::Result<()> {
        self.file.sync_data()?;
        self.unsynced = 0;
        Ok(())
    }
}

impl Segment {
    /// Create a new, empty active segment (truncates any existing file)
    pub fn create(path: &Path, sync_strategy: SyncStrategy) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(true)
            .open(path)?;
        let reader = File::open(path)?;

        Ok(Self::from_parts(
            path,
            Some(SegmentWriter::new(file, sync_strategy)),
            reader,
        ))
    }

    /// Reopen an existing file as the active segment
    ///
    /// Rebuilds the index and cuts off a truncated tail, so the next append
    /// starts right after the last complete record.
    pub fn open_active(path: &Path, sync_strategy: SyncStrategy) -> Result<(Self, ScanSummary)> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let reader = File::open(path)?;
        let segment = Self::from_parts(
            path,
            Some(SegmentWriter::new(file, sync_strategy)),
            reader,
        );

        let summary = segment.rebuild_index()?;

        if summary.truncated {
            tracing::warn!(
                "Discarding partial record at offset {} in {}",
                summary.valid_len,
                path.display()
            );
            if let Some(writer) = segment.writer.lock().as_mut() {
                writer.file.set_len(summary.valid_len)?;
                writer.sync()?;
            }
        }

        Ok((segment, summary))
    }

    /// Open an existing file as a read-only (sealed) segment
    pub fn open_sealed(path: &Path) -> Result<(Self, ScanSummary)> {
        let reader = File::open(path)?;
        let segment = Self::from_parts(path, None, reader);

        let summary = segment.rebuild_index()?;

        if summary.truncated {
            tracing::warn!(
                "Ignoring partial record at offset {} in sealed {}",
                summary.valid_len,
                path.display()
            );
        }

        Ok((segment, summary))
    }

    fn from_parts(path: &Path, writer: Option<SegmentWriter>, reader: File) -> Self {
        Self {
            path: RwLock::new(path.to_path_buf()),
            writer: Mutex::new(writer),
            reader: Mutex::new(reader),
            index: RwLock::new(HashMap::new()),
            size: AtomicU64::new(0),
        }
    }

    // =========================================================================
    // Write Path
    // =========================================================================

    /// Append a record and return its offset
    ///
    /// The index is updated only after the bytes are written (and synced, if
    /// the strategy asks for it). On failure the file is cut back to its
    /// previous size and no index entry is created.
    pub fn append(&self, key: &[u8], value: &[u8]) -> Result<u64> {
        let bytes = record::encode(key, value)?;

        let mut guard = self.writer.lock();
        let Some(writer) = guard.as_mut() else {
            return Err(SegKvError::SegmentSealed(self.path()));
        };

        let offset = self.size.load(Ordering::Acquire);

        if let Err(e) = writer.write_at(offset, &bytes) {
            if let Err(cut) = writer.file.set_len(offset) {
                tracing::warn!(
                    "Failed to cut partial append in {}: {}",
                    self.path().display(),
                    cut
                );
            }
            return Err(SegKvError::Write(e));
        }

        self.index.write().insert(key.to_vec(), offset);
        self.size.store(offset + bytes.len() as u64, Ordering::Release);

        Ok(offset)
    }

    /// Force unsynced appends to disk
    pub fn sync(&self) -> Result<()> {
        if let Some(writer) = self.writer.lock().as_mut() {
            writer.sync().map_err(SegKvError::Write)?;
        }
        Ok(())
    }

    /// Seal the segment: fsync and drop the write handle
    ///
    /// The write handle is released even if the final sync fails. Sealing an
    /// already sealed segment is a no-op.
    pub fn seal(&self) -> Result<()> {
        let writer = self.writer.lock().take();
        if let Some(writer) = writer {
            writer.file.sync_all().map_err(SegKvError::Write)?;
        }
        Ok(())
    }

    pub fn is_sealed(&self) -> bool {
        self.writer.lock().is_none()
    }

    /// Rename the backing file; open handles stay valid
    pub(crate) fn relocate(&self, to: &Path) -> io::Result<()> {
        let mut path = self.path.write();
        fs::rename(&*path, to)?;
        *path = to.to_path_buf();
        Ok(())
    }

    // =========================================================================
    // Read Path
    // =========================================================================

    /// Look up the latest value for `key` in this segment
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let Some(offset) = self.index.read().get(key).copied() else {
            return Ok(None);
        };

        let record = self.read_at(offset)?;
        if record.key != key {
            return Err(SegKvError::Read(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "index points at a different key at offset {} in {}",
                    offset,
                    self.path().display()
                ),
            )));
        }

        Ok(Some(record.value))
    }

    /// Decode the record stored at `offset`
    pub fn read_at(&self, offset: u64) -> Result<Record> {
        let mut file = self.reader.lock();
        file.seek(SeekFrom::Start(offset))
            .map_err(SegKvError::Read)?;

        let mut reader = BufReader::new(&mut *file);
        match record::read_record(&mut reader) {
            Ok(Decoded::Record { record, .. }) => Ok(record),
            Ok(Decoded::End) | Ok(Decoded::Truncated) => Err(SegKvError::Read(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!(
                    "no complete record at offset {} in {}",
                    offset,
                    self.path().display()
                ),
            ))),
            Err(SegKvError::Io(e)) => Err(SegKvError::Read(e)),
            Err(e) => Err(e),
        }
    }

    /// Rebuild the offset index by scanning the file from offset 0
    ///
    /// For every key the entry with the highest offset wins. The scan stops at
    /// the first partial record and everything before it is kept.
    pub fn rebuild_index(&self) -> Result<ScanSummary> {
        let mut iter = SegmentIterator::open(&self.path())?;
        let mut index: HashMap<Vec<u8>, u64> = HashMap::new();
        let mut records = 0;

        for item in iter.by_ref() {
            let (offset, record) = item?;
            index
                .entry(record.key)
                .and_modify(|latest| *latest = (*latest).max(offset))
                .or_insert(offset);
            records += 1;
        }

        let summary = ScanSummary {
            records,
            valid_len: iter.position(),
            truncated: iter.is_truncated(),
        };

        *self.index.write() = index;
        self.size.store(summary.valid_len, Ordering::Release);

        Ok(summary)
    }

    /// Iterate over every complete record in the file
    pub fn iter(&self) -> Result<SegmentIterator> {
        SegmentIterator::open(&self.path())
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// Bytes of complete records in the file
    pub fn size(&self) -> u64 {
        self.size.load(Ordering::Acquire)
    }

    /// Number of distinct keys in the index
    pub fn key_count(&self) -> usize {
        self.index.read().len()
    }

    pub fn contains_key(&self, key: &[u8]) -> bool {
        self.index.read().contains_key(key)
    }

    /// Offset of the latest record for `key`, if indexed
    pub fn offset_of(&self, key: &[u8]) -> Option<u64> {
        self.index.read().get(key).copied()
    }

    /// Copy of the index as `(key, offset)` pairs
    pub fn index_entries(&self) -> Vec<(Vec<u8>, u64)> {
        self.index
            .read()
            .iter()
            .map(|(key, offset)| (key.clone(), *offset))
            .collect()
    }

    pub fn path(&self) -> PathBuf {
        self.path.read().clone()
    }
}
