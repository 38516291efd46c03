//! Segment Iterator
//!
//! Sequential scan over the records of one segment file.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use crate::error::Result;
use crate::record::{self, Decoded, Record};

/// Iterates `(offset, record)` pairs from offset 0 to the last complete record.
///
/// Iteration ends quietly at a truncated tail; check [`is_truncated`] afterwards.
/// A structurally invalid header is yielded once as an error, then iteration ends.
///
/// [`is_truncated`]: SegmentIterator::is_truncated
pub struct SegmentIterator {
    reader: BufReader<File>,
    /// Offset of the next record (end of the last complete one)
    position: u64,
    truncated: bool,
    done: bool,
}

impl SegmentIterator {
    /// Open a fresh read handle on the file and start at offset 0
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        Ok(Self {
            reader: BufReader::new(file),
            position: 0,
            truncated: false,
            done: false,
        })
    }

    /// Byte length of the valid prefix scanned so far
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Whether the scan stopped on a partial record
    pub fn is_truncated(&self) -> bool {
        self.truncated
    }
}

impl Iterator for SegmentIterator {
    type Item = Result<(u64, Record)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        match record::read_record(&mut self.reader) {
            Ok(Decoded::Record { record, len }) => {
                let offset = self.position;
                self.position += len;
                Some(Ok((offset, record)))
            }
            Ok(Decoded::End) => {
                self.done = true;
                None
            }
            Ok(Decoded::Truncated) => {
                self.done = true;
                self.truncated = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}
