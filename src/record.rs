//! Record Codec
//!
//! Encodes and decodes the single key-value entries stored in segment files.
//!
//! ## Record Format
//! ```text
//! ┌──────────────┬──────────┬────────────────┬────────────┐
//! │ KeyLen u32LE │   Key    │ ValueLen u32LE │   Value    │
//! └──────────────┴──────────┴────────────────┴────────────┘
//! ```
//!
//! Records are written back-to-back with no padding, so a segment can be
//! scanned from offset 0 without any external metadata. A scan that runs out of
//! bytes partway through a record reports [`Decoded::Truncated`] instead of
//! failing: that is what a crash in the middle of an append leaves behind.

use std::io::{self, Read};

use bytes::{Buf, BufMut};

use crate::error::{Result, SegKvError};

/// Size of each length prefix (key and value)
pub const LEN_PREFIX_SIZE: usize = 4;

/// A single key-value entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

/// Outcome of decoding one record from a byte stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    /// A complete record and the number of bytes it occupies
    Record { record: Record, len: u64 },

    /// Input ended cleanly on a record boundary
    End,

    /// Input ended inside a record (partial write)
    Truncated,
}

impl Record {
    pub fn new(key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }

    /// Exact number of bytes this record occupies on disk
    pub fn encoded_len(&self) -> u64 {
        encoded_len(&self.key, &self.value)
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        encode(&self.key, &self.value)
    }
}

/// Exact number of bytes `encode(key, value)` produces
pub fn encoded_len(key: &[u8], value: &[u8]) -> u64 {
    (2 * LEN_PREFIX_SIZE + key.len() + value.len()) as u64
}

/// Keys must be non-empty
pub fn validate_key(key: &[u8]) -> Result<()> {
    if key.is_empty() {
        return Err(SegKvError::InvalidRecord("key must not be empty".to_string()));
    }
    Ok(())
}

/// Serialize a record into its on-disk layout
pub fn encode(key: &[u8], value: &[u8]) -> Result<Vec<u8>> {
    validate_key(key)?;

    let key_len = u32::try_from(key.len()).map_err(|_| {
        SegKvError::InvalidRecord(format!("key length {} exceeds u32", key.len()))
    })?;
    let value_len = u32::try_from(value.len()).map_err(|_| {
        SegKvError::InvalidRecord(format!("value length {} exceeds u32", value.len()))
    })?;

    let mut buf = Vec::with_capacity(encoded_len(key, value) as usize);
    buf.put_u32_le(key_len);
    buf.put_slice(key);
    buf.put_u32_le(value_len);
    buf.put_slice(value);

    Ok(buf)
}

/// Decode the record starting at `offset` within `bytes`
pub fn decode(bytes: &[u8], offset: usize) -> Result<Decoded> {
    let Some(mut tail) = bytes.get(offset..) else {
        return Err(SegKvError::InvalidRecord(format!(
            "offset {} is past the end of {} bytes",
            offset,
            bytes.len()
        )));
    };
    read_record(&mut tail)
}

/// Read the next record from a stream positioned on a record boundary
///
/// Returns `Err(InvalidRecord)` only for a structurally impossible header
/// (a zero-length key); running out of input is `Truncated`, never an error.
pub fn read_record<R: Read>(reader: &mut R) -> Result<Decoded> {
    let mut prefix = [0u8; LEN_PREFIX_SIZE];

    match read_full(reader, &mut prefix)? {
        0 => return Ok(Decoded::End),
        n if n < LEN_PREFIX_SIZE => return Ok(Decoded::Truncated),
        _ => {}
    }

    let key_len = (&prefix[..]).get_u32_le();
    if key_len == 0 {
        return Err(SegKvError::InvalidRecord(
            "record header declares a zero-length key".to_string(),
        ));
    }

    let Some(key) = read_len(reader, key_len)? else {
        return Ok(Decoded::Truncated);
    };

    if read_full(reader, &mut prefix)? < LEN_PREFIX_SIZE {
        return Ok(Decoded::Truncated);
    }
    let value_len = (&prefix[..]).get_u32_le();

    let Some(value) = read_len(reader, value_len)? else {
        return Ok(Decoded::Truncated);
    };

    let len = encoded_len(&key, &value);
    Ok(Decoded::Record {
        record: Record { key, value },
        len,
    })
}

/// Fill `buf` as far as the stream allows; returns the number of bytes read
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Read exactly `len` bytes, or `None` if the stream ends first.
/// Grows the buffer as data arrives so a garbage length can't force a huge allocation.
fn read_len<R: Read>(reader: &mut R, len: u32) -> io::Result<Option<Vec<u8>>> {
    let mut buf = Vec::new();
    reader.by_ref().take(u64::from(len)).read_to_end(&mut buf)?;
    Ok((buf.len() == len as usize).then_some(buf))
}
