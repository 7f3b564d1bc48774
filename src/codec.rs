//! Sequence codecs
//!
//! A persisted object is a header followed by one record per element. The
//! codec encodes elements one at a time so the partitioned writer can track
//! the write position after every record.
//!
//! ## Bincode layout
//!
//! ```text
//! ┌──────────────────────────────┐
//! │ magic "PSEQ" | version: u8   │
//! ├──────────────────────────────┤
//! │ length: u32 | crc32: u32     │
//! │ data: bincode(T)             │  × N
//! └──────────────────────────────┘
//! ```

use crate::error::{FlowError, FlowResult};
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::marker::PhantomData;
use std::sync::Arc;

/// Sequence file magic number
pub const SEQUENCE_MAGIC: [u8; 4] = *b"PSEQ";
/// Current sequence format version
pub const SEQUENCE_VERSION: u8 = 1;

const HEADER_SIZE: usize = 5;
const RECORD_PREFIX: usize = 8;

/// Lazily decoded elements of one store object
pub type RecordIter<T> = Box<dyn Iterator<Item = FlowResult<T>> + Send>;

/// Encodes elements into records and decodes a whole object back
pub trait SequenceCodec<T>: Send + Sync + 'static {
    /// Bytes written before the first record
    fn header(&self) -> Vec<u8> {
        Vec::new()
    }

    /// Encode one element as a complete record
    fn encode(&self, item: &T) -> FlowResult<Vec<u8>>;

    /// Lazily decode the records of `data`; `path` is used in error reports
    fn decode(&self, path: &str, data: Bytes) -> FlowResult<RecordIter<T>>;
}

/// Shared codec handle
pub type CodecRef<T> = Arc<dyn SequenceCodec<T>>;

/// Default codec: framed, checksummed bincode records
pub struct BincodeCodec<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> BincodeCodec<T> {
    pub fn new() -> Self {
        BincodeCodec {
            _marker: PhantomData,
        }
    }
}

impl<T> Default for BincodeCodec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> SequenceCodec<T> for BincodeCodec<T>
where
    T: Serialize + DeserializeOwned + Send + 'static,
{
    fn header(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(HEADER_SIZE);
        buf.extend_from_slice(&SEQUENCE_MAGIC);
        buf.push(SEQUENCE_VERSION);
        buf
    }

    fn encode(&self, item: &T) -> FlowResult<Vec<u8>> {
        let payload = bincode::serialize(item)?;
        let len = u32::try_from(payload.len()).map_err(|_| {
            FlowError::Serialization(format!("record of {} bytes exceeds u32", payload.len()))
        })?;
        let mut record = Vec::with_capacity(RECORD_PREFIX + payload.len());
        record.extend_from_slice(&len.to_le_bytes());
        record.extend_from_slice(&crc32fast::hash(&payload).to_le_bytes());
        record.extend_from_slice(&payload);
        Ok(record)
    }

    fn decode(&self, path: &str, data: Bytes) -> FlowResult<RecordIter<T>> {
        let corrupt = |reason: String| FlowError::Corruption {
            path: path.to_string(),
            reason,
        };
        if data.len() < HEADER_SIZE || data[..4] != SEQUENCE_MAGIC {
            return Err(corrupt("invalid sequence magic".to_string()));
        }
        if data[4] != SEQUENCE_VERSION {
            return Err(corrupt(format!("unsupported sequence version {}", data[4])));
        }
        Ok(Box::new(BincodeRecords {
            path: path.to_string(),
            data,
            offset: HEADER_SIZE,
            failed: false,
            _marker: PhantomData,
        }))
    }
}

struct BincodeRecords<T> {
    path: String,
    data: Bytes,
    offset: usize,
    failed: bool,
    _marker: PhantomData<fn() -> T>,
}

impl<T: DeserializeOwned> BincodeRecords<T> {
    fn corrupt(&mut self, reason: String) -> Option<FlowResult<T>> {
        self.failed = true;
        Some(Err(FlowError::Corruption {
            path: self.path.clone(),
            reason,
        }))
    }
}

impl<T: DeserializeOwned> Iterator for BincodeRecords<T> {
    type Item = FlowResult<T>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.offset == self.data.len() {
            return None;
        }
        let rest = &self.data[self.offset..];
        if rest.len() < RECORD_PREFIX {
            let offset = self.offset;
            return self.corrupt(format!("truncated record header at byte {}", offset));
        }
        let len = u32::from_le_bytes([rest[0], rest[1], rest[2], rest[3]]) as usize;
        let expected = u32::from_le_bytes([rest[4], rest[5], rest[6], rest[7]]);
        if rest.len() < RECORD_PREFIX + len {
            let offset = self.offset;
            return self.corrupt(format!("truncated record at byte {}", offset));
        }
        let payload = &rest[RECORD_PREFIX..RECORD_PREFIX + len];
        let actual = crc32fast::hash(payload);
        if actual != expected {
            return self.corrupt(format!(
                "checksum mismatch: expected {}, got {}",
                expected, actual
            ));
        }
        match bincode::deserialize(payload) {
            Ok(item) => {
                self.offset += RECORD_PREFIX + len;
                Some(Ok(item))
            }
            Err(e) => self.corrupt(e.to_string()),
        }
    }
}

/// Newline-delimited UTF-8 text, one element per line
///
/// A trailing `\r` is stripped on decode, so CRLF files read the same as LF.
#[derive(Debug, Clone, Copy, Default)]
pub struct LineCodec;

impl LineCodec {
    /// Split a buffer into lines; a final line without `\n` is still returned
    pub fn split_lines(path: &str, data: &[u8]) -> FlowResult<Vec<String>> {
        let mut lines = Vec::new();
        let mut start = 0;
        for end in memchr::memchr_iter(b'\n', data) {
            lines.push(Self::line(path, &data[start..end])?);
            start = end + 1;
        }
        if start < data.len() {
            lines.push(Self::line(path, &data[start..])?);
        }
        Ok(lines)
    }

    fn line(path: &str, raw: &[u8]) -> FlowResult<String> {
        let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
        String::from_utf8(raw.to_vec()).map_err(|e| FlowError::Corruption {
            path: path.to_string(),
            reason: e.to_string(),
        })
    }
}

impl SequenceCodec<String> for LineCodec {
    fn encode(&self, item: &String) -> FlowResult<Vec<u8>> {
        if item.contains('\n') {
            return Err(FlowError::invalid_argument(
                "line elements must not contain a newline",
            ));
        }
        let mut record = Vec::with_capacity(item.len() + 1);
        record.extend_from_slice(item.as_bytes());
        record.push(b'\n');
        Ok(record)
    }

    fn decode(&self, path: &str, data: Bytes) -> FlowResult<RecordIter<String>> {
        let lines = Self::split_lines(path, &data)?;
        Ok(Box::new(lines.into_iter().map(Ok)))
    }
}
