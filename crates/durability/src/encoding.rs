//! Log record encoding and decoding
//!
//! This module provides encoding/decoding for log records with CRC32 checksums
//! for corruption detection.
//!
//! ## Record Format
//!
//! ```text
//! [length: u32][type: u8][space: u8][param: i32][key: i32]
//!     ([block_len + 1: u32][block bytes])*
//!     [0: u32]
//! [crc32: u32]
//! ```
//!
//! - **length**: size of everything after the length field, CRC included
//! - **type**: record type tag (1 = Put)
//! - **space / param**: the [`Keyspace`]
//! - **blocks**: each length is stored off by one so that a zero-valued
//!   terminator marks "no further blocks"
//! - **crc32**: CRC32 over everything between the length and the CRC
//!
//! All integers are little-endian.

use crate::backing::Blocks;
use crate::keyspace::Keyspace;
use byteorder::{ByteOrder, LittleEndian};
use chronicle_core::Error;
use crc32fast::Hasher;
use thiserror::Error;

/// Put record: replace the blocks under a key
pub const TYPE_PUT: u8 = 1;

/// Fixed bytes in a record besides the blocks: type, space, param, key, terminator, crc
const FIXED_BODY: usize = 1 + 1 + 4 + 4 + 4 + 4;

/// One decoded log record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    /// Target keyspace
    pub space: Keyspace,
    /// Target key
    pub key: i32,
    /// New value
    pub blocks: Blocks,
}

/// Decode failure
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RecordError {
    /// Buffer ends before the record does (torn write at the tail)
    #[error("incomplete record at offset {offset}: have {have} bytes, need {needed}")]
    Incomplete {
        /// Record start offset
        offset: u64,
        /// Bytes available
        have: usize,
        /// Bytes required
        needed: usize,
    },
    /// Record is complete but malformed
    #[error("corrupt record at offset {offset}: {reason}")]
    Corrupt {
        /// Record start offset
        offset: u64,
        /// What failed
        reason: String,
    },
}

impl From<RecordError> for Error {
    fn from(e: RecordError) -> Self {
        Error::Corruption(e.to_string())
    }
}

/// Encode a record to bytes ready for appending
pub fn encode_record(record: &LogRecord) -> Vec<u8> {
    let blocks_len: usize = record.blocks.iter().map(|b| 4 + b.len()).sum();
    let total_len = FIXED_BODY + blocks_len;

    let mut buf = vec![0u8; 4 + total_len];
    LittleEndian::write_u32(&mut buf[0..4], total_len as u32);
    buf[4] = TYPE_PUT;
    buf[5] = record.space.tag();
    LittleEndian::write_i32(&mut buf[6..10], record.space.param());
    LittleEndian::write_i32(&mut buf[10..14], record.key);

    let mut pos = 14;
    for block in &record.blocks {
        LittleEndian::write_u32(&mut buf[pos..pos + 4], block.len() as u32 + 1);
        pos += 4;
        buf[pos..pos + block.len()].copy_from_slice(block);
        pos += block.len();
    }
    // Terminator is already zero
    pos += 4;

    let mut hasher = Hasher::new();
    hasher.update(&buf[4..pos]);
    LittleEndian::write_u32(&mut buf[pos..pos + 4], hasher.finalize());
    buf
}

/// Decode a record with CRC validation
///
/// Returns the record and the number of bytes consumed.
pub fn decode_record(buf: &[u8], offset: u64) -> Result<(LogRecord, usize), RecordError> {
    if buf.len() < 4 {
        return Err(RecordError::Incomplete {
            offset,
            have: buf.len(),
            needed: 4,
        });
    }
    let total_len = LittleEndian::read_u32(&buf[0..4]) as usize;

    // Validate minimum length before arithmetic (prevent underflow)
    if total_len < FIXED_BODY {
        return Err(RecordError::Corrupt {
            offset,
            reason: format!("length {} below minimum {}", total_len, FIXED_BODY),
        });
    }
    if buf.len() < 4 + total_len {
        return Err(RecordError::Incomplete {
            offset,
            have: buf.len(),
            needed: 4 + total_len,
        });
    }

    let body = &buf[4..4 + total_len - 4];
    let expected_crc = LittleEndian::read_u32(&buf[4 + total_len - 4..4 + total_len]);
    let mut hasher = Hasher::new();
    hasher.update(body);
    let actual_crc = hasher.finalize();
    if actual_crc != expected_crc {
        return Err(RecordError::Corrupt {
            offset,
            reason: format!(
                "CRC mismatch: expected {:08x}, got {:08x}",
                expected_crc, actual_crc
            ),
        });
    }

    if body[0] != TYPE_PUT {
        return Err(RecordError::Corrupt {
            offset,
            reason: format!("unknown record type {}", body[0]),
        });
    }
    let param = LittleEndian::read_i32(&body[2..6]);
    let space = Keyspace::from_parts(body[1], param).ok_or_else(|| RecordError::Corrupt {
        offset,
        reason: format!("unknown keyspace tag {}", body[1]),
    })?;
    let key = LittleEndian::read_i32(&body[6..10]);

    let mut blocks = Vec::new();
    let mut pos = 10;
    loop {
        if pos + 4 > body.len() {
            return Err(RecordError::Corrupt {
                offset,
                reason: "missing block terminator".to_string(),
            });
        }
        let marker = LittleEndian::read_u32(&body[pos..pos + 4]) as usize;
        pos += 4;
        if marker == 0 {
            break;
        }
        let len = marker - 1;
        if pos + len > body.len() {
            return Err(RecordError::Corrupt {
                offset,
                reason: format!("block of {} bytes overruns record", len),
            });
        }
        blocks.push(body[pos..pos + len].to_vec());
        pos += len;
    }
    if pos != body.len() {
        return Err(RecordError::Corrupt {
            offset,
            reason: format!("{} trailing bytes after terminator", body.len() - pos),
        });
    }

    Ok((LogRecord { space, key, blocks }, 4 + total_len))
}
