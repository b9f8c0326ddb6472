//! STAMP tuples
//!
//! A STAMP is the (status, time, author, module, path) provenance of one
//! version. Many versions share one STAMP, so the interner hands out a small
//! [`StampSequence`](crate::types::StampSequence) per distinct tuple.
//!
//! ## Persisted form
//!
//! ```text
//! [status: u8][time: i64][author: i32][module: i32][path: i32]   (big-endian, 21 bytes)
//! ```

use crate::error::{Error, Result};
use crate::types::{Nid, Status};
use byteorder::{BigEndian, ByteOrder};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Time of a STAMP that has not been committed yet
pub const UNCOMMITTED_TIME: i64 = i64::MAX;

/// Time of a STAMP whose edit was canceled; never visible
pub const CANCELED_TIME: i64 = i64::MIN;

/// Size of the persisted form
pub const STAMP_BYTES: usize = 21;

/// A (status, time, author, module, path) tuple
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Stamp {
    /// Active or inactive
    pub status: Status,
    /// Epoch milliseconds, or one of the sentinels
    pub time: i64,
    /// Author concept nid
    pub author: Nid,
    /// Module concept nid
    pub module: Nid,
    /// Path concept nid
    pub path: Nid,
}

impl Stamp {
    /// Create a STAMP
    pub fn new(status: Status, time: i64, author: Nid, module: Nid, path: Nid) -> Self {
        Self {
            status,
            time,
            author,
            module,
            path,
        }
    }

    /// Create an uncommitted STAMP
    pub fn uncommitted(status: Status, author: Nid, module: Nid, path: Nid) -> Self {
        Self::new(status, UNCOMMITTED_TIME, author, module, path)
    }

    /// Whether the time is the uncommitted sentinel
    pub fn is_uncommitted(&self) -> bool {
        self.time == UNCOMMITTED_TIME
    }

    /// Whether the time is the canceled sentinel
    pub fn is_canceled(&self) -> bool {
        self.time == CANCELED_TIME
    }

    /// Copy with a different time
    pub fn with_time(&self, time: i64) -> Self {
        Self { time, ..*self }
    }

    /// Encode to the 21-byte persisted form
    pub fn to_bytes(&self) -> [u8; STAMP_BYTES] {
        let mut buf = [0u8; STAMP_BYTES];
        buf[0] = self.status.as_byte();
        BigEndian::write_i64(&mut buf[1..9], self.time);
        BigEndian::write_i32(&mut buf[9..13], self.author);
        BigEndian::write_i32(&mut buf[13..17], self.module);
        BigEndian::write_i32(&mut buf[17..21], self.path);
        buf
    }

    /// Decode the 21-byte persisted form
    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        if buf.len() != STAMP_BYTES {
            return Err(Error::Corruption(format!(
                "STAMP record is {} bytes, expected {}",
                buf.len(),
                STAMP_BYTES
            )));
        }
        let status = Status::from_byte(buf[0])
            .ok_or_else(|| Error::Corruption(format!("unknown status byte {}", buf[0])))?;
        Ok(Self {
            status,
            time: BigEndian::read_i64(&buf[1..9]),
            author: BigEndian::read_i32(&buf[9..13]),
            module: BigEndian::read_i32(&buf[13..17]),
            path: BigEndian::read_i32(&buf[17..21]),
        })
    }
}

impl fmt::Display for Stamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{} ", self.status)?;
        match self.time {
            UNCOMMITTED_TIME => write!(f, "uncommitted")?,
            CANCELED_TIME => write!(f, "canceled")?,
            t => match DateTime::<Utc>::from_timestamp_millis(t) {
                Some(dt) => write!(f, "{}", dt.format("%Y-%m-%dT%H:%M:%S%.3fZ"))?,
                None => write!(f, "{}ms", t)?,
            },
        }
        write!(f, " a:{} m:{} p:{}]", self.author, self.module, self.path)
    }
}

/// Current wall-clock time in epoch milliseconds
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}
