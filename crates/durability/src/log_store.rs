//! Log-structured file backing store
//!
//! Every put appends one CRC-checked record to a single log file; an
//! in-memory index holds the latest value per key and is rebuilt by replaying
//! the log on open.
//!
//! # Recovery
//!
//! Replay stops at the first incomplete record (a torn write from a crash)
//! and truncates the file there. A CRC failure on the final record is treated
//! the same way; a CRC failure followed by further records is corruption and
//! fails the open.
//!
//! # Compaction
//!
//! Superseded records accumulate until [`LogBackingStore::compact`] rewrites
//! the live entries to a temporary file and atomically renames it over the log.

use crate::backing::{BackingStore, Blocks};
use crate::encoding::{decode_record, encode_record, LogRecord, RecordError};
use crate::keyspace::Keyspace;
use crate::mode::DurabilityMode;
use chronicle_core::{Error, Result};
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Cumulative log counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogCounters {
    /// Records appended since open
    pub appends: u64,
    /// fsync calls since open
    pub sync_calls: u64,
    /// Bytes appended since open
    pub bytes_written: u64,
    /// Records currently in the file, live or superseded
    pub records_in_file: u64,
}

/// Result of a compaction pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompactInfo {
    /// Records before compaction
    pub records_before: u64,
    /// Records after compaction (one per live key)
    pub records_after: u64,
    /// Bytes reclaimed
    pub reclaimed_bytes: u64,
}

struct LogWriter {
    file: File,
    file_len: u64,
    writes_since_sync: usize,
    last_sync: Instant,
    counters: LogCounters,
}

impl LogWriter {
    fn append(&mut self, bytes: &[u8], durability: DurabilityMode) -> std::io::Result<()> {
        self.append_with(bytes, durability, |file, bytes| file.write_all(bytes))
    }

    /// Append through `write`; on any failure the file is cut back to its
    /// previous length so later records never follow a partial one
    fn append_with<W>(&mut self, bytes: &[u8], durability: DurabilityMode, write: W) -> std::io::Result<()>
    where
        W: FnOnce(&mut File, &[u8]) -> std::io::Result<()>,
    {
        let sync_due = durability.sync_due(self.writes_since_sync + 1, self.last_sync.elapsed());
        let result = write(&mut self.file, bytes).and_then(|()| {
            if sync_due {
                self.sync()
            } else {
                Ok(())
            }
        });
        if let Err(e) = result {
            self.roll_back();
            return Err(e);
        }
        self.file_len += bytes.len() as u64;
        if !sync_due {
            self.writes_since_sync += 1;
        }
        self.counters.appends += 1;
        self.counters.records_in_file += 1;
        self.counters.bytes_written += bytes.len() as u64;
        Ok(())
    }

    fn roll_back(&mut self) {
        if let Err(e) = self.file.set_len(self.file_len) {
            // The next open truncates a torn tail; only a later append can hide it
            warn!(target: "chronicle::log", file_len = self.file_len, error = %e, "Could not roll back failed append");
        }
    }

    fn sync(&mut self) -> std::io::Result<()> {
        self.file.flush()?;
        self.file.sync_data()?;
        self.writes_since_sync = 0;
        self.last_sync = Instant::now();
        self.counters.sync_calls += 1;
        Ok(())
    }
}

/// Append-only log with an in-memory latest-value index
pub struct LogBackingStore {
    path: PathBuf,
    durability: DurabilityMode,
    index: RwLock<BTreeMap<(Keyspace, i32), Blocks>>,
    /// Serializes all writes; held across log append and index update
    writer: Mutex<LogWriter>,
}

impl LogBackingStore {
    /// Open or create the log at `path`, replaying existing records
    pub fn open(path: impl AsRef<Path>, durability: DurabilityMode) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(&path)?;

        let mut buf = Vec::new();
        file.read_to_end(&mut buf)?;

        let (index, valid_len, records) = replay(&buf)?;
        if (valid_len as usize) < buf.len() {
            warn!(
                target: "chronicle::log",
                path = %path.display(),
                valid_len,
                file_len = buf.len(),
                "Truncating torn tail of log"
            );
            file.set_len(valid_len)?;
            file.sync_all()?;
        }

        info!(
            target: "chronicle::log",
            path = %path.display(),
            records,
            keys = index.len(),
            mode = durability.description(),
            "Opened log backing store"
        );

        Ok(Self {
            path,
            durability,
            index: RwLock::new(index),
            writer: Mutex::new(LogWriter {
                file,
                file_len: valid_len,
                writes_since_sync: 0,
                last_sync: Instant::now(),
                counters: LogCounters {
                    records_in_file: records,
                    ..LogCounters::default()
                },
            }),
        })
    }

    /// Log file location
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Snapshot of the cumulative counters
    pub fn counters(&self) -> LogCounters {
        self.writer.lock().counters.clone()
    }

    /// Number of live keys across all keyspaces
    pub fn live_keys(&self) -> usize {
        self.index.read().len()
    }

    /// Rewrite the log with one record per live key
    pub fn compact(&self) -> Result<CompactInfo> {
        let mut writer = self.writer.lock();
        let started = Instant::now();
        let records_before = writer.counters.records_in_file;
        let bytes_before = writer.file_len;

        let tmp_path = self.path.with_extension("compact");
        let mut bytes_after = 0u64;
        let mut records_after = 0u64;
        {
            let mut tmp = File::create(&tmp_path).map_err(io_to_data_access)?;
            let index = self.index.read();
            for ((space, key), blocks) in index.iter() {
                let bytes = encode_record(&LogRecord {
                    space: *space,
                    key: *key,
                    blocks: blocks.clone(),
                });
                tmp.write_all(&bytes).map_err(io_to_data_access)?;
                bytes_after += bytes.len() as u64;
                records_after += 1;
            }
            tmp.sync_all().map_err(io_to_data_access)?;
        }
        std::fs::rename(&tmp_path, &self.path).map_err(io_to_data_access)?;

        writer.file = OpenOptions::new()
            .read(true)
            .append(true)
            .open(&self.path)
            .map_err(io_to_data_access)?;
        writer.file_len = bytes_after;
        writer.writes_since_sync = 0;
        writer.last_sync = Instant::now();
        writer.counters.records_in_file = records_after;

        let info = CompactInfo {
            records_before,
            records_after,
            reclaimed_bytes: bytes_before.saturating_sub(bytes_after),
        };
        info!(
            target: "chronicle::log",
            records_before,
            records_after,
            reclaimed_bytes = info.reclaimed_bytes,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Log compaction complete"
        );
        Ok(info)
    }

    fn append_locked(&self, writer: &mut LogWriter, space: Keyspace, key: i32, blocks: Blocks) -> Result<()> {
        let record = LogRecord { space, key, blocks };
        let bytes = encode_record(&record);
        writer
            .append(&bytes, self.durability)
            .map_err(io_to_data_access)?;
        debug!(target: "chronicle::log", %space, key, bytes = bytes.len(), "Appended record");
        self.index.write().insert((space, key), record.blocks);
        Ok(())
    }
}

impl BackingStore for LogBackingStore {
    fn get(&self, space: Keyspace, key: i32) -> Result<Option<Blocks>> {
        Ok(self.index.read().get(&(space, key)).cloned())
    }

    fn put(&self, space: Keyspace, key: i32, blocks: Blocks) -> Result<()> {
        let mut writer = self.writer.lock();
        self.append_locked(&mut writer, space, key, blocks)
    }

    fn compare_and_put(
        &self,
        space: Keyspace,
        key: i32,
        expected: Option<&[Vec<u8>]>,
        blocks: Blocks,
    ) -> Result<bool> {
        let mut writer = self.writer.lock();
        {
            let index = self.index.read();
            let current = index.get(&(space, key)).map(|b| b.as_slice());
            if current != expected {
                return Ok(false);
            }
        }
        self.append_locked(&mut writer, space, key, blocks)?;
        Ok(true)
    }

    fn scan(
        &self,
        space: Keyspace,
        visitor: &mut dyn FnMut(i32, &[Vec<u8>]) -> bool,
    ) -> Result<()> {
        let entries: Vec<(i32, Blocks)> = self
            .index
            .read()
            .range((space, i32::MIN)..=(space, i32::MAX))
            .map(|((_, key), blocks)| (*key, blocks.clone()))
            .collect();
        for (key, blocks) in entries {
            if !visitor(key, &blocks) {
                break;
            }
        }
        Ok(())
    }

    fn sync(&self) -> Result<()> {
        self.writer.lock().sync().map_err(io_to_data_access)
    }

    fn name(&self) -> &'static str {
        "log"
    }
}

impl Drop for LogBackingStore {
    fn drop(&mut self) {
        if let Err(e) = self.writer.get_mut().sync() {
            warn!(target: "chronicle::log", error = %e, "Final log sync failed");
        }
    }
}

type ReplayResult = (BTreeMap<(Keyspace, i32), Blocks>, u64, u64);

/// Replay a log image; returns the index, the valid prefix length and the record count
fn replay(buf: &[u8]) -> Result<ReplayResult> {
    let mut index = BTreeMap::new();
    let mut offset = 0usize;
    let mut records = 0u64;
    while offset < buf.len() {
        match decode_record(&buf[offset..], offset as u64) {
            Ok((record, used)) => {
                index.insert((record.space, record.key), record.blocks);
                offset += used;
                records += 1;
            }
            Err(RecordError::Incomplete { .. }) => break,
            Err(RecordError::Corrupt { reason, .. }) => {
                let declared = if buf.len() - offset >= 4 {
                    u32::from_le_bytes([
                        buf[offset],
                        buf[offset + 1],
                        buf[offset + 2],
                        buf[offset + 3],
                    ]) as usize
                } else {
                    0
                };
                if offset + 4 + declared >= buf.len() {
                    warn!(target: "chronicle::log", offset, %reason, "Discarding damaged final record");
                    break;
                }
                return Err(Error::Corruption(format!(
                    "log record at offset {}: {}",
                    offset, reason
                )));
            }
        }
    }
    Ok((index, offset as u64, records))
}

fn io_to_data_access(e: std::io::Error) -> Error {
    Error::DataAccess(format!("log store I/O failed: {}", e))
}
