//! Durability layer for Chronicle
//!
//! This crate handles everything that touches disk:
//!
//! - BackingStore: the key -> block-list contract the caches write through to
//! - Keyspaces: chronology, taxonomy, identifier, assemblage and stamp tables
//! - LogBackingStore: CRC-framed append-only log with replay and compaction
//! - MemoryBackingStore: ephemeral store for Cache durability and tests
//! - Durability modes: Always, Standard (default), Cache
//! - Fault injection for failure-semantics tests

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod backing; // Store contract and int-array block helpers
pub mod encoding; // Log record framing
pub mod keyspace; // Logical tables
pub mod log_store; // File-backed store
pub mod memory; // In-memory store
pub mod mode; // Durability modes
pub mod testing; // Fault injection

pub use backing::{
    decode_int_array, encode_int_array, get_int_array, put_int_array, BackingStore, Blocks,
};
pub use encoding::{decode_record, encode_record, LogRecord, RecordError};
pub use keyspace::Keyspace;
pub use log_store::{CompactInfo, LogBackingStore, LogCounters};
pub use memory::MemoryBackingStore;
pub use mode::DurabilityMode;
pub use testing::FaultyBackingStore;
