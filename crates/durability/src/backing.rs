//! Backing key/value store contract
//!
//! The cache layer needs very little from durable storage:
//!
//! - `get` / `put` of an ordered list of byte blocks under a dense i32 key
//! - `compare_and_put` so merges can retry instead of losing updates
//! - an ascending `scan` per keyspace for bulk loads
//! - `sync` as the durability checkpoint
//!
//! Single-key atomicity is the only transactional guarantee required.
//! Implementations report I/O failures as
//! [`Error::DataAccess`](chronicle_core::Error::DataAccess) and never retry
//! on their own behalf.

use crate::keyspace::Keyspace;
use byteorder::{BigEndian, ByteOrder};
use chronicle_core::{Error, Result};

/// Ordered list of byte blocks stored under one key
pub type Blocks = Vec<Vec<u8>>;

/// Durable key -> block-list storage
pub trait BackingStore: Send + Sync {
    /// Read the blocks under `key`
    fn get(&self, space: Keyspace, key: i32) -> Result<Option<Blocks>>;

    /// Replace the blocks under `key`
    fn put(&self, space: Keyspace, key: i32, blocks: Blocks) -> Result<()>;

    /// Replace the blocks under `key` only if the current value equals `expected`
    ///
    /// `expected == None` means "key absent". Returns whether the write happened.
    fn compare_and_put(
        &self,
        space: Keyspace,
        key: i32,
        expected: Option<&[Vec<u8>]>,
        blocks: Blocks,
    ) -> Result<bool>;

    /// Visit every entry of `space` in ascending key order
    ///
    /// The visitor returns `false` to stop early.
    fn scan(&self, space: Keyspace, visitor: &mut dyn FnMut(i32, &[Vec<u8>]) -> bool)
        -> Result<()>;

    /// Durability checkpoint
    fn sync(&self) -> Result<()>;

    /// Short name for logs
    fn name(&self) -> &'static str;
}

/// Encode an i32 array as one big-endian block
pub fn encode_int_array(values: &[i32]) -> Vec<u8> {
    let mut buf = vec![0u8; values.len() * 4];
    BigEndian::write_i32_into(values, &mut buf);
    buf
}

/// Decode a block written by [`encode_int_array`]
pub fn decode_int_array(buf: &[u8]) -> Result<Vec<i32>> {
    if buf.len() % 4 != 0 {
        return Err(Error::Corruption(format!(
            "int array block of {} bytes is not a multiple of 4",
            buf.len()
        )));
    }
    let mut values = vec![0i32; buf.len() / 4];
    BigEndian::read_i32_into(buf, &mut values);
    Ok(values)
}

/// Read a single-block int array value
pub fn get_int_array(store: &dyn BackingStore, space: Keyspace, key: i32) -> Result<Option<Vec<i32>>> {
    match store.get(space, key)? {
        None => Ok(None),
        Some(blocks) => match blocks.as_slice() {
            [block] => decode_int_array(block).map(Some),
            [] => Ok(Some(Vec::new())),
            _ => Err(Error::Corruption(format!(
                "{} key {} holds {} blocks, expected one int array",
                space,
                key,
                blocks.len()
            ))),
        },
    }
}

/// Write a single-block int array value
pub fn put_int_array(store: &dyn BackingStore, space: Keyspace, key: i32, values: &[i32]) -> Result<()> {
    store.put(space, key, vec![encode_int_array(values)])
}
