//! In-memory backing store
//!
//! Used for ephemeral stores and tests. All data is lost on drop.

use crate::backing::{BackingStore, Blocks};
use crate::keyspace::Keyspace;
use chronicle_core::Result;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// BTreeMap-backed store with a single RwLock
#[derive(Debug, Default)]
pub struct MemoryBackingStore {
    entries: RwLock<BTreeMap<(Keyspace, i32), Blocks>>,
    reads: AtomicU64,
    writes: AtomicU64,
}

impl MemoryBackingStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `get` calls served
    pub fn read_count(&self) -> u64 {
        self.reads.load(Ordering::Relaxed)
    }

    /// Number of successful writes
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }

    /// Number of keys in `space`
    pub fn len(&self, space: Keyspace) -> usize {
        self.entries
            .read()
            .range((space, i32::MIN)..=(space, i32::MAX))
            .count()
    }

    /// Whether the store holds no keys at all
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl BackingStore for MemoryBackingStore {
    fn get(&self, space: Keyspace, key: i32) -> Result<Option<Blocks>> {
        self.reads.fetch_add(1, Ordering::Relaxed);
        Ok(self.entries.read().get(&(space, key)).cloned())
    }

    fn put(&self, space: Keyspace, key: i32, blocks: Blocks) -> Result<()> {
        self.entries.write().insert((space, key), blocks);
        self.writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn compare_and_put(
        &self,
        space: Keyspace,
        key: i32,
        expected: Option<&[Vec<u8>]>,
        blocks: Blocks,
    ) -> Result<bool> {
        let mut entries = self.entries.write();
        let current = entries.get(&(space, key)).map(|b| b.as_slice());
        if current != expected {
            return Ok(false);
        }
        entries.insert((space, key), blocks);
        self.writes.fetch_add(1, Ordering::Relaxed);
        Ok(true)
    }

    fn scan(
        &self,
        space: Keyspace,
        visitor: &mut dyn FnMut(i32, &[Vec<u8>]) -> bool,
    ) -> Result<()> {
        // Copy out first so the visitor may call back into the store
        let entries: Vec<(i32, Blocks)> = self
            .entries
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
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
