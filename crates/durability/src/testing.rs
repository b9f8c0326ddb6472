//! Testing utilities for the backing layer
//!
//! [`FaultyBackingStore`] wraps any store and injects `DataAccess` failures
//! so callers can verify that nothing reaches their caches when a write is
//! rejected. It can also slow reads down to widen race windows.

use crate::backing::{BackingStore, Blocks};
use crate::keyspace::Keyspace;
use chronicle_core::{Error, Result};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Backing store wrapper with switchable failure injection
pub struct FaultyBackingStore {
    inner: Arc<dyn BackingStore>,
    offline: AtomicBool,
    failing_writes: AtomicUsize,
    read_delay_ms: AtomicU64,
}

impl FaultyBackingStore {
    /// Wrap `inner`; starts healthy
    pub fn new(inner: Arc<dyn BackingStore>) -> Self {
        Self {
            inner,
            offline: AtomicBool::new(false),
            failing_writes: AtomicUsize::new(0),
            read_delay_ms: AtomicU64::new(0),
        }
    }

    /// Fail every operation while `offline` is set
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Fail the next `count` writes, then recover
    pub fn fail_next_writes(&self, count: usize) {
        self.failing_writes.store(count, Ordering::SeqCst);
    }

    /// Sleep `delay` inside every `get`
    pub fn slow_reads(&self, delay: Duration) {
        self.read_delay_ms.store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    fn check_online(&self, op: &str) -> Result<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(Error::data_access(format!("injected fault: store offline during {}", op)));
        }
        Ok(())
    }

    fn check_write(&self, op: &str) -> Result<()> {
        self.check_online(op)?;
        let consumed = self
            .failing_writes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if consumed {
            return Err(Error::data_access(format!("injected fault: {} rejected", op)));
        }
        Ok(())
    }
}

impl BackingStore for FaultyBackingStore {
    fn get(&self, space: Keyspace, key: i32) -> Result<Option<Blocks>> {
        self.check_online("get")?;
        let delay = self.read_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            thread::sleep(Duration::from_millis(delay));
        }
        self.inner.get(space, key)
    }

    fn put(&self, space: Keyspace, key: i32, blocks: Blocks) -> Result<()> {
        self.check_write("put")?;
        self.inner.put(space, key, blocks)
    }

    fn compare_and_put(
        &self,
        space: Keyspace,
        key: i32,
        expected: Option<&[Vec<u8>]>,
        blocks: Blocks,
    ) -> Result<bool> {
        self.check_write("compare_and_put")?;
        self.inner.compare_and_put(space, key, expected, blocks)
    }

    fn scan(
        &self,
        space: Keyspace,
        visitor: &mut dyn FnMut(i32, &[Vec<u8>]) -> bool,
    ) -> Result<()> {
        self.check_online("scan")?;
        self.inner.scan(space, visitor)
    }

    fn sync(&self) -> Result<()> {
        self.check_online("sync")?;
        self.inner.sync()
    }

    fn name(&self) -> &'static str {
        "faulty"
    }
}
