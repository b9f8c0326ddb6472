//! Spined segmented maps
//!
//! A `SpinedMap` is a dense-index map built from fixed-size segments hung
//! off a growable spine. Segments are allocated lazily the first time an
//! index inside them is written.
//!
//! # Design
//!
//! - Spine: 32 chunks, chunk `k` holding `2^k` segment cells. Chunks and
//!   segments are published through `OnceCell`, so a read never takes a lock
//!   on the spine.
//! - Growth: the first write into an unallocated segment takes the single
//!   growth mutex. Writes into existing segments never touch it.
//! - Slots: one `RwLock<Option<Arc<V>>>` per index. Two writers contend only
//!   when they target the same index.
//!
//! # Memory accounting
//!
//! # Capacity
//!
//! 32 chunks hold `2^32 - 1` segments, so a map addresses
//! `segment_size * (2^32 - 1)` indices. Writes past [`SpinedMap::capacity`]
//! fail with [`Error::InvalidInput`]; callers key by dense indices.
//!
//! [`SpinedMap::memory_in_use`] sums the slot arrays of allocated segments
//! and the [`Footprint`] of every stored value. The provider compares it with
//! the configured cache budget.

use chronicle_core::{Error, Result, Stamp};
use once_cell::sync::OnceCell;
use parking_lot::{Mutex, RwLock};
use std::mem;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Default slots per segment
pub const DEFAULT_SEGMENT_SIZE: usize = 1024;

const SPINE_CHUNKS: usize = 32;
const MAX_SEGMENTS: usize = u32::MAX as usize;

type Slot<V> = RwLock<Option<Arc<V>>>;

/// Approximate heap usage of a stored value
pub trait Footprint {
    /// Bytes attributed to this value
    fn footprint(&self) -> usize;
}

impl Footprint for Vec<Vec<u8>> {
    fn footprint(&self) -> usize {
        self.iter()
            .map(|b| b.capacity() + mem::size_of::<Vec<u8>>())
            .sum::<usize>()
            + mem::size_of::<Self>()
    }
}

impl Footprint for Vec<i32> {
    fn footprint(&self) -> usize {
        self.capacity() * mem::size_of::<i32>() + mem::size_of::<Self>()
    }
}

impl Footprint for Stamp {
    fn footprint(&self) -> usize {
        mem::size_of::<Self>()
    }
}

struct Segment<V> {
    slots: Box<[Slot<V>]>,
}

impl<V> Segment<V> {
    fn new(size: usize) -> Self {
        Self {
            slots: (0..size).map(|_| RwLock::new(None)).collect(),
        }
    }
}

/// Concurrent map from dense `usize` index to `Arc<V>`
pub struct SpinedMap<V> {
    segment_size: usize,
    chunks: [OnceCell<Box<[OnceCell<Segment<V>>]>>; SPINE_CHUNKS],
    growth: Mutex<()>,
    segment_count: AtomicUsize,
    len: AtomicUsize,
    value_bytes: AtomicUsize,
}

/// Chronology blocks keyed by element sequence
pub type SpinedByteArrayMap = SpinedMap<Vec<Vec<u8>>>;

/// Taxonomy adjacency arrays keyed by element sequence
pub type SpinedIntArrayMap = SpinedMap<Vec<i32>>;

/// Locate segment `s` as (chunk, offset within chunk), `None` past the spine
#[inline]
fn locate_segment(segment: usize) -> Option<(usize, usize)> {
    let n = segment.checked_add(1)?;
    let chunk = (usize::BITS - 1 - n.leading_zeros()) as usize;
    if chunk >= SPINE_CHUNKS {
        return None;
    }
    Some((chunk, n - (1usize << chunk)))
}

impl<V: Footprint> SpinedMap<V> {
    /// Create an empty map with [`DEFAULT_SEGMENT_SIZE`] slots per segment
    pub fn new() -> Self {
        Self::with_segment_size(DEFAULT_SEGMENT_SIZE)
    }

    /// Create an empty map with `segment_size` slots per segment (minimum 1)
    pub fn with_segment_size(segment_size: usize) -> Self {
        Self {
            segment_size: segment_size.max(1),
            chunks: [(); SPINE_CHUNKS].map(|_| OnceCell::new()),
            growth: Mutex::new(()),
            segment_count: AtomicUsize::new(0),
            len: AtomicUsize::new(0),
            value_bytes: AtomicUsize::new(0),
        }
    }

    /// Slots per segment
    pub fn segment_size(&self) -> usize {
        self.segment_size
    }

    /// Number of addressable indices
    pub fn capacity(&self) -> usize {
        self.segment_size.saturating_mul(MAX_SEGMENTS)
    }

    /// Number of allocated segments
    pub fn segment_count(&self) -> usize {
        self.segment_count.load(Ordering::Acquire)
    }

    /// Number of occupied slots
    pub fn len(&self) -> usize {
        self.len.load(Ordering::Acquire)
    }

    /// Whether no slot is occupied
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Estimated bytes held by segments and values
    pub fn memory_in_use(&self) -> usize {
        self.segment_count() * self.segment_size * mem::size_of::<Slot<V>>()
            + self.value_bytes.load(Ordering::Relaxed)
    }

    fn existing_slot(&self, index: usize) -> Option<&Slot<V>> {
        let (chunk, offset) = locate_segment(index / self.segment_size)?;
        let segment = self.chunks.get(chunk)?.get()?.get(offset)?.get()?;
        segment.slots.get(index % self.segment_size)
    }

    fn slot(&self, index: usize) -> Result<&Slot<V>> {
        let (chunk, offset) = locate_segment(index / self.segment_size).ok_or_else(|| {
            Error::invalid_input(format!(
                "spine index {} is beyond capacity {}",
                index,
                self.capacity()
            ))
        })?;
        let cells = self.chunks[chunk].get_or_init(|| {
            (0..(1usize << chunk)).map(|_| OnceCell::new()).collect()
        });
        let cell = &cells[offset];
        let segment = match cell.get() {
            Some(segment) => segment,
            None => {
                let _growing = self.growth.lock();
                cell.get_or_init(|| {
                    self.segment_count.fetch_add(1, Ordering::AcqRel);
                    Segment::new(self.segment_size)
                })
            }
        };
        Ok(&segment.slots[index % self.segment_size])
    }

    fn account(&self, old: Option<&Arc<V>>, new: Option<&Arc<V>>) {
        match (old, new) {
            (None, Some(_)) => {
                self.len.fetch_add(1, Ordering::AcqRel);
            }
            (Some(_), None) => {
                self.len.fetch_sub(1, Ordering::AcqRel);
            }
            _ => {}
        }
        if let Some(v) = new {
            self.value_bytes.fetch_add(v.footprint(), Ordering::Relaxed);
        }
        if let Some(v) = old {
            self.value_bytes.fetch_sub(v.footprint(), Ordering::Relaxed);
        }
    }

    /// Value at `index`
    pub fn get(&self, index: usize) -> Option<Arc<V>> {
        self.existing_slot(index)?.read().clone()
    }

    /// Whether `index` holds a value
    pub fn contains(&self, index: usize) -> bool {
        self.existing_slot(index)
            .map(|slot| slot.read().is_some())
            .unwrap_or(false)
    }

    /// Store `value` at `index`, returning the previous value
    pub fn put(&self, index: usize, value: V) -> Result<Option<Arc<V>>> {
        let value = Arc::new(value);
        let mut slot = self.slot(index)?.write();
        self.account(slot.as_ref(), Some(&value));
        Ok(slot.replace(value))
    }

    /// Store `value` only if `index` is empty; returns whatever the slot holds afterwards
    pub fn put_if_absent(&self, index: usize, value: V) -> Result<Arc<V>> {
        let mut slot = self.slot(index)?.write();
        if let Some(existing) = slot.as_ref() {
            return Ok(Arc::clone(existing));
        }
        let value = Arc::new(value);
        self.account(None, Some(&value));
        *slot = Some(Arc::clone(&value));
        Ok(value)
    }

    /// Replace the value only if the slot still holds `expected` (pointer identity)
    pub fn compare_and_set(&self, index: usize, expected: Option<&Arc<V>>, value: V) -> Result<bool> {
        let mut slot = self.slot(index)?.write();
        let matches = match (slot.as_ref(), expected) {
            (None, None) => true,
            (Some(current), Some(expected)) => Arc::ptr_eq(current, expected),
            _ => false,
        };
        if !matches {
            return Ok(false);
        }
        let value = Arc::new(value);
        self.account(slot.as_ref(), Some(&value));
        *slot = Some(value);
        Ok(true)
    }

    /// Recompute the value at `index` while holding its slot lock
    ///
    /// `f` sees the current value; returning `None` clears the slot.
    /// Returns the value left in the slot.
    pub fn compute<F>(&self, index: usize, f: F) -> Result<Option<Arc<V>>>
    where
        F: FnOnce(Option<&V>) -> Option<V>,
    {
        let mut slot = self.slot(index)?.write();
        let next = f(slot.as_deref()).map(Arc::new);
        self.account(slot.as_ref(), next.as_ref());
        *slot = next.clone();
        Ok(next)
    }

    /// Remove the value at `index`
    pub fn remove(&self, index: usize) -> Option<Arc<V>> {
        let slot = self.existing_slot(index)?;
        let mut slot = slot.write();
        let previous = slot.take();
        self.account(previous.as_ref(), None);
        previous
    }

    /// Merge `value` into the slot with `merge(existing, value)` and return the result
    ///
    /// An empty slot simply receives `value`.
    pub fn accumulate_and_get<F>(&self, index: usize, value: V, merge: F) -> Result<Arc<V>>
    where
        F: FnOnce(&V, V) -> V,
    {
        let mut slot = self.slot(index)?.write();
        let merged = Arc::new(match slot.as_deref() {
            Some(existing) => merge(existing, value),
            None => value,
        });
        self.account(slot.as_ref(), Some(&merged));
        *slot = Some(Arc::clone(&merged));
        Ok(merged)
    }

    /// Visit every occupied slot in ascending index order
    pub fn for_each<F>(&self, mut f: F)
    where
        F: FnMut(usize, &Arc<V>),
    {
        let mut segment_index = 0usize;
        for (k, chunk) in self.chunks.iter().enumerate() {
            let Some(cells) = chunk.get() else {
                segment_index += 1usize << k;
                continue;
            };
            for cell in cells.iter() {
                if let Some(segment) = cell.get() {
                    let base = segment_index * self.segment_size;
                    for (i, slot) in segment.slots.iter().enumerate() {
                        let value = slot.read().clone();
                        if let Some(value) = value {
                            f(base + i, &value);
                        }
                    }
                }
                segment_index += 1;
            }
        }
    }

    /// Drop every value; allocated segments stay allocated
    pub fn clear(&self) {
        self.for_each(|index, _| {
            self.remove(index);
        });
    }
}

impl<V: Footprint> Default for SpinedMap<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> std::fmt::Debug for SpinedMap<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpinedMap")
            .field("segment_size", &self.segment_size)
            .field("segment_count", &self.segment_count.load(Ordering::Relaxed))
            .field("len", &self.len.load(Ordering::Relaxed))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_locate_segment_layout() {
        assert_eq!(locate_segment(0), Some((0, 0)));
        assert_eq!(locate_segment(1), Some((1, 0)));
        assert_eq!(locate_segment(2), Some((1, 1)));
        assert_eq!(locate_segment(3), Some((2, 0)));
        assert_eq!(locate_segment(6), Some((2, 3)));
        assert_eq!(locate_segment(7), Some((3, 0)));
        assert_eq!(locate_segment(u32::MAX as usize - 1), Some((31, (1 << 31) - 1)));
        assert_eq!(locate_segment(u32::MAX as usize), None);
        assert_eq!(locate_segment(usize::MAX), None);
    }

    #[test]
    fn test_write_past_capacity_is_rejected() {
        let map: SpinedIntArrayMap = SpinedMap::with_segment_size(1);
        assert_eq!(map.capacity(), u32::MAX as usize);
        let beyond = map.capacity();
        assert!(matches!(map.put(beyond, vec![1]), Err(Error::InvalidInput(_))));
        assert!(map.put_if_absent(beyond, vec![1]).is_err());
        assert!(map.compute(beyond, |_| Some(vec![1])).is_err());
        assert!(map
            .accumulate_and_get(beyond, vec![1], |old, _| old.clone())
            .is_err());
        assert!(map.get(beyond).is_none());
        assert!(map.remove(beyond).is_none());
        assert!(map.is_empty());
        assert_eq!(map.segment_count(), 0);
    }

    #[test]
    fn test_get_absent_does_not_allocate() {
        let map: SpinedIntArrayMap = SpinedMap::with_segment_size(4);
        assert!(map.get(1_000_000).is_none());
        assert_eq!(map.segment_count(), 0);
        assert_eq!(map.memory_in_use(), 0);
    }

    #[test]
    fn test_put_returns_previous() {
        let map: SpinedIntArrayMap = SpinedMap::with_segment_size(4);
        assert!(map.put(9, vec![1]).unwrap().is_none());
        assert_eq!(*map.put(9, vec![2]).unwrap().unwrap(), vec![1]);
        assert_eq!(*map.get(9).unwrap(), vec![2]);
        assert_eq!(map.len(), 1);
        assert_eq!(map.segment_count(), 1);
    }

    #[test]
    fn test_put_if_absent_keeps_first() {
        let map: SpinedIntArrayMap = SpinedMap::new();
        assert_eq!(*map.put_if_absent(3, vec![1]).unwrap(), vec![1]);
        assert_eq!(*map.put_if_absent(3, vec![2]).unwrap(), vec![1]);
    }

    #[test]
    fn test_compare_and_set_uses_identity() {
        let map: SpinedIntArrayMap = SpinedMap::new();
        assert!(map.compare_and_set(0, None, vec![1]).unwrap());
        let current = map.get(0).unwrap();
        let stale = Arc::new(vec![1]);
        assert!(!map.compare_and_set(0, Some(&stale), vec![2]).unwrap());
        assert!(map.compare_and_set(0, Some(&current), vec![3]).unwrap());
        assert_eq!(*map.get(0).unwrap(), vec![3]);
    }

    #[test]
    fn test_compute_and_remove() {
        let map: SpinedIntArrayMap = SpinedMap::new();
        map.compute(5, |cur| {
            assert!(cur.is_none());
            Some(vec![1])
        })
        .unwrap();
        map.compute(5, |cur| cur.map(|v| v.iter().map(|x| x + 1).collect()))
            .unwrap();
        assert_eq!(*map.get(5).unwrap(), vec![2]);
        assert!(map.compute(5, |_| None).unwrap().is_none());
        assert!(map.is_empty());
        assert!(map.remove(5).is_none());
    }

    #[test]
    fn test_for_each_ascending_across_segments() {
        let map: SpinedIntArrayMap = SpinedMap::with_segment_size(3);
        for index in [40, 2, 7, 0, 15] {
            map.put(index, vec![index as i32]).unwrap();
        }
        let mut seen = Vec::new();
        map.for_each(|index, value| {
            assert_eq!(value[0], index as i32);
            seen.push(index);
        });
        assert_eq!(seen, vec![0, 2, 7, 15, 40]);
    }

    #[test]
    fn test_memory_tracks_values() {
        let map: SpinedByteArrayMap = SpinedMap::with_segment_size(8);
        map.put(0, vec![vec![0u8; 100]]).unwrap();
        let with_value = map.memory_in_use();
        map.remove(0);
        assert!(map.memory_in_use() + 100 <= with_value);
        map.put(1, vec![vec![0u8; 10]]).unwrap();
        map.clear();
        assert!(map.is_empty());
    }

    #[test]
    fn test_concurrent_accumulate_loses_nothing() {
        let map: Arc<SpinedIntArrayMap> = Arc::new(SpinedMap::with_segment_size(2));
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let map = Arc::clone(&map);
                thread::spawn(move || {
                    for i in 0..100 {
                        map.accumulate_and_get(i % 10, vec![t * 1000 + i as i32], |old, new| {
                            let mut merged = old.clone();
                            merged.extend(new);
                            merged
                        })
                        .unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        let mut total = 0;
        map.for_each(|_, v| total += v.len());
        assert_eq!(total, 800);
        assert_eq!(map.segment_count(), 5);
    }

    #[test]
    fn test_concurrent_put_if_absent_single_winner() {
        let map: Arc<SpinedIntArrayMap> = Arc::new(SpinedMap::new());
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let map = Arc::clone(&map);
                thread::spawn(move || map.put_if_absent(77_777, vec![t]).unwrap())
            })
            .collect();
        let winners: Vec<Arc<Vec<i32>>> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        for winner in &winners {
            assert!(Arc::ptr_eq(winner, &winners[0]));
        }
        assert_eq!(map.len(), 1);
    }

    proptest::proptest! {
        #[test]
        fn test_matches_hash_map_model(
            ops in proptest::collection::vec((0usize..200, proptest::option::of(-50i32..50)), 1..200),
        ) {
            let map: SpinedIntArrayMap = SpinedMap::with_segment_size(4);
            let mut model = std::collections::HashMap::new();
            for (index, op) in ops {
                match op {
                    Some(value) => {
                        map.put(index, vec![value]).unwrap();
                        model.insert(index, vec![value]);
                    }
                    None => {
                        map.remove(index);
                        model.remove(&index);
                    }
                }
            }
            proptest::prop_assert_eq!(map.len(), model.len());
            for (index, value) in &model {
                let got = map.get(*index);
                proptest::prop_assert_eq!(got.as_deref(), Some(value));
            }
        }
    }
}
