//! STAMP interner
//!
//! Canonicalizes (status, time, author, module, path) tuples into dense
//! [`StampSequence`] handles.
//!
//! # Lookup maps
//!
//! - committed: full tuple -> handle
//! - uncommitted: (status, author, module, path) -> handle, for tuples whose
//!   time is [`UNCOMMITTED_TIME`]
//!
//! The tuple for each handle lives in a [`SpinedMap`] indexed by the handle.
//!
//! # Commit and cancel
//!
//! Both transition a handle inside that handle's slot lock (see
//! [`SpinedMap::compute`]). Whichever call takes the slot first moves the
//! handle out of the uncommitted state; the other sees a committed or
//! canceled tuple and leaves it alone. There is no interner-wide lock, so
//! tuples interned during a commit are simply picked up by the next one.
//!
//! Handles are allocated monotonically from [`FIRST_STAMP_SEQUENCE`] and
//! never reused; a canceled handle keeps its slot with [`CANCELED_TIME`].

use crate::spine::SpinedMap;
use chronicle_core::{
    Error, IntSet, Nid, Result, Stamp, StampSequence, Status, CANCELED_TIME, FIRST_STAMP_SEQUENCE,
    UNCOMMITTED_TIME,
};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicI32, Ordering};
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct UncommittedKey {
    status: Status,
    author: Nid,
    module: Nid,
    path: Nid,
}

impl From<&Stamp> for UncommittedKey {
    fn from(stamp: &Stamp) -> Self {
        Self {
            status: stamp.status,
            author: stamp.author,
            module: stamp.module,
            path: stamp.path,
        }
    }
}

/// Concurrent STAMP interner
pub struct StampInterner {
    stamps: SpinedMap<Stamp>,
    committed: DashMap<Stamp, StampSequence>,
    uncommitted: DashMap<UncommittedKey, StampSequence>,
    next_sequence: AtomicI32,
}

impl StampInterner {
    /// Create an empty interner
    pub fn new() -> Self {
        Self::with_segment_size(crate::spine::DEFAULT_SEGMENT_SIZE)
    }

    /// Create an empty interner whose handle spine uses `segment_size` slots per segment
    pub fn with_segment_size(segment_size: usize) -> Self {
        Self {
            stamps: SpinedMap::with_segment_size(segment_size),
            committed: DashMap::new(),
            uncommitted: DashMap::new(),
            next_sequence: AtomicI32::new(FIRST_STAMP_SEQUENCE),
        }
    }

    fn allocate(&self) -> Result<StampSequence> {
        let sequence = self.next_sequence.fetch_add(1, Ordering::AcqRel);
        if sequence < FIRST_STAMP_SEQUENCE {
            return Err(Error::consistency("STAMP sequence space exhausted"));
        }
        Ok(sequence)
    }

    /// Handle for the tuple, allocating one if it is new
    pub fn stamp_sequence(
        &self,
        status: Status,
        time: i64,
        author: Nid,
        module: Nid,
        path: Nid,
    ) -> Result<StampSequence> {
        self.intern(Stamp::new(status, time, author, module, path))
            .map(|(sequence, _)| sequence)
    }

    /// Handle for `stamp`, and whether this call allocated it
    pub fn intern(&self, stamp: Stamp) -> Result<(StampSequence, bool)> {
        if stamp.is_canceled() {
            return Err(Error::invalid_input(
                "cannot intern a STAMP with the canceled time",
            ));
        }
        if stamp.is_uncommitted() {
            match self.uncommitted.entry(UncommittedKey::from(&stamp)) {
                Entry::Occupied(e) => Ok((*e.get(), false)),
                Entry::Vacant(e) => {
                    let sequence = self.allocate()?;
                    self.stamps.put(sequence as usize, stamp)?;
                    e.insert(sequence);
                    debug!(target: "chronicle::stamp", sequence, %stamp, "Interned uncommitted STAMP");
                    Ok((sequence, true))
                }
            }
        } else {
            match self.committed.entry(stamp) {
                Entry::Occupied(e) => Ok((*e.get(), false)),
                Entry::Vacant(e) => {
                    let sequence = self.allocate()?;
                    self.stamps.put(sequence as usize, stamp)?;
                    e.insert(sequence);
                    Ok((sequence, true))
                }
            }
        }
    }

    /// Tuple for `sequence`
    pub fn stamp(&self, sequence: StampSequence) -> Option<Stamp> {
        if sequence < FIRST_STAMP_SEQUENCE {
            return None;
        }
        self.stamps.get(sequence as usize).map(|s| *s)
    }

    /// Commit every uncommitted handle at `time`
    ///
    /// Returns the handles this call committed.
    pub fn commit(&self, time: i64) -> Result<IntSet> {
        if time == UNCOMMITTED_TIME || time == CANCELED_TIME {
            return Err(Error::invalid_input(format!(
                "commit time {} is a reserved sentinel",
                time
            )));
        }
        let pending: Vec<StampSequence> = self.uncommitted.iter().map(|e| *e.value()).collect();
        let mut committed = IntSet::new();
        for sequence in pending {
            if self.transition(sequence, time) {
                committed.add(sequence);
            }
        }
        info!(target: "chronicle::stamp", time, committed = committed.len(), "Committed STAMPs");
        Ok(committed)
    }

    /// Cancel the listed handles that are still uncommitted
    ///
    /// Returns the handles this call canceled.
    pub fn cancel(&self, sequences: &IntSet) -> IntSet {
        let mut canceled = IntSet::new();
        for sequence in sequences.iter() {
            if sequence >= FIRST_STAMP_SEQUENCE && self.transition(sequence, CANCELED_TIME) {
                canceled.add(sequence);
            }
        }
        info!(target: "chronicle::stamp", requested = sequences.len(), canceled = canceled.len(), "Canceled STAMPs");
        canceled
    }

    /// Move one uncommitted handle to `time` under its slot lock
    fn transition(&self, sequence: StampSequence, time: i64) -> bool {
        let mut moved = false;
        let computed = self.stamps.compute(sequence as usize, |current| {
            let stamp = *current?;
            if !stamp.is_uncommitted() {
                return Some(stamp);
            }
            self.uncommitted
                .remove_if(&UncommittedKey::from(&stamp), |_, v| *v == sequence);
            let next = stamp.with_time(time);
            if time != CANCELED_TIME {
                self.committed.entry(next).or_insert(sequence);
            }
            moved = true;
            Some(next)
        });
        // Handles are positive i32s, always within the spine
        computed.is_ok() && moved
    }

    /// Reinstate a persisted handle
    pub fn restore(&self, sequence: StampSequence, stamp: Stamp) -> Result<()> {
        if sequence < FIRST_STAMP_SEQUENCE {
            return Err(Error::Corruption(format!(
                "persisted STAMP handle {} is below the first sequence",
                sequence
            )));
        }
        if let Some(existing) = self.stamps.get(sequence as usize) {
            if *existing != stamp {
                return Err(Error::consistency(format!(
                    "STAMP handle {} already bound to {}, cannot restore {}",
                    sequence, existing, stamp
                )));
            }
            return Ok(());
        }
        self.stamps.put(sequence as usize, stamp)?;
        if stamp.is_uncommitted() {
            self.uncommitted.insert(UncommittedKey::from(&stamp), sequence);
        } else if !stamp.is_canceled() {
            self.committed.entry(stamp).or_insert(sequence);
        }
        self.next_sequence.fetch_max(sequence + 1, Ordering::AcqRel);
        Ok(())
    }

    /// Every handle whose tuple is committed, in ascending handle order
    pub fn committed_stamps(&self) -> Vec<(StampSequence, Stamp)> {
        let mut out = Vec::new();
        self.stamps.for_each(|index, stamp| {
            if !stamp.is_uncommitted() && !stamp.is_canceled() {
                out.push((index as StampSequence, **stamp));
            }
        });
        out
    }

    /// Every handle still uncommitted
    pub fn uncommitted_sequences(&self) -> IntSet {
        self.uncommitted.iter().map(|e| *e.value()).collect()
    }

    /// Entries in the uncommitted lookup map
    pub fn uncommitted_len(&self) -> usize {
        self.uncommitted.len()
    }

    /// Entries in the committed lookup map
    pub fn committed_len(&self) -> usize {
        self.committed.len()
    }

    /// Highest handle allocated so far (0 when none)
    pub fn max_sequence(&self) -> StampSequence {
        self.next_sequence.load(Ordering::Acquire) - 1
    }

    /// Estimated bytes used by the handle spine
    pub fn memory_in_use(&self) -> usize {
        self.stamps.memory_in_use()
    }
}

impl Default for StampInterner {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for StampInterner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StampInterner")
            .field("max_sequence", &self.max_sequence())
            .field("committed", &self.committed.len())
            .field("uncommitted", &self.uncommitted.len())
            .finish()
    }
}
