//! Mutable STAMP coordinate
//!
//! Resolution always works on immutable [`StampFilter`] snapshots. This
//! holder is for callers that need a "current" filter that changes over
//! time and want to hear about it.

use chronicle_core::{Nid, StampFilter, StatusSet};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

type Subscriber = Arc<dyn Fn(&StampFilter, u64) + Send + Sync>;

/// Current filter plus revision counter and change subscribers
pub struct MutableStampCoordinate {
    filter: RwLock<StampFilter>,
    revision: AtomicU64,
    next_subscriber: AtomicU64,
    subscribers: Mutex<Vec<(u64, Subscriber)>>,
}

impl MutableStampCoordinate {
    /// Start from `filter` at revision 0
    pub fn new(filter: StampFilter) -> Self {
        Self {
            filter: RwLock::new(filter),
            revision: AtomicU64::new(0),
            next_subscriber: AtomicU64::new(1),
            subscribers: Mutex::new(Vec::new()),
        }
    }

    /// Copy of the current filter
    pub fn snapshot(&self) -> StampFilter {
        self.filter.read().clone()
    }

    /// Number of changes applied so far
    pub fn revision(&self) -> u64 {
        self.revision.load(Ordering::Acquire)
    }

    /// Replace the filter; returns the new revision
    pub fn set(&self, filter: StampFilter) -> u64 {
        self.update(|_| filter)
    }

    /// Derive the next filter from the current one; returns the new revision
    ///
    /// Subscribers run with no lock held, so they may call back into the
    /// coordinate. Each sees the filter and revision this call produced.
    pub fn update(&self, f: impl FnOnce(&StampFilter) -> StampFilter) -> u64 {
        let (next, revision) = {
            let mut filter = self.filter.write();
            let next = f(&filter);
            *filter = next.clone();
            (next, self.revision.fetch_add(1, Ordering::AcqRel) + 1)
        };
        let subscribers: Vec<Subscriber> = self
            .subscribers
            .lock()
            .iter()
            .map(|(_, subscriber)| Arc::clone(subscriber))
            .collect();
        for subscriber in subscribers {
            subscriber(&next, revision);
        }
        revision
    }

    /// Move the position time
    pub fn set_time(&self, time: i64) -> u64 {
        self.update(|f| f.with_time(time))
    }

    /// Move the position path
    pub fn set_path(&self, path: Nid) -> u64 {
        self.update(|f| f.with_path(path))
    }

    /// Change the allowed statuses
    pub fn set_allowed_statuses(&self, statuses: StatusSet) -> u64 {
        self.update(|f| f.with_allowed_statuses(statuses))
    }

    /// Register a change callback; returns an id for [`unsubscribe`](Self::unsubscribe)
    pub fn subscribe(&self, subscriber: impl Fn(&StampFilter, u64) + Send + Sync + 'static) -> u64 {
        let id = self.next_subscriber.fetch_add(1, Ordering::Relaxed);
        self.subscribers.lock().push((id, Arc::new(subscriber)));
        id
    }

    /// Remove a callback; returns whether it was registered
    pub fn unsubscribe(&self, id: u64) -> bool {
        let mut subscribers = self.subscribers.lock();
        let before = subscribers.len();
        subscribers.retain(|(sid, _)| *sid != id);
        subscribers.len() != before
    }
}

impl std::fmt::Debug for MutableStampCoordinate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MutableStampCoordinate")
            .field("filter", &*self.filter.read())
            .field("revision", &self.revision())
            .finish()
    }
}
