//! Path registry
//!
//! A path branches from one or more origin positions (a parent path and the
//! time it branched). Resolution on a path can see what its origins saw up
//! to the branch time.
//!
//! Origins are persisted in the path-origin keyspace as one block per path:
//! repeated `[origin path: i32][origin time: i64]`, big-endian.

use byteorder::{BigEndian, ByteOrder};
use chronicle_core::{Error, Nid, Result, StampPosition};
use chronicle_durability::{BackingStore, Keyspace};
use parking_lot::RwLock;
use rustc_hash::{FxHashMap, FxHashSet};
use smallvec::SmallVec;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::info;

const ORIGIN_BYTES: usize = 12;

type Origins = SmallVec<[StampPosition; 2]>;

/// Path nid -> origin positions
pub struct PathRegistry {
    store: Arc<dyn BackingStore>,
    origins: RwLock<FxHashMap<Nid, Origins>>,
}

impl PathRegistry {
    /// Open over `store`, loading every persisted origin
    pub fn open(store: Arc<dyn BackingStore>) -> Result<Self> {
        let mut origins = FxHashMap::default();
        let mut failure = None;
        store.scan(Keyspace::PathOrigin, &mut |path, blocks| {
            match blocks {
                [block] => match decode_origins(block) {
                    Ok(decoded) => {
                        origins.insert(path, decoded);
                        true
                    }
                    Err(e) => {
                        failure = Some(e);
                        false
                    }
                },
                _ => {
                    failure = Some(Error::Corruption(format!(
                        "path origin record for {} holds {} blocks",
                        path,
                        blocks.len()
                    )));
                    false
                }
            }
        })?;
        if let Some(e) = failure {
            return Err(e);
        }
        Ok(Self {
            store,
            origins: RwLock::new(origins),
        })
    }

    /// Origins of `path` in the order they were added
    pub fn origins(&self, path: Nid) -> Vec<StampPosition> {
        self.origins
            .read()
            .get(&path)
            .map(|o| o.to_vec())
            .unwrap_or_default()
    }

    /// Every path with at least one origin
    pub fn paths(&self) -> Vec<Nid> {
        let mut paths: Vec<Nid> = self.origins.read().keys().copied().collect();
        paths.sort_unstable();
        paths
    }

    /// Record that `path` branches from `origin`
    ///
    /// Adding an origin twice is a no-op. An origin that would make `path`
    /// its own ancestor is a consistency violation.
    pub fn add_origin(&self, path: Nid, origin: StampPosition) -> Result<()> {
        let mut origins = self.origins.write();
        if origins
            .get(&path)
            .map(|o| o.contains(&origin))
            .unwrap_or(false)
        {
            return Ok(());
        }
        if origin.path == path || reaches(&origins, origin.path, path) {
            return Err(Error::consistency(format!(
                "origin {} at {} would make path {} its own ancestor",
                origin.path, origin.time, path
            )));
        }

        let mut updated = origins.get(&path).cloned().unwrap_or_default();
        updated.push(origin);
        self.store
            .put(Keyspace::PathOrigin, path, vec![encode_origins(&updated)])?;
        origins.insert(path, updated);
        info!(target: "chronicle::path", path, origin = origin.path, time = origin.time, "Added path origin");
        Ok(())
    }

    /// `position` followed by every ancestor position, breadth-first
    ///
    /// Each ancestor's time is capped by the time of the position it was
    /// reached from. A path reached along several routes keeps its first
    /// (shallowest) position.
    pub fn ancestry(&self, position: StampPosition) -> Vec<StampPosition> {
        let origins = self.origins.read();
        let mut seen = FxHashSet::default();
        let mut out = Vec::new();
        let mut queue = VecDeque::from([position]);
        while let Some(current) = queue.pop_front() {
            if !seen.insert(current.path) {
                continue;
            }
            out.push(current);
            if let Some(parents) = origins.get(&current.path) {
                for origin in parents {
                    queue.push_back(origin.with_time(origin.time.min(current.time)));
                }
            }
        }
        out
    }
}

impl std::fmt::Debug for PathRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PathRegistry")
            .field("paths", &self.origins.read().len())
            .finish()
    }
}

/// Whether `to` is reachable from `from` by following origins
fn reaches(origins: &FxHashMap<Nid, Origins>, from: Nid, to: Nid) -> bool {
    let mut seen = FxHashSet::default();
    let mut stack = vec![from];
    while let Some(path) = stack.pop() {
        if path == to {
            return true;
        }
        if !seen.insert(path) {
            continue;
        }
        if let Some(parents) = origins.get(&path) {
            stack.extend(parents.iter().map(|o| o.path));
        }
    }
    false
}

fn encode_origins(origins: &[StampPosition]) -> Vec<u8> {
    let mut buf = vec![0u8; origins.len() * ORIGIN_BYTES];
    for (origin, chunk) in origins.iter().zip(buf.chunks_exact_mut(ORIGIN_BYTES)) {
        BigEndian::write_i32(&mut chunk[0..4], origin.path);
        BigEndian::write_i64(&mut chunk[4..12], origin.time);
    }
    buf
}

fn decode_origins(buf: &[u8]) -> Result<Origins> {
    if buf.len() % ORIGIN_BYTES != 0 {
        return Err(Error::Corruption(format!(
            "path origin block of {} bytes",
            buf.len()
        )));
    }
    Ok(buf
        .chunks_exact(ORIGIN_BYTES)
        .map(|chunk| {
            StampPosition::new(
                BigEndian::read_i32(&chunk[0..4]),
                BigEndian::read_i64(&chunk[4..12]),
            )
        })
        .collect())
}
