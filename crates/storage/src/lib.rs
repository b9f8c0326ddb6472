//! In-memory storage structures for Chronicle
//!
//! This crate holds the concurrent, cache-resident side of the store:
//! - SpinedMap: dense-index segmented maps for chronology blocks and
//!   taxonomy adjacency arrays
//! - StampInterner: STAMP tuple -> handle interning with commit/cancel
//! - IdentifierRegistry: UUID <-> nid and nid -> assemblage bindings
//!
//! # Concurrency
//!
//! - Spine reads never lock the spine; growth takes one mutex
//! - Per-slot RwLocks: writers contend only on the same index
//! - DashMap lookups for the interner and registry caches

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod identifier;
pub mod spine;
pub mod stamp;

pub use identifier::{AssemblageTypes, IdentifierRegistry, Membership};
pub use spine::{Footprint, SpinedByteArrayMap, SpinedIntArrayMap, SpinedMap, DEFAULT_SEGMENT_SIZE};
pub use stamp::StampInterner;
