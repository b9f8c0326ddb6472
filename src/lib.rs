//! Chronicle - bitemporal terminology store
//!
//! Every concept, description and semantic is a chronology of versions, and
//! every version carries a STAMP: (status, time, author, module, path).
//! Queries pick the latest version visible under a [`StampFilter`].
//!
//! # Quick Start
//!
//! ```ignore
//! use chronicle::{Chronicle, StampFilter, StampPosition, Status, StatusSet};
//!
//! let db = Chronicle::ephemeral()?;
//! let nid = db.assign_nid(&[uuid::Uuid::new_v4()])?;
//! let stamp = db.stamp_sequence(Status::Active, 100, author, module, path)?;
//! // ... build a ChronologyData and db.put_chronology_data(&chronology)?
//!
//! let filter = StampFilter::new(StatusSet::ACTIVE_ONLY, StampPosition::latest(path));
//! let version = db.latest_version(nid, &filter)?;
//! ```
//!
//! # Architecture
//!
//! - `chronicle-core`: identifiers, STAMPs, sets, coordinates, chronology format
//! - `chronicle-durability`: backing store contract, record log, in-memory store
//! - `chronicle-storage`: spined maps, STAMP interner, identifier registry
//! - `chronicle-engine`: provider, resolver, paths, taxonomy, lifecycle

pub use chronicle_core::{
    merge_taxonomy_arrays, nid_index, ChronologyData, ChronologyHeader, Error, IntSet,
    LanguageCoordinate, LogicCoordinate, Nid, ObjectType, PremiseType, Result, ShiftedIntSet,
    Stamp, StampFilter, StampPosition, StampPrecedence, StampSequence, Status, StatusSet,
    TaxonomyRecord, VersionBlock, VersionType, Versioned, ViewCoordinate, CANCELED_TIME,
    FIRST_NID, UNCOMMITTED_TIME,
};
pub use chronicle_durability::{
    BackingStore, DurabilityMode, Keyspace, LogBackingStore, MemoryBackingStore,
};
pub use chronicle_engine::{
    CacheThroughProvider, Chronicle, ChronicleConfig, DescriptionCandidate, Lifecycle,
    MutableStampCoordinate, PathRegistry, StampResolver, TaxonomySnapshot, WriteListener,
};
pub use chronicle_storage::{IdentifierRegistry, SpinedMap, StampInterner};
