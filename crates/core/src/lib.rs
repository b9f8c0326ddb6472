//! Core types for Chronicle
//!
//! This crate defines the foundational types used throughout the system:
//! - Nid / StampSequence: dense identifiers and interned STAMP handles
//! - Stamp: (status, time, author, module, path) tuples and their persisted form
//! - IntSet / ShiftedIntSet: compressed identifier sets
//! - Coordinates: StampFilter, LanguageCoordinate, LogicCoordinate, ViewCoordinate
//! - ChronologyData: header plus version blocks
//! - TaxonomyRecord: parent/child adjacency arrays
//! - Error: Error type hierarchy

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod chronology;
pub mod coordinate;
pub mod error;
pub mod intset;
pub mod stamp;
pub mod taxonomy;
pub mod types;

pub use chronology::{ChronologyData, ChronologyHeader, VersionBlock, Versioned};
pub use coordinate::{
    LanguageCoordinate, LogicCoordinate, PremiseType, StampFilter, StampPosition,
    StampPrecedence, StatusSet, ViewCoordinate,
};
pub use error::{Error, Result};
pub use intset::{IntSet, ShiftedIntSet};
pub use stamp::{now_millis, Stamp, CANCELED_TIME, STAMP_BYTES, UNCOMMITTED_TIME};
pub use taxonomy::{merge_taxonomy_arrays, TaxonomyEdge, TaxonomyRecord, CHILD_FLAG, PARENT_FLAG};
pub use types::{
    nid_index, Nid, ObjectType, StampSequence, Status, VersionType, FIRST_NID,
    FIRST_STAMP_SEQUENCE,
};
