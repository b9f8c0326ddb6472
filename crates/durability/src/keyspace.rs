//! Keyspaces of the backing store
//!
//! Every persisted value is keyed by a dense i32 inside one keyspace. The
//! keyspace is written as a one-byte tag plus a four-byte parameter, which is
//! the owning assemblage for taxonomy data and zero otherwise.

use chronicle_core::Nid;
use std::fmt;

/// A typed region of the backing store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Keyspace {
    /// Chronology blocks keyed by component nid
    Chronology,
    /// Taxonomy adjacency arrays of one taxonomy assemblage, keyed by concept nid
    Taxonomy(Nid),
    /// UUID lists keyed by nid, primordial first
    Identifier,
    /// `[assemblage nid, element sequence]` keyed by component nid
    Assemblage,
    /// `[object type, version type, next element sequence]` keyed by assemblage nid
    AssemblageType,
    /// STAMP persisted form keyed by stamp sequence
    Stamp,
    /// Semantic nids keyed by referenced component nid
    SemanticIndex,
    /// Path origin positions keyed by path nid
    PathOrigin,
}

impl Keyspace {
    /// One-byte tag
    pub fn tag(self) -> u8 {
        match self {
            Keyspace::Chronology => 1,
            Keyspace::Taxonomy(_) => 2,
            Keyspace::Identifier => 3,
            Keyspace::Assemblage => 4,
            Keyspace::AssemblageType => 5,
            Keyspace::Stamp => 6,
            Keyspace::SemanticIndex => 7,
            Keyspace::PathOrigin => 8,
        }
    }

    /// Keyspace parameter
    pub fn param(self) -> i32 {
        match self {
            Keyspace::Taxonomy(assemblage) => assemblage,
            _ => 0,
        }
    }

    /// Rebuild from tag and parameter
    pub fn from_parts(tag: u8, param: i32) -> Option<Self> {
        Some(match tag {
            1 => Keyspace::Chronology,
            2 => Keyspace::Taxonomy(param),
            3 => Keyspace::Identifier,
            4 => Keyspace::Assemblage,
            5 => Keyspace::AssemblageType,
            6 => Keyspace::Stamp,
            7 => Keyspace::SemanticIndex,
            8 => Keyspace::PathOrigin,
            _ => return None,
        })
    }
}

impl fmt::Display for Keyspace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Keyspace::Taxonomy(assemblage) => write!(f, "taxonomy[{}]", assemblage),
            other => write!(f, "{:?}", other),
        }
    }
}
