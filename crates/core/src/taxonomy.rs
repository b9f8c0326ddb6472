//! Taxonomy adjacency records
//!
//! Each concept's record in a taxonomy assemblage is a flat i32 array of
//! `(target nid, stamp sequence, flags)` triples. Storing edges this way lets
//! "is-a" queries run without deserializing full chronologies.
//!
//! Records merge by set union, so concurrent writers can each append edges
//! and [`merge_taxonomy_arrays`] converges regardless of order.

use crate::error::{Error, Result};
use crate::intset::ShiftedIntSet;
use crate::types::{Nid, StampSequence};

/// Edge points at a parent of the record's concept
pub const PARENT_FLAG: i32 = 0b01;

/// Edge points at a child of the record's concept
pub const CHILD_FLAG: i32 = 0b10;

/// One adjacency edge
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaxonomyEdge {
    /// Other end of the edge
    pub target: Nid,
    /// STAMP under which the edge was asserted or retired
    pub stamp_sequence: StampSequence,
    /// [`PARENT_FLAG`] and/or [`CHILD_FLAG`]
    pub flags: i32,
}

impl TaxonomyEdge {
    /// Whether this edge points at a parent
    pub fn is_parent(&self) -> bool {
        self.flags & PARENT_FLAG != 0
    }

    /// Whether this edge points at a child
    pub fn is_child(&self) -> bool {
        self.flags & CHILD_FLAG != 0
    }
}

/// Decoded adjacency record, edges kept sorted and unique
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaxonomyRecord {
    edges: Vec<TaxonomyEdge>,
}

impl TaxonomyRecord {
    /// Empty record
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode from the stored array
    pub fn from_array(data: &[i32]) -> Result<Self> {
        if data.len() % 3 != 0 {
            return Err(Error::Corruption(format!(
                "taxonomy record length {} is not a multiple of 3",
                data.len()
            )));
        }
        let mut edges: Vec<TaxonomyEdge> = data
            .chunks_exact(3)
            .map(|c| TaxonomyEdge {
                target: c[0],
                stamp_sequence: c[1],
                flags: c[2],
            })
            .collect();
        edges.sort_unstable();
        edges.dedup();
        Ok(Self { edges })
    }

    /// Encode to the stored array
    pub fn to_array(&self) -> Vec<i32> {
        let mut data = Vec::with_capacity(self.edges.len() * 3);
        for edge in &self.edges {
            data.extend_from_slice(&[edge.target, edge.stamp_sequence, edge.flags]);
        }
        data
    }

    /// Add an edge to a parent
    pub fn add_parent(&mut self, parent: Nid, stamp_sequence: StampSequence) -> &mut Self {
        self.insert(TaxonomyEdge {
            target: parent,
            stamp_sequence,
            flags: PARENT_FLAG,
        })
    }

    /// Add an edge to a child
    pub fn add_child(&mut self, child: Nid, stamp_sequence: StampSequence) -> &mut Self {
        self.insert(TaxonomyEdge {
            target: child,
            stamp_sequence,
            flags: CHILD_FLAG,
        })
    }

    fn insert(&mut self, edge: TaxonomyEdge) -> &mut Self {
        if let Err(pos) = self.edges.binary_search(&edge) {
            self.edges.insert(pos, edge);
        }
        self
    }

    /// All edges, sorted
    pub fn edges(&self) -> &[TaxonomyEdge] {
        &self.edges
    }

    /// Targets of edges carrying `flag`
    pub fn targets(&self, flag: i32) -> ShiftedIntSet {
        self.edges
            .iter()
            .filter(|e| e.flags & flag != 0)
            .map(|e| e.target)
            .collect()
    }

    /// STAMPs of edges to `target` carrying `flag`, ascending
    pub fn stamps_for(&self, target: Nid, flag: i32) -> Vec<StampSequence> {
        self.edges
            .iter()
            .filter(|e| e.target == target && e.flags & flag != 0)
            .map(|e| e.stamp_sequence)
            .collect()
    }

    /// Whether the record holds no edges
    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }
}

/// Associative, commutative merge of two stored records
///
/// Trailing values that do not form a whole triple are dropped.
pub fn merge_taxonomy_arrays(left: &[i32], right: &[i32]) -> Vec<i32> {
    let mut edges: Vec<(i32, i32, i32)> = left
        .chunks_exact(3)
        .chain(right.chunks_exact(3))
        .map(|c| (c[0], c[1], c[2]))
        .collect();
    edges.sort_unstable();
    edges.dedup();
    let mut out = Vec::with_capacity(edges.len() * 3);
    for (target, stamp, flags) in edges {
        out.extend_from_slice(&[target, stamp, flags]);
    }
    out
}
