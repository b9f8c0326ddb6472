//! Chronology data model
//!
//! A chronology is the full version history of one component, stored as an
//! ordered list of byte blocks under the component's nid:
//!
//! ```text
//! block 0      bincode(ChronologyHeader)
//! block 1..n   [stamp_sequence: i32 BE][version payload]
//! ```
//!
//! Chronologies only grow: merging appends versions that are not already
//! present and never rewrites an existing block.

use crate::error::{Error, Result};
use crate::types::{Nid, ObjectType, StampSequence, VersionType};
use byteorder::{BigEndian, ByteOrder};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Anything tagged with a STAMP handle
pub trait Versioned {
    /// STAMP handle of this version
    fn stamp_sequence(&self) -> StampSequence;
}

/// Identity of a chronology, stored as block 0
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChronologyHeader {
    /// Component nid
    pub nid: Nid,
    /// Assemblage the component belongs to
    pub assemblage_nid: Nid,
    /// Object type of the assemblage
    pub object_type: ObjectType,
    /// Version type of the assemblage
    pub version_type: VersionType,
    /// UUIDs, primordial first
    pub uuids: Vec<Uuid>,
    /// For semantics, the component this annotation is attached to
    pub referenced_component_nid: Option<Nid>,
}

/// One serialized version
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VersionBlock {
    /// STAMP handle of the version
    pub stamp_sequence: StampSequence,
    /// Opaque version payload
    pub data: Vec<u8>,
}

impl VersionBlock {
    /// Create a version block
    pub fn new(stamp_sequence: StampSequence, data: Vec<u8>) -> Self {
        Self {
            stamp_sequence,
            data,
        }
    }

    /// Encode as `[stamp: i32 BE][payload]`
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = vec![0u8; 4 + self.data.len()];
        BigEndian::write_i32(&mut buf[..4], self.stamp_sequence);
        buf[4..].copy_from_slice(&self.data);
        buf
    }

    /// Decode a version block
    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        if buf.len() < 4 {
            return Err(Error::Corruption(format!(
                "version block of {} bytes has no STAMP prefix",
                buf.len()
            )));
        }
        Ok(Self {
            stamp_sequence: BigEndian::read_i32(&buf[..4]),
            data: buf[4..].to_vec(),
        })
    }
}

impl Versioned for VersionBlock {
    fn stamp_sequence(&self) -> StampSequence {
        self.stamp_sequence
    }
}

impl Versioned for StampSequence {
    fn stamp_sequence(&self) -> StampSequence {
        *self
    }
}

/// A chronology: header plus versions in append order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChronologyData {
    header: ChronologyHeader,
    versions: Vec<VersionBlock>,
}

impl ChronologyData {
    /// Create an empty chronology
    pub fn new(header: ChronologyHeader) -> Self {
        Self {
            header,
            versions: Vec::new(),
        }
    }

    /// Append a version
    pub fn add_version(&mut self, stamp_sequence: StampSequence, data: Vec<u8>) -> &mut Self {
        self.versions.push(VersionBlock::new(stamp_sequence, data));
        self
    }

    /// Header
    pub fn header(&self) -> &ChronologyHeader {
        &self.header
    }

    /// Component nid
    pub fn nid(&self) -> Nid {
        self.header.nid
    }

    /// Assemblage nid
    pub fn assemblage_nid(&self) -> Nid {
        self.header.assemblage_nid
    }

    /// Referenced component, for semantics
    pub fn referenced_component_nid(&self) -> Option<Nid> {
        self.header.referenced_component_nid
    }

    /// Versions in append order
    pub fn versions(&self) -> &[VersionBlock] {
        &self.versions
    }

    /// Serialize to storage blocks
    pub fn to_blocks(&self) -> Result<Vec<Vec<u8>>> {
        let mut blocks = Vec::with_capacity(1 + self.versions.len());
        blocks.push(bincode::serialize(&self.header)?);
        blocks.extend(self.versions.iter().map(VersionBlock::to_bytes));
        Ok(blocks)
    }

    /// Deserialize from storage blocks
    pub fn from_blocks(blocks: &[Vec<u8>]) -> Result<Self> {
        let (first, rest) = blocks
            .split_first()
            .ok_or_else(|| Error::Corruption("chronology has no header block".to_string()))?;
        let header: ChronologyHeader = bincode::deserialize(first)?;
        let versions = rest
            .iter()
            .map(|b| VersionBlock::from_bytes(b))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { header, versions })
    }

    /// Append every version of `other` not already present
    ///
    /// Both chronologies must describe the same component in the same
    /// assemblage; anything else is a consistency violation.
    pub fn merge(&self, other: &ChronologyData) -> Result<ChronologyData> {
        if self.header.nid != other.header.nid
            || self.header.assemblage_nid != other.header.assemblage_nid
        {
            return Err(Error::consistency(format!(
                "cannot merge chronology nid {} (assemblage {}) with nid {} (assemblage {})",
                self.header.nid,
                self.header.assemblage_nid,
                other.header.nid,
                other.header.assemblage_nid
            )));
        }
        if self.header.referenced_component_nid != other.header.referenced_component_nid {
            return Err(Error::consistency(format!(
                "semantic {} referenced component changed from {:?} to {:?}",
                self.header.nid,
                self.header.referenced_component_nid,
                other.header.referenced_component_nid
            )));
        }
        let mut merged = self.clone();
        for version in &other.versions {
            if !merged.versions.contains(version) {
                merged.versions.push(version.clone());
            }
        }
        Ok(merged)
    }
}
