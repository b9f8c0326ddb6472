//! Core types for Chronicle
//!
//! This module defines the foundational identifiers and discriminators:
//! - Nid: dense signed component identifier
//! - StampSequence: interned STAMP handle
//! - Status: ACTIVE / INACTIVE
//! - ObjectType / VersionType: assemblage kind discriminators

use serde::{Deserialize, Serialize};
use std::fmt;

/// Dense signed identifier naming any component
pub type Nid = i32;

/// Interned STAMP handle
pub type StampSequence = i32;

/// First nid handed out by a fresh store
///
/// Nids are drawn from the negative half of the i32 space, upward from here.
pub const FIRST_NID: Nid = i32::MIN + 1;

/// First STAMP handle handed out by a fresh interner
pub const FIRST_STAMP_SEQUENCE: StampSequence = 1;

/// Map a nid onto a non-negative dense index (`FIRST_NID` maps to 1)
#[inline]
pub fn nid_index(nid: Nid) -> usize {
    (nid as i64 - i32::MIN as i64) as usize
}

/// Status axis of a STAMP
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Status {
    /// Version is in force
    Active,
    /// Version is retired
    Inactive,
}

impl Status {
    /// One-byte persisted form
    pub fn as_byte(self) -> u8 {
        match self {
            Status::Active => 1,
            Status::Inactive => 2,
        }
    }

    /// Parse the one-byte persisted form
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(Status::Active),
            2 => Some(Status::Inactive),
            _ => None,
        }
    }

    /// Whether this is [`Status::Active`]
    pub fn is_active(self) -> bool {
        matches!(self, Status::Active)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Active => write!(f, "ACTIVE"),
            Status::Inactive => write!(f, "INACTIVE"),
        }
    }
}

/// Kind of object held by an assemblage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ObjectType {
    /// Concept chronologies
    Concept,
    /// Semantic (annotation) chronologies attached to a referenced component
    Semantic,
}

impl ObjectType {
    /// One-byte persisted form
    pub fn as_byte(self) -> u8 {
        match self {
            ObjectType::Concept => 1,
            ObjectType::Semantic => 2,
        }
    }

    /// Parse the one-byte persisted form
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(ObjectType::Concept),
            2 => Some(ObjectType::Semantic),
            _ => None,
        }
    }
}

/// Kind of version carried by an assemblage's chronologies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VersionType {
    /// Concept version (no payload beyond the STAMP)
    Concept,
    /// Description text with language and type
    Description,
    /// Reference to another component
    Component,
    /// Logical expression graph
    LogicalExpression,
    /// Free text
    String,
    /// Single nid value
    Nid,
    /// Single 64-bit value
    Long,
    /// Membership only
    MemberOnly,
}

impl VersionType {
    /// One-byte persisted form
    pub fn as_byte(self) -> u8 {
        match self {
            VersionType::Concept => 1,
            VersionType::Description => 2,
            VersionType::Component => 3,
            VersionType::LogicalExpression => 4,
            VersionType::String => 5,
            VersionType::Nid => 6,
            VersionType::Long => 7,
            VersionType::MemberOnly => 8,
        }
    }

    /// Parse the one-byte persisted form
    pub fn from_byte(b: u8) -> Option<Self> {
        Some(match b {
            1 => VersionType::Concept,
            2 => VersionType::Description,
            3 => VersionType::Component,
            4 => VersionType::LogicalExpression,
            5 => VersionType::String,
            6 => VersionType::Nid,
            7 => VersionType::Long,
            8 => VersionType::MemberOnly,
            _ => return None,
        })
    }
}
