//! Compressed sets of 32-bit identifiers
//!
//! Both set flavours sit on a roaring bitmap, so memory scales with the
//! number of members and their clustering, not with the 2^32 domain.
//!
//! # Iteration order
//!
//! Iteration is always ascending by the *stored* `u32` key:
//!
//! - [`IntSet`] stores the raw bit pattern (`i as u32`). Non-negative values
//!   come first in ascending order, followed by negative values in ascending
//!   order. `[5, -5, 0]` iterates as `0, 5, -5`.
//! - [`ShiftedIntSet`] stores `i - i32::MIN`, which maps the whole signed range
//!   monotonically onto `u32`. Iteration is plain signed ascending order.
//!
//! Both orders are deterministic and stable across repeated iterations, which
//! is the property callers rely on. Use [`ShiftedIntSet`] for nids (drawn from
//! the negative half of the space) and [`IntSet`] for STAMP sequences.

use roaring::RoaringBitmap;
use std::fmt;
use std::marker::PhantomData;

/// Mapping between application ids and stored bitmap keys
pub trait KeyMapping {
    /// Application id to stored key
    fn to_key(value: i32) -> u32;
    /// Stored key to application id
    fn from_key(key: u32) -> i32;
}

/// Stores the raw bit pattern
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Unshifted;

impl KeyMapping for Unshifted {
    #[inline]
    fn to_key(value: i32) -> u32 {
        value as u32
    }

    #[inline]
    fn from_key(key: u32) -> i32 {
        key as i32
    }
}

/// Offsets by `i32::MIN` so negative ids land in the low half of the key space
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Shifted;

impl KeyMapping for Shifted {
    #[inline]
    fn to_key(value: i32) -> u32 {
        (value as u32) ^ 0x8000_0000
    }

    #[inline]
    fn from_key(key: u32) -> i32 {
        (key ^ 0x8000_0000) as i32
    }
}

/// A compressed set of i32 ids using key mapping `M`
#[derive(Clone, PartialEq, Default)]
pub struct IdSet<M: KeyMapping> {
    bitmap: RoaringBitmap,
    _mapping: PhantomData<M>,
}

/// Set of ids stored by raw bit pattern
pub type IntSet = IdSet<Unshifted>;

/// Set of ids stored offset by `i32::MIN`; iterates in signed order
pub type ShiftedIntSet = IdSet<Shifted>;

impl<M: KeyMapping> IdSet<M> {
    /// Create an empty set
    pub fn new() -> Self {
        Self {
            bitmap: RoaringBitmap::new(),
            _mapping: PhantomData,
        }
    }

    /// Add a value; returns true if it was not already present
    pub fn add(&mut self, value: i32) -> bool {
        self.bitmap.insert(M::to_key(value))
    }

    /// Remove a value; returns true if it was present
    pub fn remove(&mut self, value: i32) -> bool {
        self.bitmap.remove(M::to_key(value))
    }

    /// Membership test
    pub fn contains(&self, value: i32) -> bool {
        self.bitmap.contains(M::to_key(value))
    }

    /// Number of members
    pub fn len(&self) -> usize {
        self.bitmap.len() as usize
    }

    /// Whether the set has no members
    pub fn is_empty(&self) -> bool {
        self.bitmap.is_empty()
    }

    /// Remove all members
    pub fn clear(&mut self) {
        self.bitmap.clear();
    }

    /// Fresh iterator in stored-key order (see module docs)
    pub fn iter(&self) -> impl Iterator<Item = i32> + '_ {
        self.bitmap.iter().map(M::from_key)
    }

    /// Collect members into a vector, in iteration order
    pub fn to_vec(&self) -> Vec<i32> {
        self.iter().collect()
    }

    /// Union in place
    pub fn or(&mut self, other: &Self) -> &mut Self {
        self.bitmap |= &other.bitmap;
        self
    }

    /// Intersection in place
    pub fn and(&mut self, other: &Self) -> &mut Self {
        self.bitmap &= &other.bitmap;
        self
    }

    /// Difference in place
    pub fn and_not(&mut self, other: &Self) -> &mut Self {
        self.bitmap -= &other.bitmap;
        self
    }

    /// Symmetric difference in place
    pub fn xor(&mut self, other: &Self) -> &mut Self {
        self.bitmap ^= &other.bitmap;
        self
    }

    /// Approximate heap footprint in bytes
    pub fn memory_in_use(&self) -> usize {
        self.bitmap.serialized_size()
    }
}

impl<M: KeyMapping> FromIterator<i32> for IdSet<M> {
    fn from_iter<I: IntoIterator<Item = i32>>(iter: I) -> Self {
        let mut set = Self::new();
        for value in iter {
            set.add(value);
        }
        set
    }
}

impl<M: KeyMapping> Extend<i32> for IdSet<M> {
    fn extend<I: IntoIterator<Item = i32>>(&mut self, iter: I) {
        for value in iter {
            self.add(value);
        }
    }
}

impl<M: KeyMapping> fmt::Debug for IdSet<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter().take(32)).finish()?;
        if self.len() > 32 {
            write!(f, " (+{} more)", self.len() - 32)?;
        }
        Ok(())
    }
}
