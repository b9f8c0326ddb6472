//! Identifier and assemblage registry
//!
//! Binds UUID lists to dense nids and nids to the assemblage they belong to.
//! Every lookup is served from memory; the backing store is the durable copy.
//!
//! # Caching
//!
//! - UUID -> nid: fully loaded from the identifier keyspace when the registry
//!   opens, so a miss means "unknown UUID" without touching the store.
//! - nid -> UUIDs and nid -> assemblage: filled on demand. A miss costs one
//!   backing read and the result (including absence) is memoized. Fills
//!   hold a striped lock per nid, so concurrent misses on one nid share a
//!   single read.
//! - assemblage -> types: fully loaded on open; small.
//! - assemblage -> member nids: filled by [`IdentifierRegistry::load_all`].
//!
//! # Invariants
//!
//! - A nid's UUID list never changes once written; index 0 is the primordial UUID.
//! - A UUID maps to at most one nid.
//! - An assemblage's object and version types are fixed by its first member.
//! - A nid belongs to at most one assemblage.
//!
//! Violations surface as [`Error::ConsistencyViolation`] and leave both the
//! store and the caches untouched.

use chronicle_core::{
    nid_index, Error, Nid, ObjectType, Result, ShiftedIntSet, VersionType, FIRST_NID,
};
use chronicle_durability::{get_int_array, put_int_array, BackingStore, Keyspace};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

const UUID_BYTES: usize = 16;
const FILL_STRIPES: usize = 64;

/// Object and version type of an assemblage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AssemblageTypes {
    /// Kind of component
    pub object_type: ObjectType,
    /// Kind of version payload
    pub version_type: VersionType,
}

/// Where a nid lives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Membership {
    /// Owning assemblage
    pub assemblage_nid: Nid,
    /// Dense 0-based position within the assemblage
    pub element_sequence: i32,
}

#[derive(Debug, Clone, Copy)]
struct AssemblageState {
    types: AssemblageTypes,
    next_element: i32,
}

/// UUID <-> nid and nid -> assemblage registry
pub struct IdentifierRegistry {
    store: Arc<dyn BackingStore>,
    uuid_to_nid: DashMap<Uuid, Nid>,
    nid_to_uuids: DashMap<Nid, Option<Arc<[Uuid]>>>,
    memberships: DashMap<Nid, Option<Membership>>,
    assemblages: DashMap<Nid, AssemblageState>,
    members: DashMap<Nid, ShiftedIntSet>,
    members_loaded: AtomicBool,
    next_nid: AtomicI32,
    /// Serializes nid allocation
    assign_lock: Mutex<()>,
    /// Serializes assemblage setup
    setup_lock: Mutex<()>,
    fill_locks: Box<[Mutex<()>]>,
}

enum Known {
    None,
    All(Nid),
}

impl IdentifierRegistry {
    /// Open over `store`, loading the UUID index and assemblage types
    pub fn open(store: Arc<dyn BackingStore>) -> Result<Self> {
        let registry = Self {
            store,
            uuid_to_nid: DashMap::new(),
            nid_to_uuids: DashMap::new(),
            memberships: DashMap::new(),
            assemblages: DashMap::new(),
            members: DashMap::new(),
            members_loaded: AtomicBool::new(false),
            next_nid: AtomicI32::new(FIRST_NID),
            assign_lock: Mutex::new(()),
            setup_lock: Mutex::new(()),
            fill_locks: (0..FILL_STRIPES).map(|_| Mutex::new(())).collect(),
        };
        registry.reload_uuid_index()?;
        Ok(registry)
    }

    /// Rebuild the UUID index and assemblage types from the store
    pub fn reload_uuid_index(&self) -> Result<()> {
        let mut failure = None;
        let mut max_nid = None;
        self.store.scan(Keyspace::Identifier, &mut |nid, blocks| {
            let uuids = match blocks {
                [block] => match decode_uuids(block) {
                    Ok(uuids) => uuids,
                    Err(e) => {
                        failure = Some(e);
                        return false;
                    }
                },
                _ => {
                    failure = Some(Error::Corruption(format!(
                        "identifier record for nid {} holds {} blocks",
                        nid,
                        blocks.len()
                    )));
                    return false;
                }
            };
            for uuid in uuids.iter() {
                if let Some(other) = self.uuid_to_nid.insert(*uuid, nid) {
                    if other != nid {
                        failure = Some(Error::Corruption(format!(
                            "UUID {} bound to both nid {} and nid {}",
                            uuid, other, nid
                        )));
                        return false;
                    }
                }
            }
            self.nid_to_uuids.insert(nid, Some(uuids.into()));
            max_nid = Some(nid);
            true
        })?;
        if let Some(e) = failure {
            return Err(e);
        }
        if let Some(max) = max_nid {
            let next = max.checked_add(1).ok_or_else(|| {
                Error::consistency("nid space exhausted")
            })?;
            self.next_nid.fetch_max(next, Ordering::AcqRel);
        }

        let mut failure = None;
        self.store.scan(Keyspace::AssemblageType, &mut |assemblage, blocks| {
            match decode_assemblage_state(assemblage, blocks) {
                Ok(state) => {
                    self.assemblages.insert(assemblage, state);
                    true
                }
                Err(e) => {
                    failure = Some(e);
                    false
                }
            }
        })?;
        if let Some(e) = failure {
            return Err(e);
        }

        info!(
            target: "chronicle::identifier",
            nids = self.nid_to_uuids.len(),
            uuids = self.uuid_to_nid.len(),
            assemblages = self.assemblages.len(),
            "Loaded identifier index"
        );
        Ok(())
    }

    fn classify(&self, uuids: &[Uuid]) -> Result<Known> {
        let mut known: Option<Nid> = None;
        let mut unknown = 0usize;
        for uuid in uuids {
            match self.uuid_to_nid.get(uuid).map(|n| *n) {
                Some(nid) => match known {
                    Some(existing) if existing != nid => {
                        return Err(Error::consistency(format!(
                            "UUIDs are bound to different nids {} and {}",
                            existing, nid
                        )));
                    }
                    _ => known = Some(nid),
                },
                None => unknown += 1,
            }
        }
        match known {
            Some(nid) if unknown > 0 => Err(Error::consistency(format!(
                "{} new UUID(s) mixed with UUIDs already bound to nid {}",
                unknown, nid
            ))),
            Some(nid) => Ok(Known::All(nid)),
            None => Ok(Known::None),
        }
    }

    /// Nid for `uuids`, allocating one if none of them is known
    ///
    /// Idempotent for a known UUID list. Mixing known and unknown UUIDs, or
    /// UUIDs bound to different nids, is a consistency violation.
    pub fn assign_nid(&self, uuids: &[Uuid]) -> Result<Nid> {
        if uuids.is_empty() {
            return Err(Error::invalid_input("cannot assign a nid to an empty UUID list"));
        }
        if let Known::All(nid) = self.classify(uuids)? {
            return Ok(nid);
        }

        let _guard = self.assign_lock.lock();
        if let Known::All(nid) = self.classify(uuids)? {
            return Ok(nid);
        }
        let nid = self.next_nid.load(Ordering::Acquire);
        let next = nid
            .checked_add(1)
            .ok_or_else(|| Error::consistency("nid space exhausted"))?;

        self.store
            .put(Keyspace::Identifier, nid, vec![encode_uuids(uuids)])?;

        self.next_nid.store(next, Ordering::Release);
        self.nid_to_uuids.insert(nid, Some(uuids.into()));
        for uuid in uuids {
            self.uuid_to_nid.insert(*uuid, nid);
        }
        debug!(target: "chronicle::identifier", nid, primordial = %uuids[0], "Assigned nid");
        Ok(nid)
    }

    /// Nid bound to any of `uuids`
    pub fn nid_for_uuids(&self, uuids: &[Uuid]) -> Option<Nid> {
        uuids
            .iter()
            .find_map(|uuid| self.uuid_to_nid.get(uuid).map(|n| *n))
    }

    /// Nid bound to `uuid`
    pub fn nid_for_uuid(&self, uuid: &Uuid) -> Option<Nid> {
        self.uuid_to_nid.get(uuid).map(|n| *n)
    }

    /// UUIDs of `nid`, primordial first
    pub fn uuids_for_nid(&self, nid: Nid) -> Result<Option<Arc<[Uuid]>>> {
        if let Some(cached) = self.nid_to_uuids.get(&nid) {
            return Ok(cached.clone());
        }
        let _fill = self.fill_lock(nid);
        if let Some(cached) = self.nid_to_uuids.get(&nid) {
            return Ok(cached.clone());
        }
        let loaded = match self.store.get(Keyspace::Identifier, nid)? {
            Some(blocks) => match blocks.as_slice() {
                [block] => Some(Arc::from(decode_uuids(block)?)),
                _ => {
                    return Err(Error::Corruption(format!(
                        "identifier record for nid {} holds {} blocks",
                        nid,
                        blocks.len()
                    )))
                }
            },
            None => None,
        };
        Ok(self.nid_to_uuids.entry(nid).or_insert(loaded).clone())
    }

    /// First UUID of `nid`
    pub fn primordial_uuid(&self, nid: Nid) -> Result<Option<Uuid>> {
        Ok(self.uuids_for_nid(nid)?.and_then(|uuids| uuids.first().copied()))
    }

    fn fill_lock(&self, nid: Nid) -> parking_lot::MutexGuard<'_, ()> {
        self.fill_locks[nid_index(nid) % FILL_STRIPES].lock()
    }

    /// Assemblage and element sequence of `nid`
    pub fn membership(&self, nid: Nid) -> Result<Option<Membership>> {
        if let Some(cached) = self.memberships.get(&nid) {
            return Ok(*cached);
        }
        let _fill = self.fill_lock(nid);
        if let Some(cached) = self.memberships.get(&nid) {
            return Ok(*cached);
        }
        let loaded = match get_int_array(self.store.as_ref(), Keyspace::Assemblage, nid)? {
            Some(values) => Some(decode_membership(nid, &values)?),
            None => None,
        };
        debug!(target: "chronicle::identifier", nid, found = loaded.is_some(), "Filled assemblage cache");
        Ok(*self.memberships.entry(nid).or_insert(loaded))
    }

    /// Assemblage of `nid`
    pub fn assemblage_nid(&self, nid: Nid) -> Result<Option<Nid>> {
        Ok(self.membership(nid)?.map(|m| m.assemblage_nid))
    }

    /// Element sequence of `nid` within its assemblage
    pub fn element_sequence(&self, nid: Nid) -> Result<Option<i32>> {
        Ok(self.membership(nid)?.map(|m| m.element_sequence))
    }

    /// Place `nid` in `assemblage`, fixing the assemblage's types on first use
    ///
    /// Returns the nid's element sequence. Repeating an identical setup is a
    /// no-op; changing the assemblage's types or moving the nid to another
    /// assemblage is a consistency violation.
    pub fn setup_nid(
        &self,
        nid: Nid,
        assemblage: Nid,
        object_type: ObjectType,
        version_type: VersionType,
    ) -> Result<i32> {
        let types = AssemblageTypes {
            object_type,
            version_type,
        };
        let _guard = self.setup_lock.lock();

        let state = self.assemblages.get(&assemblage).map(|s| *s);
        if let Some(state) = state {
            if state.types != types {
                return Err(Error::consistency(format!(
                    "assemblage {} is {:?}/{:?}, cannot change to {:?}/{:?}",
                    assemblage,
                    state.types.object_type,
                    state.types.version_type,
                    object_type,
                    version_type
                )));
            }
        }

        if let Some(existing) = self.membership(nid)? {
            if existing.assemblage_nid != assemblage {
                return Err(Error::consistency(format!(
                    "nid {} belongs to assemblage {}, cannot move to {}",
                    nid, existing.assemblage_nid, assemblage
                )));
            }
            return Ok(existing.element_sequence);
        }

        let element_sequence = state.map(|s| s.next_element).unwrap_or(0);
        let next = AssemblageState {
            types,
            next_element: element_sequence
                .checked_add(1)
                .ok_or_else(|| Error::consistency(format!("assemblage {} is full", assemblage)))?,
        };
        // Counter first: a crash in between leaves a gap, never a duplicate
        put_int_array(
            self.store.as_ref(),
            Keyspace::AssemblageType,
            assemblage,
            &encode_assemblage_state(&next),
        )?;
        put_int_array(
            self.store.as_ref(),
            Keyspace::Assemblage,
            nid,
            &[assemblage, element_sequence],
        )?;

        if state.is_none() {
            info!(
                target: "chronicle::identifier",
                assemblage,
                object_type = ?object_type,
                version_type = ?version_type,
                "Registered assemblage"
            );
        }
        self.assemblages.insert(assemblage, next);
        self.memberships.insert(
            nid,
            Some(Membership {
                assemblage_nid: assemblage,
                element_sequence,
            }),
        );
        self.members.entry(assemblage).or_default().add(nid);
        Ok(element_sequence)
    }

    /// Types of `assemblage`
    pub fn assemblage_types(&self, assemblage: Nid) -> Option<AssemblageTypes> {
        self.assemblages.get(&assemblage).map(|s| s.types)
    }

    /// Number of elements ever placed in `assemblage`
    pub fn assemblage_size(&self, assemblage: Nid) -> usize {
        self.assemblages
            .get(&assemblage)
            .map(|s| s.next_element as usize)
            .unwrap_or(0)
    }

    /// Every registered assemblage
    pub fn assemblage_nids(&self) -> ShiftedIntSet {
        self.assemblages.iter().map(|e| *e.key()).collect()
    }

    /// Member nids of `assemblage`, loading all memberships on first use
    pub fn nids_for_assemblage(&self, assemblage: Nid) -> Result<ShiftedIntSet> {
        if !self.members_loaded.load(Ordering::Acquire) {
            self.load_all()?;
        }
        Ok(self
            .members
            .get(&assemblage)
            .map(|m| m.clone())
            .unwrap_or_default())
    }

    /// Bulk-load every membership from the store
    ///
    /// Returns the number of memberships loaded.
    pub fn load_all(&self) -> Result<usize> {
        let mut failure = None;
        let mut loaded = 0usize;
        self.store.scan(Keyspace::Assemblage, &mut |nid, blocks| {
            let parsed = match blocks {
                [block] => chronicle_durability::decode_int_array(block)
                    .and_then(|values| decode_membership(nid, &values)),
                _ => Err(Error::Corruption(format!(
                    "assemblage record for nid {} holds {} blocks",
                    nid,
                    blocks.len()
                ))),
            };
            match parsed {
                Ok(membership) => {
                    self.memberships.insert(nid, Some(membership));
                    self.members
                        .entry(membership.assemblage_nid)
                        .or_default()
                        .add(nid);
                    loaded += 1;
                    true
                }
                Err(e) => {
                    failure = Some(e);
                    false
                }
            }
        })?;
        if let Some(e) = failure {
            return Err(e);
        }
        self.members_loaded.store(true, Ordering::Release);
        debug!(target: "chronicle::identifier", loaded, "Loaded assemblage memberships");
        Ok(loaded)
    }

    /// Number of nids assigned
    pub fn nid_count(&self) -> usize {
        nid_index(self.next_nid.load(Ordering::Acquire)) - nid_index(FIRST_NID)
    }

    /// Highest nid assigned so far
    pub fn max_nid(&self) -> Option<Nid> {
        let next = self.next_nid.load(Ordering::Acquire);
        (next > FIRST_NID).then(|| next - 1)
    }
}

impl std::fmt::Debug for IdentifierRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentifierRegistry")
            .field("store", &self.store.name())
            .field("nids", &self.nid_count())
            .field("assemblages", &self.assemblages.len())
            .finish()
    }
}

fn encode_uuids(uuids: &[Uuid]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(uuids.len() * UUID_BYTES);
    for uuid in uuids {
        buf.extend_from_slice(uuid.as_bytes());
    }
    buf
}

fn decode_uuids(buf: &[u8]) -> Result<Vec<Uuid>> {
    if buf.is_empty() || buf.len() % UUID_BYTES != 0 {
        return Err(Error::Corruption(format!(
            "identifier block of {} bytes is not a non-empty UUID list",
            buf.len()
        )));
    }
    buf.chunks_exact(UUID_BYTES)
        .map(|chunk| {
            Uuid::from_slice(chunk).map_err(|e| Error::Corruption(format!("bad UUID: {}", e)))
        })
        .collect()
}

fn decode_membership(nid: Nid, values: &[i32]) -> Result<Membership> {
    match values {
        [assemblage_nid, element_sequence] if *element_sequence >= 0 => Ok(Membership {
            assemblage_nid: *assemblage_nid,
            element_sequence: *element_sequence,
        }),
        _ => Err(Error::Corruption(format!(
            "assemblage record for nid {} is malformed: {:?}",
            nid, values
        ))),
    }
}

fn encode_assemblage_state(state: &AssemblageState) -> [i32; 3] {
    [
        state.types.object_type.as_byte() as i32,
        state.types.version_type.as_byte() as i32,
        state.next_element,
    ]
}

fn decode_assemblage_state(assemblage: Nid, blocks: &[Vec<u8>]) -> Result<AssemblageState> {
    let values = match blocks {
        [block] => chronicle_durability::decode_int_array(block)?,
        _ => Vec::new(),
    };
    let corrupt = || {
        Error::Corruption(format!(
            "assemblage type record for {} is malformed",
            assemblage
        ))
    };
    match values.as_slice() {
        [object_type, version_type, next_element] => {
            let object_type = u8::try_from(*object_type)
                .ok()
                .and_then(ObjectType::from_byte)
                .ok_or_else(corrupt)?;
            let version_type = u8::try_from(*version_type)
                .ok()
                .and_then(VersionType::from_byte)
                .ok_or_else(corrupt)?;
            Ok(AssemblageState {
                types: AssemblageTypes {
                    object_type,
                    version_type,
                },
                next_element: *next_element,
            })
        }
        _ => Err(corrupt()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chronicle_durability::{FaultyBackingStore, MemoryBackingStore};

    fn registry() -> (Arc<MemoryBackingStore>, IdentifierRegistry) {
        let store = Arc::new(MemoryBackingStore::new());
        let registry = IdentifierRegistry::open(store.clone()).unwrap();
        (store, registry)
    }

    #[test]
    fn test_assign_nid_is_idempotent() {
        let (_, registry) = registry();
        let uuids = [Uuid::new_v4(), Uuid::new_v4()];
        let nid = registry.assign_nid(&uuids).unwrap();
        assert_eq!(nid, FIRST_NID);
        assert_eq!(registry.assign_nid(&uuids).unwrap(), nid);
        assert_eq!(registry.assign_nid(&uuids[1..]).unwrap(), nid);
        assert_eq!(registry.nid_count(), 1);
    }

    #[test]
    fn test_mixing_known_and_new_uuids_is_fatal() {
        let (_, registry) = registry();
        let known = Uuid::new_v4();
        registry.assign_nid(&[known]).unwrap();
        let err = registry.assign_nid(&[known, Uuid::new_v4()]).unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(registry.nid_count(), 1);
    }

    #[test]
    fn test_uuids_bound_to_different_nids_is_fatal() {
        let (_, registry) = registry();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        registry.assign_nid(&[a]).unwrap();
        registry.assign_nid(&[b]).unwrap();
        assert!(matches!(
            registry.assign_nid(&[a, b]),
            Err(Error::ConsistencyViolation(_))
        ));
    }

    #[test]
    fn test_primordial_uuid_order_survives_reopen() {
        let (store, registry) = registry();
        let uuids = [Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4()];
        let nid = registry.assign_nid(&uuids).unwrap();
        drop(registry);

        let reopened = IdentifierRegistry::open(store).unwrap();
        assert_eq!(&*reopened.uuids_for_nid(nid).unwrap().unwrap(), &uuids[..]);
        assert_eq!(reopened.primordial_uuid(nid).unwrap(), Some(uuids[0]));
        assert_eq!(reopened.nid_for_uuid(&uuids[2]), Some(nid));
        assert_eq!(reopened.assign_nid(&[Uuid::new_v4()]).unwrap(), nid + 1);
    }

    #[test]
    fn test_setup_nid_assigns_dense_element_sequences() {
        let (_, registry) = registry();
        let assemblage = registry.assign_nid(&[Uuid::new_v4()]).unwrap();
        let a = registry.assign_nid(&[Uuid::new_v4()]).unwrap();
        let b = registry.assign_nid(&[Uuid::new_v4()]).unwrap();

        assert_eq!(
            registry
                .setup_nid(a, assemblage, ObjectType::Concept, VersionType::Concept)
                .unwrap(),
            0
        );
        assert_eq!(
            registry
                .setup_nid(b, assemblage, ObjectType::Concept, VersionType::Concept)
                .unwrap(),
            1
        );
        assert_eq!(
            registry
                .setup_nid(a, assemblage, ObjectType::Concept, VersionType::Concept)
                .unwrap(),
            0
        );
        assert_eq!(registry.assemblage_nid(b).unwrap(), Some(assemblage));
        assert_eq!(registry.assemblage_size(assemblage), 2);
    }

    #[test]
    fn test_changing_assemblage_types_is_fatal() {
        let (_, registry) = registry();
        registry
            .setup_nid(FIRST_NID + 1, FIRST_NID, ObjectType::Semantic, VersionType::String)
            .unwrap();
        let err = registry
            .setup_nid(FIRST_NID + 2, FIRST_NID, ObjectType::Semantic, VersionType::Long)
            .unwrap_err();
        assert!(matches!(err, Error::ConsistencyViolation(_)));
        assert_eq!(registry.assemblage_nid(FIRST_NID + 2).unwrap(), None);
    }

    #[test]
    fn test_moving_nid_between_assemblages_is_fatal() {
        let (_, registry) = registry();
        registry
            .setup_nid(FIRST_NID + 5, FIRST_NID, ObjectType::Concept, VersionType::Concept)
            .unwrap();
        assert!(registry
            .setup_nid(FIRST_NID + 5, FIRST_NID + 1, ObjectType::Concept, VersionType::Concept)
            .is_err());
    }

    #[test]
    fn test_assemblage_miss_reads_store_once() {
        let (store, registry) = registry();
        let before = store.read_count();
        assert_eq!(registry.assemblage_nid(FIRST_NID + 9).unwrap(), None);
        assert_eq!(registry.assemblage_nid(FIRST_NID + 9).unwrap(), None);
        assert_eq!(store.read_count(), before + 1);
    }

    #[test]
    fn test_memberships_reload_from_store() {
        let (store, registry) = registry();
        for offset in 1..=3 {
            registry
                .setup_nid(FIRST_NID + offset, FIRST_NID, ObjectType::Concept, VersionType::Concept)
                .unwrap();
        }
        drop(registry);

        let reopened = IdentifierRegistry::open(store).unwrap();
        assert_eq!(
            reopened.assemblage_types(FIRST_NID),
            Some(AssemblageTypes {
                object_type: ObjectType::Concept,
                version_type: VersionType::Concept
            })
        );
        let members = reopened.nids_for_assemblage(FIRST_NID).unwrap();
        assert_eq!(
            members.to_vec(),
            vec![FIRST_NID + 1, FIRST_NID + 2, FIRST_NID + 3]
        );
        assert_eq!(
            reopened
                .setup_nid(FIRST_NID + 4, FIRST_NID, ObjectType::Concept, VersionType::Concept)
                .unwrap(),
            3
        );
    }

    #[test]
    fn test_failed_write_leaves_caches_clean() {
        let inner = Arc::new(MemoryBackingStore::new());
        let faulty = Arc::new(FaultyBackingStore::new(inner));
        let registry = IdentifierRegistry::open(faulty.clone()).unwrap();
        let uuid = Uuid::new_v4();

        faulty.fail_next_writes(1);
        assert!(matches!(registry.assign_nid(&[uuid]), Err(Error::DataAccess(_))));
        assert_eq!(registry.nid_for_uuid(&uuid), None);
        assert_eq!(registry.assign_nid(&[uuid]).unwrap(), FIRST_NID);
    }
}
