//! Cache-through store provider
//!
//! Sits between callers and a [`BackingStore`]. Chronologies live in one
//! [`SpinedByteArrayMap`] per assemblage, keyed by element sequence; taxonomy
//! records live in one [`SpinedIntArrayMap`] per taxonomy assemblage, keyed by
//! a dense slot handed out the first time the assemblage sees a nid. Any
//! concept can carry a record in any taxonomy assemblage, so its element
//! sequence (dense only within its own assemblage) cannot key the spine.
//!
//! # Write path
//!
//! 1. Register the nid with its assemblage.
//! 2. Merge with the chronology already cached or stored.
//! 3. Write the backing store.
//! 4. Write the spine.
//! 5. Maintain the semantic reverse index.
//! 6. Run write listeners; failures are aggregated and returned once all ran.
//!
//! A backing failure at step 3 returns [`Error::DataAccess`] with the cache
//! untouched, so already-cached keys keep being served.
//!
//! # Locking
//!
//! Writes and cache fills for a nid hold that nid's stripe lock while they
//! touch the spine. Evicting an assemblage takes every stripe, so no fill or
//! write can land in a spine that was just dropped.

use crate::background::{BackgroundPool, TaskClass};
use crate::listener::WriteListener;
use crate::path::PathRegistry;
use crate::resolver::StampResolver;
use chronicle_core::{
    nid_index, ChronologyData, Error, IntSet, Nid, ObjectType, Result, Stamp, StampFilter,
    StampSequence, Status, VersionBlock, STAMP_BYTES,
};
use chronicle_durability::{decode_int_array, encode_int_array, BackingStore, Blocks, Keyspace};
use chronicle_storage::{
    IdentifierRegistry, SpinedByteArrayMap, SpinedIntArrayMap, StampInterner,
};
use dashmap::DashMap;
use parking_lot::{Mutex, MutexGuard, RwLock};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, info, warn};
use uuid::Uuid;

const WRITE_STRIPES: usize = 64;

/// Provider tuning, usually taken from `chronicle.toml`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderConfig {
    /// Slots per spine segment
    pub segment_size: usize,
    /// Schedule bulk loads on first access
    pub warm_up: bool,
    /// Spine memory above which the largest assemblages are evicted (0 = unbounded)
    pub max_memory_bytes: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            segment_size: chronicle_storage::DEFAULT_SEGMENT_SIZE,
            warm_up: true,
            max_memory_bytes: 0,
        }
    }
}

/// Cache-through provider over a backing store
pub struct CacheThroughProvider {
    store: Arc<dyn BackingStore>,
    identifiers: Arc<IdentifierRegistry>,
    stamps: Arc<StampInterner>,
    paths: Arc<PathRegistry>,
    resolver: StampResolver,
    chronologies: DashMap<Nid, Arc<SpinedByteArrayMap>>,
    taxonomies: DashMap<Nid, Arc<TaxonomyCache>>,
    semantic_index: DashMap<Nid, Arc<Vec<Nid>>>,
    listeners: RwLock<Vec<Arc<dyn WriteListener>>>,
    registry_warm: Arc<AtomicBool>,
    taxonomy_warm: DashMap<Nid, Arc<AtomicBool>>,
    warm_ups: AtomicUsize,
    /// STAMPs interned or transitioned in memory whose persist failed
    unpersisted: Mutex<IntSet>,
    write_locks: Box<[Mutex<()>]>,
    pool: Option<Arc<BackgroundPool>>,
    config: ProviderConfig,
    me: Weak<CacheThroughProvider>,
}

impl CacheThroughProvider {
    /// Open over `store`
    ///
    /// Loads the identifier index, path origins and every persisted STAMP.
    /// Handles left uncommitted by a previous process are canceled. Warm-up
    /// runs on `pool` when given, inline otherwise.
    pub fn open(
        store: Arc<dyn BackingStore>,
        config: ProviderConfig,
        pool: Option<Arc<BackgroundPool>>,
    ) -> Result<Arc<Self>> {
        let identifiers = Arc::new(IdentifierRegistry::open(Arc::clone(&store))?);
        let paths = Arc::new(PathRegistry::open(Arc::clone(&store))?);
        let stamps = Arc::new(StampInterner::with_segment_size(config.segment_size));
        let restored = restore_stamps(store.as_ref(), &stamps)?;

        let provider = Arc::new_cyclic(|me| Self {
            resolver: StampResolver::new(Arc::clone(&stamps), Arc::clone(&paths)),
            store,
            identifiers,
            stamps,
            paths,
            chronologies: DashMap::new(),
            taxonomies: DashMap::new(),
            semantic_index: DashMap::new(),
            listeners: RwLock::new(Vec::new()),
            registry_warm: Arc::new(AtomicBool::new(false)),
            taxonomy_warm: DashMap::new(),
            warm_ups: AtomicUsize::new(0),
            unpersisted: Mutex::new(IntSet::new()),
            write_locks: (0..WRITE_STRIPES).map(|_| Mutex::new(())).collect(),
            pool,
            config,
            me: me.clone(),
        });

        let orphans = provider.stamps.uncommitted_sequences();
        if !orphans.is_empty() {
            let canceled = provider.stamps.cancel(&orphans);
            provider.persist_stamps(&canceled)?;
            warn!(target: "chronicle::stamp", canceled = canceled.len(), "Canceled STAMPs left uncommitted by a previous session");
        }
        info!(
            target: "chronicle::provider",
            store = provider.store.name(),
            stamps = restored,
            nids = provider.identifiers.nid_count(),
            "Opened provider"
        );
        Ok(provider)
    }

    /// Backing store
    pub fn store(&self) -> &Arc<dyn BackingStore> {
        &self.store
    }

    /// Identifier registry
    pub fn identifiers(&self) -> &Arc<IdentifierRegistry> {
        &self.identifiers
    }

    /// STAMP interner
    pub fn stamps(&self) -> &Arc<StampInterner> {
        &self.stamps
    }

    /// Path registry
    pub fn paths(&self) -> &Arc<PathRegistry> {
        &self.paths
    }

    /// Resolver bound to this provider's STAMPs and paths
    pub fn resolver(&self) -> &StampResolver {
        &self.resolver
    }

    /// Provider settings
    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    // ========================================================================
    // Identifiers
    // ========================================================================

    /// Nid for a UUID list, assigning one if none is bound
    pub fn assign_nid(&self, uuids: &[Uuid]) -> Result<Nid> {
        self.identifiers.assign_nid(uuids)
    }

    /// Assemblage of `nid`
    ///
    /// The first call schedules a one-shot bulk load of every assemblage
    /// membership.
    pub fn assemblage_nid(&self, nid: Nid) -> Result<Option<Nid>> {
        self.warm_registry();
        self.identifiers.assemblage_nid(nid)
    }

    /// Schedule the membership bulk load unless it already ran
    pub fn warm_registry(&self) {
        self.schedule_warm_up(Arc::clone(&self.registry_warm), "warm-up-registry", |provider| {
            provider.identifiers.load_all()
        });
    }

    /// Member nids of `assemblage`
    pub fn nids_for_assemblage(&self, assemblage: Nid) -> Result<Vec<Nid>> {
        Ok(self.identifiers.nids_for_assemblage(assemblage)?.to_vec())
    }

    // ========================================================================
    // STAMPs
    // ========================================================================

    /// Handle for a STAMP tuple, persisting it if new
    pub fn stamp_sequence(
        &self,
        status: Status,
        time: i64,
        author: Nid,
        module: Nid,
        path: Nid,
    ) -> Result<StampSequence> {
        self.flush_unpersisted()?;
        let (sequence, created) = self
            .stamps
            .intern(Stamp::new(status, time, author, module, path))?;
        if created {
            self.persist_stamps(&[sequence].into_iter().collect())?;
        }
        Ok(sequence)
    }

    /// Tuple for `sequence`
    pub fn stamp(&self, sequence: StampSequence) -> Option<Stamp> {
        self.stamps.stamp(sequence)
    }

    /// Commit every uncommitted STAMP at `time` and persist the result
    ///
    /// The in-memory commit stands even when persisting fails; the failed
    /// handles are retried by the next [`sync`](Self::sync).
    pub fn commit(&self, time: i64) -> Result<IntSet> {
        let committed = self.stamps.commit(time)?;
        self.persist_stamps(&committed)?;
        Ok(committed)
    }

    /// Cancel `sequences` and persist the canceled tuples
    pub fn cancel(&self, sequences: &IntSet) -> Result<IntSet> {
        let canceled = self.stamps.cancel(sequences);
        self.persist_stamps(&canceled)?;
        Ok(canceled)
    }

    fn persist_stamps(&self, sequences: &IntSet) -> Result<()> {
        let sequences = sequences.to_vec();
        for (i, &sequence) in sequences.iter().enumerate() {
            let Some(stamp) = self.stamps.stamp(sequence) else {
                continue;
            };
            if let Err(e) = self
                .store
                .put(Keyspace::Stamp, sequence, vec![stamp.to_bytes().to_vec()])
            {
                self.unpersisted
                    .lock()
                    .extend(sequences[i..].iter().copied());
                warn!(target: "chronicle::stamp", sequence, error = %e, "STAMP persist failed, will retry");
                return Err(e);
            }
        }
        Ok(())
    }

    fn flush_unpersisted(&self) -> Result<()> {
        let retry = {
            let mut unpersisted = self.unpersisted.lock();
            if unpersisted.is_empty() {
                return Ok(());
            }
            std::mem::take(&mut *unpersisted)
        };
        self.persist_stamps(&retry)
    }

    // ========================================================================
    // Chronologies
    // ========================================================================

    fn write_lock(&self, nid: Nid) -> MutexGuard<'_, ()> {
        self.write_locks[nid_index(nid) % WRITE_STRIPES].lock()
    }

    fn chronology_spine(&self, assemblage: Nid) -> Arc<SpinedByteArrayMap> {
        Arc::clone(
            self.chronologies
                .entry(assemblage)
                .or_insert_with(|| Arc::new(SpinedByteArrayMap::with_segment_size(self.config.segment_size)))
                .value(),
        )
    }

    /// Store `chronology`, merging it with any existing versions
    ///
    /// Returns the merged chronology. When listeners fail the write has
    /// already happened and [`Error::ListenerFailures`] names each failure.
    pub fn put_chronology_data(&self, chronology: &ChronologyData) -> Result<ChronologyData> {
        let header = chronology.header();
        if header.object_type == ObjectType::Semantic && header.referenced_component_nid.is_none() {
            return Err(Error::invalid_input(format!(
                "semantic {} has no referenced component",
                header.nid
            )));
        }
        let element = self.identifiers.setup_nid(
            header.nid,
            header.assemblage_nid,
            header.object_type,
            header.version_type,
        )?;
        let index = element as usize;

        let merged = {
            let _guard = self.write_lock(header.nid);
            let spine = self.chronology_spine(header.assemblage_nid);
            let existing = match spine.get(index) {
                Some(blocks) => Some(ChronologyData::from_blocks(&blocks)?),
                None => self
                    .store
                    .get(Keyspace::Chronology, header.nid)?
                    .map(|blocks| ChronologyData::from_blocks(&blocks))
                    .transpose()?,
            };
            let merged = match existing {
                Some(existing) => existing.merge(chronology)?,
                None => chronology.clone(),
            };
            let blocks = merged.to_blocks()?;
            self.store.put(Keyspace::Chronology, header.nid, blocks.clone())?;
            spine.put(index, blocks)?;
            merged
        };

        if let Some(component) = header.referenced_component_nid {
            self.index_semantic(component, header.nid)?;
        }
        self.enforce_memory_budget();
        self.notify_listeners(&merged)?;
        Ok(merged)
    }

    /// Stored blocks of `nid`: the header block followed by one block per version
    pub fn chronology_blocks(&self, nid: Nid) -> Result<Option<Arc<Blocks>>> {
        let Some(membership) = self.identifiers.membership(nid)? else {
            return Ok(None);
        };
        let index = membership.element_sequence as usize;
        if let Some(spine) = self.chronologies.get(&membership.assemblage_nid) {
            if let Some(blocks) = spine.get(index) {
                return Ok(Some(blocks));
            }
        }

        let _guard = self.write_lock(nid);
        let spine = self.chronology_spine(membership.assemblage_nid);
        if let Some(blocks) = spine.get(index) {
            return Ok(Some(blocks));
        }
        match self.store.get(Keyspace::Chronology, nid)? {
            Some(blocks) => {
                debug!(target: "chronicle::provider", nid, assemblage = membership.assemblage_nid, "Filled chronology from store");
                Ok(Some(spine.put_if_absent(index, blocks)?))
            }
            None => Ok(None),
        }
    }

    /// Version blocks of `nid` in append order, without the header block
    pub fn chronology_version_data(&self, nid: Nid) -> Result<Option<Vec<Vec<u8>>>> {
        Ok(self
            .chronology_blocks(nid)?
            .map(|blocks| blocks.iter().skip(1).cloned().collect()))
    }

    /// Decoded chronology of `nid`
    pub fn chronology_data(&self, nid: Nid) -> Result<Option<ChronologyData>> {
        self.chronology_blocks(nid)?
            .map(|blocks| ChronologyData::from_blocks(&blocks))
            .transpose()
    }

    /// Latest version of `nid` visible to `filter`
    pub fn latest_version(&self, nid: Nid, filter: &StampFilter) -> Result<Option<VersionBlock>> {
        Ok(self
            .chronology_data(nid)?
            .and_then(|chronology| self.resolver.latest(chronology.versions(), filter).cloned()))
    }

    // ========================================================================
    // Semantic index
    // ========================================================================

    fn index_semantic(&self, component: Nid, semantic: Nid) -> Result<()> {
        let nids = loop {
            let current = self.store.get(Keyspace::SemanticIndex, component)?;
            let mut nids = match &current {
                Some(blocks) => single_int_array(Keyspace::SemanticIndex, component, blocks)?,
                None => Vec::new(),
            };
            match nids.binary_search(&semantic) {
                Ok(_) => break nids,
                Err(pos) => nids.insert(pos, semantic),
            }
            if self.store.compare_and_put(
                Keyspace::SemanticIndex,
                component,
                current.as_deref(),
                vec![encode_int_array(&nids)],
            )? {
                break nids;
            }
        };
        self.cache_semantic_nids(component, nids);
        Ok(())
    }

    /// The index only grows, so concurrent fills merge by union
    fn cache_semantic_nids(&self, component: Nid, nids: Vec<Nid>) -> Arc<Vec<Nid>> {
        let mut entry = self
            .semantic_index
            .entry(component)
            .or_insert_with(|| Arc::new(Vec::new()));
        if nids.iter().any(|n| entry.binary_search(n).is_err()) {
            let mut union: Vec<Nid> = entry.iter().chain(nids.iter()).copied().collect();
            union.sort_unstable();
            union.dedup();
            *entry = Arc::new(union);
        }
        Arc::clone(entry.value())
    }

    /// Semantics whose referenced component is `component`, ascending
    pub fn semantic_nids_for_component(&self, component: Nid) -> Result<Arc<Vec<Nid>>> {
        if let Some(nids) = self.semantic_index.get(&component) {
            return Ok(Arc::clone(nids.value()));
        }
        let nids = match self.store.get(Keyspace::SemanticIndex, component)? {
            Some(blocks) => single_int_array(Keyspace::SemanticIndex, component, &blocks)?,
            None => Vec::new(),
        };
        Ok(self.cache_semantic_nids(component, nids))
    }

    // ========================================================================
    // Taxonomy
    // ========================================================================

    fn taxonomy_spine(&self, assemblage: Nid) -> Arc<TaxonomyCache> {
        Arc::clone(
            self.taxonomies
                .entry(assemblage)
                .or_insert_with(|| Arc::new(TaxonomyCache::new(self.config.segment_size)))
                .value(),
        )
    }

    fn warm_taxonomy(&self, assemblage: Nid) {
        let flag = Arc::clone(
            self.taxonomy_warm
                .entry(assemblage)
                .or_insert_with(|| Arc::new(AtomicBool::new(false)))
                .value(),
        );
        self.schedule_warm_up(flag, "warm-up-taxonomy", move |provider| {
            provider.load_taxonomy(assemblage)
        });
    }

    fn load_taxonomy(&self, assemblage: Nid) -> Result<usize> {
        let spine = self.taxonomy_spine(assemblage);
        let space = Keyspace::Taxonomy(assemblage);
        let mut failure = None;
        let mut loaded = 0usize;
        self.store.scan(space, &mut |nid, blocks| {
            match single_int_array(space, nid, blocks).and_then(|data| spine.put_if_absent(nid, data)) {
                Ok(_) => {
                    loaded += 1;
                    true
                }
                Err(e) => {
                    failure = Some(e);
                    false
                }
            }
        })?;
        match failure {
            Some(e) => Err(e),
            None => Ok(loaded),
        }
    }

    /// Taxonomy record of `nid` in `assemblage`
    pub fn taxonomy_data(&self, assemblage: Nid, nid: Nid) -> Result<Option<Arc<Vec<i32>>>> {
        self.warm_taxonomy(assemblage);
        if let Some(spine) = self.taxonomies.get(&assemblage) {
            if let Some(data) = spine.get(nid) {
                return Ok(Some(data));
            }
        }

        let _guard = self.write_lock(nid);
        let spine = self.taxonomy_spine(assemblage);
        if let Some(data) = spine.get(nid) {
            return Ok(Some(data));
        }
        let space = Keyspace::Taxonomy(assemblage);
        match self.store.get(space, nid)? {
            Some(blocks) => {
                let data = single_int_array(space, nid, &blocks)?;
                Ok(Some(spine.put_if_absent(nid, data)?))
            }
            None => Ok(None),
        }
    }

    /// Merge `data` into the taxonomy record of `nid` and return the result
    ///
    /// The backing store is updated with compare-and-retry, then `data` is
    /// merged into the cached record. `merge` must be associative and
    /// commutative (see [`chronicle_core::merge_taxonomy_arrays`]).
    pub fn accumulate_and_get_taxonomy_data<F>(
        &self,
        assemblage: Nid,
        nid: Nid,
        data: Vec<i32>,
        merge: F,
    ) -> Result<Arc<Vec<i32>>>
    where
        F: Fn(&[i32], &[i32]) -> Vec<i32>,
    {
        self.warm_taxonomy(assemblage);
        let space = Keyspace::Taxonomy(assemblage);
        let mut attempts = 0u32;
        let stored = loop {
            attempts += 1;
            let current = self.store.get(space, nid)?;
            let existing = match &current {
                Some(blocks) => single_int_array(space, nid, blocks)?,
                None => Vec::new(),
            };
            let merged = merge(existing.as_slice(), data.as_slice());
            if self
                .store
                .compare_and_put(space, nid, current.as_deref(), vec![encode_int_array(&merged)])?
            {
                break merged;
            }
        };
        if attempts > 1 {
            debug!(target: "chronicle::provider", assemblage, nid, attempts, "Taxonomy merge retried");
        }

        let result = {
            let _guard = self.write_lock(nid);
            let spine = self.taxonomy_spine(assemblage);
            spine.accumulate_and_get(nid, stored, |cached, stored| {
                merge(cached.as_slice(), stored.as_slice())
            })?
        };
        self.enforce_memory_budget();
        Ok(result)
    }

    // ========================================================================
    // Warm-up
    // ========================================================================

    fn schedule_warm_up<F>(&self, flag: Arc<AtomicBool>, name: &'static str, load: F)
    where
        F: FnOnce(&CacheThroughProvider) -> Result<usize> + Send + 'static,
    {
        if !self.config.warm_up
            || flag
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
        {
            return;
        }

        let Some(pool) = &self.pool else {
            self.warm_ups.fetch_add(1, Ordering::AcqRel);
            run_warm_up(self, name, &flag, load);
            return;
        };
        let me = self.me.clone();
        let task_flag = Arc::clone(&flag);
        let submitted = pool.submit(TaskClass::WarmUp, name, move || {
            if let Some(provider) = me.upgrade() {
                run_warm_up(&provider, name, &task_flag, load);
            }
        });
        match submitted {
            Ok(()) => {
                self.warm_ups.fetch_add(1, Ordering::AcqRel);
            }
            Err(e) => {
                flag.store(false, Ordering::Release);
                warn!(target: "chronicle::provider", task = name, error = %e, "Warm-up not scheduled");
            }
        }
    }

    /// Warm-up tasks scheduled so far
    pub fn warm_up_count(&self) -> usize {
        self.warm_ups.load(Ordering::Acquire)
    }

    // ========================================================================
    // Listeners
    // ========================================================================

    /// Register a listener; listeners run in registration order
    pub fn add_write_listener(&self, listener: Arc<dyn WriteListener>) {
        self.listeners.write().push(listener);
    }

    fn notify_listeners(&self, chronology: &ChronologyData) -> Result<()> {
        let listeners: Vec<Arc<dyn WriteListener>> = self.listeners.read().clone();
        let mut failures = Vec::new();
        for listener in &listeners {
            if let Err(e) = listener.on_write(chronology) {
                warn!(
                    target: "chronicle::provider",
                    listener = listener.name(),
                    nid = chronology.nid(),
                    error = %e,
                    "Write listener failed"
                );
                failures.push(format!("{}: {}", listener.name(), e));
            }
        }
        if failures.is_empty() {
            Ok(())
        } else {
            Err(Error::ListenerFailures { failures })
        }
    }

    // ========================================================================
    // Memory
    // ========================================================================

    /// Estimated bytes held by every spine and the STAMP interner
    pub fn memory_in_use(&self) -> usize {
        self.spine_memory() + self.stamps.memory_in_use()
    }

    fn spine_memory(&self) -> usize {
        self.chronologies
            .iter()
            .map(|e| e.value().memory_in_use())
            .chain(self.taxonomies.iter().map(|e| e.value().memory_in_use()))
            .sum()
    }

    /// Drop the cached spines of `assemblage`
    ///
    /// Returns the estimated bytes released. The next access reloads from
    /// the backing store, and taxonomy warm-up may run again.
    pub fn evict_assemblage(&self, assemblage: Nid) -> usize {
        let _stripes: Vec<MutexGuard<'_, ()>> = self.write_locks.iter().map(|l| l.lock()).collect();
        let mut released = 0;
        if let Some((_, spine)) = self.chronologies.remove(&assemblage) {
            released += spine.memory_in_use();
        }
        if let Some((_, spine)) = self.taxonomies.remove(&assemblage) {
            released += spine.memory_in_use();
        }
        if let Some(flag) = self.taxonomy_warm.get(&assemblage) {
            flag.store(false, Ordering::Release);
        }
        released
    }

    /// Evict the largest assemblages until spine memory fits the budget
    fn enforce_memory_budget(&self) {
        let budget = self.config.max_memory_bytes as usize;
        if budget == 0 {
            return;
        }
        let mut in_use = self.spine_memory();
        if in_use <= budget {
            return;
        }

        let mut sizes: Vec<(Nid, usize)> = Vec::new();
        for entry in self.chronologies.iter() {
            sizes.push((*entry.key(), entry.value().memory_in_use()));
        }
        for entry in self.taxonomies.iter() {
            match sizes.iter_mut().find(|(nid, _)| nid == entry.key()) {
                Some((_, size)) => *size += entry.value().memory_in_use(),
                None => sizes.push((*entry.key(), entry.value().memory_in_use())),
            }
        }
        sizes.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));

        for (assemblage, _) in sizes {
            if in_use <= budget {
                break;
            }
            let released = self.evict_assemblage(assemblage);
            in_use = in_use.saturating_sub(released);
            warn!(
                target: "chronicle::provider",
                assemblage,
                released,
                budget,
                "Evicted assemblage over cache budget"
            );
        }
    }

    /// Persist pending STAMPs and checkpoint the backing store
    pub fn sync(&self) -> Result<()> {
        self.flush_unpersisted()?;
        self.store.sync()
    }
}

impl std::fmt::Debug for CacheThroughProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheThroughProvider")
            .field("store", &self.store.name())
            .field("chronology_assemblages", &self.chronologies.len())
            .field("taxonomy_assemblages", &self.taxonomies.len())
            .field("listeners", &self.listeners.read().len())
            .finish()
    }
}

/// Taxonomy records of one assemblage, each nid mapped to a dense spine slot
struct TaxonomyCache {
    slots: DashMap<Nid, usize>,
    next_slot: AtomicUsize,
    records: SpinedIntArrayMap,
}

impl TaxonomyCache {
    fn new(segment_size: usize) -> Self {
        Self {
            slots: DashMap::new(),
            next_slot: AtomicUsize::new(0),
            records: SpinedIntArrayMap::with_segment_size(segment_size),
        }
    }

    fn get(&self, nid: Nid) -> Option<Arc<Vec<i32>>> {
        let slot = *self.slots.get(&nid)?;
        self.records.get(slot)
    }

    fn slot(&self, nid: Nid) -> usize {
        *self
            .slots
            .entry(nid)
            .or_insert_with(|| self.next_slot.fetch_add(1, Ordering::AcqRel))
    }

    fn put_if_absent(&self, nid: Nid, data: Vec<i32>) -> Result<Arc<Vec<i32>>> {
        self.records.put_if_absent(self.slot(nid), data)
    }

    fn accumulate_and_get<F>(&self, nid: Nid, data: Vec<i32>, merge: F) -> Result<Arc<Vec<i32>>>
    where
        F: FnOnce(&Vec<i32>, Vec<i32>) -> Vec<i32>,
    {
        self.records.accumulate_and_get(self.slot(nid), data, merge)
    }

    fn slot_count(&self) -> usize {
        self.next_slot.load(Ordering::Acquire)
    }

    fn memory_in_use(&self) -> usize {
        self.records.memory_in_use() + self.slots.len() * std::mem::size_of::<(Nid, usize)>()
    }
}

fn run_warm_up<F>(provider: &CacheThroughProvider, name: &'static str, flag: &AtomicBool, load: F)
where
    F: FnOnce(&CacheThroughProvider) -> Result<usize>,
{
    match load(provider) {
        Ok(loaded) => {
            debug!(target: "chronicle::provider", task = name, loaded, "Warm-up finished");
        }
        Err(e) => {
            // Let the next access try again
            flag.store(false, Ordering::Release);
            warn!(target: "chronicle::provider", task = name, error = %e, "Warm-up failed");
        }
    }
}

fn single_int_array(space: Keyspace, key: i32, blocks: &[Vec<u8>]) -> Result<Vec<i32>> {
    match blocks {
        [block] => decode_int_array(block),
        [] => Ok(Vec::new()),
        _ => Err(Error::Corruption(format!(
            "{} key {} holds {} blocks, expected one int array",
            space,
            key,
            blocks.len()
        ))),
    }
}

fn restore_stamps(store: &dyn BackingStore, stamps: &StampInterner) -> Result<usize> {
    let mut failure = None;
    let mut restored = 0usize;
    store.scan(Keyspace::Stamp, &mut |sequence, blocks| {
        let parsed = match blocks {
            [block] if block.len() == STAMP_BYTES => Stamp::from_bytes(block),
            _ => Err(Error::Corruption(format!(
                "STAMP record {} is not a single {}-byte block",
                sequence, STAMP_BYTES
            ))),
        };
        match parsed.and_then(|stamp| stamps.restore(sequence, stamp)) {
            Ok(()) => {
                restored += 1;
                true
            }
            Err(e) => {
                failure = Some(e);
                false
            }
        }
    })?;
    match failure {
        Some(e) => Err(e),
        None => Ok(restored),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chronicle_core::{
        merge_taxonomy_arrays, ChronologyHeader, StatusSet, StampPosition, TaxonomyRecord,
        VersionType, UNCOMMITTED_TIME,
    };
    use chronicle_durability::{FaultyBackingStore, MemoryBackingStore};

    const CONCEPTS: Nid = -1_000;
    const DESCRIPTIONS: Nid = -1_001;
    const STATED: Nid = -1_002;
    const AUTHOR: Nid = -1_003;
    const MODULE: Nid = -1_004;
    const PATH: Nid = -1_005;

    fn provider() -> Arc<CacheThroughProvider> {
        CacheThroughProvider::open(
            Arc::new(MemoryBackingStore::new()),
            ProviderConfig {
                warm_up: false,
                ..ProviderConfig::default()
            },
            None,
        )
        .unwrap()
    }

    fn concept(nid: Nid) -> ChronologyData {
        ChronologyData::new(ChronologyHeader {
            nid,
            assemblage_nid: CONCEPTS,
            object_type: ObjectType::Concept,
            version_type: VersionType::Concept,
            uuids: vec![Uuid::new_v4()],
            referenced_component_nid: None,
        })
    }

    fn description(nid: Nid, concept: Nid) -> ChronologyData {
        ChronologyData::new(ChronologyHeader {
            nid,
            assemblage_nid: DESCRIPTIONS,
            object_type: ObjectType::Semantic,
            version_type: VersionType::Description,
            uuids: vec![Uuid::new_v4()],
            referenced_component_nid: Some(concept),
        })
    }

    #[test]
    fn test_put_then_read_merges_versions() {
        let provider = provider();
        let s1 = provider.stamp_sequence(Status::Active, 100, AUTHOR, MODULE, PATH).unwrap();
        let s2 = provider.stamp_sequence(Status::Active, 200, AUTHOR, MODULE, PATH).unwrap();

        let mut first = concept(7);
        first.add_version(s1, b"one".to_vec());
        provider.put_chronology_data(&first).unwrap();

        let mut second = first.clone();
        second.add_version(s2, b"two".to_vec());
        let merged = provider.put_chronology_data(&second).unwrap();
        assert_eq!(merged.versions().len(), 2);

        let read = provider.chronology_data(7).unwrap().unwrap();
        assert_eq!(read, merged);
        assert_eq!(
            provider.chronology_version_data(7).unwrap().unwrap(),
            vec![
                VersionBlock::new(s1, b"one".to_vec()).to_bytes(),
                VersionBlock::new(s2, b"two".to_vec()).to_bytes(),
            ]
        );
        assert_eq!(provider.assemblage_nid(7).unwrap(), Some(CONCEPTS));
        assert_eq!(provider.nids_for_assemblage(CONCEPTS).unwrap(), vec![7]);
    }

    #[test]
    fn test_unknown_nid_is_absent() {
        let provider = provider();
        assert!(provider.chronology_data(12345).unwrap().is_none());
        assert!(provider.taxonomy_data(STATED, 12345).unwrap().is_none());
    }

    #[test]
    fn test_semantic_index() {
        let provider = provider();
        let s = provider.stamp_sequence(Status::Active, 1, AUTHOR, MODULE, PATH).unwrap();
        let mut c = concept(1);
        c.add_version(s, Vec::new());
        provider.put_chronology_data(&c).unwrap();
        for nid in [30, 10, 20] {
            let mut d = description(nid, 1);
            d.add_version(s, b"text".to_vec());
            provider.put_chronology_data(&d).unwrap();
        }
        assert_eq!(*provider.semantic_nids_for_component(1).unwrap(), vec![10, 20, 30]);
        assert!(provider.semantic_nids_for_component(2).unwrap().is_empty());
    }

    #[test]
    fn test_semantic_without_referenced_component_rejected() {
        let provider = provider();
        let d = ChronologyData::new(ChronologyHeader {
            referenced_component_nid: None,
            ..description(5, 1).header().clone()
        });
        assert!(matches!(
            provider.put_chronology_data(&d),
            Err(Error::InvalidInput(_))
        ));
    }

    #[test]
    fn test_accumulate_taxonomy_is_union() {
        let provider = provider();
        let mut a = TaxonomyRecord::new();
        a.add_parent(-50, 1);
        let mut b = TaxonomyRecord::new();
        b.add_child(-60, 2);

        provider
            .accumulate_and_get_taxonomy_data(STATED, 9, a.to_array(), merge_taxonomy_arrays)
            .unwrap();
        let merged = provider
            .accumulate_and_get_taxonomy_data(STATED, 9, b.to_array(), merge_taxonomy_arrays)
            .unwrap();
        let record = TaxonomyRecord::from_array(&merged).unwrap();
        assert_eq!(record.edges().len(), 2);

        assert!(provider.evict_assemblage(STATED) > 0);
        let reloaded = provider.taxonomy_data(STATED, 9).unwrap().unwrap();
        assert_eq!(reloaded, merged);
    }

    #[test]
    fn test_taxonomy_records_use_dense_slots_for_any_nid() {
        let provider = CacheThroughProvider::open(
            Arc::new(MemoryBackingStore::new()),
            ProviderConfig {
                segment_size: 1,
                warm_up: false,
                ..ProviderConfig::default()
            },
            None,
        )
        .unwrap();
        let nids = [i32::MAX, 0, i32::MIN + 1, 12345];
        for (i, &nid) in nids.iter().enumerate() {
            let mut record = TaxonomyRecord::new();
            record.add_parent(-(i as Nid) - 10, 1);
            provider
                .accumulate_and_get_taxonomy_data(STATED, nid, record.to_array(), merge_taxonomy_arrays)
                .unwrap();
        }
        let cache = Arc::clone(provider.taxonomies.get(&STATED).unwrap().value());
        assert_eq!(cache.slot_count(), nids.len());
        assert_eq!(cache.records.segment_count(), nids.len());

        provider.evict_assemblage(STATED);
        for (i, &nid) in nids.iter().enumerate() {
            let record = TaxonomyRecord::from_array(&provider.taxonomy_data(STATED, nid).unwrap().unwrap()).unwrap();
            assert_eq!(record.edges()[0].target, -(i as Nid) - 10);
        }
    }

    #[test]
    fn test_write_failure_leaves_cache_untouched() {
        let faulty = Arc::new(FaultyBackingStore::new(Arc::new(MemoryBackingStore::new())));
        let provider = CacheThroughProvider::open(
            faulty.clone(),
            ProviderConfig {
                warm_up: false,
                ..ProviderConfig::default()
            },
            None,
        )
        .unwrap();
        let s = provider.stamp_sequence(Status::Active, 5, AUTHOR, MODULE, PATH).unwrap();
        let mut c = concept(3);
        c.add_version(s, b"v1".to_vec());
        provider.put_chronology_data(&c).unwrap();

        let mut update = c.clone();
        update.add_version(s + 1, b"v2".to_vec());
        // setup_nid is a no-op for a known nid, so the chronology put is the first write
        faulty.fail_next_writes(1);
        assert!(matches!(
            provider.put_chronology_data(&update),
            Err(Error::DataAccess(_))
        ));
        assert_eq!(provider.chronology_data(3).unwrap().unwrap().versions().len(), 1);

        faulty.set_offline(true);
        assert_eq!(provider.chronology_data(3).unwrap().unwrap(), c);
    }

    #[test]
    fn test_failed_stamp_persist_retried_on_sync() {
        let inner = Arc::new(MemoryBackingStore::new());
        let faulty = Arc::new(FaultyBackingStore::new(inner.clone()));
        let provider = CacheThroughProvider::open(faulty.clone(), ProviderConfig::default(), None).unwrap();

        faulty.fail_next_writes(1);
        assert!(provider
            .stamp_sequence(Status::Active, 10, AUTHOR, MODULE, PATH)
            .is_err());
        assert_eq!(inner.len(Keyspace::Stamp), 0);
        provider.sync().unwrap();
        assert_eq!(inner.len(Keyspace::Stamp), 1);
    }

    #[test]
    fn test_stamps_survive_reopen_and_orphans_are_canceled() {
        let store: Arc<dyn BackingStore> = Arc::new(MemoryBackingStore::new());
        let committed_handle;
        let orphan;
        {
            let provider = CacheThroughProvider::open(Arc::clone(&store), ProviderConfig::default(), None).unwrap();
            committed_handle = provider
                .stamp_sequence(Status::Active, UNCOMMITTED_TIME, AUTHOR, MODULE, PATH)
                .unwrap();
            provider.commit(500).unwrap();
            orphan = provider
                .stamp_sequence(Status::Inactive, UNCOMMITTED_TIME, AUTHOR, MODULE, PATH)
                .unwrap();
        }
        let provider = CacheThroughProvider::open(store, ProviderConfig::default(), None).unwrap();
        assert_eq!(provider.stamp(committed_handle).unwrap().time, 500);
        assert!(provider.stamp(orphan).unwrap().is_canceled());
        let fresh = provider
            .stamp_sequence(Status::Inactive, UNCOMMITTED_TIME, AUTHOR, MODULE, PATH)
            .unwrap();
        assert!(fresh > orphan);
    }

    #[test]
    fn test_latest_version() {
        let provider = provider();
        let s1 = provider.stamp_sequence(Status::Active, 100, AUTHOR, MODULE, PATH).unwrap();
        let s2 = provider.stamp_sequence(Status::Inactive, 200, AUTHOR, MODULE, PATH).unwrap();
        let mut c = concept(4);
        c.add_version(s1, b"a".to_vec()).add_version(s2, b"b".to_vec());
        provider.put_chronology_data(&c).unwrap();

        let active = StampFilter::new(StatusSet::ACTIVE_ONLY, StampPosition::latest(PATH));
        assert_eq!(provider.latest_version(4, &active).unwrap().unwrap().data, b"a");
        let any = active.with_allowed_statuses(StatusSet::ACTIVE_AND_INACTIVE);
        assert_eq!(provider.latest_version(4, &any).unwrap().unwrap().data, b"b");
        assert!(provider.latest_version(99, &any).unwrap().is_none());
    }

    #[test]
    fn test_memory_budget_evicts() {
        let provider = CacheThroughProvider::open(
            Arc::new(MemoryBackingStore::new()),
            ProviderConfig {
                segment_size: 8,
                warm_up: false,
                max_memory_bytes: 1,
            },
            None,
        )
        .unwrap();
        let s = provider.stamp_sequence(Status::Active, 1, AUTHOR, MODULE, PATH).unwrap();
        let mut c = concept(8);
        c.add_version(s, vec![0u8; 4096]);
        provider.put_chronology_data(&c).unwrap();
        assert_eq!(provider.spine_memory(), 0);
        // still readable through the store
        assert_eq!(provider.chronology_data(8).unwrap().unwrap(), c);
    }
}
