//! Chronicle aggregate and open/close logic
//!
//! [`Chronicle`] owns everything one store needs: the backing store, the
//! provider (and through it the STAMP interner, identifier registry and path
//! registry), the background pool and the service lifecycle. There is no
//! process-wide state; open as many as you like and pass them explicitly.
//!
//! # Data directory
//!
//! ```text
//! <dir>/chronicle.toml   configuration, written with defaults on first open
//! <dir>/chronicle.log    record log (absent in "cache" durability)
//! ```

pub mod config;

pub use config::{CacheConfig, ChronicleConfig, CONFIG_FILE_NAME};

use crate::background::{BackgroundPool, PoolStats, TaskClass};
use crate::lifecycle::Lifecycle;
use crate::listener::WriteListener;
use crate::provider::{CacheThroughProvider, ProviderConfig};
use crate::taxonomy::TaxonomySnapshot;
use chronicle_core::{
    ChronologyData, IntSet, Nid, Result, StampFilter, StampPosition, StampSequence, Status,
    VersionBlock, ViewCoordinate,
};
use chronicle_durability::{BackingStore, CompactInfo, LogBackingStore, MemoryBackingStore};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Record log file name inside the data directory
pub const LOG_FILE_NAME: &str = "chronicle.log";

const MAX_QUEUED_TASKS: usize = 1024;

/// One open terminology store
pub struct Chronicle {
    provider: Arc<CacheThroughProvider>,
    pool: Arc<BackgroundPool>,
    log: Option<Arc<LogBackingStore>>,
    lifecycle: Mutex<Lifecycle>,
    config: ChronicleConfig,
    data_dir: Option<PathBuf>,
}

impl Chronicle {
    /// Open the store in `dir`, creating it and its `chronicle.toml` if needed
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let data_dir = dir.as_ref();
        std::fs::create_dir_all(data_dir)?;
        let config_path = data_dir.join(CONFIG_FILE_NAME);
        ChronicleConfig::write_default_if_missing(&config_path)?;
        let config = ChronicleConfig::from_file(&config_path)?;
        Self::open_with_config(data_dir, config)
    }

    /// Open the store in `dir` with an explicit configuration
    ///
    /// The configuration is written to `chronicle.toml` so later
    /// [`open`](Self::open) calls use the same settings.
    pub fn open_with_config(dir: impl AsRef<Path>, config: ChronicleConfig) -> Result<Self> {
        config.validate()?;
        let data_dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&data_dir)?;
        config.write_to_file(&data_dir.join(CONFIG_FILE_NAME))?;

        let mode = config.durability_mode()?;
        let (store, log): (Arc<dyn BackingStore>, Option<Arc<LogBackingStore>>) = if mode.requires_log() {
            let log = Arc::new(LogBackingStore::open(data_dir.join(LOG_FILE_NAME), mode)?);
            (log.clone(), Some(log))
        } else {
            (Arc::new(MemoryBackingStore::new()), None)
        };
        Self::assemble(store, log, config, Some(data_dir))
    }

    /// In-memory store with default settings
    pub fn ephemeral() -> Result<Self> {
        Self::with_store(Arc::new(MemoryBackingStore::new()), ChronicleConfig::ephemeral())
    }

    /// Store over a caller-supplied backing store
    pub fn with_store(store: Arc<dyn BackingStore>, config: ChronicleConfig) -> Result<Self> {
        config.validate()?;
        Self::assemble(store, None, config, None)
    }

    fn assemble(
        store: Arc<dyn BackingStore>,
        log: Option<Arc<LogBackingStore>>,
        config: ChronicleConfig,
        data_dir: Option<PathBuf>,
    ) -> Result<Self> {
        let pool = Arc::new(BackgroundPool::new(config.background_threads, MAX_QUEUED_TASKS)?);
        let provider = CacheThroughProvider::open(
            store,
            ProviderConfig {
                segment_size: config.segment_size,
                warm_up: config.warm_up,
                max_memory_bytes: config.cache.max_memory_bytes,
            },
            Some(Arc::clone(&pool)),
        )?;

        let mut lifecycle = Lifecycle::new();
        {
            let stop_pool = Arc::clone(&pool);
            lifecycle.add(
                "background",
                || Ok(()),
                move || {
                    stop_pool.shutdown();
                    Ok(())
                },
            );
        }
        {
            let warm = Arc::clone(&provider);
            let sync = Arc::clone(&provider);
            let drain = Arc::clone(&pool);
            lifecycle.add(
                "provider",
                move || {
                    warm.warm_registry();
                    Ok(())
                },
                move || {
                    drain.drain();
                    sync.sync()
                },
            );
        }
        lifecycle.start()?;

        info!(
            target: "chronicle::db",
            durability = %config.durability,
            data_dir = ?data_dir,
            "Opened chronicle"
        );
        Ok(Self {
            provider,
            pool,
            log,
            lifecycle: Mutex::new(lifecycle),
            config,
            data_dir,
        })
    }

    /// Provider behind this store
    pub fn provider(&self) -> &Arc<CacheThroughProvider> {
        &self.provider
    }

    /// Settings this store was opened with
    pub fn config(&self) -> &ChronicleConfig {
        &self.config
    }

    /// Data directory, `None` for stores without one
    pub fn data_dir(&self) -> Option<&Path> {
        self.data_dir.as_deref()
    }

    // ========================================================================
    // Identifiers and STAMPs
    // ========================================================================

    /// Nid for a UUID list, assigning one if none is bound
    pub fn assign_nid(&self, uuids: &[Uuid]) -> Result<Nid> {
        self.provider.assign_nid(uuids)
    }

    /// Handle for a STAMP tuple
    pub fn stamp_sequence(
        &self,
        status: Status,
        time: i64,
        author: Nid,
        module: Nid,
        path: Nid,
    ) -> Result<StampSequence> {
        self.provider.stamp_sequence(status, time, author, module, path)
    }

    /// Commit every uncommitted STAMP at `time`
    pub fn commit(&self, time: i64) -> Result<IntSet> {
        self.provider.commit(time)
    }

    /// Cancel uncommitted STAMPs
    pub fn cancel(&self, sequences: &IntSet) -> Result<IntSet> {
        self.provider.cancel(sequences)
    }

    /// Record that `path` branches from `origin`
    pub fn add_path_origin(&self, path: Nid, origin: StampPosition) -> Result<()> {
        self.provider.paths().add_origin(path, origin)
    }

    // ========================================================================
    // Chronologies
    // ========================================================================

    /// Store a chronology, merging with existing versions
    pub fn put_chronology_data(&self, chronology: &ChronologyData) -> Result<ChronologyData> {
        self.provider.put_chronology_data(chronology)
    }

    /// Chronology of `nid`
    pub fn chronology_data(&self, nid: Nid) -> Result<Option<ChronologyData>> {
        self.provider.chronology_data(nid)
    }

    /// Version blocks of `nid`
    pub fn chronology_version_data(&self, nid: Nid) -> Result<Option<Vec<Vec<u8>>>> {
        self.provider.chronology_version_data(nid)
    }

    /// Latest version of `nid` visible to `filter`
    pub fn latest_version(&self, nid: Nid, filter: &StampFilter) -> Result<Option<VersionBlock>> {
        self.provider.latest_version(nid, filter)
    }

    /// Semantics attached to `component`
    pub fn semantic_nids_for_component(&self, component: Nid) -> Result<Arc<Vec<Nid>>> {
        self.provider.semantic_nids_for_component(component)
    }

    /// Register a write listener
    pub fn add_write_listener(&self, listener: Arc<dyn WriteListener>) {
        self.provider.add_write_listener(listener)
    }

    /// Taxonomy as seen through `view`
    pub fn taxonomy(&self, view: ViewCoordinate) -> TaxonomySnapshot {
        TaxonomySnapshot::new(Arc::clone(&self.provider), view)
    }

    // ========================================================================
    // Maintenance
    // ========================================================================

    /// Persist pending STAMPs and checkpoint the backing store
    pub fn sync(&self) -> Result<()> {
        self.provider.sync()
    }

    /// Rewrite the record log with live entries only
    ///
    /// Returns `None` when the store has no log.
    pub fn compact(&self) -> Result<Option<CompactInfo>> {
        match &self.log {
            Some(log) => {
                self.provider.sync()?;
                log.compact().map(Some)
            }
            None => Ok(None),
        }
    }

    /// Queue a log compaction on the background pool
    pub fn schedule_compaction(&self) -> Result<()> {
        let Some(log) = self.log.clone() else {
            return Ok(());
        };
        self.pool.submit(TaskClass::Maintenance, "compact-log", move || {
            if let Err(e) = log.compact() {
                warn!(target: "chronicle::db", error = %e, "Background compaction failed");
            }
        })
    }

    /// Background pool metrics
    pub fn background_stats(&self) -> PoolStats {
        self.pool.stats()
    }

    /// Wait for queued background work
    pub fn drain_background(&self) {
        self.pool.drain();
    }

    /// Stop background work and checkpoint
    ///
    /// Safe to call more than once.
    pub fn shutdown(&self) -> Result<()> {
        self.lifecycle.lock().shutdown()
    }
}

impl std::fmt::Debug for Chronicle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Chronicle")
            .field("data_dir", &self.data_dir)
            .field("durability", &self.config.durability)
            .field("provider", &self.provider)
            .finish()
    }
}

impl Drop for Chronicle {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            warn!(target: "chronicle::db", error = %e, "Shutdown on drop failed");
        }
    }
}
