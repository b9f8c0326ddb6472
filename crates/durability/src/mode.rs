//! Durability mode configuration
//!
//! Controls when the log-structured store fsyncs (Cache, Standard, Always).

use std::time::Duration;

/// Durability mode for backing-store writes
///
/// # Modes
///
/// | Mode | fsync | Data Loss Window |
/// |------|-------|-----------------|
/// | Cache | Never (ephemeral store, no files) | Everything |
/// | Always | Every put | Zero |
/// | Standard | Periodic | Up to interval/batch |
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DurabilityMode {
    /// Keep everything in memory; no log file is written
    Cache,

    /// fsync after every put
    Always,

    /// fsync every N puts OR every T milliseconds (the default)
    Standard {
        /// Maximum time between fsyncs in milliseconds
        interval_ms: u64,
        /// Maximum puts between fsyncs
        batch_size: usize,
    },
}

impl DurabilityMode {
    /// Whether this mode writes a log file
    pub fn requires_log(&self) -> bool {
        !matches!(self, DurabilityMode::Cache)
    }

    /// Whether every put must be fsynced before returning
    pub fn requires_immediate_fsync(&self) -> bool {
        matches!(self, DurabilityMode::Always)
    }

    /// Whether an fsync is due after `writes` puts and `elapsed` time
    pub fn sync_due(&self, writes: usize, elapsed: Duration) -> bool {
        match self {
            DurabilityMode::Cache => false,
            DurabilityMode::Always => writes > 0,
            DurabilityMode::Standard {
                interval_ms,
                batch_size,
            } => {
                writes > 0
                    && (writes >= *batch_size || elapsed >= Duration::from_millis(*interval_ms))
            }
        }
    }

    /// Human-readable description of the mode
    pub fn description(&self) -> &'static str {
        match self {
            DurabilityMode::Cache => "Cache (in memory only, all data lost on exit)",
            DurabilityMode::Always => "Always sync (safest, slowest)",
            DurabilityMode::Standard { .. } => "Standard (balanced speed/safety)",
        }
    }

    /// Standard mode with 100ms interval and 1000-put batches
    pub fn standard_default() -> Self {
        DurabilityMode::Standard {
            interval_ms: 100,
            batch_size: 1000,
        }
    }
}

impl Default for DurabilityMode {
    fn default() -> Self {
        Self::standard_default()
    }
}
