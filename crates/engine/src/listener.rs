//! Write listeners
//!
//! Listeners run synchronously after every chronology write, in registration
//! order. Warm-up and replay may deliver the same chronology more than once,
//! so implementations must be idempotent.

use chronicle_core::{ChronologyData, Result};

/// Observer of committed chronology writes
pub trait WriteListener: Send + Sync {
    /// Name used in failure reports
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    /// Called after `chronology` reached the backing store and the cache
    fn on_write(&self, chronology: &ChronologyData) -> Result<()>;
}

impl<F> WriteListener for F
where
    F: Fn(&ChronologyData) -> Result<()> + Send + Sync,
{
    fn name(&self) -> &str {
        "closure"
    }

    fn on_write(&self, chronology: &ChronologyData) -> Result<()> {
        self(chronology)
    }
}
