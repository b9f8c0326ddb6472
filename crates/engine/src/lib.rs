//! Store engine for Chronicle
//!
//! This crate ties the lower layers together:
//! - Chronicle: the store aggregate with open/close and configuration
//! - CacheThroughProvider: spined caches in front of the backing store
//! - StampResolver: latest-version selection under a STAMP filter
//! - PathRegistry: path origins and ancestry
//! - TaxonomySnapshot: is-a queries under a view coordinate
//! - Background pool and service lifecycle
//!
//! Nothing here is global; every component is reached through the
//! [`Chronicle`] that owns it.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod background;
pub mod coordinate;
pub mod database;
pub mod lifecycle;
pub mod listener;
pub mod path;
pub mod provider;
pub mod resolver;
pub mod taxonomy;

pub use background::{BackgroundPool, PoolStats, TaskClass};
pub use coordinate::MutableStampCoordinate;
pub use database::{CacheConfig, Chronicle, ChronicleConfig, CONFIG_FILE_NAME, LOG_FILE_NAME};
pub use lifecycle::Lifecycle;
pub use listener::WriteListener;
pub use path::PathRegistry;
pub use provider::{CacheThroughProvider, ProviderConfig};
pub use resolver::{DescriptionCandidate, StampResolver};
pub use taxonomy::TaxonomySnapshot;
