//! Store configuration via `chronicle.toml`
//!
//! On first open a commented default `chronicle.toml` is written to the data
//! directory. To change settings, edit the file and reopen.

use chronicle_core::{Error, Result};
use chronicle_durability::DurabilityMode;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Config file name placed in the data directory
pub const CONFIG_FILE_NAME: &str = "chronicle.toml";

/// Cache tier settings, the `[cache]` section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CacheConfig {
    /// Spine memory above which cold assemblages are evicted (0 = unbounded)
    #[serde(default)]
    pub max_memory_bytes: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { max_memory_bytes: 0 }
    }
}

/// Store configuration loaded from `chronicle.toml`
///
/// # Example
///
/// ```toml
/// durability = "standard"
/// segment_size = 1024
/// warm_up = true
/// background_threads = 2
///
/// [cache]
/// max_memory_bytes = 268435456
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChronicleConfig {
    /// `"standard"`, `"always"` or `"cache"`
    #[serde(default = "default_durability")]
    pub durability: String,
    /// Slots per spine segment
    #[serde(default = "default_segment_size")]
    pub segment_size: usize,
    /// Schedule a bulk load the first time an assemblage is touched
    #[serde(default = "default_warm_up")]
    pub warm_up: bool,
    /// Background worker threads
    #[serde(default = "default_background_threads")]
    pub background_threads: usize,
    /// Cache tier
    #[serde(default)]
    pub cache: CacheConfig,
}

fn default_durability() -> String {
    "standard".to_string()
}

fn default_segment_size() -> usize {
    chronicle_storage::DEFAULT_SEGMENT_SIZE
}

fn default_warm_up() -> bool {
    true
}

fn default_background_threads() -> usize {
    2
}

impl Default for ChronicleConfig {
    fn default() -> Self {
        Self {
            durability: default_durability(),
            segment_size: default_segment_size(),
            warm_up: default_warm_up(),
            background_threads: default_background_threads(),
            cache: CacheConfig::default(),
        }
    }
}

impl ChronicleConfig {
    /// In-memory configuration: no files, no fsync
    pub fn ephemeral() -> Self {
        Self {
            durability: "cache".to_string(),
            ..Self::default()
        }
    }

    /// Parse the durability string
    pub fn durability_mode(&self) -> Result<DurabilityMode> {
        match self.durability.as_str() {
            "standard" => Ok(DurabilityMode::standard_default()),
            "always" => Ok(DurabilityMode::Always),
            "cache" => Ok(DurabilityMode::Cache),
            other => Err(Error::invalid_input(format!(
                "Invalid durability mode '{}' in {}. Expected \"standard\", \"always\" or \"cache\".",
                other, CONFIG_FILE_NAME
            ))),
        }
    }

    /// Check every field
    pub fn validate(&self) -> Result<()> {
        self.durability_mode()?;
        if self.segment_size == 0 {
            return Err(Error::invalid_input("segment_size must be at least 1"));
        }
        if self.background_threads == 0 {
            return Err(Error::invalid_input("background_threads must be at least 1"));
        }
        Ok(())
    }

    /// Default config file content with comments
    pub fn default_toml() -> &'static str {
        r#"# Chronicle store configuration
#
# Durability mode: "standard" (default), "always" or "cache"
#   "standard" = periodic fsync (~100ms), may lose the last interval on crash
#   "always"   = fsync every write
#   "cache"    = nothing written to disk
durability = "standard"

# Slots per spine segment
segment_size = 1024

# Bulk-load an assemblage in the background the first time it is touched
warm_up = true

# Background worker threads (warm-up, compaction)
background_threads = 2

[cache]
# Evict cold assemblage spines above this many bytes (0 = unbounded)
max_memory_bytes = 0
"#
    }

    /// Read and validate a config file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: ChronicleConfig = toml::from_str(&content).map_err(|e| {
            Error::invalid_input(format!(
                "Failed to parse config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Write the default config file unless one exists
    pub fn write_default_if_missing(path: &Path) -> Result<()> {
        if !path.exists() {
            std::fs::write(path, Self::default_toml())?;
        }
        Ok(())
    }

    /// Serialize to TOML at `path`
    pub fn write_to_file(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| Error::SerializationError(format!("config: {}", e)))?;
        std::fs::write(path, content)?;
        Ok(())
    }
}
