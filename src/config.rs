//! Cache configuration.
//!
//! [`CacheConfiguration`] is immutable once built. Use
//! [`CacheConfiguration::builder`] to set values, or deserialize one with
//! `serde` and pass it through [`CacheConfiguration::validate`].
//!
//! ```
//! use imgcache::config::{CacheConfiguration, CompressFormat, FixedMemoryBudget};
//!
//! let budget = FixedMemoryBudget::mebibytes(64);
//! let config = CacheConfiguration::builder()
//!     .disk_cache_dir("/tmp/thumbs")
//!     .mem_cache_size_percent(0.25, &budget)
//!     .unwrap()
//!     .compress_format(CompressFormat::Png)
//!     .try_build()
//!     .unwrap();
//!
//! assert_eq!(config.mem_cache_size(), 16 * 1024 * 1024);
//! assert_eq!(config.disk_cache_size(), 20 * 1024 * 1024);
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

pub const DEFAULT_MEM_CACHE_SIZE: u64 = 8 * 1024 * 1024;
pub const DEFAULT_DISK_CACHE_SIZE: u64 = 20 * 1024 * 1024;
pub const DEFAULT_COMPRESS_QUALITY: u8 = 70;

/// Inclusive bounds accepted by
/// [`CacheConfigurationBuilder::mem_cache_size_percent`].
pub const MEM_PERCENT_MIN: f64 = 0.05;
pub const MEM_PERCENT_MAX: f64 = 0.8;

/// Encoding the disk tier uses when it writes images.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressFormat {
    #[default]
    Jpeg,
    Png,
    Webp,
}

/// Source of the per-process memory budget used for percentage sizing.
pub trait MemoryBudget {
    fn budget_bytes(&self) -> u64;
}

/// A memory budget known up front.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedMemoryBudget(u64);

impl FixedMemoryBudget {
    pub fn bytes(bytes: u64) -> Self {
        Self(bytes)
    }

    pub fn mebibytes(mib: u64) -> Self {
        Self(mib.saturating_mul(1024 * 1024))
    }
}

impl MemoryBudget for FixedMemoryBudget {
    fn budget_bytes(&self) -> u64 {
        self.0
    }
}

/// Settings shared by both tiers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfiguration {
    mem_cache_size: u64,
    disk_cache_size: u64,
    disk_cache_dir: Option<PathBuf>,
    compress_format: CompressFormat,
    compress_quality: u8,
    memory_cache_enabled: bool,
    disk_cache_enabled: bool,
    clear_disk_cache_on_start: bool,
    init_disk_cache_on_create: bool,
}

impl Default for CacheConfiguration {
    fn default() -> Self {
        Self {
            mem_cache_size: DEFAULT_MEM_CACHE_SIZE,
            disk_cache_size: DEFAULT_DISK_CACHE_SIZE,
            disk_cache_dir: None,
            compress_format: CompressFormat::Jpeg,
            compress_quality: DEFAULT_COMPRESS_QUALITY,
            memory_cache_enabled: true,
            disk_cache_enabled: true,
            clear_disk_cache_on_start: false,
            init_disk_cache_on_create: true,
        }
    }
}

impl CacheConfiguration {
    pub fn builder() -> CacheConfigurationBuilder {
        CacheConfigurationBuilder::default()
    }

    /// Memory tier budget in bytes.
    pub fn mem_cache_size(&self) -> u64 {
        self.mem_cache_size
    }

    /// Disk tier budget in bytes. Opening the disk tier also requires more
    /// usable space than this at the directory.
    pub fn disk_cache_size(&self) -> u64 {
        self.disk_cache_size
    }

    pub fn disk_cache_dir(&self) -> Option<&Path> {
        self.disk_cache_dir.as_deref()
    }

    pub fn compress_format(&self) -> CompressFormat {
        self.compress_format
    }

    pub fn compress_quality(&self) -> u8 {
        self.compress_quality
    }

    pub fn memory_cache_enabled(&self) -> bool {
        self.memory_cache_enabled
    }

    pub fn disk_cache_enabled(&self) -> bool {
        self.disk_cache_enabled
    }

    pub fn clear_disk_cache_on_start(&self) -> bool {
        self.clear_disk_cache_on_start
    }

    pub fn init_disk_cache_on_create(&self) -> bool {
        self.init_disk_cache_on_create
    }

    /// Checks the cross-field constraints `try_build` enforces.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.memory_cache_enabled && self.mem_cache_size == 0 {
            return Err(ConfigError::new("mem_cache_size must be > 0 when the memory cache is enabled"));
        }
        if self.disk_cache_enabled && self.disk_cache_size == 0 {
            return Err(ConfigError::new("disk_cache_size must be > 0 when the disk cache is enabled"));
        }
        if self.compress_quality > 100 {
            return Err(ConfigError::new(format!(
                "compress_quality must be in 0..=100, got {}",
                self.compress_quality
            )));
        }
        Ok(())
    }
}

/// Builder for [`CacheConfiguration`].
#[derive(Debug, Clone, Default)]
pub struct CacheConfigurationBuilder {
    config: CacheConfiguration,
}

impl CacheConfigurationBuilder {
    pub fn mem_cache_size(mut self, bytes: u64) -> Self {
        self.config.mem_cache_size = bytes;
        self
    }

    /// Sizes the memory tier as a fraction of `budget`.
    ///
    /// `percent` must lie in `[0.05, 0.8]`; the result is rounded to the
    /// nearest byte.
    ///
    /// An out-of-range or NaN `percent` is an invalid argument, reported as
    /// [`ConfigError`] like every other rejected configuration value. Through
    /// `?` it becomes [`CacheError::Config`](crate::error::CacheError::Config).
    pub fn mem_cache_size_percent(mut self, percent: f64, budget: &dyn MemoryBudget) -> Result<Self, ConfigError> {
        if !(MEM_PERCENT_MIN..=MEM_PERCENT_MAX).contains(&percent) {
            return Err(ConfigError::new(format!(
                "mem_cache_size_percent: percent must be between {MEM_PERCENT_MIN} and {MEM_PERCENT_MAX} (inclusive), got {percent}"
            )));
        }
        self.config.mem_cache_size = (percent * budget.budget_bytes() as f64).round() as u64;
        Ok(self)
    }

    pub fn disk_cache_size(mut self, bytes: u64) -> Self {
        self.config.disk_cache_size = bytes;
        self
    }

    pub fn disk_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.disk_cache_dir = Some(dir.into());
        self
    }

    pub fn compress_format(mut self, format: CompressFormat) -> Self {
        self.config.compress_format = format;
        self
    }

    pub fn compress_quality(mut self, quality: u8) -> Self {
        self.config.compress_quality = quality;
        self
    }

    pub fn memory_cache_enabled(mut self, enabled: bool) -> Self {
        self.config.memory_cache_enabled = enabled;
        self
    }

    pub fn disk_cache_enabled(mut self, enabled: bool) -> Self {
        self.config.disk_cache_enabled = enabled;
        self
    }

    pub fn clear_disk_cache_on_start(mut self, clear: bool) -> Self {
        self.config.clear_disk_cache_on_start = clear;
        self
    }

    /// Whether [`ImageCache::new`](crate::facade::ImageCache::new) opens the
    /// disk tier itself. When `false` the caller runs
    /// [`init_disk_cache`](crate::facade::ImageCache::init_disk_cache),
    /// usually on a background thread.
    pub fn init_disk_cache_on_create(mut self, init: bool) -> Self {
        self.config.init_disk_cache_on_create = init;
        self
    }

    pub fn try_build(self) -> Result<CacheConfiguration, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}
