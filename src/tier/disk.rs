//! Contract for the durable tier, and the slot the memory tier reads it from.
//!
//! The on-disk format, directory layout, compression and the disk tier's own
//! eviction all live behind [`DiskTier`]. This crate only needs the four
//! operations below, plus a [`DiskTierFactory`] the facade uses to open a
//! store once the directory has been checked.
//!
//! The memory tier is built before the disk tier exists (opening it does
//! I/O and happens off the caller's thread), so both share a [`DiskSlot`]:
//! empty until the facade installs the opened store, read on every
//! promotion and hand-off.

use std::fmt;
use std::io;
use std::path::Path;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::config::CacheConfiguration;
use crate::error::Result;
use crate::key::CacheKey;

/// A bounded, persistent key-value store with its own eviction policy.
///
/// Every method may be called from hand-off tasks on background threads.
pub trait DiskTier<K, V>: Send + Sync {
    fn exists(&self, key: &K) -> bool;

    /// Reads a previously persisted value. Unreadable or corrupted entries
    /// are reported as `None`, never as an error.
    fn get(&self, key: &K) -> Option<Arc<V>>;

    /// Persists `value`. Concurrent puts of one key: last writer wins.
    fn put(&self, key: &K, value: &V);

    /// Removes every persisted entry.
    fn clean(&self);
}

/// Opens disk tiers for the facade.
pub trait DiskTierFactory<V>: Send + Sync {
    /// Bytes available to the cache at `dir`.
    fn usable_space(&self, dir: &Path) -> io::Result<u64>;

    /// Opens the store described by `config`. Called at most once per
    /// facade, with the directory already created.
    fn open(&self, config: &CacheConfiguration) -> Result<Arc<dyn DiskTier<CacheKey, V>>>;
}

/// Shared, late-bound handle to the disk tier.
pub struct DiskSlot<K, V> {
    inner: Arc<RwLock<Option<Arc<dyn DiskTier<K, V>>>>>,
}

impl<K, V> DiskSlot<K, V> {
    /// A slot with no disk tier attached.
    pub fn empty() -> Self {
        Self {
            inner: Arc::new(RwLock::new(None)),
        }
    }

    /// A slot that already holds `disk`.
    pub fn with_disk(disk: Arc<dyn DiskTier<K, V>>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Some(disk))),
        }
    }

    /// Attaches `disk`, returning whatever was attached before.
    pub fn install(&self, disk: Arc<dyn DiskTier<K, V>>) -> Option<Arc<dyn DiskTier<K, V>>> {
        self.inner.write().replace(disk)
    }

    /// The attached disk tier, if any. The lock is released on return, so
    /// callers never hold it across disk I/O.
    pub fn current(&self) -> Option<Arc<dyn DiskTier<K, V>>> {
        self.inner.read().clone()
    }

    pub fn is_attached(&self) -> bool {
        self.inner.read().is_some()
    }
}

impl<K, V> Clone for DiskSlot<K, V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K, V> Default for DiskSlot<K, V> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<K, V> fmt::Debug for DiskSlot<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DiskSlot")
            .field("attached", &self.is_attached())
            .finish()
    }
}
