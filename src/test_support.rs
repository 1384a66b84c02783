//! In-crate test doubles.

use std::collections::{HashMap, HashSet};
use std::hash::Hash;
use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::config::CacheConfiguration;
use crate::error::{CacheError, Result};
use crate::key::CacheKey;
use crate::resource::Resource;
use crate::tier::disk::{DiskTier, DiskTierFactory};

/// A disk tier backed by a `HashMap`. Stores clones of what it is given.
pub(crate) struct MapDisk<K, V> {
    entries: Mutex<HashMap<K, V>>,
    corrupted: Mutex<HashSet<K>>,
    puts: AtomicUsize,
    cleans: AtomicUsize,
}

impl<K, V> Default for MapDisk<K, V> {
    fn default() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            corrupted: Mutex::new(HashSet::new()),
            puts: AtomicUsize::new(0),
            cleans: AtomicUsize::new(0),
        }
    }
}

impl<K: Eq + Hash + Clone, V> MapDisk<K, V> {
    pub(crate) fn contains(&self, key: &K) -> bool {
        self.entries.lock().contains_key(key)
    }

    /// Makes `get` fail for `key` while `exists` still reports it.
    pub(crate) fn corrupt(&self, key: &K) {
        self.corrupted.lock().insert(key.clone());
    }

    pub(crate) fn put_count(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }

    pub(crate) fn clean_count(&self) -> usize {
        self.cleans.load(Ordering::SeqCst)
    }
}

impl<K, V> DiskTier<K, V> for MapDisk<K, V>
where
    K: Eq + Hash + Clone + Send + Sync,
    V: Clone + Send + Sync,
{
    fn exists(&self, key: &K) -> bool {
        self.entries.lock().contains_key(key)
    }

    fn get(&self, key: &K) -> Option<Arc<V>> {
        if self.corrupted.lock().contains(key) {
            return None;
        }
        self.entries.lock().get(key).cloned().map(Arc::new)
    }

    fn put(&self, key: &K, value: &V) {
        self.puts.fetch_add(1, Ordering::SeqCst);
        self.corrupted.lock().remove(key);
        self.entries.lock().insert(key.clone(), value.clone());
    }

    fn clean(&self) {
        self.cleans.fetch_add(1, Ordering::SeqCst);
        self.entries.lock().clear();
        self.corrupted.lock().clear();
    }
}

/// A resource that counts its releases.
#[derive(Debug)]
pub(crate) struct Blob {
    bytes: usize,
    tag: u32,
    released: AtomicUsize,
}

impl Blob {
    pub(crate) fn new(bytes: usize, tag: u32) -> Self {
        Self {
            bytes,
            tag,
            released: AtomicUsize::new(0),
        }
    }

    pub(crate) fn tag(&self) -> u32 {
        self.tag
    }

    pub(crate) fn release_count(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }
}

impl Clone for Blob {
    fn clone(&self) -> Self {
        Self::new(self.bytes, self.tag)
    }
}

impl PartialEq for Blob {
    fn eq(&self, other: &Self) -> bool {
        self.bytes == other.bytes && self.tag == other.tag
    }
}

impl Resource for Blob {
    fn byte_size(&self) -> usize {
        self.bytes
    }

    fn release(&self) {
        self.released.fetch_add(1, Ordering::SeqCst);
    }

    fn is_released(&self) -> bool {
        self.release_count() > 0
    }
}

/// Opens a shared [`MapDisk`] and reports a fixed amount of free space.
pub(crate) struct MapDiskFactory<V> {
    pub(crate) disk: Arc<MapDisk<CacheKey, V>>,
    space: u64,
    fail_open: bool,
    opens: AtomicUsize,
}

impl<V> MapDiskFactory<V> {
    pub(crate) fn with_space(space: u64) -> Self {
        Self {
            disk: Arc::new(MapDisk::default()),
            space,
            fail_open: false,
            opens: AtomicUsize::new(0),
        }
    }

    pub(crate) fn failing() -> Self {
        Self {
            fail_open: true,
            ..Self::with_space(u64::MAX)
        }
    }

    pub(crate) fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }
}

impl<V> DiskTierFactory<V> for MapDiskFactory<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn usable_space(&self, _dir: &Path) -> io::Result<u64> {
        Ok(self.space)
    }

    fn open(&self, _config: &CacheConfiguration) -> Result<Arc<dyn DiskTier<CacheKey, V>>> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        if self.fail_open {
            return Err(CacheError::DiskUnavailable("open refused".into()));
        }
        let disk: Arc<dyn DiskTier<CacheKey, V>> = self.disk.clone();
        Ok(disk)
    }
}
