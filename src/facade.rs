//! The public image cache.
//!
//! [`ImageCache`] maps caller identifiers (usually source URLs) to cache
//! keys, owns the memory tier and opens the disk tier lazily.
//!
//! ## Disk initialization
//!
//! ```text
//!   new() ──► starting = true
//!               │
//!   init_disk_cache()   (once per process start, any thread)
//!     lock ─► slot empty? ─► enabled + dir? ─► mkdir ─► space > budget? ─► open ─► install
//!           └───────────────────── any "no" / failure: memory-only ─────────────┘
//!     starting = false, notify_all
//!
//!   wait_for_disk_cache() blocks while starting
//! ```
//!
//! Until the disk tier is installed, evicted values have nowhere to go and
//! are dropped after release. Disk failures never surface from `put`/`get`.
//!
//! ## Example
//!
//! ```
//! use std::sync::Arc;
//! use imgcache::config::CacheConfiguration;
//! use imgcache::executor::InlineExecutor;
//! use imgcache::facade::ImageCache;
//! use imgcache::resource::{DecodedImage, PixelFormat};
//! # use imgcache::tier::{DiskTier, DiskTierFactory};
//! # struct NoDisk;
//! # impl DiskTierFactory<DecodedImage> for NoDisk {
//! #     fn usable_space(&self, _: &std::path::Path) -> std::io::Result<u64> { Ok(0) }
//! #     fn open(&self, _: &CacheConfiguration)
//! #         -> imgcache::Result<Arc<dyn DiskTier<imgcache::key::CacheKey, DecodedImage>>> {
//! #         Err(imgcache::CacheError::DiskUnavailable("none".into()))
//! #     }
//! # }
//!
//! let config = CacheConfiguration::builder().disk_cache_enabled(false).try_build().unwrap();
//! let cache = ImageCache::builder(config)
//!     .executor(Arc::new(InlineExecutor))
//!     .build(Arc::new(NoDisk))
//!     .unwrap();
//!
//! let url = "https://example.com/cat.png";
//! cache.put(url, DecodedImage::filled(4, 4, PixelFormat::Argb8888, 0xff)).unwrap();
//! assert_eq!(cache.get(url).unwrap().unwrap().width(), 4);
//! assert!(!cache.wait_for_disk_cache());
//! ```

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, warn};

use crate::config::CacheConfiguration;
use crate::error::{CacheError, Result};
use crate::executor::{BackgroundQueue, TaskExecutor};
use crate::key::{CacheKey, KeyCodec, Sha256KeyCodec};
use crate::metrics::TierMetrics;
use crate::resource::Resource;
use crate::sizer::ResourceSizer;
use crate::tier::{DiskSlot, DiskTierFactory, MemoryTier, PersistencePolicy, SkipNumericKeys};

struct DiskInit {
    starting: bool,
}

/// Two-tier image cache.
pub struct ImageCache<V> {
    config: CacheConfiguration,
    memory: Option<MemoryTier<CacheKey, V>>,
    disk: DiskSlot<CacheKey, V>,
    factory: Arc<dyn DiskTierFactory<V>>,
    executor: Arc<dyn TaskExecutor>,
    codec: Arc<dyn KeyCodec>,
    init: Mutex<DiskInit>,
    init_done: Condvar,
}

impl<V: Resource> ImageCache<V> {
    /// Builds a cache with the default key codec and persistence policy.
    ///
    /// Opens the disk tier before returning when
    /// [`init_disk_cache_on_create`](CacheConfiguration::init_disk_cache_on_create)
    /// is set.
    pub fn new(
        config: CacheConfiguration,
        factory: Arc<dyn DiskTierFactory<V>>,
        executor: Arc<dyn TaskExecutor>,
    ) -> Result<Self> {
        Self::builder(config).executor(executor).build(factory)
    }

    pub fn builder(config: CacheConfiguration) -> ImageCacheBuilder<V> {
        ImageCacheBuilder::new(config)
    }

    /// Opens the disk tier if it is not open yet.
    ///
    /// Safe to call from several threads; only the first successful call
    /// opens a store. Every failure is logged and leaves the cache
    /// memory-only. Always ends the "starting" phase and wakes waiters.
    pub fn init_disk_cache(&self) {
        let mut init = self.init.lock();
        if !self.disk.is_attached() {
            self.open_disk();
        }
        init.starting = false;
        self.init_done.notify_all();
    }

    /// Blocks until disk initialization has run, then reports whether a
    /// disk tier is available.
    ///
    /// Blocks indefinitely if nothing ever calls
    /// [`init_disk_cache`](Self::init_disk_cache).
    pub fn wait_for_disk_cache(&self) -> bool {
        let mut init = self.init.lock();
        while init.starting {
            self.init_done.wait(&mut init);
        }
        self.disk.is_attached()
    }

    /// Like [`wait_for_disk_cache`](Self::wait_for_disk_cache) but gives up
    /// after `timeout`, returning `None`.
    pub fn wait_for_disk_cache_timeout(&self, timeout: Duration) -> Option<bool> {
        let deadline = Instant::now() + timeout;
        let mut init = self.init.lock();
        while init.starting {
            if self.init_done.wait_until(&mut init, deadline).timed_out() && init.starting {
                return None;
            }
        }
        Some(self.disk.is_attached())
    }

    /// Caches `value` under `id`.
    ///
    /// An empty `id` is ignored. If the key is already in memory the call
    /// does nothing; the check and the insert are one step, so concurrent
    /// puts of the same `id` keep the first value. With the memory tier disabled the value is handed
    /// straight to the disk tier.
    pub fn put(&self, id: &str, value: impl Into<Arc<V>>) -> Result<()> {
        if id.is_empty() {
            return Ok(());
        }
        let key = self.codec.encode(id);
        match &self.memory {
            Some(memory) => {
                let label = key.clone();
                if !memory.put_if_absent(key, value)? {
                    debug!(key = %label, "put ignored, key already resident");
                }
                Ok(())
            },
            None => {
                let disk = self.disk.clone();
                let value = value.into();
                self.executor.submit(Box::new(move || {
                    if let Some(store) = disk.current() {
                        store.put(&key, &value);
                    }
                }));
                Ok(())
            },
        }
    }

    /// Looks `id` up in memory, then on disk.
    pub fn get(&self, id: &str) -> Result<Option<Arc<V>>> {
        if id.is_empty() {
            return Ok(None);
        }
        let key = self.codec.encode(id);
        match &self.memory {
            Some(memory) => memory.get(&key),
            None => Ok(self
                .disk
                .current()
                .filter(|store| store.exists(&key))
                .and_then(|store| store.get(&key))),
        }
    }

    /// Empties both tiers.
    ///
    /// Memory entries are handed off (and released) as on eviction. The disk
    /// tier is cleaned while waiters on
    /// [`wait_for_disk_cache`](Self::wait_for_disk_cache) are held back.
    ///
    /// With an asynchronous executor the hand-offs from the memory clean may
    /// run after the disk clean, so those entries can reappear on disk.
    /// Drain the executor between two calls for an empty disk tier.
    pub fn clear_cache(&self) -> Result<()> {
        if let Some(memory) = &self.memory {
            memory.clean()?;
        }

        let mut init = self.init.lock();
        init.starting = true;
        if let Some(store) = self.disk.current() {
            debug!("cleaning disk tier");
            store.clean();
        }
        init.starting = false;
        self.init_done.notify_all();
        Ok(())
    }

    pub fn is_disk_cache_available(&self) -> bool {
        self.disk.is_attached()
    }

    /// The memory tier, or `None` when it is disabled.
    pub fn memory(&self) -> Option<&MemoryTier<CacheKey, V>> {
        self.memory.as_ref()
    }

    pub fn config(&self) -> &CacheConfiguration {
        &self.config
    }

    /// Memory tier counters. All zero when the memory tier is disabled.
    pub fn metrics(&self) -> TierMetrics {
        self.memory.as_ref().map(MemoryTier::metrics).unwrap_or_default()
    }

    fn open_disk(&self) {
        let config = &self.config;
        if !config.disk_cache_enabled() {
            debug!("disk cache disabled by configuration");
            return;
        }
        let Some(dir) = config.disk_cache_dir() else {
            debug!("no disk cache directory configured");
            return;
        };
        if let Err(err) = std::fs::create_dir_all(dir) {
            warn!(dir = %dir.display(), error = %err, "cannot create disk cache directory, running memory-only");
            return;
        }
        let usable = match self.factory.usable_space(dir) {
            Ok(usable) => usable,
            Err(err) => {
                warn!(dir = %dir.display(), error = %err, "cannot query usable space, running memory-only");
                return;
            },
        };
        if usable <= config.disk_cache_size() {
            warn!(
                usable,
                required = config.disk_cache_size(),
                "not enough usable space for the disk cache, running memory-only"
            );
            return;
        }
        match self.factory.open(config) {
            Ok(store) => {
                if config.clear_disk_cache_on_start() {
                    debug!("clearing disk tier on start");
                    store.clean();
                }
                self.disk.install(store);
                debug!(dir = %dir.display(), "disk tier opened");
            },
            Err(err) => {
                warn!(error = %err, "disk tier failed to open, running memory-only");
            },
        }
    }
}

impl<V> fmt::Debug for ImageCache<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageCache")
            .field("config", &self.config)
            .field("memory", &self.memory)
            .field("disk", &self.disk)
            .finish_non_exhaustive()
    }
}

/// Builder for [`ImageCache`].
pub struct ImageCacheBuilder<V> {
    config: CacheConfiguration,
    executor: Option<Arc<dyn TaskExecutor>>,
    codec: Arc<dyn KeyCodec>,
    persistence: Arc<dyn PersistencePolicy<CacheKey>>,
    sizer: Option<Arc<dyn ResourceSizer<CacheKey, V>>>,
}

impl<V: Resource> ImageCacheBuilder<V> {
    fn new(config: CacheConfiguration) -> Self {
        Self {
            config,
            executor: None,
            codec: Arc::new(Sha256KeyCodec),
            persistence: Arc::new(SkipNumericKeys),
            sizer: None,
        }
    }

    /// Where hand-off tasks run. Defaults to a one-worker
    /// [`BackgroundQueue`].
    pub fn executor(mut self, executor: Arc<dyn TaskExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    /// Identifier to key mapping. Defaults to [`Sha256KeyCodec`].
    pub fn key_codec(mut self, codec: impl KeyCodec + 'static) -> Self {
        self.codec = Arc::new(codec);
        self
    }

    /// Which removed keys are persisted. Defaults to [`SkipNumericKeys`].
    pub fn persistence_policy(mut self, policy: impl PersistencePolicy<CacheKey> + 'static) -> Self {
        self.persistence = Arc::new(policy);
        self
    }

    /// Size function for the memory tier. Defaults to the resource's byte
    /// size.
    pub fn sizer(mut self, sizer: impl ResourceSizer<CacheKey, V> + 'static) -> Self {
        self.sizer = Some(Arc::new(sizer));
        self
    }

    pub fn build(self, factory: Arc<dyn DiskTierFactory<V>>) -> Result<ImageCache<V>> {
        self.config.validate()?;
        let executor: Arc<dyn TaskExecutor> = match self.executor {
            Some(executor) => executor,
            None => Arc::new(BackgroundQueue::new(1).map_err(CacheError::Io)?),
        };

        let disk = DiskSlot::empty();
        let memory = if self.config.memory_cache_enabled() {
            let tier = MemoryTier::new(self.config.mem_cache_size(), disk.clone(), Arc::clone(&executor))?
                .with_shared_persistence_policy(self.persistence);
            Some(match self.sizer {
                Some(sizer) => tier.with_shared_sizer(sizer),
                None => tier,
            })
        } else {
            debug!("memory cache disabled by configuration");
            None
        };

        let cache = ImageCache {
            config: self.config,
            memory,
            disk,
            factory,
            executor,
            codec: self.codec,
            init: Mutex::new(DiskInit { starting: true }),
            init_done: Condvar::new(),
        };
        if cache.config.init_disk_cache_on_create() {
            cache.init_disk_cache();
        }
        Ok(cache)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::{InlineExecutor, ManualExecutor};
    use crate::key::IdentityKeyCodec;
    use crate::test_support::{Blob, MapDiskFactory};
    use crate::tier::DiskTier;

    fn config(dir: &std::path::Path) -> CacheConfiguration {
        CacheConfiguration::builder()
            .disk_cache_dir(dir)
            .mem_cache_size(100)
            .disk_cache_size(1000)
            .try_build()
            .unwrap()
    }

    #[test]
    fn opens_disk_on_create() {
        let dir = tempfile::tempdir().unwrap();
        let factory = Arc::new(MapDiskFactory::<Blob>::with_space(10_000));
        let cache = ImageCache::new(config(dir.path()), factory.clone(), Arc::new(InlineExecutor)).unwrap();
        assert!(cache.is_disk_cache_available());
        assert!(cache.wait_for_disk_cache());
        assert_eq!(factory.open_count(), 1);
    }

    #[test]
    fn creates_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a").join("b");
        let factory = Arc::new(MapDiskFactory::<Blob>::with_space(10_000));
        let cache = ImageCache::new(config(&nested), factory, Arc::new(InlineExecutor)).unwrap();
        assert!(nested.is_dir());
        assert!(cache.is_disk_cache_available());
    }

    #[test]
    fn insufficient_space_runs_memory_only() {
        let dir = tempfile::tempdir().unwrap();
        // Space equal to the budget is not enough.
        let factory = Arc::new(MapDiskFactory::<Blob>::with_space(1000));
        let cache = ImageCache::new(config(dir.path()), factory.clone(), Arc::new(InlineExecutor)).unwrap();
        assert!(!cache.wait_for_disk_cache());
        assert_eq!(factory.open_count(), 0);

        cache.put("a", Blob::new(10, 1)).unwrap();
        assert_eq!(cache.get("a").unwrap().unwrap().tag(), 1);
    }

    #[test]
    fn open_failure_runs_memory_only() {
        let dir = tempfile::tempdir().unwrap();
        let factory = Arc::new(MapDiskFactory::<Blob>::failing());
        let cache = ImageCache::new(config(dir.path()), factory, Arc::new(InlineExecutor)).unwrap();
        assert_eq!(cache.wait_for_disk_cache_timeout(Duration::from_secs(1)), Some(false));
    }

    #[test]
    fn deferred_init_waits_for_caller() {
        let dir = tempfile::tempdir().unwrap();
        let config = CacheConfiguration::builder()
            .disk_cache_dir(dir.path())
            .init_disk_cache_on_create(false)
            .try_build()
            .unwrap();
        let factory = Arc::new(MapDiskFactory::<Blob>::with_space(u64::MAX));
        let cache = ImageCache::new(config, factory, Arc::new(InlineExecutor)).unwrap();
        assert_eq!(cache.wait_for_disk_cache_timeout(Duration::from_millis(20)), None);
        cache.init_disk_cache();
        assert_eq!(cache.wait_for_disk_cache_timeout(Duration::from_millis(20)), Some(true));
    }

    #[test]
    fn repeated_init_opens_once() {
        let dir = tempfile::tempdir().unwrap();
        let factory = Arc::new(MapDiskFactory::<Blob>::with_space(u64::MAX));
        let cache = ImageCache::new(config(dir.path()), factory.clone(), Arc::new(InlineExecutor)).unwrap();
        cache.init_disk_cache();
        cache.init_disk_cache();
        assert_eq!(factory.open_count(), 1);
    }

    #[test]
    fn clear_on_start_cleans_opened_disk() {
        let dir = tempfile::tempdir().unwrap();
        let factory = Arc::new(MapDiskFactory::<Blob>::with_space(u64::MAX));
        factory.disk.put(&CacheKey::from("stale"), &Blob::new(1, 1));
        let config = CacheConfiguration::builder()
            .disk_cache_dir(dir.path())
            .clear_disk_cache_on_start(true)
            .try_build()
            .unwrap();
        let _cache = ImageCache::new(config, factory.clone(), Arc::new(InlineExecutor)).unwrap();
        assert!(!factory.disk.contains(&CacheKey::from("stale")));
        assert_eq!(factory.disk.clean_count(), 1);
    }

    #[test]
    fn put_is_first_writer_wins() {
        let dir = tempfile::tempdir().unwrap();
        let factory = Arc::new(MapDiskFactory::<Blob>::with_space(u64::MAX));
        let cache = ImageCache::new(config(dir.path()), factory, Arc::new(InlineExecutor)).unwrap();
        cache.put("url", Blob::new(10, 1)).unwrap();
        cache.put("url", Blob::new(10, 2)).unwrap();
        assert_eq!(cache.get("url").unwrap().unwrap().tag(), 1);
    }

    #[test]
    fn concurrent_puts_of_one_id_insert_once() {
        use std::sync::Barrier;
        use std::thread;

        let dir = tempfile::tempdir().unwrap();
        let factory = Arc::new(MapDiskFactory::<Blob>::with_space(u64::MAX));
        // Both callers measure before either takes the tier lock.
        let barrier = Arc::new(Barrier::new(2));
        let gate = Arc::clone(&barrier);
        let cache = Arc::new(
            ImageCache::builder(config(dir.path()))
                .executor(Arc::new(InlineExecutor))
                .sizer(move |_: &CacheKey, b: &Blob| {
                    gate.wait();
                    b.byte_size() as i64
                })
                .build(factory)
                .unwrap(),
        );

        let handles: Vec<_> = (1..=2u32)
            .map(|tag| {
                let cache = Arc::clone(&cache);
                thread::spawn(move || cache.put("url", Blob::new(10, tag)).unwrap())
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let metrics = cache.metrics();
        assert_eq!(metrics.inserts, 1);
        assert_eq!(metrics.replacements, 0);
        assert_eq!(cache.memory().unwrap().len(), 1);
        assert_eq!(cache.memory().unwrap().total_size(), 10);
    }

    #[test]
    fn empty_id_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let factory = Arc::new(MapDiskFactory::<Blob>::with_space(u64::MAX));
        let cache = ImageCache::new(config(dir.path()), factory, Arc::new(InlineExecutor)).unwrap();
        cache.put("", Blob::new(10, 1)).unwrap();
        assert!(cache.get("").unwrap().is_none());
        assert_eq!(cache.memory().unwrap().len(), 0);
    }

    #[test]
    fn keys_are_sha256_of_the_identifier() {
        let dir = tempfile::tempdir().unwrap();
        let factory = Arc::new(MapDiskFactory::<Blob>::with_space(u64::MAX));
        let cache = ImageCache::new(config(dir.path()), factory, Arc::new(InlineExecutor)).unwrap();
        cache.put("abc", Blob::new(10, 1)).unwrap();
        let digest = CacheKey::from("ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad");
        assert!(cache.memory().unwrap().exists(&digest));
    }

    #[test]
    fn clear_cache_empties_both_tiers() {
        let dir = tempfile::tempdir().unwrap();
        let exec = Arc::new(ManualExecutor::new());
        let factory = Arc::new(MapDiskFactory::<Blob>::with_space(u64::MAX));
        let cache = ImageCache::builder(config(dir.path()))
            .executor(exec.clone())
            .key_codec(IdentityKeyCodec)
            .build(factory.clone())
            .unwrap();
        cache.put("a", Blob::new(10, 1)).unwrap();
        cache.put("b", Blob::new(10, 2)).unwrap();
        factory.disk.put(&CacheKey::from("c"), &Blob::new(10, 3));

        cache.clear_cache().unwrap();
        assert_eq!(cache.memory().unwrap().total_size(), 0);
        assert!(!factory.disk.contains(&CacheKey::from("c")));
        assert!(cache.wait_for_disk_cache());

        // Hand-offs scheduled by the memory clean land afterwards.
        assert_eq!(exec.run_pending(), 2);
        assert!(factory.disk.contains(&CacheKey::from("a")));

        cache.clear_cache().unwrap();
        assert_eq!(exec.run_pending(), 0);
        assert!(!factory.disk.contains(&CacheKey::from("a")));
        assert!(!factory.disk.contains(&CacheKey::from("b")));
    }

    #[test]
    fn memory_disabled_goes_straight_to_disk() {
        let dir = tempfile::tempdir().unwrap();
        let config = CacheConfiguration::builder()
            .disk_cache_dir(dir.path())
            .memory_cache_enabled(false)
            .try_build()
            .unwrap();
        let factory = Arc::new(MapDiskFactory::<Blob>::with_space(u64::MAX));
        let cache = ImageCache::builder(config)
            .executor(Arc::new(InlineExecutor))
            .key_codec(IdentityKeyCodec)
            .build(factory.clone())
            .unwrap();
        assert!(cache.memory().is_none());

        let value = Arc::new(Blob::new(10, 4));
        cache.put("x", Arc::clone(&value)).unwrap();
        assert!(factory.disk.contains(&CacheKey::from("x")));
        assert_eq!(value.release_count(), 0);
        assert_eq!(cache.get("x").unwrap().unwrap().tag(), 4);
        assert_eq!(cache.metrics(), TierMetrics::default());
    }

    #[test]
    fn default_policy_skips_numeric_keys_on_remove() {
        let dir = tempfile::tempdir().unwrap();
        let factory = Arc::new(MapDiskFactory::<Blob>::with_space(u64::MAX));
        let cache = ImageCache::builder(config(dir.path()))
            .executor(Arc::new(InlineExecutor))
            .key_codec(IdentityKeyCodec)
            .build(factory.clone())
            .unwrap();
        cache.put("42", Blob::new(10, 1)).unwrap();
        cache.memory().unwrap().remove(&CacheKey::from("42")).unwrap();
        assert!(!factory.disk.contains(&CacheKey::from("42")));
    }

    #[test]
    fn custom_sizer_is_used() {
        let dir = tempfile::tempdir().unwrap();
        let factory = Arc::new(MapDiskFactory::<Blob>::with_space(u64::MAX));
        let cache = ImageCache::builder(config(dir.path()))
            .executor(Arc::new(InlineExecutor))
            .sizer(crate::sizer::UnitSizer)
            .build(factory)
            .unwrap();
        cache.put("a", Blob::new(1000, 1)).unwrap();
        assert_eq!(cache.memory().unwrap().total_size(), 1);
    }

    #[test]
    fn invalid_config_is_rejected_at_build() {
        let config: CacheConfiguration = serde_json::from_str(r#"{"compress_quality": 200}"#).unwrap();
        let factory = Arc::new(MapDiskFactory::<Blob>::with_space(u64::MAX));
        let err = ImageCache::new(config, factory, Arc::new(InlineExecutor)).unwrap_err();
        assert!(matches!(err, CacheError::Config(_)));
    }
}
