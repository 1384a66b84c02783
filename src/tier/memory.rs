//! # Memory tier
//!
//! A [`SizedLru`] behind one `parking_lot::Mutex`, plus the protocol that
//! moves values between memory and the disk tier.
//!
//! ## Promotion and demotion
//!
//! ```text
//!            get(k) miss                      put / update → trim
//!   ┌──────────────┐  exists? get  ┌────────┐      ┌──────────────┐
//!   │  MemoryTier  │ ─────────────►│  Disk  │◄──── │ hand-off task│
//!   │  (SizedLru)  │ ◄──────────── │  Tier  │ put  │ (executor)   │
//!   └──────────────┘   promote     └────────┘      └──────────────┘
//!          │                                              ▲
//!          └──── evicted / cleaned / removed entries ─────┘
//! ```
//!
//! - The lock covers map operations only. Disk reads for promotion happen
//!   after it is released; disk writes happen in hand-off tasks.
//! - Hand-offs are submitted before the mutating call returns. When they
//!   run is up to the [`TaskExecutor`]. A value whose task never runs is
//!   lost, which is accepted.
//! - Evicted and cleaned values are persisted, then released exactly once.
//!   Removed values are persisted only if the disk does not already hold
//!   the key and the [`PersistencePolicy`] allows it; they are not released.
//!
//! ## Fatal accounting errors
//!
//! A negative size from the sizer, or one that would overflow the size
//! total, is rejected before any state changes. An inconsistent total discovered during trim or removal poisons the tier:
//! that call and every later mutating call return
//! [`CacheError::Invariant`].

use std::fmt;
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};
use tracing::{debug, error, trace};

use crate::error::{CacheError, InvariantError, Result};
use crate::executor::TaskExecutor;
use crate::key::TierKey;
use crate::metrics::{TierCounters, TierMetrics};
use crate::policy::{Evicted, SizedLru};
use crate::resource::Resource;
use crate::sizer::{ByteSizer, ResourceSizer};
use crate::tier::disk::DiskSlot;
use crate::tier::persistence::{PersistAll, PersistencePolicy};

struct TierState<K, V> {
    lru: SizedLru<K, V>,
    poisoned: Option<InvariantError>,
}

/// What a hand-off task does with its value.
struct Handoff<K, V> {
    key: K,
    value: Arc<V>,
    /// Skip the write when the disk already holds the key.
    only_if_absent: bool,
    /// Call [`Resource::release`] once the write has been attempted.
    release: bool,
}

impl<K, V> Handoff<K, V>
where
    K: TierKey,
    V: Resource,
{
    fn demote(entry: Evicted<K, V>) -> Self {
        Self {
            key: entry.key,
            value: entry.value,
            only_if_absent: false,
            release: true,
        }
    }

    fn run(self, disk: &DiskSlot<K, V>, counters: &TierCounters) {
        match disk.current() {
            Some(store) if self.only_if_absent && store.exists(&self.key) => {
                trace!(key = ?self.key, "hand-off skipped, already on disk");
                counters.inc_handoff_skipped();
            },
            Some(store) => {
                store.put(&self.key, &self.value);
                trace!(key = ?self.key, "hand-off persisted");
                counters.inc_handoff_persisted();
            },
            None => {
                debug!(key = ?self.key, "no disk tier attached, hand-off dropped");
                counters.inc_handoff_skipped();
            },
        }
        if self.release {
            self.value.release();
            counters.inc_release();
        }
    }
}

/// Size-budgeted LRU memory tier backed by an optional disk tier.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use imgcache::executor::InlineExecutor;
/// use imgcache::resource::{DecodedImage, PixelFormat};
/// use imgcache::tier::{DiskSlot, MemoryTier};
///
/// let tier: MemoryTier<String, DecodedImage> =
///     MemoryTier::new(1024, DiskSlot::empty(), Arc::new(InlineExecutor)).unwrap();
///
/// tier.put("thumb".to_string(), DecodedImage::filled(8, 8, PixelFormat::Argb8888, 0)).unwrap();
/// assert!(tier.exists(&"thumb".to_string()));
/// assert_eq!(tier.total_size(), 256);
/// ```
pub struct MemoryTier<K, V> {
    state: Mutex<TierState<K, V>>,
    disk: DiskSlot<K, V>,
    sizer: Arc<dyn ResourceSizer<K, V>>,
    executor: Arc<dyn TaskExecutor>,
    persistence: Arc<dyn PersistencePolicy<K>>,
    counters: Arc<TierCounters>,
}

impl<K, V> MemoryTier<K, V>
where
    K: TierKey,
    V: Resource,
{
    /// Creates a tier with a budget of `max_size` bytes.
    ///
    /// Sizes entries by [`Resource::byte_size`] and persists every removed
    /// key; see [`with_sizer`](Self::with_sizer) and
    /// [`with_persistence_policy`](Self::with_persistence_policy).
    ///
    /// Fails with [`CacheError::Config`] when `max_size` is zero.
    pub fn new(max_size: u64, disk: DiskSlot<K, V>, executor: Arc<dyn TaskExecutor>) -> Result<Self> {
        if max_size == 0 {
            return Err(crate::error::ConfigError::new("memory tier max_size must be > 0").into());
        }
        Ok(Self {
            state: Mutex::new(TierState {
                lru: SizedLru::new(max_size),
                poisoned: None,
            }),
            disk,
            sizer: Arc::new(ByteSizer::<V>::new()),
            executor,
            persistence: Arc::new(PersistAll),
            counters: Arc::new(TierCounters::default()),
        })
    }

    /// Replaces the size function. Only meaningful before the first insert.
    pub fn with_sizer(self, sizer: impl ResourceSizer<K, V> + 'static) -> Self {
        self.with_shared_sizer(Arc::new(sizer))
    }

    pub fn with_shared_sizer(mut self, sizer: Arc<dyn ResourceSizer<K, V>>) -> Self {
        self.sizer = sizer;
        self
    }

    pub fn with_persistence_policy(self, policy: impl PersistencePolicy<K> + 'static) -> Self {
        self.with_shared_persistence_policy(Arc::new(policy))
    }

    pub fn with_shared_persistence_policy(mut self, policy: Arc<dyn PersistencePolicy<K>>) -> Self {
        self.persistence = policy;
        self
    }

    /// Membership test. Does not affect recency.
    pub fn exists(&self, key: &K) -> bool {
        self.state.lock().lru.contains(key)
    }

    /// Returns the resident value without touching recency or the disk.
    pub fn peek(&self, key: &K) -> Option<Arc<V>> {
        self.state.lock().lru.peek(key).cloned()
    }

    /// Inserts or replaces `key`, makes it most recently used and trims.
    ///
    /// A replaced value is dropped from the tier without being released.
    pub fn put(&self, key: K, value: impl Into<Arc<V>>) -> Result<()> {
        ensure_present(&key)?;
        let value = value.into();
        let size = self.measure(&key, &value)?;

        let evicted = {
            let mut state = self.lock_healthy()?;
            if self.insert_locked(&mut state, key, value, size)?.is_some() {
                self.counters.inc_replacement();
            }
            self.counters.inc_insert();
            self.trim_locked(&mut state)?
        };

        self.demote_all(evicted);
        Ok(())
    }

    /// Inserts `key` only if it is not resident, as one step under the lock.
    ///
    /// Returns `Ok(false)` and leaves the tier untouched when the key is
    /// already present. Otherwise behaves like [`put`](Self::put).
    pub fn put_if_absent(&self, key: K, value: impl Into<Arc<V>>) -> Result<bool> {
        ensure_present(&key)?;
        let value = value.into();
        let size = self.measure(&key, &value)?;

        let evicted = {
            let mut state = self.lock_healthy()?;
            if state.lru.contains(&key) {
                return Ok(false);
            }
            self.insert_locked(&mut state, key, value, size)?;
            self.counters.inc_insert();
            self.trim_locked(&mut state)?
        };

        self.demote_all(evicted);
        Ok(true)
    }

    /// Looks `key` up in memory, then on disk.
    ///
    /// A disk hit is promoted into memory before being returned. A key in
    /// neither tier is `Ok(None)`.
    pub fn get(&self, key: &K) -> Result<Option<Arc<V>>> {
        ensure_present(key)?;
        {
            let mut state = self.lock_healthy()?;
            if let Some(value) = state.lru.get(key) {
                self.counters.inc_hit();
                return Ok(Some(Arc::clone(value)));
            }
        }

        let found = self
            .disk
            .current()
            .filter(|disk| disk.exists(key))
            .and_then(|disk| disk.get(key));
        let Some(value) = found else {
            self.counters.inc_miss();
            return Ok(None);
        };

        self.counters.inc_disk_hit();
        self.promote(key.clone(), value).map(Some)
    }

    /// Replaces `key` and releases the value it displaced.
    ///
    /// Releasing is skipped when the new value is the same `Arc` as the old.
    pub fn update(&self, key: K, value: impl Into<Arc<V>>) -> Result<()> {
        ensure_present(&key)?;
        let value = value.into();
        let size = self.measure(&key, &value)?;

        let evicted = {
            let mut state = self.lock_healthy()?;
            let incoming = Arc::clone(&value);
            if let Some(old) = self.insert_locked(&mut state, key, value, size)? {
                if !Arc::ptr_eq(&old.value, &incoming) {
                    old.value.release();
                    self.counters.inc_release();
                }
                self.counters.inc_replacement();
            }
            self.counters.inc_insert();
            self.trim_locked(&mut state)?
        };

        self.demote_all(evicted);
        Ok(())
    }

    /// Removes a resident key and returns its value.
    ///
    /// Fails with [`CacheError::InvalidArgument`] when `key` is not resident.
    /// If the persistence policy allows, the value is handed to the disk tier
    /// unless the disk already holds the key. The value is not released.
    pub fn remove(&self, key: &K) -> Result<Arc<V>> {
        ensure_present(key)?;
        let removed = {
            let mut state = self.lock_healthy()?;
            match state.lru.remove(key) {
                Ok(removed) => removed,
                Err(err) => return Err(poison(&mut state, err)),
            }
        };
        let Some(entry) = removed else {
            return Err(CacheError::invalid_argument(format!(
                "remove: key {key:?} is not resident"
            )));
        };
        self.counters.inc_remove();

        let value = Arc::clone(&entry.value);
        if self.persistence.is_eligible(&entry.key) {
            self.dispatch(Handoff {
                key: entry.key,
                value: entry.value,
                only_if_absent: true,
                release: false,
            });
        }
        Ok(value)
    }

    /// Drains every entry, scheduling persist-then-release for each.
    pub fn clean(&self) -> Result<()> {
        let drained = {
            let mut state = self.lock_healthy()?;
            match state.lru.drain() {
                Ok(drained) => drained,
                Err(err) => return Err(poison(&mut state, err)),
            }
        };
        debug!(entries = drained.len(), "memory tier cleaned");
        self.demote_all(drained);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.state.lock().lru.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().lru.is_empty()
    }

    /// Sum of resident entry sizes.
    pub fn total_size(&self) -> u64 {
        self.state.lock().lru.total_size()
    }

    pub fn max_size(&self) -> u64 {
        self.state.lock().lru.max_size()
    }

    /// Resident keys, least recently used first.
    pub fn keys_lru_order(&self) -> Vec<K> {
        self.state.lock().lru.keys_lru_order()
    }

    /// Verifies the accounting and budget invariants.
    pub fn check_invariants(&self) -> std::result::Result<(), InvariantError> {
        let state = self.state.lock();
        if let Some(err) = &state.poisoned {
            return Err(err.clone());
        }
        state.lru.check_invariants()?;
        if state.lru.total_size() > state.lru.max_size() && !state.lru.is_empty() {
            return Err(InvariantError::new(format!(
                "total_size {} exceeds max_size {}",
                state.lru.total_size(),
                state.lru.max_size()
            )));
        }
        Ok(())
    }

    pub fn metrics(&self) -> TierMetrics {
        self.counters.snapshot()
    }

    /// The disk slot this tier promotes from and demotes to.
    pub fn disk(&self) -> &DiskSlot<K, V> {
        &self.disk
    }

    fn promote(&self, key: K, value: Arc<V>) -> Result<Arc<V>> {
        let size = self.measure(&key, &value)?;
        let evicted = {
            let mut state = self.lock_healthy()?;
            // Another caller may have filled the key while we read the disk.
            if let Some(resident) = state.lru.get(&key) {
                return Ok(Arc::clone(resident));
            }
            debug!(key = ?key, size, "promoting disk hit into memory");
            self.insert_locked(&mut state, key, Arc::clone(&value), size)?;
            self.counters.inc_promotion();
            self.trim_locked(&mut state)?
        };

        for entry in evicted {
            if Arc::ptr_eq(&entry.value, &value) {
                // Oversized promotion: it came from disk and the caller is
                // about to use it, so neither rewrite nor release it.
                continue;
            }
            self.dispatch(Handoff::demote(entry));
        }
        Ok(value)
    }

    fn measure(&self, key: &K, value: &V) -> Result<u64> {
        let size = self.sizer.size_of(key, value);
        u64::try_from(size).map_err(|_| {
            error!(key = ?key, size, "size function reported a negative size");
            CacheError::NegativeSize {
                key: format!("{key:?}"),
                size,
            }
        })
    }

    /// Inserts into the LRU. An overflowing size total leaves it unchanged.
    fn insert_locked(
        &self,
        state: &mut TierState<K, V>,
        key: K,
        value: Arc<V>,
        size: u64,
    ) -> Result<Option<Evicted<K, V>>> {
        state.lru.insert(key.clone(), value, size).map_err(|err| {
            error!(key = ?key, size, total_size = err.total, "size total would overflow");
            CacheError::SizeOverflow {
                key: format!("{key:?}"),
                size,
            }
        })
    }

    fn lock_healthy(&self) -> Result<MutexGuard<'_, TierState<K, V>>> {
        let state = self.state.lock();
        match &state.poisoned {
            Some(err) => Err(CacheError::Invariant(err.clone())),
            None => Ok(state),
        }
    }

    fn trim_locked(&self, state: &mut TierState<K, V>) -> Result<Vec<Evicted<K, V>>> {
        match state.lru.trim() {
            Ok(evicted) => {
                if !evicted.is_empty() {
                    self.counters.add_evictions(evicted.len());
                    trace!(
                        evicted = evicted.len(),
                        total_size = state.lru.total_size(),
                        "trimmed memory tier"
                    );
                }
                Ok(evicted)
            },
            Err(err) => Err(poison(state, err)),
        }
    }

    fn demote_all(&self, entries: Vec<Evicted<K, V>>) {
        for entry in entries {
            self.dispatch(Handoff::demote(entry));
        }
    }

    fn dispatch(&self, handoff: Handoff<K, V>) {
        let disk = self.disk.clone();
        let counters = Arc::clone(&self.counters);
        self.counters.inc_handoff_scheduled();
        self.executor
            .submit(Box::new(move || handoff.run(&disk, &counters)));
    }
}

fn ensure_present<K: TierKey>(key: &K) -> Result<()> {
    if key.is_present() {
        Ok(())
    } else {
        Err(CacheError::invalid_argument("key must not be empty"))
    }
}

fn poison<K, V>(state: &mut TierState<K, V>, err: InvariantError) -> CacheError {
    error!(error = %err, "memory tier accounting corrupted, refusing further mutation");
    state.poisoned = Some(err.clone());
    CacheError::Invariant(err)
}

impl<K: TierKey, V> fmt::Debug for MemoryTier<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("MemoryTier")
            .field("len", &state.lru.len())
            .field("total_size", &state.lru.total_size())
            .field("max_size", &state.lru.max_size())
            .field("poisoned", &state.poisoned.is_some())
            .field("disk", &self.disk)
            .finish_non_exhaustive()
    }
}
