//! # Size-accounted LRU core
//!
//! Single-threaded access-ordered map that budgets by entry *size* rather
//! than entry count. It is the bookkeeping half of the memory tier: the tier
//! wraps it in a lock and decides what happens to the entries it gives back.
//!
//! ## Architecture
//!
//! ```text
//!   ┌────────────────────────────────────────────────────────────────────┐
//!   │                         SizedLru<K, V>                             │
//!   │                                                                    │
//!   │   FxHashMap<K, SlotId>          IntrusiveList<Entry<K, V>>         │
//!   │   ┌─────────┬────────┐                                             │
//!   │   │  key_a  │ id_3 ──┼──►  head ─► [id_3] ◄─► [id_1] ◄─► [id_2]    │
//!   │   │  key_b  │ id_1   │            MRU                   LRU ◄─ tail│
//!   │   │  key_c  │ id_2   │                                             │
//!   │   └─────────┴────────┘     Entry { key, value: Arc<V>, size }      │
//!   │                                                                    │
//!   │   total_size = Σ entry.size        max_size = budget               │
//!   └────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Invariants
//!
//! - `total_size` equals the sum of resident entry sizes whenever no method
//!   is executing.
//! - After [`trim`](SizedLru::trim) returns `Ok`, `total_size <= max_size`
//!   or the map is empty. A single entry larger than the budget is evicted
//!   on the next trim rather than looping forever.
//! - Keys are unique. Re-inserting a key replaces the entry and makes it MRU.
//!
//! ## Trim
//!
//! ```text
//!   max_size = 100
//!
//!   insert(A, 60)   head ─► [A:60]                         total = 60
//!   insert(B, 50)   head ─► [B:50] ◄─► [A:60]              total = 110
//!   trim()          pop tail A                              total = 50
//!                   head ─► [B:50]                 evicted: [A]
//! ```
//!
//! Entries leave strictly from the LRU end. Size never jumps the queue: a
//! large MRU entry is kept while smaller, older entries are evicted ahead of
//! it.
//!
//! ## Operations
//!
//! | Method           | Complexity | Notes                                  |
//! |------------------|------------|----------------------------------------|
//! | `insert`         | O(1)       | Replaces and re-orders existing keys   |
//! | `get`            | O(1)       | Moves to MRU                           |
//! | `peek`/`contains`| O(1)       | No re-order                            |
//! | `remove`         | O(1)       |                                        |
//! | `pop_lru`        | O(1)       |                                        |
//! | `trim`           | O(evicted) |                                        |
//! | `drain`          | O(n)       | LRU first                              |
//! | `check_invariants` | O(n)     | Walks list and recomputes the total    |

use std::fmt;
use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::ds::{IntrusiveList, SlotId};
use crate::error::{InvariantError, SizeOverflow};
use crate::key::TierKey;

#[derive(Debug)]
struct Entry<K, V> {
    key: K,
    value: Arc<V>,
    size: u64,
}

/// An entry that has left the LRU, with the size it was accounted at.
#[derive(Debug)]
pub struct Evicted<K, V> {
    pub key: K,
    pub value: Arc<V>,
    pub size: u64,
}

impl<K, V> From<Entry<K, V>> for Evicted<K, V> {
    fn from(entry: Entry<K, V>) -> Self {
        Self {
            key: entry.key,
            value: entry.value,
            size: entry.size,
        }
    }
}

/// Access-ordered map with a size budget. See the module docs.
pub struct SizedLru<K, V> {
    index: FxHashMap<K, SlotId>,
    order: IntrusiveList<Entry<K, V>>,
    total_size: u64,
    max_size: u64,
}

impl<K, V> SizedLru<K, V>
where
    K: TierKey,
{
    /// Creates an empty LRU with a budget of `max_size` units.
    ///
    /// # Example
    ///
    /// ```
    /// use imgcache::policy::sized_lru::SizedLru;
    /// use std::sync::Arc;
    ///
    /// let mut lru: SizedLru<u64, &str> = SizedLru::new(100);
    /// lru.insert(1, Arc::new("a"), 60).unwrap();
    /// lru.insert(2, Arc::new("b"), 50).unwrap();
    /// let evicted = lru.trim().unwrap();
    /// assert_eq!(evicted.len(), 1);
    /// assert_eq!(evicted[0].key, 1);
    /// assert_eq!(lru.total_size(), 50);
    /// ```
    pub fn new(max_size: u64) -> Self {
        Self {
            index: FxHashMap::default(),
            order: IntrusiveList::new(),
            total_size: 0,
            max_size,
        }
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    pub fn max_size(&self) -> u64 {
        self.max_size
    }

    pub fn contains(&self, key: &K) -> bool {
        self.index.contains_key(key)
    }

    /// Looks up `key` and marks it most recently used.
    pub fn get(&mut self, key: &K) -> Option<&Arc<V>> {
        let id = *self.index.get(key)?;
        self.order.move_to_front(id);
        self.order.get(id).map(|entry| &entry.value)
    }

    /// Looks up `key` without touching the access order.
    pub fn peek(&self, key: &K) -> Option<&Arc<V>> {
        let id = *self.index.get(key)?;
        self.order.get(id).map(|entry| &entry.value)
    }

    /// Inserts `key` at the MRU position, accounting it at `size`.
    ///
    /// If the key was resident its entry is replaced (old size subtracted,
    /// new size added) and returned. Does not trim. Fails without touching
    /// any state when the new total would not fit in a `u64`.
    pub fn insert(&mut self, key: K, value: Arc<V>, size: u64) -> Result<Option<Evicted<K, V>>, SizeOverflow> {
        let resident = self.size_of(&key).unwrap_or(0);
        let total = self
            .total_size
            .saturating_sub(resident)
            .checked_add(size)
            .ok_or(SizeOverflow {
                total: self.total_size,
                size,
            })?;

        let replaced = self.index.remove(&key).and_then(|id| self.order.remove(id));
        let id = self.order.push_front(Entry {
            key: key.clone(),
            value,
            size,
        });
        self.index.insert(key, id);
        self.total_size = total;

        Ok(replaced.map(Evicted::from))
    }

    /// Removes `key`, subtracting its size.
    ///
    /// Fails if the subtraction would take the total below zero.
    pub fn remove(&mut self, key: &K) -> Result<Option<Evicted<K, V>>, InvariantError> {
        let Some(id) = self.index.remove(key) else {
            return Ok(None);
        };
        let entry = self.order.remove(id).ok_or_else(|| {
            InvariantError::new(format!("index points at vacant slot for key {key:?}"))
        })?;
        self.debit(&entry)?;
        Ok(Some(entry.into()))
    }

    /// Removes and returns the least recently used entry.
    pub fn pop_lru(&mut self) -> Result<Option<Evicted<K, V>>, InvariantError> {
        let Some(entry) = self.order.pop_back() else {
            return Ok(None);
        };
        self.index.remove(&entry.key);
        self.debit(&entry)?;
        Ok(Some(entry.into()))
    }

    /// Evicts from the LRU end until `total_size <= max_size` or the map is
    /// empty. Returns the evicted entries oldest first.
    pub fn trim(&mut self) -> Result<Vec<Evicted<K, V>>, InvariantError> {
        let mut evicted = Vec::new();
        loop {
            if self.is_empty() && self.total_size != 0 {
                return Err(InvariantError::new(format!(
                    "map is empty but total_size is {}",
                    self.total_size
                )));
            }
            if self.total_size <= self.max_size || self.is_empty() {
                return Ok(evicted);
            }
            match self.pop_lru()? {
                Some(entry) => evicted.push(entry),
                None => return Ok(evicted),
            }
        }
    }

    /// Removes every entry, LRU first. `total_size` is zero afterwards.
    pub fn drain(&mut self) -> Result<Vec<Evicted<K, V>>, InvariantError> {
        let mut drained = Vec::with_capacity(self.len());
        while let Some(entry) = self.pop_lru()? {
            drained.push(entry);
        }
        if self.total_size != 0 {
            let leaked = self.total_size;
            self.total_size = 0;
            return Err(InvariantError::new(format!(
                "total_size is {leaked} after draining every entry"
            )));
        }
        Ok(drained)
    }

    /// Keys from least to most recently used.
    pub fn keys_lru_order(&self) -> Vec<K> {
        self.order.iter_rev().map(|entry| entry.key.clone()).collect()
    }

    /// Size the entry for `key` was accounted at.
    pub fn size_of(&self, key: &K) -> Option<u64> {
        let id = *self.index.get(key)?;
        self.order.get(id).map(|entry| entry.size)
    }

    /// Recomputes the total and cross-checks the index against the list.
    pub fn check_invariants(&self) -> Result<(), InvariantError> {
        self.order.validate_links().map_err(InvariantError::new)?;
        if self.order.len() != self.index.len() {
            return Err(InvariantError::new(format!(
                "index has {} keys but list has {} entries",
                self.index.len(),
                self.order.len()
            )));
        }
        let mut sum = 0u64;
        for entry in self.order.iter() {
            sum = sum.checked_add(entry.size).ok_or_else(|| {
                InvariantError::new(format!("entry sizes overflow u64 at key {:?}", entry.key))
            })?;
            if !self.index.contains_key(&entry.key) {
                return Err(InvariantError::new(format!(
                    "listed key {:?} missing from index",
                    entry.key
                )));
            }
        }
        if sum != self.total_size {
            return Err(InvariantError::new(format!(
                "total_size is {} but entries sum to {sum}",
                self.total_size
            )));
        }
        Ok(())
    }

    fn debit(&mut self, entry: &Entry<K, V>) -> Result<(), InvariantError> {
        match self.total_size.checked_sub(entry.size) {
            Some(rest) => {
                self.total_size = rest;
                Ok(())
            },
            None => Err(InvariantError::new(format!(
                "removing {:?} (size {}) would take total_size {} below zero",
                entry.key, entry.size, self.total_size
            ))),
        }
    }
}

impl<K, V> fmt::Debug for SizedLru<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SizedLru")
            .field("len", &self.index.len())
            .field("total_size", &self.total_size)
            .field("max_size", &self.max_size)
            .finish_non_exhaustive()
    }
}
