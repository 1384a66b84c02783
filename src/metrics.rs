//! Memory-tier counters.
//!
//! Relaxed atomics, bumped from both the caller's thread and the hand-off
//! tasks. A [`TierMetrics`] snapshot is not a consistent cut across fields.

use std::sync::atomic::{AtomicU64, Ordering};

/// Point-in-time copy of a tier's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TierMetrics {
    /// `get` served from memory.
    pub hits: u64,
    /// `get` found in neither tier.
    pub misses: u64,
    /// `get` missed memory but found the key on disk.
    pub disk_hits: u64,
    /// Disk hits inserted back into memory.
    pub promotions: u64,
    pub inserts: u64,
    /// Inserts that replaced a resident key.
    pub replacements: u64,
    pub removes: u64,
    /// Entries trimmed to satisfy the budget.
    pub evictions: u64,
    /// Hand-off tasks submitted to the executor.
    pub handoffs_scheduled: u64,
    /// Hand-off tasks that wrote to the disk tier.
    pub handoffs_persisted: u64,
    /// Hand-off tasks that found no disk tier, or found the key already
    /// persisted.
    pub handoffs_skipped: u64,
    /// Values whose resource was explicitly released.
    pub releases: u64,
}

impl TierMetrics {
    /// Fraction of `get`s answered by either tier.
    pub fn hit_ratio(&self) -> f64 {
        let served = self.hits + self.disk_hits;
        let total = served + self.misses;
        if total == 0 {
            0.0
        } else {
            served as f64 / total as f64
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct TierCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    disk_hits: AtomicU64,
    promotions: AtomicU64,
    inserts: AtomicU64,
    replacements: AtomicU64,
    removes: AtomicU64,
    evictions: AtomicU64,
    handoffs_scheduled: AtomicU64,
    handoffs_persisted: AtomicU64,
    handoffs_skipped: AtomicU64,
    releases: AtomicU64,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

impl TierCounters {
    pub(crate) fn snapshot(&self) -> TierMetrics {
        TierMetrics {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            disk_hits: self.disk_hits.load(Ordering::Relaxed),
            promotions: self.promotions.load(Ordering::Relaxed),
            inserts: self.inserts.load(Ordering::Relaxed),
            replacements: self.replacements.load(Ordering::Relaxed),
            removes: self.removes.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            handoffs_scheduled: self.handoffs_scheduled.load(Ordering::Relaxed),
            handoffs_persisted: self.handoffs_persisted.load(Ordering::Relaxed),
            handoffs_skipped: self.handoffs_skipped.load(Ordering::Relaxed),
            releases: self.releases.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn inc_hit(&self) {
        bump(&self.hits);
    }

    pub(crate) fn inc_miss(&self) {
        bump(&self.misses);
    }

    pub(crate) fn inc_disk_hit(&self) {
        bump(&self.disk_hits);
    }

    pub(crate) fn inc_promotion(&self) {
        bump(&self.promotions);
    }

    pub(crate) fn inc_insert(&self) {
        bump(&self.inserts);
    }

    pub(crate) fn inc_replacement(&self) {
        bump(&self.replacements);
    }

    pub(crate) fn inc_remove(&self) {
        bump(&self.removes);
    }

    pub(crate) fn add_evictions(&self, n: usize) {
        self.evictions.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub(crate) fn inc_handoff_scheduled(&self) {
        bump(&self.handoffs_scheduled);
    }

    pub(crate) fn inc_handoff_persisted(&self) {
        bump(&self.handoffs_persisted);
    }

    pub(crate) fn inc_handoff_skipped(&self) {
        bump(&self.handoffs_skipped);
    }

    pub(crate) fn inc_release(&self) {
        bump(&self.releases);
    }
}
