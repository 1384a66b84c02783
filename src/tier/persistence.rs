//! Which keys `remove` may demote to disk.
//!
//! Eviction and `clean` always hand values off to disk. An explicit `remove`
//! consults a [`PersistencePolicy`] first. The default for string keys,
//! [`SkipNumericKeys`], skips keys made only of ASCII digits; such keys tend
//! to be synthetic handles rather than content addresses, so there is
//! nothing to find again under them in a later session.

use crate::key::TierKey;

/// Decides whether a removed entry is worth persisting.
pub trait PersistencePolicy<K>: Send + Sync {
    fn is_eligible(&self, key: &K) -> bool;
}

impl<K, F> PersistencePolicy<K> for F
where
    F: Fn(&K) -> bool + Send + Sync,
{
    fn is_eligible(&self, key: &K) -> bool {
        self(key)
    }
}

/// Every key is eligible.
#[derive(Debug, Clone, Copy, Default)]
pub struct PersistAll;

impl<K: TierKey> PersistencePolicy<K> for PersistAll {
    fn is_eligible(&self, _key: &K) -> bool {
        true
    }
}

/// Keys consisting solely of ASCII digits are not persisted.
#[derive(Debug, Clone, Copy, Default)]
pub struct SkipNumericKeys;

impl<K: TierKey + AsRef<str>> PersistencePolicy<K> for SkipNumericKeys {
    fn is_eligible(&self, key: &K) -> bool {
        let raw = key.as_ref();
        raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_digit())
    }
}
