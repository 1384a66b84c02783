//! Size functions used for capacity accounting.
//!
//! The memory tier budgets by whatever unit its sizer reports. For images
//! that unit is bytes ([`ByteSizer`]); [`UnitSizer`] turns the tier back
//! into an entry-count cache.
//!
//! Sizers return `i64` so a defective implementation that reports a negative
//! size is caught by the tier (`CacheError::NegativeSize`) instead of
//! silently wrapping.

use std::marker::PhantomData;

use crate::resource::Resource;

/// `(key, value) -> size`. Must be pure: the same entry must always report
/// the same size while it is cached.
pub trait ResourceSizer<K, V>: Send + Sync {
    fn size_of(&self, key: &K, value: &V) -> i64;
}

impl<K, V, F> ResourceSizer<K, V> for F
where
    F: Fn(&K, &V) -> i64 + Send + Sync,
{
    fn size_of(&self, key: &K, value: &V) -> i64 {
        self(key, value)
    }
}

/// Measures [`Resource::byte_size`].
pub struct ByteSizer<V>(PhantomData<fn(&V)>);

impl<V> ByteSizer<V> {
    pub fn new() -> Self {
        Self(PhantomData)
    }
}

impl<V> Default for ByteSizer<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V: Resource> ResourceSizer<K, V> for ByteSizer<V> {
    fn size_of(&self, _key: &K, value: &V) -> i64 {
        i64::try_from(value.byte_size()).unwrap_or(i64::MAX)
    }
}

/// Every entry counts as one.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnitSizer;

impl<K, V> ResourceSizer<K, V> for UnitSizer {
    fn size_of(&self, _key: &K, _value: &V) -> i64 {
        1
    }
}
