//! imgcache: a two-tier (memory + disk) LRU cache for decoded images.
//!
//! The memory tier budgets by byte footprint, evicts least recently used
//! entries and hands them to a disk tier asynchronously. Disk hits are
//! promoted back into memory. [`ImageCache`] ties both tiers together behind
//! identifier-based `put`/`get`.
//!
//! The on-disk format is not part of this crate; supply a
//! [`DiskTierFactory`](tier::DiskTierFactory).

pub mod config;
pub mod ds;
pub mod error;
pub mod executor;
pub mod facade;
pub mod key;
pub mod metrics;
pub mod policy;
pub mod prelude;
pub mod resource;
pub mod sizer;
pub mod tier;

#[cfg(test)]
pub(crate) mod test_support;

pub use crate::config::{CacheConfiguration, CompressFormat, FixedMemoryBudget, MemoryBudget};
pub use crate::ds::{IntrusiveList, SlotArena, SlotId};
pub use crate::error::{CacheError, ConfigError, InvariantError, Result, SizeOverflow};
pub use crate::facade::{ImageCache, ImageCacheBuilder};
pub use crate::key::{CacheKey, KeyCodec, Sha256KeyCodec};
pub use crate::metrics::TierMetrics;
pub use crate::policy::SizedLru;
pub use crate::resource::{DecodedImage, PixelFormat, Resource};
pub use crate::tier::{DiskSlot, DiskTier, DiskTierFactory, MemoryTier};
