pub use crate::config::{CacheConfiguration, CompressFormat, FixedMemoryBudget, MemoryBudget};
pub use crate::error::{CacheError, Result};
pub use crate::executor::{BackgroundQueue, InlineExecutor, ManualExecutor, TaskExecutor};
pub use crate::facade::ImageCache;
pub use crate::key::{CacheKey, KeyCodec, Sha256KeyCodec, TierKey};
pub use crate::resource::{DecodedImage, PixelFormat, Resource};
pub use crate::sizer::{ByteSizer, ResourceSizer};
pub use crate::tier::{
    DiskSlot, DiskTier, DiskTierFactory, MemoryTier, PersistAll, PersistencePolicy,
    SkipNumericKeys,
};
