//! The two cache tiers and the seam between them.

pub mod disk;
pub mod memory;
pub mod persistence;

pub use disk::{DiskSlot, DiskTier, DiskTierFactory};
pub use memory::MemoryTier;
pub use persistence::{PersistAll, PersistencePolicy, SkipNumericKeys};
