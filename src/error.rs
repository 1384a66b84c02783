//! Error types for imgcache.
//!
//! ## Key Components
//!
//! - [`ConfigError`]: a configuration value was rejected (zero budget,
//!   out-of-range memory percentage, bad compression quality).
//! - [`InvariantError`]: the memory tier's size accounting no longer adds up.
//!   This is a programming error in the sizing function or the bookkeeping,
//!   never a transient condition.
//! - [`CacheError`]: the error returned by tier and facade operations.
//!
//! Disk-tier absence and disk corruption are deliberately *not* errors: the
//! cache degrades to memory-only and reports a miss.
//!
//! ## Example Usage
//!
//! ```
//! use imgcache::config::{CacheConfiguration, FixedMemoryBudget};
//!
//! let budget = FixedMemoryBudget::mebibytes(64);
//! let err = CacheConfiguration::builder()
//!     .mem_cache_size_percent(0.9, &budget)
//!     .unwrap_err();
//! assert!(err.to_string().contains("between 0.05 and 0.8"));
//! ```

use thiserror::Error;

/// A cache configuration parameter failed validation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct ConfigError(String);

impl ConfigError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }

    pub fn message(&self) -> &str {
        &self.0
    }
}

/// Size accounting or list linkage is inconsistent.
///
/// Once a tier reports this it refuses further mutation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct InvariantError(String);

impl InvariantError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }

    pub fn message(&self) -> &str {
        &self.0
    }
}

/// Adding an entry would push the size total past `u64::MAX`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("adding size {size} to total_size {total} overflows")]
pub struct SizeOverflow {
    pub total: u64,
    pub size: u64,
}

/// Error returned by [`MemoryTier`](crate::tier::MemoryTier) and
/// [`ImageCache`](crate::facade::ImageCache) operations.
#[derive(Debug, Error)]
pub enum CacheError {
    /// A key was empty, or `remove` named a key that is not resident.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    /// Accounting is corrupted; the tier can no longer be trusted.
    #[error("cache accounting corrupted: {0}")]
    Invariant(#[from] InvariantError),

    /// The sizing function reported a negative size.
    #[error("size function reported negative size {size} for key {key}")]
    NegativeSize { key: String, size: i64 },

    /// The entry does not fit in the size total. Nothing was changed.
    #[error("size {size} for key {key} overflows the tier's size total")]
    SizeOverflow { key: String, size: u64 },

    /// The disk tier could not be opened.
    #[error("disk tier unavailable: {0}")]
    DiskUnavailable(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl CacheError {
    pub(crate) fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// `true` for errors that indicate a defect rather than bad input.
    ///
    /// ```
    /// use imgcache::error::{CacheError, InvariantError};
    ///
    /// assert!(CacheError::from(InvariantError::new("total underflow")).is_fatal());
    /// assert!(!CacheError::InvalidArgument("empty key".into()).is_fatal());
    /// ```
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Invariant(_) | Self::NegativeSize { .. })
    }
}

pub type Result<T> = std::result::Result<T, CacheError>;
