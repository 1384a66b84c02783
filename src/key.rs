//! Cache keys and the codecs that derive them from logical identifiers.
//!
//! The same [`CacheKey`] addresses an image in memory and on disk, so a codec
//! must be deterministic across processes: a key computed in one session has
//! to find the file written in a previous one.
//!
//! ```
//! use imgcache::key::{KeyCodec, Sha256KeyCodec};
//!
//! let codec = Sha256KeyCodec;
//! let a = codec.encode("https://example.com/cat.png");
//! let b = codec.encode("https://example.com/cat.png");
//! assert_eq!(a, b);
//! assert_eq!(a.as_str().len(), 64);
//! ```

use std::borrow::Borrow;
use std::fmt;
use std::hash::Hash;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Key shared by the memory tier and the disk tier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for CacheKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for CacheKey {
    fn from(raw: &str) -> Self {
        Self(raw.to_owned())
    }
}

impl From<String> for CacheKey {
    fn from(raw: String) -> Self {
        Self(raw)
    }
}

/// Bounds a type must meet to key a [`MemoryTier`](crate::tier::MemoryTier).
///
/// `is_present` is how the tier recognises the "absent key" case: an empty
/// string key is rejected with `InvalidArgument` before any state changes.
pub trait TierKey: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static {
    fn is_present(&self) -> bool {
        true
    }
}

impl TierKey for CacheKey {
    fn is_present(&self) -> bool {
        !self.0.is_empty()
    }
}

impl TierKey for String {
    fn is_present(&self) -> bool {
        !self.is_empty()
    }
}

impl TierKey for &'static str {
    fn is_present(&self) -> bool {
        !self.is_empty()
    }
}

impl TierKey for u32 {}
impl TierKey for u64 {}

/// Maps a caller-supplied identifier (usually a URL) to a [`CacheKey`].
pub trait KeyCodec: Send + Sync {
    fn encode(&self, id: &str) -> CacheKey;
}

impl<F> KeyCodec for F
where
    F: Fn(&str) -> CacheKey + Send + Sync,
{
    fn encode(&self, id: &str) -> CacheKey {
        self(id)
    }
}

/// Lowercase hex SHA-256 of the identifier's UTF-8 bytes.
///
/// The output is filename-safe and fixed-length, which is what a
/// directory-backed disk tier wants.
#[derive(Debug, Clone, Copy, Default)]
pub struct Sha256KeyCodec;

impl KeyCodec for Sha256KeyCodec {
    fn encode(&self, id: &str) -> CacheKey {
        let mut hasher = Sha256::new();
        hasher.update(id.as_bytes());
        CacheKey(format!("{:x}", hasher.finalize()))
    }
}

/// Uses the identifier verbatim. Handy when ids are already hashes.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityKeyCodec;

impl KeyCodec for IdentityKeyCodec {
    fn encode(&self, id: &str) -> CacheKey {
        CacheKey::from(id)
    }
}
