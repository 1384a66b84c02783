//! Cached payloads and their explicit release.
//!
//! A decoded image owns a pixel buffer that dominates its footprint. The
//! cache shares values as `Arc<V>`, so dropping the tier's handle alone would
//! leave the buffer alive for as long as any caller still holds a clone.
//! [`Resource::release`] frees the heavy part eagerly once the cache has
//! handed the value off to the disk tier.

use std::fmt;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// A cacheable value with a measurable footprint and an explicit release.
pub trait Resource: Send + Sync + 'static {
    /// Footprint in bytes. Must not change while the value is cached, and
    /// must not change as a result of [`release`](Resource::release).
    fn byte_size(&self) -> usize;

    /// Frees the underlying buffer. Idempotent.
    fn release(&self);

    fn is_released(&self) -> bool;
}

/// In-memory pixel layout of a decoded image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PixelFormat {
    Alpha8,
    Rgb565,
    Argb4444,
    Argb8888,
}

impl PixelFormat {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Alpha8 => 1,
            PixelFormat::Rgb565 | PixelFormat::Argb4444 => 2,
            PixelFormat::Argb8888 => 4,
        }
    }
}

/// A decoded bitmap: dimensions, pixel format, and the pixel buffer.
pub struct DecodedImage {
    width: u32,
    height: u32,
    format: PixelFormat,
    pixels: RwLock<Option<Vec<u8>>>,
}

impl DecodedImage {
    /// Wraps an existing buffer. Returns `None` when the buffer length does
    /// not match `width * height * bytes_per_pixel`.
    pub fn new(width: u32, height: u32, format: PixelFormat, pixels: Vec<u8>) -> Option<Self> {
        if pixels.len() != Self::footprint(width, height, format) {
            return None;
        }
        Some(Self {
            width,
            height,
            format,
            pixels: RwLock::new(Some(pixels)),
        })
    }

    /// An image of the given size with every byte set to `fill`.
    pub fn filled(width: u32, height: u32, format: PixelFormat, fill: u8) -> Self {
        let len = Self::footprint(width, height, format);
        Self {
            width,
            height,
            format,
            pixels: RwLock::new(Some(vec![fill; len])),
        }
    }

    fn footprint(width: u32, height: u32, format: PixelFormat) -> usize {
        width as usize * height as usize * format.bytes_per_pixel()
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn row_bytes(&self) -> usize {
        self.width as usize * self.format.bytes_per_pixel()
    }

    /// Runs `f` over the pixels; `None` once the image has been released.
    pub fn with_pixels<R>(&self, f: impl FnOnce(&[u8]) -> R) -> Option<R> {
        self.pixels.read().as_deref().map(f)
    }

    /// Copy of the pixel buffer, if still held.
    pub fn to_pixels(&self) -> Option<Vec<u8>> {
        self.pixels.read().clone()
    }
}

impl Resource for DecodedImage {
    fn byte_size(&self) -> usize {
        Self::footprint(self.width, self.height, self.format)
    }

    fn release(&self) {
        self.pixels.write().take();
    }

    fn is_released(&self) -> bool {
        self.pixels.read().is_none()
    }
}

impl Clone for DecodedImage {
    fn clone(&self) -> Self {
        Self {
            width: self.width,
            height: self.height,
            format: self.format,
            pixels: RwLock::new(self.to_pixels()),
        }
    }
}

impl PartialEq for DecodedImage {
    fn eq(&self, other: &Self) -> bool {
        self.width == other.width
            && self.height == other.height
            && self.format == other.format
            && *self.pixels.read() == *other.pixels.read()
    }
}

impl fmt::Debug for DecodedImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecodedImage")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("format", &self.format)
            .field("released", &self.is_released())
            .finish()
    }
}
