//! Example: two-tier image cache with a raw-pixel directory as the disk tier.
//!
//! Run with: RUST_LOG=imgcache=debug cargo run --example basic_image_cache

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use imgcache::config::{CacheConfiguration, FixedMemoryBudget};
use imgcache::executor::BackgroundQueue;
use imgcache::facade::ImageCache;
use imgcache::key::CacheKey;
use imgcache::resource::{DecodedImage, PixelFormat, Resource};
use imgcache::tier::{DiskTier, DiskTierFactory};

/// Stores Argb8888 pixels of square images, one file per key.
struct RawDir {
    dir: PathBuf,
}

impl DiskTier<CacheKey, DecodedImage> for RawDir {
    fn exists(&self, key: &CacheKey) -> bool {
        self.dir.join(key.as_str()).is_file()
    }

    fn get(&self, key: &CacheKey) -> Option<Arc<DecodedImage>> {
        let pixels = fs::read(self.dir.join(key.as_str())).ok()?;
        let side = ((pixels.len() / 4) as f64).sqrt() as u32;
        DecodedImage::new(side, side, PixelFormat::Argb8888, pixels).map(Arc::new)
    }

    fn put(&self, key: &CacheKey, value: &DecodedImage) {
        if let Some(pixels) = value.to_pixels() {
            let _ = fs::write(self.dir.join(key.as_str()), pixels);
        }
    }

    fn clean(&self) {
        if let Ok(entries) = fs::read_dir(&self.dir) {
            for entry in entries.flatten() {
                let _ = fs::remove_file(entry.path());
            }
        }
    }
}

struct RawDirFactory;

impl DiskTierFactory<DecodedImage> for RawDirFactory {
    fn usable_space(&self, _dir: &Path) -> io::Result<u64> {
        Ok(u64::MAX)
    }

    fn open(&self, config: &CacheConfiguration) -> imgcache::Result<Arc<dyn DiskTier<CacheKey, DecodedImage>>> {
        let dir = config
            .disk_cache_dir()
            .ok_or_else(|| imgcache::CacheError::DiskUnavailable("no directory".into()))?
            .to_path_buf();
        Ok(Arc::new(RawDir { dir }))
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let dir = std::env::temp_dir().join("imgcache-demo");
    // 64 KiB process budget, 10% for decoded images.
    let budget = FixedMemoryBudget::bytes(64 * 1024);
    let config = CacheConfiguration::builder()
        .disk_cache_dir(&dir)
        .mem_cache_size_percent(0.1, &budget)?
        .disk_cache_size(1024 * 1024)
        .clear_disk_cache_on_start(true)
        .try_build()?;

    let queue = Arc::new(BackgroundQueue::new(1)?);
    let cache = ImageCache::builder(config)
        .executor(queue.clone())
        .build(Arc::new(RawDirFactory))?;
    println!("=== imgcache demo ===\n");
    println!("disk tier available: {}", cache.wait_for_disk_cache());
    println!("memory budget: {} bytes\n", cache.config().mem_cache_size());

    // Each 32x32 Argb8888 image is 4 KiB; only one fits in memory.
    for i in 0..3u8 {
        let url = format!("https://example.com/photo-{i}.png");
        cache.put(&url, DecodedImage::filled(32, 32, PixelFormat::Argb8888, i))?;
        println!("put {url}");
    }
    queue.wait_idle();

    let memory = cache.memory().ok_or("memory tier disabled")?;
    println!("\nresident entries: {} ({} bytes)", memory.len(), memory.total_size());

    let first = cache.get("https://example.com/photo-0.png")?;
    match first {
        Some(image) => println!(
            "photo-0 came back from disk: {}x{}, released: {}",
            image.width(),
            image.height(),
            image.is_released()
        ),
        None => println!("photo-0 was lost"),
    }
    queue.wait_idle();

    let metrics = cache.metrics();
    println!(
        "\nhits {} / disk hits {} / misses {} / evictions {}",
        metrics.hits, metrics.disk_hits, metrics.misses, metrics.evictions
    );

    cache.clear_cache()?;
    queue.wait_idle();
    cache.clear_cache()?;
    println!("cleared; resident entries: {}", memory.len());
    Ok(())
}
