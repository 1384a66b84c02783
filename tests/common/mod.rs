// ==============================================
// SHARED FIXTURES FOR INTEGRATION TESTS
// ==============================================
#![allow(dead_code)]

use std::collections::HashMap;
use std::fs;
use std::io::{self, BufRead, BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use imgcache::config::CacheConfiguration;
use imgcache::error::{CacheError, Result};
use imgcache::key::CacheKey;
use imgcache::resource::{DecodedImage, PixelFormat};
use imgcache::tier::{DiskTier, DiskTierFactory};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Installs a fmt subscriber once; honours `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// A one-row Alpha8 image occupying exactly `bytes` bytes.
pub fn image(bytes: u32, fill: u8) -> DecodedImage {
    DecodedImage::filled(bytes, 1, PixelFormat::Alpha8, fill)
}

// ----------------------------------------------
// In-memory disk tier
// ----------------------------------------------

#[derive(Default)]
pub struct MemDisk {
    entries: Mutex<HashMap<CacheKey, DecodedImage>>,
    puts: AtomicUsize,
}

impl MemDisk {
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn contains(&self, key: &CacheKey) -> bool {
        self.entries.lock().contains_key(key)
    }

    pub fn put_count(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }
}

impl DiskTier<CacheKey, DecodedImage> for MemDisk {
    fn exists(&self, key: &CacheKey) -> bool {
        self.entries.lock().contains_key(key)
    }

    fn get(&self, key: &CacheKey) -> Option<Arc<DecodedImage>> {
        self.entries.lock().get(key).cloned().map(Arc::new)
    }

    fn put(&self, key: &CacheKey, value: &DecodedImage) {
        self.puts.fetch_add(1, Ordering::SeqCst);
        self.entries.lock().insert(key.clone(), value.clone());
    }

    fn clean(&self) {
        self.entries.lock().clear();
    }
}

/// Hands out one shared [`MemDisk`] and counts how often it was opened.
pub struct MemDiskFactory {
    pub disk: Arc<MemDisk>,
    space: u64,
    open_delay: Duration,
    opens: AtomicUsize,
}

impl MemDiskFactory {
    pub fn new() -> Self {
        Self {
            disk: Arc::new(MemDisk::default()),
            space: u64::MAX,
            open_delay: Duration::ZERO,
            opens: AtomicUsize::new(0),
        }
    }

    pub fn with_space(mut self, space: u64) -> Self {
        self.space = space;
        self
    }

    /// Makes `open` sleep, widening the window for racing initializers.
    pub fn with_open_delay(mut self, delay: Duration) -> Self {
        self.open_delay = delay;
        self
    }

    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }
}

impl DiskTierFactory<DecodedImage> for MemDiskFactory {
    fn usable_space(&self, _dir: &Path) -> io::Result<u64> {
        Ok(self.space)
    }

    fn open(&self, _config: &CacheConfiguration) -> Result<Arc<dyn DiskTier<CacheKey, DecodedImage>>> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        if !self.open_delay.is_zero() {
            thread::sleep(self.open_delay);
        }
        let disk: Arc<dyn DiskTier<CacheKey, DecodedImage>> = self.disk.clone();
        Ok(disk)
    }
}

// ----------------------------------------------
// Directory-backed disk tier
// ----------------------------------------------

#[derive(Serialize, Deserialize)]
struct Header {
    width: u32,
    height: u32,
    format: PixelFormat,
}

/// One file per key: a JSON header line followed by the raw pixels.
pub struct DirDisk {
    dir: PathBuf,
}

impl DirDisk {
    pub fn open(dir: &Path) -> io::Result<Self> {
        fs::create_dir_all(dir)?;
        Ok(Self { dir: dir.to_path_buf() })
    }

    fn path(&self, key: &CacheKey) -> PathBuf {
        self.dir.join(key.as_str())
    }

    fn read(&self, key: &CacheKey) -> io::Result<DecodedImage> {
        let mut reader = BufReader::new(fs::File::open(self.path(key))?);
        let mut line = String::new();
        reader.read_line(&mut line)?;
        let header: Header = serde_json::from_str(&line)?;
        let mut pixels = Vec::new();
        reader.read_to_end(&mut pixels)?;
        DecodedImage::new(header.width, header.height, header.format, pixels)
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "pixel length mismatch"))
    }

    fn write(&self, key: &CacheKey, value: &DecodedImage) -> io::Result<()> {
        let Some(pixels) = value.to_pixels() else {
            return Ok(());
        };
        let header = Header {
            width: value.width(),
            height: value.height(),
            format: value.format(),
        };
        let mut file = fs::File::create(self.path(key))?;
        serde_json::to_writer(&mut file, &header)?;
        file.write_all(b"\n")?;
        file.write_all(&pixels)
    }
}

impl DiskTier<CacheKey, DecodedImage> for DirDisk {
    fn exists(&self, key: &CacheKey) -> bool {
        self.path(key).is_file()
    }

    fn get(&self, key: &CacheKey) -> Option<Arc<DecodedImage>> {
        self.read(key).ok().map(Arc::new)
    }

    fn put(&self, key: &CacheKey, value: &DecodedImage) {
        let _ = self.write(key, value);
    }

    fn clean(&self) {
        if let Ok(entries) = fs::read_dir(&self.dir) {
            for entry in entries.flatten() {
                let _ = fs::remove_file(entry.path());
            }
        }
    }
}

/// Opens a [`DirDisk`] at the configured directory.
pub struct DirDiskFactory;

impl DiskTierFactory<DecodedImage> for DirDiskFactory {
    fn usable_space(&self, _dir: &Path) -> io::Result<u64> {
        Ok(u64::MAX)
    }

    fn open(&self, config: &CacheConfiguration) -> Result<Arc<dyn DiskTier<CacheKey, DecodedImage>>> {
        let dir = config
            .disk_cache_dir()
            .ok_or_else(|| CacheError::DiskUnavailable("no directory configured".into()))?;
        let disk: Arc<dyn DiskTier<CacheKey, DecodedImage>> = Arc::new(DirDisk::open(dir)?);
        Ok(disk)
    }
}
