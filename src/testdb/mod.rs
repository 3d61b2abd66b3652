//! Test Database Module
//!
//! In-memory comics for exercising the engine without touching real files
//! or decoding real images.
//!
//! # Page encoding
//!
//! A mock page is the ASCII text `WIDTHxHEIGHT:HEX`. [`MockComicSource`]
//! reports `WIDTHxHEIGHT` as the image dimensions and [`HexFingerprinter`]
//! returns `HEX` as the fingerprint, so a test states exactly which
//! fingerprints a comic contains.
//!
//! ```rust
//! use comic_dupe_finder::testdb::MockComicSource;
//!
//! let source = MockComicSource::new();
//! source.add_comic("/library/a", &["00000000000000ff", "ffffffffffffff00"]);
//! assert_eq!(source.comic_count(), 1);
//! ```

use crate::core::error::{Result, ScanError};
use crate::core::fingerprint::Fingerprint;
use crate::core::hasher::Fingerprinter;
use crate::core::source::{ComicMetadata, ComicSource};
use crate::duplicate::catalog::{CacheKey, ComicRecord, PageFingerprint};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::RwLock;
use std::time::Duration;

/// Algorithm identity reported by [`HexFingerprinter`]
pub const HEX_ALGORITHM: &str = "hex-test";

/// Default mock page dimensions
pub const DEFAULT_PAGE_SIZE: (u32, u32) = (800, 1200);

#[derive(Debug, Clone)]
struct MockComic {
    pages: Vec<(String, Vec<u8>)>,
    created_ms: u64,
    mtime_ms: u64,
    broken: bool,
}

/// A [`ComicSource`] backed by an in-memory map
#[derive(Debug, Default)]
pub struct MockComicSource {
    comics: RwLock<BTreeMap<PathBuf, MockComic>>,
    image_reads: AtomicUsize,
    image_delay_ms: AtomicU64,
}

impl MockComicSource {
    /// Empty source
    pub fn new() -> Self {
        Self::default()
    }

    /// Encode a mock page
    pub fn page(width: u32, height: u32, hex: &str) -> Vec<u8> {
        format!("{}x{}:{}", width, height, hex).into_bytes()
    }

    fn insert(&self, path: &str, pages: Vec<(String, Vec<u8>)>) {
        let comic = MockComic {
            pages,
            created_ms: 1_000,
            mtime_ms: 1_000,
            broken: false,
        };
        self.write().insert(PathBuf::from(path), comic);
    }

    /// Add a comic from raw (name, bytes) pages
    pub fn add_raw(&self, path: &str, pages: Vec<(&str, Vec<u8>)>) {
        self.insert(
            path,
            pages
                .into_iter()
                .map(|(name, bytes)| (name.to_string(), bytes))
                .collect(),
        );
    }

    /// Add a comic with one full-size page per fingerprint
    pub fn add_comic(&self, path: &str, hexes: &[&str]) {
        let (w, h) = DEFAULT_PAGE_SIZE;
        self.insert(
            path,
            hexes
                .iter()
                .enumerate()
                .map(|(i, hex)| (format!("{:03}.jpg", i + 1), Self::page(w, h, hex)))
                .collect(),
        );
    }

    /// Add a comic whose image listing fails
    pub fn add_broken(&self, path: &str) {
        let comic = MockComic {
            pages: Vec::new(),
            created_ms: 1_000,
            mtime_ms: 1_000,
            broken: true,
        };
        self.write().insert(PathBuf::from(path), comic);
    }

    /// Remove a comic
    pub fn remove(&self, path: &str) {
        self.write().remove(Path::new(path));
    }

    /// Bump a comic's modification time
    pub fn touch(&self, path: &str) {
        if let Some(comic) = self.write().get_mut(Path::new(path)) {
            comic.mtime_ms += 1_000;
        }
    }

    /// Set a comic's creation and modification times
    pub fn set_times(&self, path: &str, created_ms: u64, mtime_ms: u64) {
        if let Some(comic) = self.write().get_mut(Path::new(path)) {
            comic.created_ms = created_ms;
            comic.mtime_ms = mtime_ms;
        }
    }

    /// Slow down every image read
    pub fn set_image_delay(&self, delay: Duration) {
        self.image_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// Number of `read_image` calls so far
    pub fn image_reads(&self) -> usize {
        self.image_reads.load(Ordering::SeqCst)
    }

    /// Number of comics
    pub fn comic_count(&self) -> usize {
        self.read().len()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, BTreeMap<PathBuf, MockComic>> {
        self.comics.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, BTreeMap<PathBuf, MockComic>> {
        self.comics.write().unwrap_or_else(|e| e.into_inner())
    }

    fn missing(comic: &Path) -> ScanError {
        ScanError::SourceError {
            path: comic.to_path_buf(),
            message: "no such comic".to_string(),
        }
    }
}

impl ComicSource for MockComicSource {
    fn discover(&self, roots: &[PathBuf]) -> Result<Vec<PathBuf>> {
        Ok(self
            .read()
            .keys()
            .filter(|path| roots.iter().any(|root| path.starts_with(root)))
            .cloned()
            .collect())
    }

    fn metadata(&self, comic: &Path) -> Result<ComicMetadata> {
        let comics = self.read();
        let entry = comics.get(comic).ok_or_else(|| Self::missing(comic))?;
        Ok(ComicMetadata {
            size: entry.pages.iter().map(|(_, b)| b.len() as u64).sum(),
            mtime_ms: entry.mtime_ms,
            created_ms: Some(entry.created_ms),
        })
    }

    fn list_images(&self, comic: &Path) -> Result<Vec<String>> {
        let comics = self.read();
        let entry = comics.get(comic).ok_or_else(|| Self::missing(comic))?;
        if entry.broken {
            return Err(ScanError::SourceError {
                path: comic.to_path_buf(),
                message: "corrupt archive".to_string(),
            });
        }
        Ok(entry.pages.iter().map(|(name, _)| name.clone()).collect())
    }

    fn read_image(&self, comic: &Path, name: &str) -> Result<Vec<u8>> {
        self.image_reads.fetch_add(1, Ordering::SeqCst);

        let delay = self.image_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            std::thread::sleep(Duration::from_millis(delay));
        }

        let comics = self.read();
        let entry = comics.get(comic).ok_or_else(|| Self::missing(comic))?;
        entry
            .pages
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, bytes)| bytes.clone())
            .ok_or_else(|| ScanError::SourceError {
                path: comic.to_path_buf(),
                message: format!("no image named {}", name),
            })
    }

    fn image_dimensions(&self, bytes: &[u8]) -> Option<(u32, u32)> {
        let text = std::str::from_utf8(bytes).ok()?;
        let (dims, _) = text.split_once(':')?;
        let (w, h) = dims.split_once('x')?;
        Some((w.parse().ok()?, h.parse().ok()?))
    }
}

/// Reads the fingerprint straight out of a mock page
#[derive(Debug, Clone, Copy, Default)]
pub struct HexFingerprinter;

impl Fingerprinter for HexFingerprinter {
    fn algorithm(&self) -> String {
        HEX_ALGORITHM.to_string()
    }

    fn fingerprint(&self, bytes: &[u8]) -> Result<Fingerprint> {
        let text = std::str::from_utf8(bytes)
            .map_err(|e| ScanError::FingerprintError(e.to_string()))?;
        let (_, hex) = text
            .split_once(':')
            .ok_or_else(|| ScanError::FingerprintError("not a mock page".to_string()))?;
        Fingerprint::from_hex(hex)
    }
}

/// Build a catalogued comic directly from fingerprints
pub fn comic_record(path: &str, hexes: &[&str]) -> ComicRecord {
    let path = PathBuf::from(path);
    ComicRecord {
        cache_key: CacheKey::derive(&path, 0, HEX_ALGORITHM),
        size: hexes.len() as u64 * 100,
        mtime_ms: 0,
        images: hexes
            .iter()
            .enumerate()
            .map(|(i, hex)| PageFingerprint {
                name: format!("{:03}.jpg", i + 1),
                fingerprint: Fingerprint::from_hex(hex)
                    .unwrap_or_else(|e| panic!("bad test fingerprint {}: {}", hex, e)),
            })
            .collect(),
        error: None,
        from_cache: false,
        rejected_images: 0,
        blacklisted_images: 0,
        path,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_page_round_trip() {
        let source = MockComicSource::new();
        let page = MockComicSource::page(640, 480, "00ff");
        assert_eq!(source.image_dimensions(&page), Some((640, 480)));
        assert_eq!(HexFingerprinter.fingerprint(&page).unwrap().hex(), "00ff");
        assert_eq!(source.image_dimensions(b"garbage"), None);
    }

    #[test]
    fn test_discover_filters_by_root() {
        let source = MockComicSource::new();
        source.add_comic("/lib/a", &["00"]);
        source.add_comic("/lib/b", &["00"]);
        source.add_comic("/other/c", &["00"]);

        let found = source.discover(&[PathBuf::from("/lib")]).unwrap();
        assert_eq!(found, vec![PathBuf::from("/lib/a"), PathBuf::from("/lib/b")]);
    }

    #[test]
    fn test_touch_changes_mtime() {
        let source = MockComicSource::new();
        source.add_comic("/lib/a", &["00"]);
        let before = source.metadata(Path::new("/lib/a")).unwrap().mtime_ms;
        source.touch("/lib/a");
        assert!(source.metadata(Path::new("/lib/a")).unwrap().mtime_ms > before);
    }
}
