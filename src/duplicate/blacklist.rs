//! Blacklisted fingerprints
//!
//! Pages that show up in many unrelated comics (scanlation credits,
//! publisher logos, blank pages) would link everything to everything. Any
//! page within the similarity threshold of a blacklist entry is dropped
//! before it reaches the corpus.

use crate::core::error::Result;
use crate::core::fingerprint::Fingerprint;
use crate::core::hasher::Fingerprinter;
use crate::core::source::ComicSource;
use crate::duplicate::catalog::{CacheKey, PageFingerprint};
use crate::duplicate::fingerprint_cache::{ComicIdentity, FingerprintCache};
use log::{debug, info, warn};
use std::collections::HashSet;
use std::path::Path;

/// A set of fingerprints excluded from detection
#[derive(Debug, Clone, Default)]
pub struct BlacklistFilter {
    entries: Vec<Fingerprint>,
}

impl BlacklistFilter {
    /// An empty blacklist
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from fingerprints, dropping exact repeats
    pub fn from_fingerprints(fingerprints: impl IntoIterator<Item = Fingerprint>) -> Self {
        let mut filter = Self::new();
        filter.extend(fingerprints);
        filter
    }

    /// Parse a list of hex fingerprints
    pub fn from_hex_list(hashes: &[String]) -> Result<Self> {
        let fingerprints = hashes
            .iter()
            .map(|h| Fingerprint::from_hex(h.trim()))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::from_fingerprints(fingerprints))
    }

    /// Fingerprint every valid image in a folder
    ///
    /// With a cache, the folder is stored like a comic keyed by its path,
    /// mtime and the fingerprinter's algorithm, so an unchanged folder is
    /// not decoded again.
    pub fn from_folder(
        folder: &Path,
        source: &dyn ComicSource,
        fingerprinter: &dyn Fingerprinter,
        cache: Option<&FingerprintCache>,
    ) -> Result<Self> {
        let algorithm = fingerprinter.algorithm();
        let cached = match cache {
            Some(cache) => {
                let mtime_ms = source.metadata(folder)?.mtime_ms;
                let key = CacheKey::derive(folder, mtime_ms, &algorithm);
                let identity = ComicIdentity {
                    path: folder.to_path_buf(),
                    mtime_ms,
                    algorithm: algorithm.clone(),
                    min_width: 0,
                    min_height: 0,
                };
                Some((cache, key, identity))
            }
            None => None,
        };

        let hit = cached
            .as_ref()
            .and_then(|(cache, key, identity)| cache.get(key, identity));

        let pages = match hit {
            Some(pages) => {
                debug!("Blacklist fingerprints served from cache: {}", folder.display());
                pages
            }
            None => {
                let pages = Self::fingerprint_folder(folder, source, fingerprinter)?;
                if let Some((cache, key, identity)) = cached {
                    if let Err(e) = cache.put(&key, identity, pages.clone()) {
                        warn!("Failed to cache blacklist fingerprints: {}", e);
                    }
                }
                pages
            }
        };

        let filter = Self::from_fingerprints(pages.into_iter().map(|p| p.fingerprint));
        info!(
            "Loaded {} blacklist fingerprints from {}",
            filter.len(),
            folder.display()
        );
        Ok(filter)
    }

    fn fingerprint_folder(
        folder: &Path,
        source: &dyn ComicSource,
        fingerprinter: &dyn Fingerprinter,
    ) -> Result<Vec<PageFingerprint>> {
        let mut pages = Vec::new();

        for name in source.list_images(folder)? {
            let bytes = match source.read_image(folder, &name) {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!("Skipping blacklist image {}: {}", name, e);
                    continue;
                }
            };

            if source.image_dimensions(&bytes).is_none() {
                warn!("Skipping invalid blacklist image {}", name);
                continue;
            }

            match fingerprinter.fingerprint(&bytes) {
                Ok(fingerprint) => {
                    debug!("Blacklisted {} ({})", name, fingerprint);
                    pages.push(PageFingerprint { name, fingerprint });
                }
                Err(e) => warn!("Failed to fingerprint blacklist image {}: {}", name, e),
            }
        }

        Ok(pages)
    }

    /// Add fingerprints, skipping exact repeats
    pub fn extend(&mut self, fingerprints: impl IntoIterator<Item = Fingerprint>) {
        let mut seen: HashSet<String> = self.entries.iter().map(|f| f.hex().to_string()).collect();
        for fp in fingerprints {
            if seen.insert(fp.hex().to_string()) {
                self.entries.push(fp);
            }
        }
    }

    /// Union with another blacklist
    pub fn merge(&mut self, other: BlacklistFilter) {
        self.extend(other.entries);
    }

    /// Whether `fingerprint` is within `threshold` of any entry
    pub fn is_blocked(&self, fingerprint: &Fingerprint, threshold: u32) -> bool {
        self.entries
            .iter()
            .any(|entry| entry.is_similar(fingerprint, threshold))
    }

    /// Blacklisted fingerprints
    pub fn entries(&self) -> &[Fingerprint] {
        &self.entries
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the blacklist is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testdb::{HexFingerprinter, MockComicSource};
    use tempfile::TempDir;

    fn fp(hex: &str) -> Fingerprint {
        Fingerprint::from_hex(hex).unwrap()
    }

    #[test]
    fn test_empty_blocks_nothing() {
        let filter = BlacklistFilter::new();
        assert!(filter.is_empty());
        assert!(!filter.is_blocked(&fp("0000000000000000"), 64));
    }

    #[test]
    fn test_blocks_within_threshold() {
        let filter = BlacklistFilter::from_hex_list(&["0000000000000000".to_string()]).unwrap();
        assert!(filter.is_blocked(&fp("0000000000000000"), 0));
        assert!(filter.is_blocked(&fp("0000000000000007"), 3));
        assert!(!filter.is_blocked(&fp("000000000000000f"), 3));
    }

    #[test]
    fn test_dedupes_entries() {
        let mut filter = BlacklistFilter::from_hex_list(&[
            "00000000000000ff".to_string(),
            "00000000000000FF".to_string(),
        ])
        .unwrap();
        assert_eq!(filter.len(), 1);

        filter.merge(BlacklistFilter::from_fingerprints(vec![
            fp("00000000000000ff"),
            fp("ff00000000000000"),
        ]));
        assert_eq!(filter.len(), 2);
    }

    #[test]
    fn test_invalid_hex_list_is_error() {
        assert!(BlacklistFilter::from_hex_list(&["nothex".to_string()]).is_err());
    }

    #[test]
    fn test_from_folder_skips_invalid_images() {
        let source = MockComicSource::new();
        source.add_raw(
            "/blacklist",
            vec![
                ("credits.png", MockComicSource::page(10, 10, "00000000000000ff")),
                ("logo.png", MockComicSource::page(10, 10, "ff00000000000000")),
                ("junk.png", b"junk".to_vec()),
            ],
        );

        let filter =
            BlacklistFilter::from_folder(Path::new("/blacklist"), &source, &HexFingerprinter, None)
                .unwrap();
        assert_eq!(filter.len(), 2);
        assert!(filter.is_blocked(&fp("00000000000000ff"), 0));
    }

    #[test]
    fn test_from_folder_reuses_cached_fingerprints() {
        let temp = TempDir::new().unwrap();
        let cache = FingerprintCache::open(temp.path()).unwrap();
        let source = MockComicSource::new();
        source.add_comic("/blacklist", &["00000000000000ff", "ff00000000000000"]);
        let folder = Path::new("/blacklist");

        let first =
            BlacklistFilter::from_folder(folder, &source, &HexFingerprinter, Some(&cache)).unwrap();
        assert_eq!(source.image_reads(), 2);

        // a fresh cache handle on the same directory reads the entry from disk
        let reopened = FingerprintCache::open(temp.path()).unwrap();
        let second =
            BlacklistFilter::from_folder(folder, &source, &HexFingerprinter, Some(&reopened))
                .unwrap();
        assert_eq!(source.image_reads(), 2);
        assert_eq!(first.entries(), second.entries());

        source.touch("/blacklist");
        BlacklistFilter::from_folder(folder, &source, &HexFingerprinter, Some(&reopened)).unwrap();
        assert_eq!(source.image_reads(), 4);
    }
}
