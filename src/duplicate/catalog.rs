//! Per-comic fingerprint catalogue
//!
//! [`HashCatalogBuilder`] turns one comic into a [`ComicRecord`]: every page
//! image is validated, filtered by resolution, fingerprinted and checked
//! against the blacklist. Results are cached under the comic's
//! [`CacheKey`] so unchanged comics are never decoded twice.
//!
//! Failures on a single comic never propagate: the record carries an error
//! message instead and is left out of detection.

use crate::core::control::ScanControl;
use crate::core::fingerprint::Fingerprint;
use crate::core::hasher::Fingerprinter;
use crate::core::source::ComicSource;
use crate::duplicate::blacklist::BlacklistFilter;
use crate::duplicate::fingerprint_cache::{ComicIdentity, FingerprintCache};
use crate::duplicate::DetectionSettings;
use log::{debug, trace, warn};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Deterministic identity of a comic's extracted state.
///
/// SHA-256 over `path:mtime:algorithm`. Any change to the file or to the
/// hashing algorithm yields a new key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(String);

impl CacheKey {
    /// Derive the key for a comic
    pub fn derive(path: &Path, mtime_ms: u64, algorithm: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(format!("{}:{}:{}", path.display(), mtime_ms, algorithm).as_bytes());
        let digest = hasher.finalize();
        CacheKey(digest.iter().map(|b| format!("{:02x}", b)).collect())
    }

    /// Hex form, also used as the cache file stem
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CacheKey {
    fn from(s: &str) -> Self {
        CacheKey(s.to_string())
    }
}

/// One page image and its fingerprint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageFingerprint {
    /// Image file name inside the comic
    pub name: String,
    /// Fingerprint of the image
    pub fingerprint: Fingerprint,
}

/// A comic and its page fingerprints for one scan
#[derive(Debug, Clone)]
pub struct ComicRecord {
    /// Absolute path of the comic
    pub path: PathBuf,
    /// Size in bytes
    pub size: u64,
    /// Modification time in milliseconds since the epoch
    pub mtime_ms: u64,
    /// Cache key derived from path, mtime and algorithm
    pub cache_key: CacheKey,
    /// Usable pages in natural order, blacklist already applied
    pub images: Vec<PageFingerprint>,
    /// Set when the comic could not be read
    pub error: Option<String>,
    /// Whether the fingerprints came from the cache
    pub from_cache: bool,
    /// Images rejected as unreadable or too small
    pub rejected_images: usize,
    /// Images dropped by the blacklist
    pub blacklisted_images: usize,
}

impl ComicRecord {
    fn failed(path: &Path, size: u64, mtime_ms: u64, cache_key: CacheKey, error: String) -> Self {
        Self {
            path: path.to_path_buf(),
            size,
            mtime_ms,
            cache_key,
            images: Vec::new(),
            error: Some(error),
            from_cache: false,
            rejected_images: 0,
            blacklisted_images: 0,
        }
    }

    /// Number of usable images
    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    /// Whether extraction succeeded
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }

    /// Display name (last path component)
    pub fn name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path.display().to_string())
    }
}

impl AsRef<ComicRecord> for ComicRecord {
    fn as_ref(&self) -> &ComicRecord {
        self
    }
}

/// Builds [`ComicRecord`]s; shared by all extraction workers
pub struct HashCatalogBuilder {
    source: Arc<dyn ComicSource>,
    fingerprinter: Arc<dyn Fingerprinter>,
    blacklist: Arc<BlacklistFilter>,
    cache: Option<Arc<FingerprintCache>>,
    settings: DetectionSettings,
    algorithm: String,
}

impl HashCatalogBuilder {
    /// Create a builder without a fingerprint cache
    pub fn new(
        source: Arc<dyn ComicSource>,
        fingerprinter: Arc<dyn Fingerprinter>,
        blacklist: Arc<BlacklistFilter>,
        settings: DetectionSettings,
    ) -> Self {
        let algorithm = fingerprinter.algorithm();
        Self {
            source,
            fingerprinter,
            blacklist,
            cache: None,
            settings,
            algorithm,
        }
    }

    /// Attach a fingerprint cache
    pub fn with_cache(mut self, cache: Arc<FingerprintCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Algorithm identity used in cache keys
    pub fn algorithm(&self) -> &str {
        &self.algorithm
    }

    /// The comic source this builder reads from
    pub fn source(&self) -> &Arc<dyn ComicSource> {
        &self.source
    }

    /// Catalogue one comic.
    ///
    /// Returns `None` only when the scan was stopped part-way through.
    pub fn build(&self, comic: &Path, control: &ScanControl) -> Option<ComicRecord> {
        let metadata = match self.source.metadata(comic) {
            Ok(m) => m,
            Err(e) => {
                warn!("Skipping {}: {}", comic.display(), e);
                let key = CacheKey::derive(comic, 0, &self.algorithm);
                return Some(ComicRecord::failed(comic, 0, 0, key, e.to_string()));
            }
        };

        let cache_key = CacheKey::derive(comic, metadata.mtime_ms, &self.algorithm);
        let identity = ComicIdentity {
            path: comic.to_path_buf(),
            mtime_ms: metadata.mtime_ms,
            algorithm: self.algorithm.clone(),
            min_width: self.settings.min_image_width,
            min_height: self.settings.min_image_height,
        };

        let cached = self
            .cache
            .as_ref()
            .and_then(|cache| cache.get(&cache_key, &identity));

        let (pages, rejected, from_cache) = match cached {
            Some(pages) => {
                trace!("Fingerprint cache hit: {}", comic.display());
                (pages, 0, true)
            }
            None => {
                let (pages, rejected) = match self.extract(comic, control) {
                    Ok(Some(result)) => result,
                    Ok(None) => return None,
                    Err(e) => {
                        warn!("Failed to read {}: {}", comic.display(), e);
                        return Some(ComicRecord::failed(
                            comic,
                            metadata.size,
                            metadata.mtime_ms,
                            cache_key,
                            e.to_string(),
                        ));
                    }
                };

                if let Some(cache) = &self.cache {
                    if let Err(e) = cache.put(&cache_key, identity, pages.clone()) {
                        warn!("Failed to cache fingerprints for {}: {}", comic.display(), e);
                    }
                }
                (pages, rejected, false)
            }
        };

        let total = pages.len();
        let images: Vec<PageFingerprint> = pages
            .into_iter()
            .filter(|page| {
                !self
                    .blacklist
                    .is_blocked(&page.fingerprint, self.settings.similarity_threshold)
            })
            .collect();
        let blacklisted = total - images.len();

        debug!(
            "Catalogued {}: {} images ({} rejected, {} blacklisted{})",
            comic.display(),
            images.len(),
            rejected,
            blacklisted,
            if from_cache { ", cached" } else { "" }
        );

        Some(ComicRecord {
            path: comic.to_path_buf(),
            size: metadata.size,
            mtime_ms: metadata.mtime_ms,
            cache_key,
            images,
            error: None,
            from_cache,
            rejected_images: rejected,
            blacklisted_images: blacklisted,
        })
    }

    /// Read, validate and fingerprint every image. `Ok(None)` = stopped.
    fn extract(
        &self,
        comic: &Path,
        control: &ScanControl,
    ) -> crate::core::error::Result<Option<(Vec<PageFingerprint>, usize)>> {
        let names = self.source.list_images(comic)?;
        let mut pages = Vec::with_capacity(names.len());
        let mut rejected = 0;

        for name in names {
            if !control.checkpoint() {
                return Ok(None);
            }

            let bytes = match self.source.read_image(comic, &name) {
                Ok(bytes) => bytes,
                Err(e) => {
                    debug!("Unreadable image {} in {}: {}", name, comic.display(), e);
                    rejected += 1;
                    continue;
                }
            };

            match self.source.image_dimensions(&bytes) {
                Some((w, h)) if self.settings.accepts_resolution(w, h) => {}
                Some((w, h)) => {
                    trace!("Image {} too small ({}x{})", name, w, h);
                    rejected += 1;
                    continue;
                }
                None => {
                    debug!("Invalid image {} in {}", name, comic.display());
                    rejected += 1;
                    continue;
                }
            }

            match self.fingerprinter.fingerprint(&bytes) {
                Ok(fingerprint) => pages.push(PageFingerprint { name, fingerprint }),
                Err(e) => {
                    debug!("Failed to fingerprint {} in {}: {}", name, comic.display(), e);
                    rejected += 1;
                }
            }
        }

        Ok(Some((pages, rejected)))
    }
}
