//! Per-comic fingerprint cache
//!
//! One JSON file per [`CacheKey`] in the cache directory, fronted by an
//! in-memory map. An entry is only returned when its recorded identity
//! (path, mtime, algorithm, resolution filter) matches the comic being
//! catalogued; anything else is a miss and the stale file is removed.
//!
//! Fingerprints are stored before blacklist filtering so that editing the
//! blacklist never invalidates the cache.

use crate::core::error::{Result, ScanError};
use crate::core::storage::{read_json, write_json_atomic};
use crate::duplicate::catalog::{CacheKey, PageFingerprint};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Extension of cache entry files
const ENTRY_EXTENSION: &str = "json";

/// What an entry must match to be reused
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComicIdentity {
    /// Comic path
    pub path: PathBuf,
    /// Modification time in milliseconds
    pub mtime_ms: u64,
    /// Fingerprint algorithm identity
    pub algorithm: String,
    /// Minimum image width applied when the entry was built
    pub min_width: u32,
    /// Minimum image height applied when the entry was built
    pub min_height: u32,
}

/// On-disk cache entry
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CacheEntry {
    version: u32,
    #[serde(flatten)]
    identity: ComicIdentity,
    created_at: DateTime<Utc>,
    images: Vec<PageFingerprint>,
}

impl CacheEntry {
    const CURRENT_VERSION: u32 = 1;
}

/// Summary of the on-disk cache
#[derive(Debug, Clone, Default, Serialize)]
pub struct CacheStats {
    /// Number of entry files
    pub entries: usize,
    /// Total size of entry files in bytes
    pub total_bytes: u64,
    /// Modification time of the oldest entry
    pub oldest: Option<DateTime<Utc>>,
    /// Modification time of the newest entry
    pub newest: Option<DateTime<Utc>>,
}

/// Fingerprint cache shared by all extraction workers
#[derive(Debug)]
pub struct FingerprintCache {
    dir: Option<PathBuf>,
    memory: Mutex<HashMap<CacheKey, CacheEntry>>,
}

impl FingerprintCache {
    /// Open (and create) a cache directory
    pub fn open(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir).map_err(|e| {
            ScanError::IoError(format!(
                "Failed to create cache directory {}: {}",
                dir.display(),
                e
            ))
        })?;

        Ok(Self {
            dir: Some(dir.to_path_buf()),
            memory: Mutex::new(HashMap::new()),
        })
    }

    /// A cache that lives only for this process
    pub fn in_memory() -> Self {
        Self {
            dir: None,
            memory: Mutex::new(HashMap::new()),
        }
    }

    /// Directory backing this cache, if any
    pub fn dir(&self) -> Option<&Path> {
        self.dir.as_deref()
    }

    fn entry_path(&self, key: &CacheKey) -> Option<PathBuf> {
        self.dir
            .as_ref()
            .map(|dir| dir.join(format!("{}.{}", key.as_str(), ENTRY_EXTENSION)))
    }

    fn lock_memory(&self) -> std::sync::MutexGuard<'_, HashMap<CacheKey, CacheEntry>> {
        self.memory.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Look up fingerprints for a comic
    pub fn get(&self, key: &CacheKey, identity: &ComicIdentity) -> Option<Vec<PageFingerprint>> {
        if let Some(entry) = self.lock_memory().get(key) {
            if entry.identity == *identity {
                return Some(entry.images.clone());
            }
        }

        let path = self.entry_path(key)?;
        if !path.exists() {
            return None;
        }

        match read_json::<CacheEntry>(&path) {
            Ok(entry)
                if entry.version == CacheEntry::CURRENT_VERSION && entry.identity == *identity =>
            {
                let images = entry.images.clone();
                self.lock_memory().insert(key.clone(), entry);
                Some(images)
            }
            Ok(_) => {
                debug!("Stale fingerprint cache entry: {}", path.display());
                self.discard(key);
                None
            }
            Err(e) => {
                debug!("Unreadable fingerprint cache entry {}: {}", path.display(), e);
                self.discard(key);
                None
            }
        }
    }

    /// Store fingerprints for a comic
    pub fn put(
        &self,
        key: &CacheKey,
        identity: ComicIdentity,
        images: Vec<PageFingerprint>,
    ) -> Result<()> {
        let entry = CacheEntry {
            version: CacheEntry::CURRENT_VERSION,
            identity,
            created_at: Utc::now(),
            images,
        };

        if let Some(path) = self.entry_path(key) {
            write_json_atomic(&path, &entry)?;
        }

        self.lock_memory().insert(key.clone(), entry);
        Ok(())
    }

    /// Remove one entry
    pub fn remove(&self, key: &CacheKey) -> Result<()> {
        self.lock_memory().remove(key);
        if let Some(path) = self.entry_path(key) {
            if path.exists() {
                fs::remove_file(path)?;
            }
        }
        Ok(())
    }

    fn discard(&self, key: &CacheKey) {
        if let Err(e) = self.remove(key) {
            warn!("Failed to remove stale cache entry {}: {}", key, e);
        }
    }

    /// Entry files with their modification times
    fn entry_files(&self) -> Result<Vec<(PathBuf, fs::Metadata)>> {
        let Some(dir) = &self.dir else {
            return Ok(Vec::new());
        };

        let mut files = Vec::new();
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some(ENTRY_EXTENSION) {
                files.push((path, entry.metadata()?));
            }
        }
        Ok(files)
    }

    /// Delete every entry. Returns the number of files removed.
    pub fn clear(&self) -> Result<usize> {
        self.lock_memory().clear();

        let mut removed = 0;
        for (path, _) in self.entry_files()? {
            fs::remove_file(&path)?;
            removed += 1;
        }

        info!("Cleared {} fingerprint cache entries", removed);
        Ok(removed)
    }

    /// Statistics about the on-disk entries
    pub fn stats(&self) -> Result<CacheStats> {
        let mut stats = CacheStats::default();

        for (_, meta) in self.entry_files()? {
            stats.entries += 1;
            stats.total_bytes += meta.len();

            if let Ok(modified) = meta.modified() {
                let modified: DateTime<Utc> = modified.into();
                stats.oldest = Some(stats.oldest.map_or(modified, |o| o.min(modified)));
                stats.newest = Some(stats.newest.map_or(modified, |n| n.max(modified)));
            }
        }

        Ok(stats)
    }

    /// Delete entries not written within `max_age_days`
    pub fn prune(&self, max_age_days: u32) -> Result<usize> {
        let cutoff = Utc::now() - ChronoDuration::days(i64::from(max_age_days));
        let mut removed = 0;

        for (path, meta) in self.entry_files()? {
            let modified: DateTime<Utc> = match meta.modified() {
                Ok(m) => m.into(),
                Err(_) => continue,
            };

            if modified < cutoff {
                if let Err(e) = fs::remove_file(&path) {
                    warn!("Failed to remove {}: {}", path.display(), e);
                    continue;
                }
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    self.lock_memory().remove(&CacheKey::from(stem));
                }
                removed += 1;
            }
        }

        info!(
            "Pruned {} fingerprint cache entries older than {} days",
            removed, max_age_days
        );
        Ok(removed)
    }
}
