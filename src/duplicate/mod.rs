//! Duplicate detection module
//!
//! Turns per-page fingerprints into comic-level duplicate groups.
//!
//! # Submodules
//!
//! - `blacklist` - Fingerprints excluded before comparison
//! - `catalog` - Per-comic fingerprint extraction ([`HashCatalogBuilder`])
//! - `detect` - The sequential detection pass
//! - `fingerprint_cache` - Per-comic fingerprint cache on disk
//! - `index` - Flat fingerprint array and batched Hamming comparison
//! - `grouper` - Linking comics and merging overlapping groups
//! - `match_cache` - Incremental match results persisted between scans

pub mod blacklist;
pub mod catalog;
pub mod detect;
pub mod fingerprint_cache;
pub mod grouper;
pub mod index;
pub mod match_cache;

pub use blacklist::BlacklistFilter;
pub use catalog::{CacheKey, ComicRecord, HashCatalogBuilder, PageFingerprint};
pub use detect::{detect_duplicates, DetectionOutcome, DetectionUpdate};
pub use fingerprint_cache::{CacheStats, FingerprintCache};
pub use grouper::{DuplicateGroup, DuplicateGrouper, EvidencePair, GroupMember};
pub use index::{NeighborMatch, SimilarityIndex, SimilarityMask};
pub use match_cache::{MatchCachePlan, PersistentMatchCache, MATCH_INDEX_FILE};

use serde::{Deserialize, Serialize};

/// Thresholds shared by cataloguing and detection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectionSettings {
    /// Maximum Hamming distance for two fingerprints to be similar
    pub similarity_threshold: u32,

    /// Distinct similar images required on both sides of a link
    pub min_similar_images: usize,

    /// Minimum image width in pixels
    pub min_image_width: u32,

    /// Minimum image height in pixels
    pub min_image_height: u32,

    /// Inclusive lower bound on usable images per comic
    pub min_comic_images: usize,

    /// Inclusive upper bound on usable images per comic (0 = unlimited)
    pub max_comic_images: usize,
}

impl Default for DetectionSettings {
    fn default() -> Self {
        Self {
            similarity_threshold: 5,
            min_similar_images: 3,
            min_image_width: 100,
            min_image_height: 100,
            min_comic_images: 1,
            max_comic_images: 0,
        }
    }
}

impl DetectionSettings {
    /// Create settings with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the similarity distance threshold
    pub fn with_threshold(mut self, threshold: u32) -> Self {
        self.similarity_threshold = threshold;
        self
    }

    /// Set the minimum number of similar images
    pub fn with_min_similar(mut self, count: usize) -> Self {
        self.min_similar_images = count;
        self
    }

    /// Set the minimum image resolution
    pub fn with_min_resolution(mut self, width: u32, height: u32) -> Self {
        self.min_image_width = width;
        self.min_image_height = height;
        self
    }

    /// Set the inclusive image-count range (max 0 = unlimited)
    pub fn with_image_range(mut self, min: usize, max: usize) -> Self {
        self.min_comic_images = min;
        self.max_comic_images = max;
        self
    }

    /// Whether an image passes the resolution filter
    pub fn accepts_resolution(&self, width: u32, height: u32) -> bool {
        width >= self.min_image_width && height >= self.min_image_height
    }

    /// Whether a comic with `count` usable images takes part in detection
    pub fn image_count_in_range(&self, count: usize) -> bool {
        count > 0
            && count >= self.min_comic_images
            && (self.max_comic_images == 0 || count <= self.max_comic_images)
    }
}
