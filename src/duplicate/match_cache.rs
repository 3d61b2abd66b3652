//! Match results persisted between scans
//!
//! A single `match_index.json` holds, per comic cache key, the binding
//! counts the comic reached against later comics the last time it was a
//! source, plus every duplicate group found so far (members by cache key,
//! with their evidence). A later scan uses it to:
//!
//! - replay cached groups against the current comic set instead of
//!   recomputing them
//! - mark comics as skippable when earlier results prove they link to
//!   nothing
//!
//! The file is advisory. Anything unreadable or written under an
//! incompatible configuration is discarded and the affected work is simply
//! recomputed.

use crate::core::error::Result;
use crate::core::fingerprint::Fingerprint;
use crate::core::storage::{read_json, write_json_atomic};
use crate::duplicate::blacklist::BlacklistFilter;
use crate::duplicate::catalog::{CacheKey, ComicRecord};
use crate::duplicate::grouper::{DuplicateGrouper, EvidencePair};
use crate::duplicate::DetectionSettings;
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// File name of the match index inside the cache directory
pub const MATCH_INDEX_FILE: &str = "match_index.json";

const MATCH_INDEX_VERSION: u32 = 1;

/// A group as stored on disk
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedGroup {
    /// Member comics by cache key
    pub members: Vec<CacheKey>,
    /// Supporting fingerprint pairs
    pub evidence: Vec<EvidencePair>,
}

/// Configuration the stored results were computed under
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct IndexSettings {
    algorithm: String,
    similarity_threshold: u32,
    min_similar_images: usize,
    min_image_width: u32,
    min_image_height: u32,
    blacklist: BTreeSet<String>,
}

impl IndexSettings {
    fn current(algorithm: &str, settings: &DetectionSettings, blacklist: &BlacklistFilter) -> Self {
        Self {
            algorithm: algorithm.to_string(),
            similarity_threshold: settings.similarity_threshold,
            min_similar_images: settings.min_similar_images,
            min_image_width: settings.min_image_width,
            min_image_height: settings.min_image_height,
            blacklist: blacklist
                .entries()
                .iter()
                .map(|fp| fp.hex().to_string())
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct MatchIndexFile {
    version: u32,
    updated_at: DateTime<Utc>,
    #[serde(flatten)]
    settings: IndexSettings,
    match_counts: BTreeMap<CacheKey, Vec<u32>>,
    groups: Vec<CachedGroup>,
}

/// A cached group that survived replay, by index into the comic slice
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoredGroup {
    /// Member comic indices, in stored order
    pub members: Vec<usize>,
    /// Evidence still valid under the current configuration
    pub evidence: Vec<EvidencePair>,
}

/// What the cache allows a scan to reuse
#[derive(Debug, Clone, Default)]
pub struct MatchCachePlan {
    /// Cached groups still valid for the current comics
    pub restored_groups: Vec<RestoredGroup>,
    /// Per comic: whether earlier results make comparing it unnecessary
    pub skippable: Vec<bool>,
}

impl MatchCachePlan {
    /// Number of skippable comics
    pub fn skippable_count(&self) -> usize {
        self.skippable.iter().filter(|&&s| s).count()
    }
}

/// Durable match-count vectors and duplicate groups
#[derive(Debug)]
pub struct PersistentMatchCache {
    path: Option<PathBuf>,
    settings: IndexSettings,
    match_counts: BTreeMap<CacheKey, Vec<u32>>,
    groups: Vec<CachedGroup>,
}

impl PersistentMatchCache {
    /// A cache that is never read from or written to disk
    pub fn in_memory(
        algorithm: &str,
        settings: &DetectionSettings,
        blacklist: &BlacklistFilter,
    ) -> Self {
        Self {
            path: None,
            settings: IndexSettings::current(algorithm, settings, blacklist),
            match_counts: BTreeMap::new(),
            groups: Vec::new(),
        }
    }

    /// Load the index at `path` and apply the invalidation rules for the
    /// current configuration. Never fails; unusable state starts empty.
    pub fn load(
        path: &Path,
        algorithm: &str,
        settings: &DetectionSettings,
        blacklist: &BlacklistFilter,
    ) -> Self {
        let mut cache = Self::in_memory(algorithm, settings, blacklist);
        cache.path = Some(path.to_path_buf());

        if !path.exists() {
            debug!("No match index at {}", path.display());
            return cache;
        }

        let stored = match read_json::<MatchIndexFile>(path) {
            Ok(stored) => stored,
            Err(e) => {
                warn!("Ignoring unreadable match index {}: {}", path.display(), e);
                return cache;
            }
        };

        if stored.version != MATCH_INDEX_VERSION || stored.settings.algorithm != algorithm {
            info!("Match index was written by another version or algorithm, starting fresh");
            return cache;
        }

        let previous = &stored.settings;
        let mut keep_groups = true;
        let mut keep_counts = true;

        if settings.similarity_threshold > previous.similarity_threshold {
            info!(
                "Similarity threshold widened ({} -> {}), discarding cached matches",
                previous.similarity_threshold, settings.similarity_threshold
            );
            keep_groups = false;
            keep_counts = false;
        }

        if settings.min_similar_images < previous.min_similar_images {
            info!(
                "Minimum similar images lowered ({} -> {}), discarding cached groups",
                previous.min_similar_images, settings.min_similar_images
            );
            keep_groups = false;
        }

        // more usable pages can only raise counts
        let resolution_lowered = settings.min_image_width < previous.min_image_width
            || settings.min_image_height < previous.min_image_height;
        let blacklist_shrunk = !previous.blacklist.is_subset(&cache.settings.blacklist);
        if resolution_lowered || blacklist_shrunk {
            info!("Resolution filter or blacklist loosened, discarding cached match counts");
            keep_counts = false;
        }

        if keep_counts {
            cache.match_counts = stored.match_counts;
        }
        if keep_groups {
            cache.groups = stored.groups;
        }

        debug!(
            "Loaded match index: {} count vectors, {} groups",
            cache.match_counts.len(),
            cache.groups.len()
        );
        cache
    }

    /// Location of the index file, if persisted
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Cached groups as currently held
    pub fn groups(&self) -> &[CachedGroup] {
        &self.groups
    }

    /// Stored counts for a comic
    pub fn match_counts(&self, key: &CacheKey) -> Option<&[u32]> {
        self.match_counts.get(key).map(|v| v.as_slice())
    }

    /// Number of comics with stored counts
    pub fn match_count_entries(&self) -> usize {
        self.match_counts.len()
    }

    /// Replay cached groups and derive skippable comics for `comics`
    pub fn plan(&self, comics: &[Arc<ComicRecord>], blacklist: &BlacklistFilter) -> MatchCachePlan {
        let positions: HashMap<&CacheKey, usize> = comics
            .iter()
            .enumerate()
            .map(|(i, c)| (&c.cache_key, i))
            .collect();

        let restored_groups: Vec<RestoredGroup> = self
            .groups
            .iter()
            .filter_map(|group| self.replay(group, &positions, comics, blacklist))
            .collect();

        let mut skippable = vec![false; comics.len()];
        for group in &restored_groups {
            for &member in &group.members {
                skippable[member] = true;
            }
        }

        let min = self.settings.min_similar_images;
        for (i, comic) in comics.iter().enumerate() {
            if let Some(counts) = self.match_counts.get(&comic.cache_key) {
                if counts.iter().all(|&n| (n as usize) < min) {
                    skippable[i] = true;
                }
            }
        }

        debug!(
            "Match cache: {} of {} cached groups restored",
            restored_groups.len(),
            self.groups.len()
        );

        MatchCachePlan {
            restored_groups,
            skippable,
        }
    }

    /// Re-validate one cached group against the current comics.
    ///
    /// Distinct-match counts are rebuilt from the evidence hexes: an image
    /// of member `a` counts toward `b` when its hex is paired with a hex of
    /// `b` in a surviving evidence pair.
    fn replay(
        &self,
        group: &CachedGroup,
        positions: &HashMap<&CacheKey, usize>,
        comics: &[Arc<ComicRecord>],
        blacklist: &BlacklistFilter,
    ) -> Option<RestoredGroup> {
        let threshold = self.settings.similarity_threshold;
        let min = self.settings.min_similar_images;

        let mut members: Vec<usize> = Vec::new();
        for key in &group.members {
            if let Some(&idx) = positions.get(key) {
                if !members.contains(&idx) {
                    members.push(idx);
                }
            }
        }
        if members.len() < 2 {
            return None;
        }

        let evidence: Vec<EvidencePair> = group
            .evidence
            .iter()
            .filter_map(|pair| {
                let a = Fingerprint::from_hex(&pair.first).ok()?;
                let b = Fingerprint::from_hex(&pair.second).ok()?;
                let distance = a.distance(&b);
                if distance > threshold
                    || blacklist.is_blocked(&a, threshold)
                    || blacklist.is_blocked(&b, threshold)
                {
                    return None;
                }
                Some(EvidencePair::new(a.hex(), b.hex(), distance))
            })
            .collect();

        let hexes: HashMap<usize, HashSet<&str>> = members
            .iter()
            .map(|&m| {
                let set = comics[m].images.iter().map(|p| p.fingerprint.hex()).collect();
                (m, set)
            })
            .collect();

        // evidence indices joining a and b, plus matched images per side
        let link = |a: usize, b: usize| -> (Vec<usize>, usize, usize) {
            let (ha, hb) = (&hexes[&a], &hexes[&b]);
            let mut used = Vec::new();
            let mut a_side: HashSet<&str> = HashSet::new();
            let mut b_side: HashSet<&str> = HashSet::new();
            for (idx, pair) in evidence.iter().enumerate() {
                let (x, y) = (pair.first.as_str(), pair.second.as_str());
                let mut hit = false;
                if ha.contains(x) && hb.contains(y) {
                    a_side.insert(x);
                    b_side.insert(y);
                    hit = true;
                }
                if ha.contains(y) && hb.contains(x) {
                    a_side.insert(y);
                    b_side.insert(x);
                    hit = true;
                }
                if hit {
                    used.push(idx);
                }
            }
            // count image positions, so repeated pages weigh as in detection
            let a_count = comics[a]
                .images
                .iter()
                .filter(|p| a_side.contains(p.fingerprint.hex()))
                .count();
            let b_count = comics[b]
                .images
                .iter()
                .filter(|p| b_side.contains(p.fingerprint.hex()))
                .count();
            (used, a_count, b_count)
        };

        loop {
            let mut supported = vec![false; members.len()];
            let mut used: BTreeSet<usize> = BTreeSet::new();

            for i in 0..members.len() {
                for j in (i + 1)..members.len() {
                    let (pairs, a_count, b_count) = link(members[i], members[j]);
                    if a_count >= min && b_count >= min {
                        supported[i] = true;
                        supported[j] = true;
                        used.extend(pairs);
                    }
                }
            }

            if supported.iter().all(|&s| s) {
                let evidence = used.into_iter().map(|i| evidence[i].clone()).collect();
                return Some(RestoredGroup { members, evidence });
            }

            members = members
                .iter()
                .zip(&supported)
                .filter(|(_, s)| **s)
                .map(|(m, _)| *m)
                .collect();

            if members.len() < 2 {
                return None;
            }
        }
    }

    /// Record the binding counts a comic reached as a source
    pub fn record_counts(&mut self, key: &CacheKey, counts: Vec<u32>) {
        self.match_counts.insert(key.clone(), counts);
    }

    /// Replace the cached groups with the grouper's live groups
    pub fn store_groups(&mut self, grouper: &DuplicateGrouper) {
        self.groups = grouper
            .live_groups()
            .map(|(members, evidence)| CachedGroup {
                members: members
                    .iter()
                    .map(|&m| grouper.comic(m).cache_key.clone())
                    .collect(),
                evidence: evidence.iter().cloned().collect(),
            })
            .collect();
    }

    /// Drop count vectors for comics outside `keys`
    pub fn retain_keys(&mut self, keys: &HashSet<&CacheKey>) {
        self.match_counts.retain(|k, _| keys.contains(k));
    }

    /// Atomically rewrite the index file
    pub fn save(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let file = MatchIndexFile {
            version: MATCH_INDEX_VERSION,
            updated_at: Utc::now(),
            settings: self.settings.clone(),
            match_counts: self.match_counts.clone(),
            groups: self.groups.clone(),
        };
        write_json_atomic(path, &file)?;
        debug!(
            "Saved match index: {} count vectors, {} groups",
            self.match_counts.len(),
            self.groups.len()
        );
        Ok(())
    }

    /// Delete the index file at `path`. Returns whether a file existed.
    pub fn remove_file(path: &Path) -> Result<bool> {
        if path.exists() {
            fs::remove_file(path)?;
            Ok(true)
        } else {
            Ok(false)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testdb::comic_record;
    use tempfile::TempDir;

    const ALG: &str = "hex-test";

    fn settings(threshold: u32, min_similar: usize) -> DetectionSettings {
        DetectionSettings::new()
            .with_threshold(threshold)
            .with_min_similar(min_similar)
    }

    fn comics() -> Vec<Arc<ComicRecord>> {
        vec![
            Arc::new(comic_record(
                "/a",
                &["f000000000000000", "0f00000000000000", "00f0000000000000", "aa00000000000000"],
            )),
            Arc::new(comic_record(
                "/b",
                &["f000000000000001", "0f00000000000000", "00f0000000000000", "bb00000000000000"],
            )),
            Arc::new(comic_record("/c", &["cc00000000000000"])),
        ]
    }

    fn ab_group(comics: &[Arc<ComicRecord>]) -> CachedGroup {
        CachedGroup {
            members: vec![comics[0].cache_key.clone(), comics[1].cache_key.clone()],
            evidence: vec![
                EvidencePair::new("f000000000000000", "f000000000000001", 1),
                EvidencePair::new("0f00000000000000", "0f00000000000000", 0),
                EvidencePair::new("00f0000000000000", "00f0000000000000", 0),
            ],
        }
    }

    fn saved(dir: &TempDir, s: &DetectionSettings, blacklist: &BlacklistFilter) -> PathBuf {
        let path = dir.path().join(MATCH_INDEX_FILE);
        let comics = comics();
        let mut cache = PersistentMatchCache::load(&path, ALG, s, blacklist);
        cache.groups = vec![ab_group(&comics)];
        cache.record_counts(&comics[2].cache_key, vec![1]);
        cache.save().unwrap();
        path
    }

    #[test]
    fn test_missing_file_is_empty() {
        let temp = TempDir::new().unwrap();
        let cache = PersistentMatchCache::load(
            &temp.path().join(MATCH_INDEX_FILE),
            ALG,
            &settings(2, 3),
            &BlacklistFilter::new(),
        );
        assert!(cache.groups().is_empty());
        assert_eq!(cache.match_count_entries(), 0);
    }

    #[test]
    fn test_corrupt_file_is_ignored() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join(MATCH_INDEX_FILE);
        fs::write(&path, "not json").unwrap();

        let cache = PersistentMatchCache::load(&path, ALG, &settings(2, 3), &BlacklistFilter::new());
        assert!(cache.groups().is_empty());
    }

    #[test]
    fn test_same_settings_restore_group_and_skip() {
        let temp = TempDir::new().unwrap();
        let s = settings(2, 3);
        let path = saved(&temp, &s, &BlacklistFilter::new());

        let cache = PersistentMatchCache::load(&path, ALG, &s, &BlacklistFilter::new());
        let plan = cache.plan(&comics(), &BlacklistFilter::new());

        assert_eq!(plan.restored_groups.len(), 1);
        assert_eq!(plan.restored_groups[0].members, vec![0, 1]);
        assert_eq!(plan.restored_groups[0].evidence.len(), 3);
        assert_eq!(plan.skippable, vec![true, true, true]);
    }

    #[test]
    fn test_algorithm_change_discards_everything() {
        let temp = TempDir::new().unwrap();
        let s = settings(2, 3);
        let path = saved(&temp, &s, &BlacklistFilter::new());

        let cache = PersistentMatchCache::load(&path, "other", &s, &BlacklistFilter::new());
        assert!(cache.groups().is_empty());
        assert_eq!(cache.match_count_entries(), 0);
    }

    #[test]
    fn test_widened_threshold_discards_groups_and_counts() {
        let temp = TempDir::new().unwrap();
        let path = saved(&temp, &settings(2, 3), &BlacklistFilter::new());

        let cache = PersistentMatchCache::load(&path, ALG, &settings(3, 3), &BlacklistFilter::new());
        assert!(cache.groups().is_empty());
        assert_eq!(cache.match_count_entries(), 0);

        // next save overwrites the stale groups on disk
        cache.save().unwrap();
        let reloaded = PersistentMatchCache::load(&path, ALG, &settings(3, 3), &BlacklistFilter::new());
        assert!(reloaded.groups().is_empty());
    }

    #[test]
    fn test_lowered_minimum_discards_groups_only() {
        let temp = TempDir::new().unwrap();
        let path = saved(&temp, &settings(2, 3), &BlacklistFilter::new());

        let cache = PersistentMatchCache::load(&path, ALG, &settings(2, 2), &BlacklistFilter::new());
        assert!(cache.groups().is_empty());
        assert_eq!(cache.match_count_entries(), 1);
    }

    #[test]
    fn test_narrowed_threshold_refilters_evidence() {
        let temp = TempDir::new().unwrap();
        let path = saved(&temp, &settings(2, 3), &BlacklistFilter::new());

        // the distance-1 pair no longer qualifies, leaving 2 < 3 matches
        let cache = PersistentMatchCache::load(&path, ALG, &settings(0, 3), &BlacklistFilter::new());
        let plan = cache.plan(&comics(), &BlacklistFilter::new());
        assert!(plan.restored_groups.is_empty());
        assert_eq!(plan.skippable, vec![false, false, true]);

        let cache = PersistentMatchCache::load(&path, ALG, &settings(0, 2), &BlacklistFilter::new());
        // lowered minimum: groups are gone entirely
        assert!(cache.plan(&comics(), &BlacklistFilter::new()).restored_groups.is_empty());
    }

    #[test]
    fn test_newly_blacklisted_endpoint_drops_evidence() {
        let temp = TempDir::new().unwrap();
        let s = settings(2, 2);
        let path = saved(&temp, &s, &BlacklistFilter::new());

        let blacklist =
            BlacklistFilter::from_hex_list(&["0f00000000000000".to_string()]).unwrap();
        let cache = PersistentMatchCache::load(&path, ALG, &s, &blacklist);
        let plan = cache.plan(&comics(), &blacklist);

        assert_eq!(plan.restored_groups.len(), 1);
        let evidence = &plan.restored_groups[0].evidence;
        assert_eq!(evidence.len(), 2);
        assert!(evidence
            .iter()
            .all(|p| p.first != "0f00000000000000" && p.second != "0f00000000000000"));
    }

    #[test]
    fn test_missing_member_drops_group() {
        let temp = TempDir::new().unwrap();
        let s = settings(2, 3);
        let path = saved(&temp, &s, &BlacklistFilter::new());

        let cache = PersistentMatchCache::load(&path, ALG, &s, &BlacklistFilter::new());
        let all = comics();
        let without_b = vec![all[0].clone(), all[2].clone()];
        let plan = cache.plan(&without_b, &BlacklistFilter::new());

        assert!(plan.restored_groups.is_empty());
        assert_eq!(plan.skippable, vec![false, true]);
    }

    #[test]
    fn test_unsupported_member_removed_on_replay() {
        let all = comics();
        let mut cache = PersistentMatchCache::in_memory(ALG, &settings(2, 3), &BlacklistFilter::new());
        let mut group = ab_group(&all);
        group.members.push(all[2].cache_key.clone());
        cache.groups = vec![group];

        let plan = cache.plan(&all, &BlacklistFilter::new());
        assert_eq!(plan.restored_groups.len(), 1);
        assert_eq!(plan.restored_groups[0].members, vec![0, 1]);
    }

    #[test]
    fn test_blacklist_shrink_discards_counts() {
        let temp = TempDir::new().unwrap();
        let s = settings(2, 3);
        let blacklist = BlacklistFilter::from_hex_list(&["ffffffffffffffff".to_string()]).unwrap();
        let path = saved(&temp, &s, &blacklist);

        let grown = BlacklistFilter::from_hex_list(&[
            "ffffffffffffffff".to_string(),
            "0f0f0f0f0f0f0f0f".to_string(),
        ])
        .unwrap();
        assert_eq!(PersistentMatchCache::load(&path, ALG, &s, &grown).match_count_entries(), 1);
        assert_eq!(
            PersistentMatchCache::load(&path, ALG, &s, &BlacklistFilter::new()).match_count_entries(),
            0
        );
    }

    #[test]
    fn test_count_vector_skips_only_below_minimum() {
        let all = comics();
        let mut cache = PersistentMatchCache::in_memory(ALG, &settings(2, 3), &BlacklistFilter::new());
        cache.record_counts(&all[0].cache_key, vec![1, 2]);
        cache.record_counts(&all[1].cache_key, vec![3]);
        cache.record_counts(&all[2].cache_key, Vec::new());

        let plan = cache.plan(&all, &BlacklistFilter::new());
        assert_eq!(plan.skippable, vec![true, false, true]);
        assert_eq!(plan.skippable_count(), 2);

        let keys: HashSet<&CacheKey> = [&all[1].cache_key].into_iter().collect();
        cache.retain_keys(&keys);
        assert_eq!(cache.match_count_entries(), 1);
        assert!(cache.match_counts(&all[1].cache_key).is_some());
    }

    #[test]
    fn test_replay_counts_repeated_pages() {
        let pages = [
            "f000000000000000",
            "f000000000000000",
            "f000000000000000",
            "0f00000000000000",
        ];
        let all = vec![
            Arc::new(comic_record("/a", &pages)),
            Arc::new(comic_record("/b", &pages)),
        ];
        let mut cache = PersistentMatchCache::in_memory(ALG, &settings(0, 3), &BlacklistFilter::new());
        cache.groups = vec![CachedGroup {
            members: vec![all[0].cache_key.clone(), all[1].cache_key.clone()],
            evidence: vec![EvidencePair::new("f000000000000000", "f000000000000000", 0)],
        }];

        // one distinct hex, three matching pages on each side
        let plan = cache.plan(&all, &BlacklistFilter::new());
        assert_eq!(plan.restored_groups.len(), 1);
        assert_eq!(plan.skippable, vec![true, true]);
    }
}
