//! Sequential detection pass
//!
//! Comics are compared one source at a time, in order, against every later
//! comic. Cached groups are seeded into the grouper up front and comics the
//! match cache marks as skippable are moved to the end; the pass stops at
//! the first skippable comic that no new group has pulled back in.
//!
//! The match cache is saved after every new group and once more at the
//! end, so a stopped scan resumes where it left off.

use crate::core::control::ScanControl;
use crate::duplicate::blacklist::BlacklistFilter;
use crate::duplicate::catalog::ComicRecord;
use crate::duplicate::grouper::{DuplicateGroup, DuplicateGrouper};
use crate::duplicate::index::SimilarityIndex;
use crate::duplicate::match_cache::PersistentMatchCache;
use crate::duplicate::DetectionSettings;
use log::{debug, info, warn};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

/// Incremental notifications from [`detect_duplicates`]
#[derive(Debug, Clone)]
pub enum DetectionUpdate {
    /// A source comic was compared against the rest of the corpus
    Compared {
        processed: usize,
        total: usize,
        comic: PathBuf,
        groups: usize,
    },
    /// A link formed (or grew) a group
    GroupFound { members: Vec<PathBuf>, groups: usize },
    /// Remaining comics were skipped using cached results
    SkippedRemaining { count: usize },
}

/// Result of a detection pass
#[derive(Debug, Clone, Default)]
pub struct DetectionOutcome {
    /// Final groups, in creation order
    pub groups: Vec<DuplicateGroup>,
    /// Comics that took part in detection
    pub candidates: usize,
    /// Comics compared as a source
    pub compared: usize,
    /// Comics skipped using the match cache
    pub skipped: usize,
    /// Cached groups reused without recomputation
    pub restored_groups: usize,
    /// False when the pass was stopped early
    pub completed: bool,
}

/// Run detection over catalogued comics.
///
/// Comics that failed extraction or fall outside the configured image
/// count range are ignored.
pub fn detect_duplicates<F>(
    comics: &[Arc<ComicRecord>],
    settings: &DetectionSettings,
    blacklist: &BlacklistFilter,
    cache: &mut PersistentMatchCache,
    control: &ScanControl,
    mut on_update: F,
) -> DetectionOutcome
where
    F: FnMut(DetectionUpdate),
{
    let candidates: Vec<Arc<ComicRecord>> = comics
        .iter()
        .filter(|c| c.is_ok() && settings.image_count_in_range(c.image_count()))
        .cloned()
        .collect();
    let total = candidates.len();

    let plan = cache.plan(&candidates, blacklist);

    // non-skippable comics first, both halves in their original order
    let mut order: Vec<usize> = (0..total).filter(|&i| !plan.skippable[i]).collect();
    order.extend((0..total).filter(|&i| plan.skippable[i]));

    let mut position = vec![0; total];
    for (pos, &original) in order.iter().enumerate() {
        position[original] = pos;
    }

    let ordered: Vec<Arc<ComicRecord>> = order.iter().map(|&i| Arc::clone(&candidates[i])).collect();
    let skippable: Vec<bool> = order.iter().map(|&i| plan.skippable[i]).collect();

    let index = SimilarityIndex::build(&ordered);
    let mut grouper = DuplicateGrouper::new(ordered.clone());

    for group in &plan.restored_groups {
        let members: Vec<usize> = group.members.iter().map(|&m| position[m]).collect();
        grouper.insert_group(&members, group.evidence.iter().cloned());
    }

    info!(
        "Detecting duplicates among {} comics ({} fingerprints, {} skippable, {} cached groups)",
        total,
        index.len(),
        plan.skippable_count(),
        plan.restored_groups.len()
    );

    let mut outcome = DetectionOutcome {
        candidates: total,
        restored_groups: plan.restored_groups.len(),
        ..Default::default()
    };

    let mut recalled = vec![false; total];
    let mut completed = true;

    for i in 0..total {
        if !control.checkpoint() {
            info!("Detection stopped after {} of {} comics", i, total);
            completed = false;
            break;
        }

        if skippable[i] && !recalled[i] {
            outcome.skipped = total - i;
            debug!("Skipping {} comics with cached results", outcome.skipped);
            on_update(DetectionUpdate::SkippedRemaining {
                count: outcome.skipped,
            });
            break;
        }

        let source = &ordered[i];
        let matches = index.compare(i, settings.similarity_threshold);
        let counts: Vec<u32> = matches.iter().map(|m| m.binding_count() as u32).collect();
        cache.record_counts(&source.cache_key, counts);

        if grouper
            .link(i, &matches, &index, settings.min_similar_images)
            .is_some()
        {
            let mut members = vec![source.path.clone()];
            for m in matches
                .iter()
                .filter(|m| m.is_linked(settings.min_similar_images))
            {
                recalled[m.comic] = true;
                members.push(ordered[m.comic].path.clone());
            }

            debug!("{} linked to {} comics", source.name(), members.len() - 1);

            cache.store_groups(&grouper);
            if let Err(e) = cache.save() {
                warn!("Failed to save match index: {}", e);
            }

            on_update(DetectionUpdate::GroupFound {
                members,
                groups: grouper.group_count(),
            });
        }

        outcome.compared += 1;
        on_update(DetectionUpdate::Compared {
            processed: i + 1,
            total,
            comic: source.path.clone(),
            groups: grouper.group_count(),
        });
    }

    let keys: HashSet<_> = comics.iter().map(|c| &c.cache_key).collect();
    cache.retain_keys(&keys);
    cache.store_groups(&grouper);
    if let Err(e) = cache.save() {
        warn!("Failed to save match index: {}", e);
    }

    outcome.groups = grouper.groups();
    outcome.completed = completed;

    info!(
        "Detection {}: {} groups, {} compared, {} skipped",
        if completed { "finished" } else { "stopped" },
        outcome.groups.len(),
        outcome.compared,
        outcome.skipped
    );

    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::duplicate::match_cache::MATCH_INDEX_FILE;
    use crate::testdb::{comic_record, HEX_ALGORITHM};
    use std::path::Path;
    use tempfile::TempDir;

    fn settings(threshold: u32) -> DetectionSettings {
        DetectionSettings::new()
            .with_threshold(threshold)
            .with_min_similar(3)
    }

    fn pair(prefix: u8) -> [Arc<ComicRecord>; 2] {
        let pages: Vec<String> = (1..=3)
            .map(|n| format!("{:02x}{:02x}000000000000", prefix, n))
            .collect();
        let refs: Vec<&str> = pages.iter().map(|s| s.as_str()).collect();
        [
            Arc::new(comic_record(&format!("/lib/{:02x}-1", prefix), &refs)),
            Arc::new(comic_record(&format!("/lib/{:02x}-2", prefix), &refs)),
        ]
    }

    fn three_pairs() -> Vec<Arc<ComicRecord>> {
        let mut comics: Vec<Arc<ComicRecord>> = [0x10, 0x20, 0x40]
            .into_iter()
            .flat_map(pair)
            .collect();
        comics.sort_by(|a, b| a.path.cmp(&b.path));
        comics
    }

    fn run(
        comics: &[Arc<ComicRecord>],
        s: &DetectionSettings,
        cache: &mut PersistentMatchCache,
    ) -> DetectionOutcome {
        detect_duplicates(comics, s, &BlacklistFilter::new(), cache, &ScanControl::new(), |_| {})
    }

    fn load(path: &Path, s: &DetectionSettings) -> PersistentMatchCache {
        PersistentMatchCache::load(path, HEX_ALGORITHM, s, &BlacklistFilter::new())
    }

    #[test]
    fn test_finds_disjoint_groups() {
        let s = settings(0);
        let mut cache = PersistentMatchCache::in_memory(HEX_ALGORITHM, &s, &BlacklistFilter::new());
        let outcome = run(&three_pairs(), &s, &mut cache);

        assert!(outcome.completed);
        assert_eq!(outcome.groups.len(), 3);
        assert_eq!(outcome.compared, 6);
        for group in &outcome.groups {
            assert_eq!(group.len(), 2);
            assert_eq!(group.similarity_count(), 3);
        }
    }

    #[test]
    fn test_image_range_excludes_comics() {
        let s = settings(0).with_image_range(4, 0);
        let mut cache = PersistentMatchCache::in_memory(HEX_ALGORITHM, &s, &BlacklistFilter::new());
        let outcome = run(&three_pairs(), &s, &mut cache);

        assert_eq!(outcome.candidates, 0);
        assert!(outcome.groups.is_empty());
    }

    #[test]
    fn test_stop_then_resume_reuses_cached_group() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join(MATCH_INDEX_FILE);
        let s = settings(0);
        let comics = three_pairs();

        let control = ScanControl::new();
        let mut cache = load(&path, &s);
        let first = detect_duplicates(
            &comics,
            &s,
            &BlacklistFilter::new(),
            &mut cache,
            &control,
            |update| {
                if let DetectionUpdate::GroupFound { .. } = update {
                    control.stop();
                }
            },
        );
        assert!(!first.completed);
        assert_eq!(first.groups.len(), 1);
        assert_eq!(first.compared, 1);

        let mut cache = load(&path, &s);
        assert_eq!(cache.groups().len(), 1);
        let second = run(&comics, &s, &mut cache);

        assert!(second.completed);
        assert_eq!(second.restored_groups, 1);
        assert_eq!(second.groups.len(), 3);
        // the cached pair is never compared again
        assert_eq!(second.compared, 4);
        assert_eq!(second.skipped, 2);
        assert_eq!(second.groups[0].members[0].path, comics[0].path);
    }

    #[test]
    fn test_unchanged_rescan_skips_everything() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join(MATCH_INDEX_FILE);
        let s = settings(0);
        let mut comics = three_pairs();
        comics.push(Arc::new(comic_record("/lib/zz", &["ffffffffffffffff"])));

        let first = run(&comics, &s, &mut load(&path, &s));
        let second = run(&comics, &s, &mut load(&path, &s));

        assert_eq!(first.groups.len(), 3);
        assert_eq!(second.groups.len(), 3);
        assert_eq!(second.compared, 0);
        assert_eq!(second.skipped, 7);
    }

    #[test]
    fn test_repeated_pages_group_is_restored_from_cache() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join(MATCH_INDEX_FILE);
        let s = settings(0);
        let pages = [
            "f000000000000000",
            "f000000000000000",
            "f000000000000000",
            "0f00000000000000",
        ];
        let comics = vec![
            Arc::new(comic_record("/lib/a", &pages)),
            Arc::new(comic_record("/lib/b", &pages)),
        ];

        let first = run(&comics, &s, &mut load(&path, &s));
        assert_eq!(first.groups.len(), 1);
        assert_eq!(first.groups[0].similarity_count(), 2);

        let second = run(&comics, &s, &mut load(&path, &s));
        assert_eq!(second.restored_groups, 1);
        assert_eq!(second.compared, 0);
        assert_eq!(second.groups.len(), 1);
    }

    #[test]
    fn test_new_comic_recalls_skipped_group() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join(MATCH_INDEX_FILE);
        let s = settings(0);
        let comics = three_pairs();
        run(&comics, &s, &mut load(&path, &s));

        let mut grown = comics.clone();
        grown.push(Arc::new(comic_record(
            "/lib/new",
            &["1001000000000000", "1002000000000000", "1003000000000000"],
        )));
        let outcome = run(&grown, &s, &mut load(&path, &s));

        assert_eq!(outcome.groups.len(), 3);
        let merged = outcome.groups.iter().find(|g| g.len() == 3).unwrap();
        assert!(merged.contains(Path::new("/lib/new")));
        assert!(merged.contains(Path::new("/lib/10-1")));
    }

    #[test]
    fn test_widened_threshold_recomputes_groups() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join(MATCH_INDEX_FILE);
        let comics = vec![
            Arc::new(comic_record(
                "/lib/a",
                &["0f00000000000000", "00f0000000000000", "000f000000000000", "f000000000000000"],
            )),
            Arc::new(comic_record(
                "/lib/b",
                &["0f00000000000000", "00f0000000000000", "000f000000000000", "f000000000000007"],
            )),
        ];

        let narrow = run(&comics, &settings(0), &mut load(&path, &settings(0)));
        assert_eq!(narrow.groups[0].similarity_count(), 3);

        let wide = run(&comics, &settings(3), &mut load(&path, &settings(3)));
        assert_eq!(wide.restored_groups, 0);
        assert_eq!(wide.compared, 2);
        assert_eq!(wide.groups[0].similarity_count(), 4);

        let stored = load(&path, &settings(3));
        assert_eq!(stored.groups()[0].evidence.len(), 4);
    }

    #[test]
    fn test_narrowed_threshold_is_subset_of_fresh_run() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join(MATCH_INDEX_FILE);
        let comics = vec![
            Arc::new(comic_record(
                "/lib/a",
                &["0f00000000000000", "00f0000000000000", "000f000000000000", "f000000000000000"],
            )),
            Arc::new(comic_record(
                "/lib/b",
                &["0f00000000000000", "00f0000000000000", "000f000000000000", "f000000000000007"],
            )),
        ];

        run(&comics, &settings(3), &mut load(&path, &settings(3)));
        let cached = run(&comics, &settings(0), &mut load(&path, &settings(0)));

        let mut fresh_cache =
            PersistentMatchCache::in_memory(HEX_ALGORITHM, &settings(0), &BlacklistFilter::new());
        let fresh = run(&comics, &settings(0), &mut fresh_cache);

        assert_eq!(cached.restored_groups, 1);
        assert_eq!(cached.groups.len(), fresh.groups.len());
        for pair in &cached.groups[0].evidence {
            assert!(fresh.groups[0].evidence.contains(pair));
        }
    }
}
