//! Duplicate group construction
//!
//! Groups live in an arena addressed by [`GroupId`]; a comic-to-group map
//! tells which group (if any) a comic already belongs to. When a newly
//! linked set touches existing groups, their members and evidence are
//! copied into a fresh slot and the old slots are emptied, so every comic
//! belongs to at most one live group.
//!
//! The grouping is greedy and order dependent. Two tie-breaks are part of
//! the output contract and must not change: evidence pairs put the
//! lexicographically smaller hex first, and members are sorted by
//! descending image count (stable, so earlier comics win ties).

use crate::duplicate::catalog::{CacheKey, ComicRecord};
use crate::duplicate::index::{NeighborMatch, SimilarityIndex};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;

/// Stable handle to a group slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GroupId(usize);

/// A similar fingerprint pair supporting a duplicate group
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EvidencePair {
    /// Lexicographically smaller hex fingerprint
    pub first: String,
    /// Lexicographically larger (or equal) hex fingerprint
    pub second: String,
    /// Hamming distance between them
    pub distance: u32,
}

impl EvidencePair {
    /// Build a pair with the smaller hex first
    pub fn new(a: &str, b: &str, distance: u32) -> Self {
        let (first, second) = if a <= b { (a, b) } else { (b, a) };
        Self {
            first: first.to_string(),
            second: second.to_string(),
            distance,
        }
    }
}

/// A comic inside a finished group
#[derive(Debug, Clone, Serialize)]
pub struct GroupMember {
    /// Comic path
    pub path: PathBuf,
    /// Cache key of the comic's state in this scan
    pub cache_key: CacheKey,
    /// Number of usable images
    pub image_count: usize,
    /// Size in bytes
    pub size: u64,
}

/// Comics considered duplicates of each other
#[derive(Debug, Clone, Serialize)]
pub struct DuplicateGroup {
    /// Members ordered by descending image count
    pub members: Vec<GroupMember>,
    /// Supporting fingerprint pairs, canonically ordered
    pub evidence: Vec<EvidencePair>,
}

impl DuplicateGroup {
    /// Number of member comics
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Whether the group has no members
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Number of evidence pairs
    pub fn similarity_count(&self) -> usize {
        self.evidence.len()
    }

    /// Whether a comic path is a member
    pub fn contains(&self, path: &std::path::Path) -> bool {
        self.members.iter().any(|m| m.path == path)
    }
}

#[derive(Debug, Clone, Default)]
struct GroupSlot {
    members: Vec<usize>,
    evidence: BTreeSet<EvidencePair>,
}

/// Incremental grouper over comics in processing order
#[derive(Debug)]
pub struct DuplicateGrouper {
    comics: Vec<Arc<ComicRecord>>,
    slots: Vec<Option<GroupSlot>>,
    membership: Vec<Option<GroupId>>,
}

impl DuplicateGrouper {
    /// Create a grouper over comics indexed as in the [`SimilarityIndex`]
    pub fn new(comics: Vec<Arc<ComicRecord>>) -> Self {
        let membership = vec![None; comics.len()];
        Self {
            comics,
            slots: Vec::new(),
            membership,
        }
    }

    /// Comic at a processing index
    pub fn comic(&self, idx: usize) -> &Arc<ComicRecord> {
        &self.comics[idx]
    }

    /// Group a comic currently belongs to
    pub fn group_of(&self, comic: usize) -> Option<GroupId> {
        self.membership[comic]
    }

    /// Number of live groups
    pub fn group_count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    /// Live groups as (members, evidence), in creation order
    pub fn live_groups(&self) -> impl Iterator<Item = (&[usize], &BTreeSet<EvidencePair>)> {
        self.slots
            .iter()
            .flatten()
            .map(|slot| (slot.members.as_slice(), &slot.evidence))
    }

    /// Insert a group, merging with any group that shares a member
    pub fn insert_group(
        &mut self,
        members: &[usize],
        evidence: impl IntoIterator<Item = EvidencePair>,
    ) -> GroupId {
        let mut merged = GroupSlot {
            members: Vec::with_capacity(members.len()),
            evidence: evidence.into_iter().collect(),
        };

        for &comic in members {
            if !merged.members.contains(&comic) {
                merged.members.push(comic);
            }
        }

        let mut existing: Vec<GroupId> = Vec::new();
        for &comic in members {
            if let Some(id) = self.membership[comic] {
                if !existing.contains(&id) {
                    existing.push(id);
                }
            }
        }

        for id in existing {
            if let Some(old) = self.slots[id.0].take() {
                for comic in old.members {
                    if !merged.members.contains(&comic) {
                        merged.members.push(comic);
                    }
                }
                merged.evidence.extend(old.evidence);
            }
        }

        let id = GroupId(self.slots.len());
        for &comic in &merged.members {
            self.membership[comic] = Some(id);
        }
        self.slots.push(Some(merged));
        id
    }

    /// Form a group from a source comic and its linked neighbors.
    ///
    /// Returns the id of the (possibly merged) group, or `None` when no
    /// neighbor reaches `min_similar` on both sides.
    pub fn link(
        &mut self,
        source: usize,
        matches: &[NeighborMatch],
        index: &SimilarityIndex,
        min_similar: usize,
    ) -> Option<GroupId> {
        let linked: Vec<&NeighborMatch> =
            matches.iter().filter(|m| m.is_linked(min_similar)).collect();

        if linked.is_empty() {
            return None;
        }

        let mut members = Vec::with_capacity(linked.len() + 1);
        members.push(source);
        members.extend(linked.iter().map(|m| m.comic));

        let source_comic = Arc::clone(&self.comics[source]);
        let mut evidence = BTreeSet::new();
        for m in &linked {
            let neighbor = &self.comics[m.comic];
            for pair in &m.pairs {
                let a = &source_comic.images[index.image_index(pair.source_pos)];
                let b = &neighbor.images[index.image_index(pair.neighbor_pos)];
                evidence.insert(EvidencePair::new(
                    a.fingerprint.hex(),
                    b.fingerprint.hex(),
                    pair.distance,
                ));
            }
        }

        Some(self.insert_group(&members, evidence))
    }

    fn materialize(&self, slot: &GroupSlot) -> DuplicateGroup {
        let mut members: Vec<&Arc<ComicRecord>> =
            slot.members.iter().map(|&i| &self.comics[i]).collect();
        members.sort_by(|a, b| b.image_count().cmp(&a.image_count()));

        DuplicateGroup {
            members: members
                .into_iter()
                .map(|c| GroupMember {
                    path: c.path.clone(),
                    cache_key: c.cache_key.clone(),
                    image_count: c.image_count(),
                    size: c.size,
                })
                .collect(),
            evidence: slot.evidence.iter().cloned().collect(),
        }
    }

    /// Finished groups, in creation order
    pub fn groups(&self) -> Vec<DuplicateGroup> {
        self.slots
            .iter()
            .flatten()
            .map(|slot| self.materialize(slot))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testdb::comic_record;
    use rand::{Rng, SeedableRng};
    use std::collections::HashSet;

    /// Compare every comic as a source, in order, and link
    fn run(comics: Vec<ComicRecord>, threshold: u32, min_similar: usize) -> Vec<DuplicateGroup> {
        let comics: Vec<Arc<ComicRecord>> = comics.into_iter().map(Arc::new).collect();
        let index = SimilarityIndex::build(&comics);
        let mut grouper = DuplicateGrouper::new(comics);
        for i in 0..index.comic_count() {
            let matches = index.compare(i, threshold);
            grouper.link(i, &matches, &index, min_similar);
        }
        grouper.groups()
    }

    #[test]
    fn test_evidence_pair_normalization() {
        let a = EvidencePair::new("ff", "0a", 3);
        let b = EvidencePair::new("0a", "ff", 3);
        assert_eq!(a, b);
        assert_eq!(a.first, "0a");
        assert_eq!(a.second, "ff");
    }

    #[test]
    fn test_shared_pages_form_one_group() {
        let a = comic_record(
            "/a",
            &["1111000000000000", "2222000000000000", "3333000000000000", "4444000000000000", "aaaa000000000000"],
        );
        let b = comic_record(
            "/b",
            &["1111000000000000", "2222000000000000", "3333000000000000", "4444000000000000", "bbbb000000000000"],
        );
        let c = comic_record(
            "/c",
            &["aaaa000000000000", "c1c1c1c1c1c1c1c1", "c2c2c2c2c2c2c2c2", "0c0c0c0c0c0c0c0c", "cc00cc00cc00cc00"],
        );

        let groups = run(vec![a, b, c], 2, 3);

        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].len(), 2);
        assert!(groups[0].contains(std::path::Path::new("/a")));
        assert!(groups[0].contains(std::path::Path::new("/b")));
        assert!(!groups[0].contains(std::path::Path::new("/c")));
        assert_eq!(groups[0].similarity_count(), 4);
    }

    #[test]
    fn test_chain_merges_into_one_group() {
        // A~B share 3 pages, B~C share 3 other pages, A and C share nothing
        let a = comic_record("/a", &["0100000000000000", "0200000000000000", "0300000000000000"]);
        let b = comic_record(
            "/b",
            &["0100000000000000", "0200000000000000", "0300000000000000", "7000000000000000", "8000000000000000", "9000000000000000"],
        );
        let c = comic_record("/c", &["7000000000000000", "8000000000000000", "9000000000000000"]);

        let groups = run(vec![a, b, c], 0, 3);

        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].len(), 3);
        assert_eq!(groups[0].similarity_count(), 6);
        // descending image count: B (6) first
        assert_eq!(groups[0].members[0].path, PathBuf::from("/b"));
    }

    #[test]
    fn test_bridge_merges_two_existing_groups() {
        let comics: Vec<Arc<ComicRecord>> = ["/a", "/b", "/c", "/d", "/e"]
            .iter()
            .map(|p| Arc::new(comic_record(p, &["0000000000000001"])))
            .collect();
        let mut grouper = DuplicateGrouper::new(comics);

        let g1 = grouper.insert_group(&[0, 1], vec![EvidencePair::new("01", "02", 1)]);
        let g2 = grouper.insert_group(&[2, 3], vec![EvidencePair::new("03", "04", 1)]);
        assert_ne!(g1, g2);
        assert_eq!(grouper.group_count(), 2);

        let merged = grouper.insert_group(&[4, 1, 3], vec![EvidencePair::new("05", "06", 0)]);
        assert_eq!(grouper.group_count(), 1);
        for comic in 0..5 {
            assert_eq!(grouper.group_of(comic), Some(merged));
        }

        let groups = grouper.groups();
        assert_eq!(groups[0].len(), 5);
        assert_eq!(groups[0].similarity_count(), 3);
    }

    #[test]
    fn test_members_sorted_by_image_count_stable() {
        let comics: Vec<Arc<ComicRecord>> = vec![
            Arc::new(comic_record("/small", &["01"])),
            Arc::new(comic_record("/big", &["01", "02", "03"])),
            Arc::new(comic_record("/tie", &["01"])),
        ];
        let mut grouper = DuplicateGrouper::new(comics);
        grouper.insert_group(&[0, 1, 2], Vec::new());

        let paths: Vec<PathBuf> = grouper.groups()[0]
            .members
            .iter()
            .map(|m| m.path.clone())
            .collect();
        assert_eq!(
            paths,
            vec![PathBuf::from("/big"), PathBuf::from("/small"), PathBuf::from("/tie")]
        );
    }

    #[test]
    fn test_one_sided_match_does_not_link() {
        // every page of A matches the single repeated page of B
        let a = comic_record("/a", &["0000000000000000", "0000000000000001", "0000000000000002"]);
        let b = comic_record("/b", &["0000000000000000", "ffffffffffffffff", "fffffffffffffff0"]);
        assert!(run(vec![a, b], 2, 3).is_empty());
    }

    #[test]
    fn test_groups_disjoint_and_members_supported() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(42);
        let pool: Vec<String> = (0..30).map(|_| format!("{:016x}", rng.gen::<u64>())).collect();
        let comics: Vec<ComicRecord> = (0..25)
            .map(|i| {
                let pages: Vec<&str> = (0..rng.gen_range(2..8))
                    .map(|_| pool[rng.gen_range(0..pool.len())].as_str())
                    .collect();
                comic_record(&format!("/c{:02}", i), &pages)
            })
            .collect();

        let min_similar = 2;
        let groups = run(comics.clone(), 0, min_similar);

        let mut seen = HashSet::new();
        for group in &groups {
            assert!(group.len() >= 2);
            for member in &group.members {
                assert!(seen.insert(member.path.clone()), "comic in two groups");
            }
        }

        let distinct = |a: &ComicRecord, b: &ComicRecord| {
            a.images
                .iter()
                .filter(|p| b.images.iter().any(|q| q.fingerprint == p.fingerprint))
                .count()
        };
        for group in &groups {
            for member in &group.members {
                let me = comics.iter().find(|c| c.path == member.path).unwrap();
                let supported = group.members.iter().any(|other| {
                    other.path != member.path && {
                        let them = comics.iter().find(|c| c.path == other.path).unwrap();
                        distinct(me, them) >= min_similar && distinct(them, me) >= min_similar
                    }
                });
                assert!(supported, "{:?} has no linked partner", member.path);
            }
        }
    }
}
