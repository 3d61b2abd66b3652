//! Flat fingerprint index and batched Hamming comparison
//!
//! All fingerprints of the corpus live in one contiguous `u64` array, comic
//! after comic. `owners[pos]` maps an array position back to its comic and
//! `ranges[comic]` gives the comic's `[start, end)` slice.
//!
//! Comic `i` is only compared against the tail of the array that follows
//! it (comics `i+1..`), so every unordered pair of comics is compared
//! exactly once, by the lower-indexed comic. Distances are computed one
//! source row at a time into a reusable buffer and reduced straight into a
//! bit mask, so memory stays at O(rows x remaining) bits.
//!
//! Fingerprints of different widths are stored zero-padded but are never
//! similar: their distance is [`INCOMPATIBLE_DISTANCE`].

use crate::core::fingerprint::INCOMPATIBLE_DISTANCE;
use crate::duplicate::catalog::ComicRecord;
use log::warn;
use std::collections::{BTreeMap, BTreeSet};
use std::ops::Range;

/// Corpus-wide fingerprint array
#[derive(Debug, Clone, Default)]
pub struct SimilarityIndex {
    words_per_fp: usize,
    words: Vec<u64>,
    widths: Vec<u32>,
    mixed_widths: bool,
    owners: Vec<usize>,
    ranges: Vec<Range<usize>>,
}

/// Boolean similarity matrix of one comic's images against the tail
#[derive(Debug, Clone)]
pub struct SimilarityMask {
    rows: usize,
    cols: usize,
    col_offset: usize,
    words_per_row: usize,
    bits: Vec<u64>,
}

/// One similar fingerprint pair between a source comic and a neighbor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatchedPair {
    /// Array position of the source image
    pub source_pos: usize,
    /// Array position of the neighbor image
    pub neighbor_pos: usize,
    /// Hamming distance
    pub distance: u32,
}

/// Everything a source comic shares with one later comic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NeighborMatch {
    /// Index of the neighbor comic
    pub comic: usize,
    /// Distinct source images with at least one similar neighbor image
    pub source_matched: usize,
    /// Distinct neighbor images with at least one similar source image
    pub neighbor_matched: usize,
    /// All similar pairs, source row major
    pub pairs: Vec<MatchedPair>,
}

impl NeighborMatch {
    /// The smaller of the two distinct-match counts
    pub fn binding_count(&self) -> usize {
        self.source_matched.min(self.neighbor_matched)
    }

    /// Whether both sides reach `min_similar`
    pub fn is_linked(&self, min_similar: usize) -> bool {
        self.source_matched >= min_similar && self.neighbor_matched >= min_similar
    }
}

impl SimilarityMask {
    fn new(rows: usize, cols: usize, col_offset: usize) -> Self {
        let words_per_row = cols.div_ceil(64);
        Self {
            rows,
            cols,
            col_offset,
            words_per_row,
            bits: vec![0; rows * words_per_row],
        }
    }

    #[inline]
    fn set(&mut self, row: usize, col: usize) {
        self.bits[row * self.words_per_row + col / 64] |= 1 << (col % 64);
    }

    /// Whether source row `row` is similar to tail column `col`
    pub fn get(&self, row: usize, col: usize) -> bool {
        self.bits[row * self.words_per_row + col / 64] & (1 << (col % 64)) != 0
    }

    /// Number of source images
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Number of tail images
    pub fn cols(&self) -> usize {
        self.cols
    }

    /// Array position of column 0
    pub fn col_offset(&self) -> usize {
        self.col_offset
    }

    /// Total number of similar pairs
    pub fn count(&self) -> usize {
        self.bits.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// Set columns of one row, ascending
    pub fn row_hits(&self, row: usize) -> impl Iterator<Item = usize> + '_ {
        let start = row * self.words_per_row;
        self.bits[start..start + self.words_per_row]
            .iter()
            .enumerate()
            .flat_map(|(w, &word)| {
                let mut word = word;
                std::iter::from_fn(move || {
                    if word == 0 {
                        return None;
                    }
                    let bit = word.trailing_zeros() as usize;
                    word &= word - 1;
                    Some(w * 64 + bit)
                })
            })
    }
}

impl SimilarityIndex {
    /// Build the index over comics in processing order.
    ///
    /// Narrower fingerprints are zero-padded to the widest, and keep their
    /// own width so they never match a fingerprint of another width.
    pub fn build<R: AsRef<ComicRecord>>(comics: &[R]) -> Self {
        let words_per_fp = comics
            .iter()
            .flat_map(|c| c.as_ref().images.iter())
            .map(|p| p.fingerprint.words().len())
            .max()
            .unwrap_or(1);

        let total: usize = comics.iter().map(|c| c.as_ref().images.len()).sum();
        let mut words = Vec::with_capacity(total * words_per_fp);
        let mut widths = Vec::with_capacity(total);
        let mut owners = Vec::with_capacity(total);
        let mut ranges = Vec::with_capacity(comics.len());

        for (comic_idx, comic) in comics.iter().enumerate() {
            let start = owners.len();
            for page in &comic.as_ref().images {
                let fp_words = page.fingerprint.words();
                words.extend_from_slice(fp_words);
                words.extend(std::iter::repeat(0).take(words_per_fp - fp_words.len()));
                widths.push(page.fingerprint.bits());
                owners.push(comic_idx);
            }
            ranges.push(start..owners.len());
        }

        let mixed_widths = widths.windows(2).any(|w| w[0] != w[1]);
        if mixed_widths {
            warn!("Fingerprints of different widths in one index; they will not match");
        }

        Self {
            words_per_fp,
            words,
            widths,
            mixed_widths,
            owners,
            ranges,
        }
    }

    /// Number of fingerprints in the array
    pub fn len(&self) -> usize {
        self.owners.len()
    }

    /// Whether the index holds no fingerprints
    pub fn is_empty(&self) -> bool {
        self.owners.is_empty()
    }

    /// Number of comics
    pub fn comic_count(&self) -> usize {
        self.ranges.len()
    }

    /// `[start, end)` of a comic's fingerprints
    pub fn range(&self, comic: usize) -> Range<usize> {
        self.ranges[comic].clone()
    }

    /// Comic owning an array position
    pub fn owner(&self, pos: usize) -> usize {
        self.owners[pos]
    }

    /// Image index within its comic for an array position
    pub fn image_index(&self, pos: usize) -> usize {
        pos - self.ranges[self.owners[pos]].start
    }

    fn fingerprint_words(&self, pos: usize) -> &[u64] {
        &self.words[pos * self.words_per_fp..(pos + 1) * self.words_per_fp]
    }

    /// Hamming distance between two array positions
    pub fn distance(&self, a: usize, b: usize) -> u32 {
        if self.widths[a] != self.widths[b] {
            return INCOMPATIBLE_DISTANCE;
        }
        crate::core::fingerprint::hamming_words(
            self.fingerprint_words(a),
            self.fingerprint_words(b),
        )
    }

    /// Distances from `pos` to every position from `col_start` on
    fn distance_row(&self, pos: usize, col_start: usize, out: &mut [u32]) {
        let tail = &self.words[col_start * self.words_per_fp..];

        if self.words_per_fp == 1 {
            let a = self.words[pos];
            for (d, b) in out.iter_mut().zip(tail) {
                *d = (a ^ b).count_ones();
            }
        } else {
            let a = self.fingerprint_words(pos);
            for (d, b) in out.iter_mut().zip(tail.chunks_exact(self.words_per_fp)) {
                *d = a.iter().zip(b).map(|(x, y)| (x ^ y).count_ones()).sum();
            }
        }

        if self.mixed_widths {
            let width = self.widths[pos];
            for (d, &w) in out.iter_mut().zip(&self.widths[col_start..]) {
                if w != width {
                    *d = INCOMPATIBLE_DISTANCE;
                }
            }
        }
    }

    /// Similarity mask of comic `comic` against all later comics
    pub fn similarity_mask(&self, comic: usize, threshold: u32) -> SimilarityMask {
        let source = self.range(comic);
        let col_start = source.end;
        let cols = self.len() - col_start;
        let mut mask = SimilarityMask::new(source.len(), cols, col_start);

        if cols == 0 {
            return mask;
        }

        let mut row = vec![0u32; cols];
        for (r, pos) in source.enumerate() {
            self.distance_row(pos, col_start, &mut row);
            for (c, &d) in row.iter().enumerate() {
                if d <= threshold && d != INCOMPATIBLE_DISTANCE {
                    mask.set(r, c);
                }
            }
        }

        mask
    }

    /// Per-neighbor distinct match counts and pairs derived from a mask
    pub fn neighbor_matches(&self, comic: usize, mask: &SimilarityMask) -> Vec<NeighborMatch> {
        #[derive(Default)]
        struct Accum {
            source_rows: Vec<bool>,
            neighbor_hits: BTreeSet<usize>,
            pairs: Vec<MatchedPair>,
        }

        let source_start = self.ranges[comic].start;
        let mut per_neighbor: BTreeMap<usize, Accum> = BTreeMap::new();

        for r in 0..mask.rows() {
            for c in mask.row_hits(r) {
                let neighbor_pos = mask.col_offset() + c;
                let source_pos = source_start + r;
                let acc = per_neighbor.entry(self.owners[neighbor_pos]).or_default();
                if acc.source_rows.is_empty() {
                    acc.source_rows = vec![false; mask.rows()];
                }
                acc.source_rows[r] = true;
                acc.neighbor_hits.insert(neighbor_pos);
                acc.pairs.push(MatchedPair {
                    source_pos,
                    neighbor_pos,
                    distance: self.distance(source_pos, neighbor_pos),
                });
            }
        }

        per_neighbor
            .into_iter()
            .map(|(neighbor, acc)| NeighborMatch {
                comic: neighbor,
                source_matched: acc.source_rows.iter().filter(|&&hit| hit).count(),
                neighbor_matched: acc.neighbor_hits.len(),
                pairs: acc.pairs,
            })
            .collect()
    }

    /// Compare comic `comic` against all later comics
    pub fn compare(&self, comic: usize, threshold: u32) -> Vec<NeighborMatch> {
        let mask = self.similarity_mask(comic, threshold);
        self.neighbor_matches(comic, &mask)
    }
}
