//! Comic Filter Module
//!
//! Narrows the discovered comics before any image is read: comics whose
//! file name matches an exclusion regex are dropped, and creation and
//! modification times can be limited to date ranges.
//!
//! Dates are whole UTC days and both bounds are inclusive.

use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use log::{debug, warn};
use regex::Regex;

use crate::core::config::{ConfigError, FilterConfig};
use crate::core::source::{ComicMetadata, ComicSource};

/// Inclusive range of UTC days
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DateRange {
    /// First day included
    pub after: Option<NaiveDate>,
    /// Last day included
    pub before: Option<NaiveDate>,
}

impl DateRange {
    /// Range with the given bounds
    pub fn new(after: Option<NaiveDate>, before: Option<NaiveDate>) -> Self {
        Self { after, before }
    }

    /// Whether either bound is set
    pub fn is_bounded(&self) -> bool {
        self.after.is_some() || self.before.is_some()
    }

    /// Whether a millisecond timestamp falls inside the range
    pub fn contains_ms(&self, ms: u64) -> bool {
        if let Some(after) = self.after {
            if ms < day_start_ms(after) {
                return false;
            }
        }
        if let Some(before) = self.before {
            let end = before.succ_opt().map(day_start_ms).unwrap_or(u64::MAX);
            if ms >= end {
                return false;
            }
        }
        true
    }
}

fn day_start_ms(day: NaiveDate) -> u64 {
    day.and_hms_opt(0, 0, 0)
        .map(|t| t.and_utc().timestamp_millis().max(0) as u64)
        .unwrap_or(0)
}

/// Why a comic was left out of a scan
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exclusion {
    /// File name matched the exclusion regex
    Name,
    /// Created outside the creation range
    Created,
    /// Modified outside the modification range
    Modified,
}

/// Filters applied to discovered comics
#[derive(Debug, Clone, Default)]
pub struct ComicFilter {
    exclude_name: Option<Regex>,
    created: DateRange,
    modified: DateRange,
}

impl ComicFilter {
    /// Filter that keeps every comic
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from the `[filter]` section
    pub fn from_config(config: &FilterConfig) -> Result<Self, ConfigError> {
        let mut filter = Self::new()
            .with_created(DateRange::new(config.created_after, config.created_before))
            .with_modified(DateRange::new(config.modified_after, config.modified_before));

        if let Some(pattern) = config.exclude_regex.as_deref().filter(|p| !p.is_empty()) {
            filter = filter.with_exclude_regex(pattern)?;
        }

        for (name, range) in [("created", filter.created), ("modified", filter.modified)] {
            if let (Some(after), Some(before)) = (range.after, range.before) {
                if after > before {
                    return Err(ConfigError::InvalidValue(format!(
                        "filter.{name}_after ({after}) is later than filter.{name}_before ({before})"
                    )));
                }
            }
        }

        Ok(filter)
    }

    /// Drop comics whose file name matches `pattern`
    pub fn with_exclude_regex(mut self, pattern: &str) -> Result<Self, ConfigError> {
        let regex = Regex::new(pattern).map_err(|e| {
            ConfigError::InvalidValue(format!("filter.exclude_regex '{}': {}", pattern, e))
        })?;
        self.exclude_name = Some(regex);
        Ok(self)
    }

    /// Keep only comics created inside `range`
    pub fn with_created(mut self, range: DateRange) -> Self {
        self.created = range;
        self
    }

    /// Keep only comics modified inside `range`
    pub fn with_modified(mut self, range: DateRange) -> Self {
        self.modified = range;
        self
    }

    /// Whether the filter can drop anything
    pub fn is_active(&self) -> bool {
        self.exclude_name.is_some() || self.created.is_bounded() || self.modified.is_bounded()
    }

    fn needs_metadata(&self) -> bool {
        self.created.is_bounded() || self.modified.is_bounded()
    }

    /// Check a comic by name
    pub fn excludes_name(&self, comic: &Path) -> bool {
        let Some(regex) = &self.exclude_name else {
            return false;
        };
        comic
            .file_name()
            .map(|name| regex.is_match(&name.to_string_lossy()))
            .unwrap_or(false)
    }

    /// Check a comic's timestamps. A missing creation time passes.
    pub fn excludes_dates(&self, meta: &ComicMetadata) -> Option<Exclusion> {
        if let Some(created_ms) = meta.created_ms {
            if !self.created.contains_ms(created_ms) {
                return Some(Exclusion::Created);
            }
        }
        if !self.modified.contains_ms(meta.mtime_ms) {
            return Some(Exclusion::Modified);
        }
        None
    }

    /// Keep the comics that pass, preserving order.
    ///
    /// Comics whose metadata cannot be read are kept so extraction can
    /// report them.
    pub fn apply(&self, comics: Vec<PathBuf>, source: &dyn ComicSource) -> Vec<PathBuf> {
        if !self.is_active() {
            return comics;
        }

        comics
            .into_iter()
            .filter(|comic| match self.check(comic, source) {
                Some(reason) => {
                    debug!("Excluded {} ({:?})", comic.display(), reason);
                    false
                }
                None => true,
            })
            .collect()
    }

    fn check(&self, comic: &Path, source: &dyn ComicSource) -> Option<Exclusion> {
        if self.excludes_name(comic) {
            return Some(Exclusion::Name);
        }
        if !self.needs_metadata() {
            return None;
        }
        match source.metadata(comic) {
            Ok(meta) => self.excludes_dates(&meta),
            Err(e) => {
                warn!("Cannot date-filter {}: {}", comic.display(), e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testdb::MockComicSource;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn names(comics: &[PathBuf]) -> Vec<String> {
        comics
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn test_exclude_regex_searches_file_name() {
        let cases: [(&str, &[&str], &[&str]); 3] = [
            (
                r".*test.*",
                &["test_manga", "my_test_comic", "normal_manga", "testing_book"],
                &["normal_manga"],
            ),
            (
                r"^demo_.*",
                &["demo_manga", "my_demo_comic", "demo_test", "normal_manga"],
                &["my_demo_comic", "normal_manga"],
            ),
            (
                r".*\.(tmp|temp)$",
                &["manga.tmp", "comic.temp", "normal.zip", "test.tmp"],
                &["normal.zip"],
            ),
        ];

        for (pattern, all, kept) in cases {
            let source = MockComicSource::new();
            let comics: Vec<PathBuf> = all
                .iter()
                .map(|name| {
                    let path = format!("/lib/{}", name);
                    source.add_comic(&path, &["ff"]);
                    PathBuf::from(path)
                })
                .collect();

            let filter = ComicFilter::new().with_exclude_regex(pattern).unwrap();
            assert_eq!(names(&filter.apply(comics, &source)), kept.to_vec(), "{}", pattern);
        }
    }

    #[test]
    fn test_regex_ignores_parent_folders() {
        let filter = ComicFilter::new().with_exclude_regex("^tmp").unwrap();
        assert!(!filter.excludes_name(Path::new("/tmp/library/issue 1")));
        assert!(filter.excludes_name(Path::new("/library/tmp issue")));
    }

    #[test]
    fn test_date_range_bounds_are_inclusive_days() {
        let range = DateRange::new(Some(day(2023, 6, 1)), Some(day(2023, 12, 31)));
        let june_first = day_start_ms(day(2023, 6, 1));
        let new_year = day_start_ms(day(2024, 1, 1));

        assert!(!range.contains_ms(june_first - 1));
        assert!(range.contains_ms(june_first));
        assert!(range.contains_ms(new_year - 1));
        assert!(!range.contains_ms(new_year));
        assert!(DateRange::default().contains_ms(0));
    }

    #[test]
    fn test_modified_and_created_ranges() {
        let source = MockComicSource::new();
        for path in ["/lib/old", "/lib/recent", "/lib/reissued"] {
            source.add_comic(path, &["ff"]);
        }
        let jan_2022 = day_start_ms(day(2022, 1, 10));
        let jul_2023 = day_start_ms(day(2023, 7, 10));
        source.set_times("/lib/old", jan_2022, jan_2022);
        source.set_times("/lib/recent", jul_2023, jul_2023);
        source.set_times("/lib/reissued", jan_2022, jul_2023);
        let comics = source.discover(&[PathBuf::from("/lib")]).unwrap();

        let modified = ComicFilter::new().with_modified(DateRange::new(Some(day(2023, 1, 1)), None));
        assert_eq!(
            names(&modified.apply(comics.clone(), &source)),
            vec!["recent", "reissued"]
        );

        let created = ComicFilter::new().with_created(DateRange::new(Some(day(2023, 1, 1)), None));
        assert_eq!(names(&created.apply(comics.clone(), &source)), vec!["recent"]);

        let before = ComicFilter::new().with_modified(DateRange::new(None, Some(day(2022, 12, 31))));
        assert_eq!(names(&before.apply(comics, &source)), vec!["old"]);
    }

    #[test]
    fn test_missing_creation_time_passes() {
        let filter = ComicFilter::new().with_created(DateRange::new(Some(day(2030, 1, 1)), None));
        let meta = ComicMetadata {
            size: 1,
            mtime_ms: 0,
            created_ms: None,
        };
        assert_eq!(filter.excludes_dates(&meta), None);
    }

    #[test]
    fn test_from_config_validates() {
        let mut config = FilterConfig::default();
        assert!(!ComicFilter::from_config(&config).unwrap().is_active());

        config.exclude_regex = Some(String::new());
        assert!(!ComicFilter::from_config(&config).unwrap().is_active());

        config.exclude_regex = Some("(unclosed".to_string());
        assert!(ComicFilter::from_config(&config).is_err());

        config.exclude_regex = None;
        config.modified_after = Some(day(2024, 1, 1));
        config.modified_before = Some(day(2023, 1, 1));
        assert!(ComicFilter::from_config(&config).is_err());
    }
}
