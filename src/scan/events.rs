//! Scan Events Module
//!
//! Events emitted by the [`ScanCoordinator`](super::ScanCoordinator) while a
//! scan runs. They are sent through a channel and can be consumed by any
//! frontend (the CLI progress bars, a GUI, a test).

use crate::duplicate::DuplicateGroup;
use serde::{Serialize, Serializer};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

// =============================================================================
// Stages
// =============================================================================

/// Stage of a running scan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanStage {
    /// Fingerprinting comics in parallel
    Extracting,
    /// Comparing fingerprints and grouping comics
    Detecting,
}

impl ScanStage {
    /// Stage name for display
    pub fn name(self) -> &'static str {
        match self {
            ScanStage::Extracting => "extracting",
            ScanStage::Detecting => "detecting",
        }
    }
}

impl fmt::Display for ScanStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// =============================================================================
// Progress and Summary
// =============================================================================

/// Progress of the current stage
#[derive(Debug, Clone)]
pub struct ScanProgress {
    /// Stage being reported
    pub stage: ScanStage,
    /// Items finished in this stage
    pub processed: usize,
    /// Items in this stage
    pub total: usize,
    /// Item just finished
    pub current_item: Option<String>,
    /// Comics that failed extraction so far
    pub errors: usize,
    /// Duplicate groups found so far
    pub groups_found: usize,
    /// Comics served from the fingerprint cache so far
    pub cache_hits: usize,
    /// Time since the scan started
    pub elapsed: Duration,
}

impl ScanProgress {
    /// Percentage of the stage completed (0.0 - 100.0)
    pub fn percent_complete(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        (self.processed as f64 / self.total as f64) * 100.0
    }
}

/// Counters for a finished (or stopped) scan
#[derive(Debug, Clone, Default, Serialize)]
pub struct ScanStats {
    /// Comics discovered under the roots that passed the filters
    pub comics_found: usize,
    /// Comics left out by the name and date filters
    pub comics_excluded: usize,
    /// Comics fingerprinted successfully
    pub comics_extracted: usize,
    /// Comics that failed extraction
    pub errors: usize,
    /// Comics served from the fingerprint cache
    pub cache_hits: usize,
    /// Images rejected as invalid or too small
    pub rejected_images: usize,
    /// Images dropped by the blacklist
    pub blacklisted_images: usize,
    /// Comics inside the image count range
    pub candidates: usize,
    /// Comics compared as a source
    pub compared: usize,
    /// Comics skipped using the match cache
    pub skipped: usize,
    /// Cached groups reused
    pub restored_groups: usize,
}

/// Final result delivered with `Completed` or `Stopped`
#[derive(Debug, Clone, Default, Serialize)]
pub struct ScanSummary {
    /// Duplicate groups
    pub groups: Vec<DuplicateGroup>,
    /// Counters
    pub stats: ScanStats,
    /// Wall time of the scan
    #[serde(rename = "elapsed_seconds", serialize_with = "serialize_secs")]
    pub elapsed: Duration,
    /// False when the scan was stopped before finishing
    pub completed: bool,
}

fn serialize_secs<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(duration.as_secs_f64())
}

// =============================================================================
// Events
// =============================================================================

/// Events emitted during a scan
#[derive(Debug, Clone)]
pub enum ScanEvent {
    /// Discovery finished and the scan is underway
    Started {
        /// Roots being scanned
        roots: Vec<PathBuf>,
        /// Comics discovered
        comics: usize,
    },

    /// A new stage began
    StageChanged(ScanStage),

    /// Progress within the current stage
    Progress(ScanProgress),

    /// A comic could not be read; the scan continues
    ComicFailed {
        /// Comic path
        path: PathBuf,
        /// Error message
        error: String,
    },

    /// A group was formed or grew
    GroupFound {
        /// Comics linked in this step
        members: Vec<PathBuf>,
        /// Groups found so far
        groups_found: usize,
    },

    /// The scan was paused
    Paused,

    /// The scan was resumed
    Resumed,

    /// A stop was requested
    Stopping,

    /// The scan finished
    Completed(ScanSummary),

    /// The scan was stopped; groups finalized so far are included
    Stopped(ScanSummary),

    /// The scan could not run
    Failed {
        /// Error message
        error: String,
    },
}

impl ScanEvent {
    /// Whether no further events follow for this scan
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ScanEvent::Completed(_) | ScanEvent::Stopped(_) | ScanEvent::Failed { .. }
        )
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percent_complete() {
        let mut progress = ScanProgress {
            stage: ScanStage::Extracting,
            processed: 0,
            total: 0,
            current_item: None,
            errors: 0,
            groups_found: 0,
            cache_hits: 0,
            elapsed: Duration::ZERO,
        };
        assert_eq!(progress.percent_complete(), 0.0);

        progress.total = 4;
        progress.processed = 1;
        assert!((progress.percent_complete() - 25.0).abs() < 0.01);
    }

    #[test]
    fn test_terminal_events() {
        assert!(ScanEvent::Completed(ScanSummary::default()).is_terminal());
        assert!(ScanEvent::Failed {
            error: "x".to_string()
        }
        .is_terminal());
        assert!(!ScanEvent::Paused.is_terminal());
        assert!(!ScanEvent::StageChanged(ScanStage::Detecting).is_terminal());
    }

    #[test]
    fn test_summary_json_uses_seconds() {
        let summary = ScanSummary {
            elapsed: Duration::from_millis(1500),
            completed: true,
            ..Default::default()
        };
        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["elapsed_seconds"], 1.5);
        assert_eq!(json["completed"], true);
        assert!(json["groups"].as_array().unwrap().is_empty());
    }
}
