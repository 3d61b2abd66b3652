//! Scan orchestration
//!
//! - `coordinator` - Background scan thread, worker pool, pause/resume/stop
//! - `events` - Progress and result events for frontends
//! - `filter` - Name and date filters applied to discovered comics

pub mod coordinator;
pub mod events;
pub mod filter;

pub use coordinator::{ScanCoordinator, ScanOptions, ScanState, FINGERPRINT_CACHE_DIR};
pub use events::{ScanEvent, ScanProgress, ScanStage, ScanStats, ScanSummary};
pub use filter::{ComicFilter, DateRange};
