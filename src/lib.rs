//! Comic Dupe Finder Library
//!
//! Finds near-duplicate comics in a library by fingerprinting every page
//! image and grouping comics that share enough visually similar pages.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//!
//! - [`core`] - Configuration, error handling, fingerprints, image sources
//!   and the perceptual hasher
//! - [`duplicate`] - The detection engine: catalog building, fingerprint and
//!   match caches, the similarity index and the grouper
//! - [`scan`] - Background scan coordinator with pause/resume/stop and an
//!   event stream for frontends
//! - [`cli`] - Command-line interface (only used by the binary)
//! - [`testdb`] - In-memory comic source and fingerprinter for tests
//!
//! # Example Usage
//!
//! ```rust,no_run
//! use comic_dupe_finder::core::config::Config;
//! use comic_dupe_finder::scan::{ScanCoordinator, ScanEvent};
//! use std::path::PathBuf;
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = Config::load_default()?;
//!     let coordinator = ScanCoordinator::from_config(&config)?;
//!
//!     match coordinator.run_blocking(vec![PathBuf::from("/comics")])? {
//!         ScanEvent::Completed(summary) => {
//!             for group in &summary.groups {
//!                 println!("{} comics, {} shared pages", group.len(), group.similarity_count());
//!             }
//!         }
//!         other => println!("scan ended: {:?}", other),
//!     }
//!
//!     Ok(())
//! }
//! ```
//!
//! # Driving a Scan From a UI Loop
//!
//! ```rust,no_run
//! use comic_dupe_finder::core::config::Config;
//! use comic_dupe_finder::scan::{ScanCoordinator, ScanEvent};
//! use std::path::PathBuf;
//!
//! # fn main() -> anyhow::Result<()> {
//! let coordinator = ScanCoordinator::from_config(&Config::default())?;
//! coordinator.start(vec![PathBuf::from("/comics")])?;
//!
//! while let Some(event) = coordinator.try_recv_event() {
//!     match event {
//!         ScanEvent::Progress(p) => println!("{} {:.0}%", p.stage, p.percent_complete()),
//!         ScanEvent::GroupFound { groups_found, .. } => println!("{} groups", groups_found),
//!         _ => {}
//!     }
//!     # break;
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Testing Without Real Comics
//!
//! ```rust
//! use comic_dupe_finder::testdb::{HexFingerprinter, MockComicSource};
//! use comic_dupe_finder::duplicate::DetectionSettings;
//! use comic_dupe_finder::scan::{ScanCoordinator, ScanEvent, ScanOptions};
//! use std::path::PathBuf;
//! use std::sync::Arc;
//!
//! let source = Arc::new(MockComicSource::new());
//! source.add_comic("/lib/a", &["f000000000000000", "0f00000000000000"]);
//! source.add_comic("/lib/b", &["f000000000000000", "0f00000000000000"]);
//!
//! let options = ScanOptions::new(DetectionSettings::new().with_min_similar(2));
//! let coordinator = ScanCoordinator::new(source, Arc::new(HexFingerprinter), options);
//!
//! match coordinator.run_blocking(vec![PathBuf::from("/lib")]).unwrap() {
//!     ScanEvent::Completed(summary) => assert_eq!(summary.groups.len(), 1),
//!     other => panic!("unexpected {:?}", other),
//! }
//! ```

pub mod cli;
pub mod core;
pub mod duplicate;
pub mod scan;
pub mod testdb;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
