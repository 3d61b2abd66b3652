//! Error types for the comic duplicate finder
//!
//! Almost nothing in the engine is fatal. Per-comic failures are carried on
//! the comic record, cache problems are treated as misses, and only a scan
//! that finds or extracts nothing at all surfaces an error to the caller.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for the duplicate detection engine
#[derive(Error, Debug)]
pub enum ScanError {
    /// General I/O error
    #[error("IO error: {0}")]
    IoError(String),

    /// A comic (archive or folder) could not be read
    #[error("Failed to read '{path}': {message}")]
    SourceError { path: PathBuf, message: String },

    /// An image buffer failed to decode or validate
    #[error("Image error: {0}")]
    ImageError(String),

    /// Malformed or incompatible fingerprint
    #[error("Fingerprint error: {0}")]
    FingerprintError(String),

    /// A cache file was unreadable or written by an incompatible version
    #[error("Cache error: {0}")]
    CacheError(String),

    /// Invalid configuration value
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Discovery found nothing to scan
    #[error("No supported comic files found in: {}", format_roots(.0))]
    NoComicsFound(Vec<PathBuf>),

    /// Every comic failed extraction
    #[error("No comics could be extracted ({errors} errors)")]
    NothingExtracted { errors: usize },

    /// A coordinator command was issued in the wrong state
    #[error("Invalid scan state: {0}")]
    InvalidState(String),
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, ScanError>;

impl From<std::io::Error> for ScanError {
    fn from(err: std::io::Error) -> Self {
        ScanError::IoError(err.to_string())
    }
}

impl From<serde_json::Error> for ScanError {
    fn from(err: serde_json::Error) -> Self {
        ScanError::CacheError(err.to_string())
    }
}

fn format_roots(roots: &[PathBuf]) -> String {
    roots
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}
