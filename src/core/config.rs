//! Configuration module for the comic duplicate finder
//!
//! Supports loading configuration from a TOML file.
//! Configuration is stored in a standard location:
//! - Windows: %APPDATA%\comic_dupe_finder\config.toml
//! - Linux: ~/.config/comic_dupe_finder/config.toml
//! - macOS: ~/Library/Application Support/comic_dupe_finder/config.toml

use crate::core::fingerprint::Fingerprint;
use crate::core::hasher::HashAlgorithm;
use crate::core::source::DEFAULT_IMAGE_EXTENSIONS;
use crate::duplicate::DetectionSettings;
use crate::scan::filter::ComicFilter;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Application name used for config and cache directories
const APP_NAME: &str = "comic_dupe_finder";

/// Default config file name
const CONFIG_FILE_NAME: &str = "config.toml";

/// Get the standard configuration directory for the application.
pub fn get_config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(APP_NAME))
}

/// Get the standard configuration file path.
pub fn get_config_path() -> Option<PathBuf> {
    get_config_dir().map(|dir| dir.join(CONFIG_FILE_NAME))
}

/// Default location of the fingerprint and match caches
pub fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .map(|dir| dir.join(APP_NAME))
        .unwrap_or_else(|| PathBuf::from("./cache"))
}

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Comic discovery and extraction settings
    pub scan: ScanConfig,

    /// Fingerprint comparison settings
    pub detection: DetectionConfig,

    /// Persistent cache settings
    pub cache: CacheConfig,

    /// Known fingerprints to ignore
    pub blacklist: BlacklistConfig,

    /// Comics to leave out of a scan
    pub filter: FilterConfig,

    /// Logging settings
    pub logging: LoggingConfig,
}

/// Comic discovery and extraction settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Number of extraction worker threads
    pub workers: usize,

    /// Page image extensions (without the dot)
    pub image_extensions: Vec<String>,

    /// Search scan roots recursively
    pub recursive: bool,
}

/// Fingerprint comparison settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Perceptual hash algorithm
    pub hash_algorithm: HashAlgorithm,

    /// Hash grid size (8 = 64-bit fingerprints)
    pub hash_size: u32,

    /// Maximum Hamming distance for two images to count as similar
    pub similarity_threshold: u32,

    /// Per-algorithm thresholds keyed by algorithm name; these win over
    /// `similarity_threshold`
    pub similarity_thresholds: BTreeMap<String, u32>,

    /// Distinct similar images both comics need before they are linked
    pub min_similar_images: usize,

    /// Images narrower than this are ignored
    pub min_image_width: u32,

    /// Images shorter than this are ignored
    pub min_image_height: u32,

    /// Comics with fewer usable images are not compared
    pub min_comic_images: usize,

    /// Comics with more usable images are not compared (0 = unlimited)
    pub max_comic_images: usize,
}

/// Persistent cache settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Enable the fingerprint and match caches
    pub enabled: bool,

    /// Directory holding both caches
    pub directory: PathBuf,

    /// Fingerprint cache entries older than this are pruned by `cache prune`
    pub max_age_days: u32,
}

/// Known fingerprints to ignore (scanlation credits, publisher logos...)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BlacklistConfig {
    /// Folder of images whose fingerprints are blacklisted
    pub folder: Option<PathBuf>,

    /// Blacklisted fingerprints as hex strings
    pub hashes: Vec<String>,
}

/// Comics to leave out of a scan
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    /// Comics whose file name matches this regex are skipped
    pub exclude_regex: Option<String>,

    /// Skip comics created before this day
    pub created_after: Option<NaiveDate>,

    /// Skip comics created after this day
    pub created_before: Option<NaiveDate>,

    /// Skip comics modified before this day
    pub modified_after: Option<NaiveDate>,

    /// Skip comics modified after this day
    pub modified_before: Option<NaiveDate>,
}

/// Logging settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (error, warn, info, debug, trace)
    pub level: String,

    /// Also write logs to a file
    pub log_to_file: bool,

    /// Log file path
    pub log_file: PathBuf,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            image_extensions: DEFAULT_IMAGE_EXTENSIONS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            recursive: true,
        }
    }
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            hash_algorithm: HashAlgorithm::Perceptual,
            hash_size: 8,
            similarity_threshold: 5,
            similarity_thresholds: BTreeMap::new(),
            min_similar_images: 3,
            min_image_width: 100,
            min_image_height: 100,
            min_comic_images: 1,
            max_comic_images: 0,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            directory: default_cache_dir(),
            max_age_days: 30,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            log_to_file: false,
            log_file: PathBuf::from("./comic_dupes.log"),
        }
    }
}

impl DetectionConfig {
    /// Threshold for the configured hash algorithm
    pub fn effective_threshold(&self) -> u32 {
        self.similarity_thresholds
            .get(self.hash_algorithm.name())
            .copied()
            .unwrap_or(self.similarity_threshold)
    }

    /// Use `threshold` for the configured algorithm, replacing any
    /// per-algorithm entry
    pub fn override_threshold(&mut self, threshold: u32) {
        self.similarity_threshold = threshold;
        self.similarity_thresholds.remove(self.hash_algorithm.name());
    }

    /// Convert to the detection engine's settings
    pub fn to_detection_settings(&self) -> DetectionSettings {
        DetectionSettings::new()
            .with_threshold(self.effective_threshold())
            .with_min_similar(self.min_similar_images)
            .with_min_resolution(self.min_image_width, self.min_image_height)
            .with_image_range(self.min_comic_images, self.max_comic_images)
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.to_path_buf()));
        }

        let content = fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadError(path.to_path_buf(), e.to_string()))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| ConfigError::ParseError(path.to_path_buf(), e.to_string()))?;

        Ok(config)
    }

    /// Load configuration from default locations
    ///
    /// Search order:
    /// 1. ./config.toml (current directory)
    /// 2. ./comic_dupes.toml (current directory - alternative name)
    /// 3. Standard config location
    ///
    /// If no config file is found, returns default configuration.
    pub fn load_default() -> Result<Self, ConfigError> {
        Self::load(Self::get_active_config_path()).or_else(|e| match e {
            ConfigError::FileNotFound(_) => Ok(Self::default()),
            other => Err(other),
        })
    }

    /// Get the path where the config file is (or would be) located.
    pub fn get_active_config_path() -> PathBuf {
        let local_paths = [
            PathBuf::from("./config.toml"),
            PathBuf::from("./comic_dupes.toml"),
        ];

        for path in &local_paths {
            if path.exists() {
                return path.clone();
            }
        }

        get_config_path().unwrap_or_else(|| PathBuf::from("./config.toml"))
    }

    /// Save configuration to a TOML file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content =
            toml::to_string_pretty(self).map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| {
                    ConfigError::WriteError(parent.to_path_buf(), e.to_string())
                })?;
            }
        }

        fs::write(path.as_ref(), content)
            .map_err(|e| ConfigError::WriteError(path.as_ref().to_path_buf(), e.to_string()))?;

        Ok(())
    }

    /// Check values that would make a scan meaningless
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::InvalidValue(msg));

        if self.scan.workers == 0 {
            return invalid("scan.workers must be at least 1".to_string());
        }
        if !(2..=64).contains(&self.detection.hash_size) {
            return invalid(format!(
                "detection.hash_size must be between 2 and 64, got {}",
                self.detection.hash_size
            ));
        }
        if self.detection.min_similar_images == 0 {
            return invalid("detection.min_similar_images must be at least 1".to_string());
        }
        if self.detection.max_comic_images != 0
            && self.detection.max_comic_images < self.detection.min_comic_images
        {
            return invalid(format!(
                "detection.max_comic_images ({}) is below min_comic_images ({})",
                self.detection.max_comic_images, self.detection.min_comic_images
            ));
        }
        for name in self.detection.similarity_thresholds.keys() {
            if HashAlgorithm::from_name(name).is_none() {
                return invalid(format!(
                    "detection.similarity_thresholds: unknown algorithm '{}'",
                    name
                ));
            }
        }
        for hex in &self.blacklist.hashes {
            if let Err(e) = Fingerprint::from_hex(hex) {
                return invalid(format!("blacklist.hashes: {}", e));
            }
        }
        ComicFilter::from_config(&self.filter)?;

        Ok(())
    }

    /// Generate a default config file with comments
    pub fn generate_default_config() -> String {
        include_str!("../../config.example.toml").to_string()
    }
}

/// Configuration error types
#[derive(Debug)]
pub enum ConfigError {
    /// Configuration file was not found at the specified path
    FileNotFound(PathBuf),
    /// Failed to read the configuration file
    ReadError(PathBuf, String),
    /// Failed to parse the configuration file (invalid TOML)
    ParseError(PathBuf, String),
    /// Failed to serialize configuration to TOML
    SerializeError(String),
    /// Failed to write configuration file
    WriteError(PathBuf, String),
    /// A value is out of range
    InvalidValue(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::FileNotFound(path) => {
                write!(f, "Configuration file not found: {}", path.display())
            }
            ConfigError::ReadError(path, err) => {
                write!(
                    f,
                    "Failed to read config file '{}': {}",
                    path.display(),
                    err
                )
            }
            ConfigError::ParseError(path, err) => {
                write!(
                    f,
                    "Failed to parse config file '{}': {}",
                    path.display(),
                    err
                )
            }
            ConfigError::SerializeError(err) => {
                write!(f, "Failed to serialize configuration: {}", err)
            }
            ConfigError::WriteError(path, err) => {
                write!(
                    f,
                    "Failed to write config file '{}': {}",
                    path.display(),
                    err
                )
            }
            ConfigError::InvalidValue(msg) => write!(f, "Invalid configuration: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<ConfigError> for crate::core::error::ScanError {
    fn from(err: ConfigError) -> Self {
        crate::core::error::ScanError::ConfigError(err.to_string())
    }
}
