//! Image-extraction collaborator
//!
//! A [`ComicSource`] knows how to find comics under a set of roots and how
//! to hand out their page images in reading order. The engine never looks
//! at archive formats itself.
//!
//! [`FolderSource`] treats every directory that directly contains supported
//! images as one comic. Archive readers plug in behind the same trait.

use crate::core::error::{Result, ScanError};
use log::{debug, warn};
use std::collections::BTreeSet;
use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use walkdir::WalkDir;

/// Default page image extensions
pub const DEFAULT_IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "bmp", "webp"];

/// File-level attributes of a comic used for its cache key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ComicMetadata {
    /// Total size in bytes
    pub size: u64,
    /// Modification time in milliseconds since the Unix epoch
    pub mtime_ms: u64,
    /// Creation time, where the platform records one
    pub created_ms: Option<u64>,
}

/// Yields the page images of comics
pub trait ComicSource: Send + Sync {
    /// Find all comics below the given roots, in a stable order
    fn discover(&self, roots: &[PathBuf]) -> Result<Vec<PathBuf>>;

    /// Size and modification time of a comic
    fn metadata(&self, comic: &Path) -> Result<ComicMetadata>;

    /// Image names inside a comic, in natural page order
    fn list_images(&self, comic: &Path) -> Result<Vec<String>>;

    /// Raw bytes of one image
    fn read_image(&self, comic: &Path, name: &str) -> Result<Vec<u8>>;

    /// Validate an image buffer and return its dimensions.
    ///
    /// Only the header is decoded. `None` means the buffer is not a
    /// readable image.
    fn image_dimensions(&self, bytes: &[u8]) -> Option<(u32, u32)> {
        image::ImageReader::new(Cursor::new(bytes))
            .with_guessed_format()
            .ok()?
            .into_dimensions()
            .ok()
    }
}

/// Convert a filesystem timestamp to milliseconds since the epoch
pub fn system_time_ms(time: SystemTime) -> u64 {
    time.duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Directory-per-comic source
#[derive(Debug, Clone)]
pub struct FolderSource {
    image_extensions: Vec<String>,
    recursive: bool,
}

impl Default for FolderSource {
    fn default() -> Self {
        Self::new(
            DEFAULT_IMAGE_EXTENSIONS.iter().map(|s| s.to_string()).collect(),
            true,
        )
    }
}

impl FolderSource {
    /// Create a source accepting the given extensions (case-insensitive)
    pub fn new(image_extensions: Vec<String>, recursive: bool) -> Self {
        Self {
            image_extensions: image_extensions
                .into_iter()
                .map(|e| e.trim_start_matches('.').to_lowercase())
                .collect(),
            recursive,
        }
    }

    /// Whether a file name has a supported image extension
    pub fn is_image_name(&self, name: &str) -> bool {
        Path::new(name)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| self.image_extensions.contains(&e.to_lowercase()))
            .unwrap_or(false)
    }

    fn image_paths(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        let mut images = Vec::new();
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            let is_file = entry.file_type().map(|t| t.is_file()).unwrap_or(false);
            let name = entry.file_name();
            if is_file && self.is_image_name(&name.to_string_lossy()) {
                images.push(path);
            }
        }
        Ok(images)
    }

    fn has_images(&self, dir: &Path) -> bool {
        match fs::read_dir(dir) {
            Ok(entries) => entries.flatten().any(|entry| {
                entry.file_type().map(|t| t.is_file()).unwrap_or(false)
                    && self.is_image_name(&entry.file_name().to_string_lossy())
            }),
            Err(_) => false,
        }
    }
}

impl ComicSource for FolderSource {
    fn discover(&self, roots: &[PathBuf]) -> Result<Vec<PathBuf>> {
        let mut comics = BTreeSet::new();

        for root in roots {
            if !root.is_dir() {
                warn!("Scan root is not a directory: {}", root.display());
                continue;
            }

            let walker = WalkDir::new(root)
                .follow_links(false)
                .max_depth(if self.recursive { usize::MAX } else { 1 });

            for entry in walker.into_iter().filter_map(|e| e.ok()) {
                if entry.file_type().is_dir() && self.has_images(entry.path()) {
                    comics.insert(entry.path().to_path_buf());
                }
            }
        }

        debug!("Discovered {} comic folder(s)", comics.len());
        Ok(comics.into_iter().collect())
    }

    fn metadata(&self, comic: &Path) -> Result<ComicMetadata> {
        let dir_meta = fs::metadata(comic).map_err(|e| ScanError::SourceError {
            path: comic.to_path_buf(),
            message: e.to_string(),
        })?;

        let mut size = 0;
        let mut mtime_ms = dir_meta.modified().map(system_time_ms).unwrap_or(0);
        let created_ms = dir_meta.created().ok().map(system_time_ms);

        for path in self.image_paths(comic)? {
            let meta = fs::metadata(&path)?;
            size += meta.len();
            mtime_ms = mtime_ms.max(meta.modified().map(system_time_ms).unwrap_or(0));
        }

        Ok(ComicMetadata {
            size,
            mtime_ms,
            created_ms,
        })
    }

    fn list_images(&self, comic: &Path) -> Result<Vec<String>> {
        let mut names: Vec<String> = self
            .image_paths(comic)
            .map_err(|e| ScanError::SourceError {
                path: comic.to_path_buf(),
                message: e.to_string(),
            })?
            .into_iter()
            .filter_map(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
            .collect();

        names.sort_by(|a, b| natord::compare(a, b));
        Ok(names)
    }

    fn read_image(&self, comic: &Path, name: &str) -> Result<Vec<u8>> {
        fs::read(comic.join(name)).map_err(|e| ScanError::SourceError {
            path: comic.join(name),
            message: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn touch(path: &Path) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, b"x").unwrap();
    }

    #[test]
    fn test_discover_finds_image_folders_only() {
        let temp = TempDir::new().unwrap();
        touch(&temp.path().join("series/vol1/001.jpg"));
        touch(&temp.path().join("series/vol2/page.PNG"));
        touch(&temp.path().join("series/notes/readme.txt"));

        let source = FolderSource::default();
        let comics = source.discover(&[temp.path().to_path_buf()]).unwrap();

        assert_eq!(
            comics,
            vec![
                temp.path().join("series/vol1"),
                temp.path().join("series/vol2")
            ]
        );
    }

    #[test]
    fn test_discover_non_recursive() {
        let temp = TempDir::new().unwrap();
        touch(&temp.path().join("a/1.jpg"));
        touch(&temp.path().join("a/deep/1.jpg"));

        let source = FolderSource::new(vec!["jpg".into()], false);
        let comics = source.discover(&[temp.path().to_path_buf()]).unwrap();
        assert_eq!(comics, vec![temp.path().join("a")]);
    }

    #[test]
    fn test_list_images_natural_order() {
        let temp = TempDir::new().unwrap();
        for name in ["page10.jpg", "page2.jpg", "page1.jpg", "cover.txt"] {
            touch(&temp.path().join(name));
        }

        let source = FolderSource::default();
        let names = source.list_images(temp.path()).unwrap();
        assert_eq!(names, vec!["page1.jpg", "page2.jpg", "page10.jpg"]);
    }

    #[test]
    fn test_extensions_normalized() {
        let source = FolderSource::new(vec![".JPG".into()], true);
        assert!(source.is_image_name("a.jpg"));
        assert!(source.is_image_name("a.JpG"));
        assert!(!source.is_image_name("a.png"));
    }

    #[test]
    fn test_metadata_sums_image_sizes() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("1.jpg"), vec![0u8; 10]).unwrap();
        fs::write(temp.path().join("2.jpg"), vec![0u8; 5]).unwrap();
        fs::write(temp.path().join("x.txt"), vec![0u8; 100]).unwrap();

        let meta = FolderSource::default().metadata(temp.path()).unwrap();
        assert_eq!(meta.size, 15);
        assert!(meta.mtime_ms > 0);
    }

    #[test]
    fn test_image_dimensions_rejects_garbage() {
        let source = FolderSource::default();
        assert_eq!(source.image_dimensions(b"garbage"), None);

        let img = image::RgbImage::new(120, 80);
        let mut png = Cursor::new(Vec::new());
        img.write_to(&mut png, image::ImageFormat::Png).unwrap();
        assert_eq!(source.image_dimensions(png.get_ref()), Some((120, 80)));
    }
}
