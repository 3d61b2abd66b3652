//! Durable JSON files
//!
//! Both caches are rewritten in place while a scan is running, so writes go
//! to a sibling temporary file first and are moved over the target with a
//! rename. A crash mid-write leaves the previous version intact.

use crate::core::error::{Result, ScanError};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::{self, File};
use std::io::{BufReader, Write};
use std::path::{Path, PathBuf};

/// Temporary path used while `path` is being rewritten
fn temp_path_for(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Serialize `value` as pretty JSON and atomically replace `path` with it
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let json = serde_json::to_vec_pretty(value)?;
    let temp_path = temp_path_for(path);

    {
        let mut file = File::create(&temp_path)?;
        file.write_all(&json)?;
        file.sync_all()?;
    }

    fs::rename(&temp_path, path).map_err(|e| {
        let _ = fs::remove_file(&temp_path);
        ScanError::IoError(format!("Failed to replace {}: {}", path.display(), e))
    })
}

/// Read and deserialize a JSON file
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let file = File::open(path)?;
    let value = serde_json::from_reader(BufReader::new(file))?;
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use tempfile::TempDir;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Sample {
        name: String,
        values: Vec<u32>,
    }

    #[test]
    fn test_write_then_read() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("sub/dir/state.json");
        let sample = Sample {
            name: "a".into(),
            values: vec![1, 2, 3],
        };

        write_json_atomic(&path, &sample).unwrap();
        let back: Sample = read_json(&path).unwrap();
        assert_eq!(back, sample);
        assert!(!temp_path_for(&path).exists());
    }

    #[test]
    fn test_overwrite_replaces_content() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("state.json");

        for i in 0..3 {
            let sample = Sample {
                name: format!("v{}", i),
                values: vec![i],
            };
            write_json_atomic(&path, &sample).unwrap();
        }

        let back: Sample = read_json(&path).unwrap();
        assert_eq!(back.name, "v2");
    }

    #[test]
    fn test_read_corrupt_is_cache_error() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("bad.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(matches!(
            read_json::<Sample>(&path),
            Err(ScanError::CacheError(_))
        ));
    }

    #[test]
    fn test_temp_path_is_sibling() {
        let path = Path::new("/tmp/cache/match_index.json");
        assert_eq!(
            temp_path_for(path),
            PathBuf::from("/tmp/cache/match_index.json.tmp")
        );
    }
}
