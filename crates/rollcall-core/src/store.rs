//! Filesystem encoding store.
//!
//! One JSON-serialized encoding vector per registered person, stored as
//! `<dir>/<name>.json`, with the enrollment reference image beside it as
//! `<dir>/<name>.jpg`. No locking: the capture engine is the only writer.

use crate::types::{Encoding, RegisteredFace};
use image::GrayImage;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("invalid name: {0:?}")]
    InvalidName(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("corrupt encoding file {path}: {source}")]
    Corrupt {
        path: String,
        source: serde_json::Error,
    },
    #[error("encoding serialization failed: {0}")]
    Serialize(serde_json::Error),
    #[error("image encode failed: {0}")]
    Image(#[from] image::ImageError),
    #[error("frame dimensions {width}x{height} do not match buffer of {len} bytes")]
    BadFrame { width: u32, height: u32, len: usize },
}

/// Store of registered face encodings under a single directory.
pub struct EncodingStore {
    dir: PathBuf,
}

impl EncodingStore {
    /// Open the store, creating the directory if needed.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// Persist `encoding` under `name`, silently overwriting any existing
    /// entry. The name must be usable as a file stem.
    pub fn put(&self, name: &str, encoding: &Encoding) -> Result<(), StoreError> {
        let name = validate_name(name)?;
        let path = self.encoding_path(name);
        let json = serde_json::to_vec(encoding).map_err(StoreError::Serialize)?;
        fs::write(&path, json)?;
        tracing::info!(name, path = %path.display(), "stored face encoding");
        Ok(())
    }

    /// Enumerate all registered faces, sorted by name.
    ///
    /// Sorting gives a stable enumeration order: first-match tie-breaking in
    /// recognition is reproducible across runs.
    pub fn get_all(&self) -> Result<Vec<RegisteredFace>, StoreError> {
        let mut faces = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let bytes = fs::read(&path)?;
            let encoding: Encoding =
                serde_json::from_slice(&bytes).map_err(|source| StoreError::Corrupt {
                    path: path.display().to_string(),
                    source,
                })?;
            faces.push(RegisteredFace {
                name: name.to_string(),
                encoding,
            });
        }
        faces.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(faces)
    }

    /// Names of all registered faces, sorted.
    pub fn names(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.get_all()?.into_iter().map(|f| f.name).collect())
    }

    /// Persist a grayscale frame as the reference image for `name`.
    pub fn put_reference_image(
        &self,
        name: &str,
        data: &[u8],
        width: u32,
        height: u32,
    ) -> Result<(), StoreError> {
        let name = validate_name(name)?;
        let img =
            GrayImage::from_raw(width, height, data.to_vec()).ok_or(StoreError::BadFrame {
                width,
                height,
                len: data.len(),
            })?;
        img.save(self.reference_image_path(name))?;
        Ok(())
    }

    /// Remove the reference image for `name`. Missing file is not an error:
    /// rejection cleanup must be idempotent.
    pub fn remove_reference_image(&self, name: &str) -> Result<(), StoreError> {
        let name = validate_name(name)?;
        match fs::remove_file(self.reference_image_path(name)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Path of the reference image for `name` (not guaranteed to exist).
    pub fn reference_image_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.jpg"))
    }

    fn encoding_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.json"))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

/// Reject names that are empty, would escape the store directory, or
/// would break the comma-separated attendance record layout.
fn validate_name(name: &str) -> Result<&str, StoreError> {
    let trimmed = name.trim();
    if trimmed.is_empty()
        || trimmed == ".."
        || trimmed.contains('/')
        || trimmed.contains('\\')
        || trimmed.contains('\0')
        || trimmed.contains(',')
    {
        return Err(StoreError::InvalidName(name.to_string()));
    }
    Ok(trimmed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn enc(values: Vec<f32>) -> Encoding {
        Encoding {
            values,
            model_version: Some("test".into()),
        }
    }

    #[test]
    fn test_put_then_get_all() {
        let tmp = TempDir::new().unwrap();
        let store = EncodingStore::open(tmp.path()).unwrap();
        store.put("alice", &enc(vec![0.1, 0.2])).unwrap();

        let faces = store.get_all().unwrap();
        assert_eq!(faces.len(), 1);
        assert_eq!(faces[0].name, "alice");
        assert_eq!(faces[0].encoding.values, vec![0.1, 0.2]);
    }

    #[test]
    fn test_put_overwrites_silently() {
        let tmp = TempDir::new().unwrap();
        let store = EncodingStore::open(tmp.path()).unwrap();
        store.put("bob", &enc(vec![1.0])).unwrap();
        store.put("bob", &enc(vec![2.0])).unwrap();

        let faces = store.get_all().unwrap();
        assert_eq!(faces.len(), 1);
        assert_eq!(faces[0].encoding.values, vec![2.0]);
    }

    #[test]
    fn test_get_all_sorted_by_name() {
        let tmp = TempDir::new().unwrap();
        let store = EncodingStore::open(tmp.path()).unwrap();
        store.put("carol", &enc(vec![3.0])).unwrap();
        store.put("alice", &enc(vec![1.0])).unwrap();
        store.put("bob", &enc(vec![2.0])).unwrap();

        let names = store.names().unwrap();
        assert_eq!(names, vec!["alice", "bob", "carol"]);
    }

    #[test]
    fn test_get_all_ignores_non_encoding_files() {
        let tmp = TempDir::new().unwrap();
        let store = EncodingStore::open(tmp.path()).unwrap();
        store.put("alice", &enc(vec![1.0])).unwrap();
        fs::write(tmp.path().join("alice.jpg"), b"not json").unwrap();
        fs::write(tmp.path().join("notes.txt"), b"hello").unwrap();

        let faces = store.get_all().unwrap();
        assert_eq!(faces.len(), 1);
    }

    #[test]
    fn test_invalid_names_rejected() {
        let tmp = TempDir::new().unwrap();
        let store = EncodingStore::open(tmp.path()).unwrap();
        for bad in ["", "   ", "..", "a/b", "a\\b", "a,b"] {
            assert!(
                matches!(store.put(bad, &enc(vec![1.0])), Err(StoreError::InvalidName(_))),
                "expected rejection for {bad:?}"
            );
        }
    }

    #[test]
    fn test_name_trimmed_before_use() {
        let tmp = TempDir::new().unwrap();
        let store = EncodingStore::open(tmp.path()).unwrap();
        store.put("  dave  ", &enc(vec![1.0])).unwrap();
        assert_eq!(store.names().unwrap(), vec!["dave"]);
    }

    #[test]
    fn test_reference_image_roundtrip_and_remove() {
        let tmp = TempDir::new().unwrap();
        let store = EncodingStore::open(tmp.path()).unwrap();
        let data = vec![128u8; 16 * 8];
        store.put_reference_image("alice", &data, 16, 8).unwrap();
        assert!(store.reference_image_path("alice").exists());

        store.remove_reference_image("alice").unwrap();
        assert!(!store.reference_image_path("alice").exists());
        // Removing again is fine
        store.remove_reference_image("alice").unwrap();
    }

    #[test]
    fn test_reference_image_bad_dimensions() {
        let tmp = TempDir::new().unwrap();
        let store = EncodingStore::open(tmp.path()).unwrap();
        let data = vec![0u8; 10];
        assert!(matches!(
            store.put_reference_image("alice", &data, 16, 8),
            Err(StoreError::BadFrame { .. })
        ));
    }

    #[test]
    fn test_empty_store_enumerates_empty() {
        let tmp = TempDir::new().unwrap();
        let store = EncodingStore::open(tmp.path()).unwrap();
        assert!(store.get_all().unwrap().is_empty());
    }
}
