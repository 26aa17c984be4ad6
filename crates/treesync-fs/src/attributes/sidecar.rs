//! Sidecar index backend
//!
//! Each file with attributes owns one JSON document in the index directory,
//! named by the SHA-1 of its stable absolute path:
//!
//! ```json
//! { "path": "/data/a.txt", "attributes": { "content-digest": "c2hhMTo..." } }
//! ```
//!
//! Values are base64-encoded. Documents are replaced atomically (temp file +
//! rename) and deleted once they hold no attributes. A document outlives its
//! file, so the last known digest of a deleted path stays readable.

use std::collections::BTreeMap;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use tracing::{instrument, warn};
use treesync_core::domain::{AttributeRecord, DomainError};

use super::{AttributeStore, Coordination};
use crate::coordinator::{WriteCoordinator, WriteGuard};
use crate::paths::{open_for_writing, stable_key, temp_sibling};
use crate::{FsError, Result};

#[derive(Debug, Serialize, Deserialize)]
struct SidecarDocument {
    path: PathBuf,
    #[serde(default)]
    attributes: BTreeMap<String, String>,
}

/// Attribute store keeping one JSON document per file in `dir`
#[derive(Debug, Clone)]
pub struct SidecarStore {
    dir: PathBuf,
    coordination: Coordination,
}

impl SidecarStore {
    #[must_use]
    pub fn new(dir: PathBuf, coordinator: Option<WriteCoordinator>) -> Self {
        Self {
            dir,
            coordination: Coordination::new(coordinator),
        }
    }

    pub(crate) fn without_coordinator(self) -> Self {
        Self {
            coordination: Coordination::default(),
            ..self
        }
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Location of the document for `path`
    #[must_use]
    pub fn document_path(&self, path: &Path) -> PathBuf {
        let key = stable_key(path);
        let digest = Sha1::digest(key.as_os_str().to_string_lossy().as_bytes());
        self.dir.join(format!("{}.json", hex::encode(digest)))
    }

    /// Marks this store's files for `path` as self-written under `guard`
    pub(crate) fn register_touched(&self, path: &Path, guard: &mut WriteGuard) {
        let document = self.document_path(path);
        guard.also_touches(&temp_sibling(&document));
        guard.also_touches(&document);
    }

    fn load(&self, document: &Path) -> Result<AttributeRecord> {
        let raw = match fs::read(document) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(AttributeRecord::new()),
            Err(e) => return Err(FsError::io(document, e)),
        };
        let parsed: SidecarDocument = serde_json::from_slice(&raw).map_err(|e| {
            DomainError::ValidationFailed(format!("corrupt sidecar {}: {e}", document.display()))
        })?;
        let mut record = AttributeRecord::new();
        for (name, encoded) in parsed.attributes {
            match BASE64.decode(encoded.as_bytes()) {
                Ok(value) => {
                    record.insert(name, value);
                }
                Err(e) => {
                    warn!(document = %document.display(), name, error = %e, "skipping undecodable sidecar value");
                }
            }
        }
        Ok(record)
    }

    fn store(&self, path: &Path, document: &Path, record: &AttributeRecord) -> Result<()> {
        if record.is_empty() {
            return match fs::remove_file(document) {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
                Err(e) => Err(FsError::io(document, e)),
            };
        }

        let body = SidecarDocument {
            path: stable_key(path),
            attributes: record
                .iter()
                .map(|(name, value)| (name.clone(), BASE64.encode(value)))
                .collect(),
        };
        let json = serde_json::to_vec_pretty(&body)
            .map_err(|e| FsError::io(document, std::io::Error::new(ErrorKind::InvalidData, e)))?;

        let tmp = temp_sibling(document);
        let mut file = open_for_writing(&tmp)?;
        file.write_all(&json).map_err(|e| FsError::io(&tmp, e))?;
        file.sync_all().map_err(|e| FsError::io(&tmp, e))?;
        drop(file);
        fs::rename(&tmp, document).map_err(|e| FsError::io(document, e))
    }

    fn guarded_write(&self, path: &Path) -> Option<WriteGuard> {
        let mut guard = self.coordination.write(path);
        if let Some(guard) = guard.as_mut() {
            self.register_touched(path, guard);
        }
        guard
    }
}

impl AttributeStore for SidecarStore {
    fn backend_name(&self) -> &'static str {
        "sidecar"
    }

    #[instrument(skip(self, value), fields(path = %path.display(), len = value.len()))]
    fn set_attribute(&self, path: &Path, name: &str, value: &[u8]) -> Result<()> {
        if name.is_empty() {
            return Err(DomainError::ValidationFailed("attribute name is empty".into()).into());
        }
        if let Err(e) = fs::symlink_metadata(path) {
            return Err(FsError::io(path, e));
        }
        let _guard = self.guarded_write(path);
        let document = self.document_path(path);
        let mut record = self.load(&document)?;
        record.insert(name.to_string(), value.to_vec());
        self.store(path, &document, &record)
    }

    fn get_attribute(&self, path: &Path, name: &str) -> Result<Option<Vec<u8>>> {
        let _guard = self.coordination.read(path);
        let mut record = self.load(&self.document_path(path))?;
        Ok(record.remove(name))
    }

    fn get_all_attributes(&self, path: &Path) -> Result<AttributeRecord> {
        let _guard = self.coordination.read(path);
        self.load(&self.document_path(path))
    }

    fn remove_attribute(&self, path: &Path, name: &str) -> Result<bool> {
        let _guard = self.guarded_write(path);
        let document = self.document_path(path);
        let mut record = self.load(&document)?;
        if record.remove(name).is_none() {
            return Ok(false);
        }
        self.store(path, &document, &record)?;
        Ok(true)
    }

    fn has_extended_attributes(&self, path: &Path) -> Result<bool> {
        let _guard = self.coordination.read(path);
        let document = self.document_path(path);
        match fs::metadata(&document) {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(FsError::io(&document, e)),
        }
    }

    fn clear_attributes(&self, path: &Path) -> Result<()> {
        let _guard = self.guarded_write(path);
        let document = self.document_path(path);
        self.store(path, &document, &AttributeRecord::new())
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    fn setup() -> (TempDir, SidecarStore, PathBuf) {
        let dir = TempDir::new().unwrap();
        let store = SidecarStore::new(dir.path().join("index"), Some(WriteCoordinator::default()));
        let file = dir.path().join("a.txt");
        fs::write(&file, b"hello").unwrap();
        (dir, store, file)
    }

    #[test]
    fn test_set_get_round_trip() {
        let (_dir, store, file) = setup();
        let value: Vec<u8> = (0..=255u8).rev().collect();

        store.set_attribute(&file, "blob", &value).unwrap();
        assert_eq!(store.get_attribute(&file, "blob").unwrap(), Some(value));
        assert_eq!(store.get_attribute(&file, "other").unwrap(), None);
    }

    #[test]
    fn test_has_extended_attributes_tracks_document() {
        let (_dir, store, file) = setup();
        assert!(!store.has_extended_attributes(&file).unwrap());

        store.set_attribute(&file, "k", b"v").unwrap();
        assert!(store.has_extended_attributes(&file).unwrap());
        assert!(store.document_path(&file).exists());

        assert!(store.remove_attribute(&file, "k").unwrap());
        assert!(!store.has_extended_attributes(&file).unwrap());
        assert!(!store.document_path(&file).exists());
    }

    #[test]
    fn test_set_on_missing_file_is_not_found() {
        let (dir, store, _file) = setup();
        let err = store
            .set_attribute(&dir.path().join("missing"), "k", b"v")
            .unwrap_err();
        assert!(matches!(err, FsError::NotFound(_)));
    }

    #[test]
    fn test_record_survives_file_removal() {
        let (_dir, store, file) = setup();
        store.set_attribute(&file, "k", b"v").unwrap();
        fs::remove_file(&file).unwrap();

        assert_eq!(store.get_attribute(&file, "k").unwrap(), Some(b"v".to_vec()));
        store.clear_attributes(&file).unwrap();
        assert!(store.get_all_attributes(&file).unwrap().is_empty());
    }

    #[test]
    fn test_document_is_base64_json() {
        let (_dir, store, file) = setup();
        store.set_attribute(&file, "k", b"hello").unwrap();

        let raw = fs::read_to_string(store.document_path(&file)).unwrap();
        let doc: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(doc["attributes"]["k"], "aGVsbG8=");
        assert!(doc["path"].as_str().unwrap().ends_with("a.txt"));
    }

    #[test]
    fn test_corrupt_document_is_error() {
        let (_dir, store, file) = setup();
        store.set_attribute(&file, "k", b"v").unwrap();
        fs::write(store.document_path(&file), b"{ not json").unwrap();

        let err = store.get_attribute(&file, "k").unwrap_err();
        assert!(matches!(err, FsError::Domain(_)));
    }

    #[test]
    fn test_writes_are_registered_as_self_generated() {
        let dir = TempDir::new().unwrap();
        let coordinator = WriteCoordinator::default();
        let store = SidecarStore::new(dir.path().join("index"), Some(coordinator.clone()));
        let file = dir.path().join("a.txt");
        fs::write(&file, b"hello").unwrap();

        store.set_attribute(&file, "k", b"v").unwrap();
        // The file itself only explains metadata events; its document is
        // written outright.
        assert!(coordinator.is_self_metadata(&file));
        assert!(!coordinator.is_self_generated(&file));
        assert!(coordinator.is_self_generated(&store.document_path(&file)));
    }
}
