//! Per-file attribute storage
//!
//! Values are opaque bytes keyed by (path, name). Two backends implement
//! [`AttributeStore`]:
//!
//! - [`XattrStore`] - native extended attributes under a namespace prefix,
//!   so values travel with the file where the filesystem supports it
//! - [`SidecarStore`] - one JSON document per file in an index directory,
//!   for filesystems without extended attributes
//!
//! [`AutoStore`] prefers the native backend and falls back to the sidecar
//! per path when the filesystem reports `UnsupportedOperation`.
//!
//! A missing attribute is `Ok(None)`: callers must treat it as unknown, never
//! as zero. Errors always reach the immediate caller.

mod sidecar;
mod xattr;

use std::path::Path;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use tracing::{debug, instrument};
use treesync_core::config::{AttributeBackend, AttributesConfig};
use treesync_core::domain::attributes::{
    decode_digest, decode_generation, encode_digest, encode_generation,
};
use treesync_core::domain::{AttributeRecord, ContentDigest, ATTR_CONTENT_DIGEST, ATTR_SYNC_GENERATION};

pub use sidecar::SidecarStore;
pub use xattr::XattrStore;

use crate::coordinator::{PathGuard, WriteCoordinator, WriteGuard};
use crate::Result;

// ============================================================================
// AttributeStore trait
// ============================================================================

/// Named metadata attached to file paths, independent of file content
pub trait AttributeStore: Send + Sync {
    /// Short backend identifier for logs and CLI output
    fn backend_name(&self) -> &'static str;

    /// Stores `value` under `name` for `path`, replacing any previous value
    ///
    /// # Errors
    /// - [`FsError::UnsupportedOperation`](crate::FsError::UnsupportedOperation)
    ///   if the filesystem cannot hold attributes
    /// - [`FsError::NotFound`](crate::FsError::NotFound) if `path` does not exist
    /// - [`FsError::Io`](crate::FsError::Io) on write failure
    fn set_attribute(&self, path: &Path, name: &str, value: &[u8]) -> Result<()>;

    /// Reads one attribute; `Ok(None)` when it was never set
    fn get_attribute(&self, path: &Path, name: &str) -> Result<Option<Vec<u8>>>;

    /// Reads every attribute of `path` in this store's namespace
    fn get_all_attributes(&self, path: &Path) -> Result<AttributeRecord>;

    /// Removes one attribute; returns whether it existed
    fn remove_attribute(&self, path: &Path, name: &str) -> Result<bool>;

    /// Cheap check for whether `path` carries any attribute at all
    fn has_extended_attributes(&self, path: &Path) -> Result<bool>;

    /// Removes every attribute of `path` in this store's namespace
    fn clear_attributes(&self, path: &Path) -> Result<()> {
        for name in self.get_all_attributes(path)?.keys() {
            self.remove_attribute(path, name)?;
        }
        Ok(())
    }
}

// ============================================================================
// Coordination helpers shared by the backends
// ============================================================================

/// Optional link between a store and the shared [`WriteCoordinator`]
#[derive(Debug, Clone, Default)]
pub(crate) struct Coordination(Option<WriteCoordinator>);

impl Coordination {
    pub(crate) fn new(coordinator: Option<WriteCoordinator>) -> Self {
        Self(coordinator)
    }

    pub(crate) fn read(&self, path: &Path) -> Option<PathGuard> {
        self.0.as_ref().map(|c| c.lock_path(path))
    }

    pub(crate) fn write(&self, path: &Path) -> Option<WriteGuard> {
        self.0.as_ref().map(|c| c.begin_attribute_write(path))
    }
}

// ============================================================================
// AutoStore
// ============================================================================

/// Native extended attributes with a per-path fallback to the sidecar index
pub struct AutoStore {
    xattr: XattrStore,
    sidecar: SidecarStore,
    coordination: Coordination,
}

impl AutoStore {
    /// The inner backends run uncoordinated; this store takes the path lock
    /// once around each combined operation.
    #[must_use]
    pub fn new(
        xattr: XattrStore,
        sidecar: SidecarStore,
        coordinator: Option<WriteCoordinator>,
    ) -> Self {
        Self {
            xattr: xattr.without_coordinator(),
            sidecar: sidecar.without_coordinator(),
            coordination: Coordination::new(coordinator),
        }
    }
}

impl AttributeStore for AutoStore {
    fn backend_name(&self) -> &'static str {
        "auto"
    }

    #[instrument(skip(self, value), fields(path = %path.display(), len = value.len()))]
    fn set_attribute(&self, path: &Path, name: &str, value: &[u8]) -> Result<()> {
        let mut guard = self.coordination.write(path);
        match self.xattr.set_attribute(path, name, value) {
            Err(e) if e.is_unsupported() => {
                debug!("native attributes unsupported, using sidecar");
                if let Some(guard) = guard.as_mut() {
                    self.sidecar.register_touched(path, guard);
                }
                self.sidecar.set_attribute(path, name, value)
            }
            other => other,
        }
    }

    fn get_attribute(&self, path: &Path, name: &str) -> Result<Option<Vec<u8>>> {
        let _guard = self.coordination.read(path);
        match self.xattr.get_attribute(path, name) {
            Ok(Some(value)) => Ok(Some(value)),
            Ok(None) => self.sidecar.get_attribute(path, name),
            Err(e) if e.is_unsupported() || matches!(e, crate::FsError::NotFound(_)) => {
                self.sidecar.get_attribute(path, name)
            }
            Err(e) => Err(e),
        }
    }

    fn get_all_attributes(&self, path: &Path) -> Result<AttributeRecord> {
        let _guard = self.coordination.read(path);
        let mut record = self.sidecar.get_all_attributes(path)?;
        match self.xattr.get_all_attributes(path) {
            Ok(native) => record.extend(native),
            Err(e) if e.is_unsupported() || matches!(e, crate::FsError::NotFound(_)) => {}
            Err(e) => return Err(e),
        }
        Ok(record)
    }

    fn remove_attribute(&self, path: &Path, name: &str) -> Result<bool> {
        let mut guard = self.coordination.write(path);
        let native = match self.xattr.remove_attribute(path, name) {
            Ok(removed) => removed,
            Err(e) if e.is_unsupported() || matches!(e, crate::FsError::NotFound(_)) => false,
            Err(e) => return Err(e),
        };
        if let Some(guard) = guard.as_mut() {
            self.sidecar.register_touched(path, guard);
        }
        let sidecar = self.sidecar.remove_attribute(path, name)?;
        Ok(native || sidecar)
    }

    fn has_extended_attributes(&self, path: &Path) -> Result<bool> {
        let _guard = self.coordination.read(path);
        let native = match self.xattr.has_extended_attributes(path) {
            Ok(has) => has,
            Err(e) if e.is_unsupported() || matches!(e, crate::FsError::NotFound(_)) => false,
            Err(e) => return Err(e),
        };
        Ok(native || self.sidecar.has_extended_attributes(path)?)
    }
}

// ============================================================================
// Typed helpers for the reserved attributes
// ============================================================================

/// Last persisted content digest of `path`, if any
///
/// # Errors
/// Store errors, or [`FsError::Domain`](crate::FsError::Domain) if the stored
/// value is not a tagged digest
pub fn read_content_digest(store: &dyn AttributeStore, path: &Path) -> Result<Option<ContentDigest>> {
    match store.get_attribute(path, ATTR_CONTENT_DIGEST)? {
        Some(raw) => Ok(Some(decode_digest(&raw)?)),
        None => Ok(None),
    }
}

pub fn write_content_digest(store: &dyn AttributeStore, path: &Path, digest: &ContentDigest) -> Result<()> {
    store.set_attribute(path, ATTR_CONTENT_DIGEST, &encode_digest(digest))
}

/// Persisted sync generation of `path`; a missing value reads as `None`
pub fn read_generation(store: &dyn AttributeStore, path: &Path) -> Result<Option<u64>> {
    match store.get_attribute(path, ATTR_SYNC_GENERATION)? {
        Some(raw) => Ok(Some(decode_generation(&raw)?)),
        None => Ok(None),
    }
}

/// Increments the sync generation of `path` and returns the new value
///
/// An unreadable stored value restarts the count instead of failing, so a
/// corrupted attribute cannot block further classification.
pub fn bump_generation(store: &dyn AttributeStore, path: &Path) -> Result<u64> {
    let current = match read_generation(store, path) {
        Ok(value) => value.unwrap_or(0),
        Err(crate::FsError::Domain(e)) => {
            debug!(path = %path.display(), error = %e, "resetting unreadable generation");
            0
        }
        Err(e) => return Err(e),
    };
    let next = current.saturating_add(1);
    store.set_attribute(path, ATTR_SYNC_GENERATION, &encode_generation(next))?;
    Ok(next)
}

/// Re-associates every attribute of `from` with `to`
///
/// Attributes do not follow renames on their own; callers that move a file
/// through a backend keyed by path must call this explicitly. Returns the
/// number of attributes moved.
#[instrument(skip(store), fields(from = %from.display(), to = %to.display()))]
pub fn move_attributes(store: &dyn AttributeStore, from: &Path, to: &Path) -> Result<usize> {
    let record = store.get_all_attributes(from)?;
    for (name, value) in &record {
        store.set_attribute(to, name, value)?;
    }
    store.clear_attributes(from)?;
    Ok(record.len())
}

/// Renders a record as a JSON object with base64-encoded values
#[must_use]
pub fn record_to_json(record: &AttributeRecord) -> serde_json::Value {
    let map = record
        .iter()
        .map(|(name, value)| (name.clone(), serde_json::Value::String(BASE64.encode(value))))
        .collect();
    serde_json::Value::Object(map)
}

/// Builds the store selected by `config`
pub fn open_attribute_store(
    config: &AttributesConfig,
    coordinator: Option<WriteCoordinator>,
) -> Arc<dyn AttributeStore> {
    let xattr = || XattrStore::new(config.namespace.clone(), coordinator.clone());
    let sidecar = || SidecarStore::new(config.sidecar_dir.clone(), coordinator.clone());
    match config.backend {
        AttributeBackend::Xattr => Arc::new(xattr()),
        AttributeBackend::Sidecar => Arc::new(sidecar()),
        AttributeBackend::Auto => Arc::new(AutoStore::new(xattr(), sidecar(), coordinator.clone())),
    }
}
