//! treesync FS - Filesystem observation primitives
//!
//! Provides:
//! - [`hasher`] - streaming SHA-1 / SHA-512 content digests
//! - [`attributes`] - per-file metadata in extended attributes or a sidecar index
//! - [`symlink`] - symlink detection, materialization and reporting
//! - [`scanner`] - deterministic, lazily evaluated directory scans
//! - [`coordinator`] - per-path write serialization and the in-flight write registry
//! - [`artifact`] - sealing encrypted artifacts under the same hashing rules
//!
//! Everything here is synchronous. The watcher runs it on blocking worker
//! threads.

pub mod artifact;
pub mod attributes;
pub mod coordinator;
pub mod hasher;
pub mod paths;
pub mod scanner;
pub mod symlink;

use std::path::{Path, PathBuf};

use thiserror::Error;
use treesync_core::domain::DomainError;

pub use artifact::{ArtifactSealer, SealedArtifact};
pub use attributes::{open_attribute_store, AttributeStore, AutoStore, SidecarStore, XattrStore};
pub use coordinator::{PathGuard, WriteCoordinator, WriteGuard, WriteScope};
pub use hasher::{ContentHasher, DigestSource};
pub use scanner::{is_descendant, DirectoryScanner, Scan, ScanItem, ScanReport};
pub use symlink::{detect_link, LinkStatus, NormalizeOutcome, NormalizeReport, SymlinkNormalizer};

/// Result type for filesystem operations
pub type Result<T> = std::result::Result<T, FsError>;

/// Errors that can occur in the observation layer
#[derive(Debug, Error)]
pub enum FsError {
    /// A filesystem-level failure; retrying may succeed
    #[error("I/O error{}: {source}", at(.path))]
    Io {
        path: Option<PathBuf>,
        #[source]
        source: std::io::Error,
    },

    /// The filesystem lacks the capability, e.g. extended attributes
    #[error("{operation} not supported at {}", .path.display())]
    UnsupportedOperation {
        path: PathBuf,
        operation: &'static str,
    },

    /// A digest algorithm outside the supported set was requested
    #[error("Unsupported hash algorithm: {0}")]
    UnsupportedAlgorithm(String),

    /// The specified path does not exist
    #[error("Path not found: {}", .0.display())]
    NotFound(PathBuf),

    /// A symlink whose target does not resolve
    #[error("Broken symlink {} -> {}", .link.display(), .target.display())]
    BrokenSymlink { link: PathBuf, target: PathBuf },

    /// A stored value failed domain validation
    #[error("Domain error: {0}")]
    Domain(DomainError),
}

fn at(path: &Option<PathBuf>) -> String {
    path.as_ref()
        .map(|p| format!(" at {}", p.display()))
        .unwrap_or_default()
}

impl FsError {
    /// Wraps an I/O error with the path it occurred on
    ///
    /// `NotFound` errors become [`FsError::NotFound`] so callers can tell
    /// a vanished path from a failing one.
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        let path = path.as_ref().to_path_buf();
        if source.kind() == std::io::ErrorKind::NotFound {
            FsError::NotFound(path)
        } else {
            FsError::Io {
                path: Some(path),
                source,
            }
        }
    }

    pub fn unsupported(path: impl AsRef<Path>, operation: &'static str) -> Self {
        FsError::UnsupportedOperation {
            path: path.as_ref().to_path_buf(),
            operation,
        }
    }

    /// Transient failures the caller may retry
    pub fn is_retryable(&self) -> bool {
        matches!(self, FsError::Io { .. })
    }

    pub fn is_unsupported(&self) -> bool {
        matches!(self, FsError::UnsupportedOperation { .. })
    }

    pub fn is_permission_denied(&self) -> bool {
        matches!(
            self,
            FsError::Io { source, .. } if source.kind() == std::io::ErrorKind::PermissionDenied
        )
    }
}

impl From<std::io::Error> for FsError {
    fn from(source: std::io::Error) -> Self {
        FsError::Io { path: None, source }
    }
}

impl From<DomainError> for FsError {
    fn from(err: DomainError) -> Self {
        match err {
            DomainError::UnsupportedAlgorithm(name) => FsError::UnsupportedAlgorithm(name),
            other => FsError::Domain(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Error, ErrorKind};

    use super::*;

    #[test]
    fn test_io_not_found_becomes_not_found() {
        let err = FsError::io("/missing", Error::from(ErrorKind::NotFound));
        assert!(matches!(err, FsError::NotFound(p) if p == Path::new("/missing")));
    }

    #[test]
    fn test_only_io_is_retryable() {
        let io = FsError::io("/a", Error::from(ErrorKind::Interrupted));
        assert!(io.is_retryable());
        assert!(!FsError::unsupported("/a", "setxattr").is_retryable());
        assert!(!FsError::UnsupportedAlgorithm("md5".into()).is_retryable());
    }

    #[test]
    fn test_display_includes_path() {
        let err = FsError::io("/data/a.txt", Error::from(ErrorKind::PermissionDenied));
        assert!(err.to_string().contains("/data/a.txt"));
        assert!(err.is_permission_denied());

        let err = FsError::unsupported("/mnt/fat", "setxattr");
        assert_eq!(err.to_string(), "setxattr not supported at /mnt/fat");
    }

    #[test]
    fn test_domain_unsupported_algorithm_maps_through() {
        let err: FsError = DomainError::UnsupportedAlgorithm("md5".into()).into();
        assert!(matches!(err, FsError::UnsupportedAlgorithm(name) if name == "md5"));
    }
}
