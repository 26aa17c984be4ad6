//! Normalized filesystem entries
//!
//! A [`FileEntry`] is a snapshot of one path taken during a scan. It is never
//! updated in place: a rescan of a changed file produces a new value.

use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::digest::ContentDigest;

// ============================================================================
// PathKind
// ============================================================================

/// What a path currently refers to, without following a final symlink
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PathKind {
    /// Nothing exists at the path
    Missing,
    File,
    Directory,
    Symlink,
    /// Sockets, FIFOs, device nodes
    Other,
}

impl PathKind {
    #[must_use]
    pub fn exists(self) -> bool {
        !matches!(self, PathKind::Missing)
    }
}

// ============================================================================
// FileEntry
// ============================================================================

/// One entry produced by a directory scan
///
/// A symlink entry never carries a digest of its target's content. Only a
/// link that has been materialized into a real file (at which point it is
/// no longer a symlink) is hashed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    path: PathBuf,
    is_directory: bool,
    is_symlink: bool,
    symlink_target: Option<PathBuf>,
    /// Milliseconds since the Unix epoch
    modified_ms: i64,
    size_bytes: u64,
    digest: Option<ContentDigest>,
}

impl FileEntry {
    /// Entry for a regular file
    #[must_use]
    pub fn file(path: PathBuf, size_bytes: u64, modified_ms: i64) -> Self {
        Self {
            path,
            is_directory: false,
            is_symlink: false,
            symlink_target: None,
            modified_ms,
            size_bytes,
            digest: None,
        }
    }

    /// Entry for a directory
    #[must_use]
    pub fn directory(path: PathBuf, modified_ms: i64) -> Self {
        Self {
            path,
            is_directory: true,
            is_symlink: false,
            symlink_target: None,
            modified_ms,
            size_bytes: 0,
            digest: None,
        }
    }

    /// Entry for a symbolic link left in place, recording where it points
    #[must_use]
    pub fn symlink(path: PathBuf, target: PathBuf, modified_ms: i64) -> Self {
        Self {
            path,
            is_directory: false,
            is_symlink: true,
            symlink_target: Some(target),
            modified_ms,
            size_bytes: 0,
            digest: None,
        }
    }

    /// Attaches a content digest
    ///
    /// Directories and symlinks have no content of their own; for them the
    /// digest is dropped and the entry is returned unchanged.
    #[must_use]
    pub fn with_digest(mut self, digest: ContentDigest) -> Self {
        if !self.is_directory && !self.is_symlink {
            self.digest = Some(digest);
        }
        self
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The path as an ordered sequence of segments
    pub fn segments(&self) -> impl Iterator<Item = &std::ffi::OsStr> {
        self.path.components().filter_map(|c| match c {
            Component::Normal(s) => Some(s),
            _ => None,
        })
    }

    #[must_use]
    pub fn is_directory(&self) -> bool {
        self.is_directory
    }

    #[must_use]
    pub fn is_symlink(&self) -> bool {
        self.is_symlink
    }

    #[must_use]
    pub fn symlink_target(&self) -> Option<&Path> {
        self.symlink_target.as_deref()
    }

    #[must_use]
    pub fn modified_ms(&self) -> i64 {
        self.modified_ms
    }

    #[must_use]
    pub fn size_bytes(&self) -> u64 {
        self.size_bytes
    }

    #[must_use]
    pub fn digest(&self) -> Option<&ContentDigest> {
        self.digest.as_ref()
    }

    /// True for regular files, the only entries that carry content
    #[must_use]
    pub fn is_regular_file(&self) -> bool {
        !self.is_directory && !self.is_symlink
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::digest::HashAlgorithm;

    fn digest() -> ContentDigest {
        ContentDigest::new(HashAlgorithm::Sha1, vec![1u8; 20]).unwrap()
    }

    #[test]
    fn test_file_entry_accepts_digest() {
        let entry = FileEntry::file(PathBuf::from("/root/a.txt"), 5, 1_700_000_000_000)
            .with_digest(digest());
        assert!(entry.is_regular_file());
        assert_eq!(entry.digest(), Some(&digest()));
        assert_eq!(entry.size_bytes(), 5);
    }

    #[test]
    fn test_symlink_entry_never_carries_digest() {
        let entry = FileEntry::symlink(
            PathBuf::from("/root/b"),
            PathBuf::from("/root/a.txt"),
            0,
        )
        .with_digest(digest());
        assert!(entry.is_symlink());
        assert!(entry.digest().is_none());
        assert_eq!(entry.symlink_target(), Some(Path::new("/root/a.txt")));
    }

    #[test]
    fn test_directory_entry_never_carries_digest() {
        let entry = FileEntry::directory(PathBuf::from("/root/dir"), 0).with_digest(digest());
        assert!(entry.is_directory());
        assert!(entry.digest().is_none());
    }

    #[test]
    fn test_segments() {
        let entry = FileEntry::file(PathBuf::from("/root/docs/a.txt"), 0, 0);
        let segments: Vec<_> = entry.segments().collect();
        assert_eq!(segments, vec!["root", "docs", "a.txt"]);
    }

    #[test]
    fn test_path_kind_exists() {
        assert!(!PathKind::Missing.exists());
        assert!(PathKind::Symlink.exists());
        assert!(PathKind::Directory.exists());
    }
}
