//! Deterministic directory scans
//!
//! [`DirectoryScanner::scan`] returns a lazy [`Scan`] iterator. Each call
//! walks the filesystem again; nothing is cached between scans. Entries come
//! out in path order (component-wise lexicographic), so two scans of an
//! unchanged tree produce identical sequences.
//!
//! Failures stay local: an unreadable directory yields a warning and its
//! subtree is skipped, a broken symlink yields a warning, a path that
//! vanishes mid-scan is skipped. The scan itself never aborts.

use std::collections::VecDeque;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, instrument, trace};
use treesync_core::config::Config;
use treesync_core::domain::{ContentDigest, FileEntry, HashAlgorithm, ScanWarning, ScanWarningKind};

use crate::attributes::{read_content_digest, AttributeStore};
use crate::coordinator::WriteCoordinator;
use crate::hasher::ContentHasher;
use crate::paths::{entry_from_metadata, resolve_lenient};
use crate::symlink::SymlinkNormalizer;
use crate::{FsError, Result};

/// One element of a scan
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanItem {
    Entry(FileEntry),
    Warning(ScanWarning),
}

/// A fully collected scan
#[derive(Debug, Default, Clone)]
pub struct ScanReport {
    pub entries: Vec<FileEntry>,
    pub warnings: Vec<ScanWarning>,
}

impl ScanReport {
    /// Entries that carry a content digest
    pub fn content_entries(&self) -> impl Iterator<Item = &FileEntry> {
        self.entries.iter().filter(|e| e.digest().is_some())
    }
}

/// What processing a single path produced
#[derive(Default)]
struct Processed {
    entry: Option<FileEntry>,
    warning: Option<ScanWarning>,
    /// Directory to list next, for recursive scans
    descend: Option<PathBuf>,
}

// ============================================================================
// DirectoryScanner
// ============================================================================

/// Walks trees, normalizing symlinks and fingerprinting regular files
pub struct DirectoryScanner {
    normalizer: SymlinkNormalizer,
    hasher: ContentHasher,
    fingerprint: Option<HashAlgorithm>,
    attributes: Option<Arc<dyn AttributeStore>>,
}

impl DirectoryScanner {
    /// Scanner fingerprinting with SHA-1
    #[must_use]
    pub fn new(normalizer: SymlinkNormalizer) -> Self {
        Self {
            normalizer,
            hasher: ContentHasher::new(),
            fingerprint: Some(HashAlgorithm::Sha1),
            attributes: None,
        }
    }

    /// Scanner built from the `scan` section of `config`
    #[must_use]
    pub fn from_config(config: &Config, coordinator: Option<WriteCoordinator>) -> Self {
        let mut normalizer =
            SymlinkNormalizer::new(config.scan.symlink_policy, config.effective_trusted_roots());
        if let Some(coordinator) = coordinator {
            normalizer = normalizer.with_coordinator(coordinator);
        }
        Self::new(normalizer)
            .with_hasher(ContentHasher::with_chunk_size(config.scan.chunk_size_bytes()))
            .with_fingerprint(Some(config.scan.fingerprint_algorithm))
    }

    #[must_use]
    pub fn with_hasher(mut self, hasher: ContentHasher) -> Self {
        self.hasher = hasher;
        self
    }

    /// `None` disables hashing; entries then carry no digest
    #[must_use]
    pub fn with_fingerprint(mut self, algorithm: Option<HashAlgorithm>) -> Self {
        self.fingerprint = algorithm;
        self
    }

    #[must_use]
    pub fn with_attribute_store(mut self, store: Arc<dyn AttributeStore>) -> Self {
        self.attributes = Some(store);
        self
    }

    #[must_use]
    pub fn normalizer(&self) -> &SymlinkNormalizer {
        &self.normalizer
    }

    #[must_use]
    pub fn hasher(&self) -> &ContentHasher {
        &self.hasher
    }

    #[must_use]
    pub fn fingerprint(&self) -> Option<HashAlgorithm> {
        self.fingerprint
    }

    /// Starts a scan of `root`'s children (the root itself is not emitted)
    ///
    /// # Errors
    /// Returns [`FsError::NotFound`] if `root` does not exist and
    /// [`FsError::Io`] if it is not a directory or cannot be inspected.
    pub fn scan(&self, root: &Path, recursive: bool) -> Result<Scan<'_>> {
        let meta = fs::metadata(root).map_err(|e| FsError::io(root, e))?;
        if !meta.is_dir() {
            return Err(FsError::io(
                root,
                io::Error::new(io::ErrorKind::InvalidInput, "scan root is not a directory"),
            ));
        }
        debug!(root = %root.display(), recursive, "scan started");
        let mut scan = Scan {
            scanner: self,
            recursive,
            stack: Vec::new(),
            pending: VecDeque::new(),
        };
        scan.list(root);
        Ok(scan)
    }

    /// Re-scans a single path; `Ok(None)` if nothing exists there
    ///
    /// Symlinks go through the normalizer first. Warnings the path produces
    /// are logged and dropped.
    ///
    /// # Errors
    /// [`FsError::BrokenSymlink`] under the replace policy, or the hashing /
    /// normalization error that prevented an entry.
    #[instrument(skip(self), fields(path = %path.display()))]
    pub fn scan_entry(&self, path: &Path) -> Result<Option<FileEntry>> {
        let meta = match fs::symlink_metadata(path) {
            Ok(meta) => meta,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(FsError::io(path, e)),
        };
        let entry = if meta.file_type().is_symlink() {
            match self.normalizer.normalize(path) {
                Ok(outcome) => {
                    let (entry, warning) = outcome.into_parts();
                    if let Some(warning) = warning {
                        debug!(%warning, "rescan warning");
                    }
                    entry
                }
                Err(FsError::NotFound(_)) => return Ok(None),
                Err(e) => return Err(e),
            }
        } else {
            entry_from_metadata(path, &meta)
        };
        self.fingerprint_entry(entry).map(Some)
    }

    /// Last persisted digest of `path`, or `None` when unknown
    ///
    /// Probes for attributes before reading them. A filesystem without
    /// attribute support reads as unknown.
    pub fn last_known_digest(&self, path: &Path) -> Result<Option<ContentDigest>> {
        let Some(store) = self.attributes.as_deref() else {
            return Ok(None);
        };
        let lookup = store
            .has_extended_attributes(path)
            .and_then(|has| if has { read_content_digest(store, path) } else { Ok(None) });
        match lookup {
            Ok(digest) => Ok(digest),
            Err(e) if e.is_unsupported() || matches!(e, FsError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn fingerprint_entry(&self, entry: FileEntry) -> Result<FileEntry> {
        match self.fingerprint {
            Some(algorithm) if entry.is_regular_file() => {
                let digest = self.hasher.digest_file(algorithm, entry.path())?;
                Ok(entry.with_digest(digest))
            }
            _ => Ok(entry),
        }
    }

    fn process(&self, path: PathBuf, recursive: bool) -> Processed {
        let meta = match fs::symlink_metadata(&path) {
            Ok(meta) => meta,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                trace!(path = %path.display(), "vanished during scan");
                return Processed::default();
            }
            Err(e) => return Processed::warning(warning_for(&path, &e)),
        };

        if meta.file_type().is_symlink() {
            return match self.normalizer.normalize(&path) {
                Ok(outcome) => {
                    // A materialized copy is hashed like any regular file;
                    // a reported link has no digest.
                    let (entry, warning) = outcome.into_parts();
                    let mut processed = self.hashed(entry);
                    processed.warning = processed.warning.or(warning);
                    processed
                }
                Err(FsError::BrokenSymlink { link, target }) => Processed::warning(ScanWarning::new(
                    link,
                    ScanWarningKind::BrokenSymlink,
                    format!("target {} does not exist", target.display()),
                )),
                Err(FsError::NotFound(_)) => Processed::default(),
                Err(e) => Processed::warning(ScanWarning::new(path, ScanWarningKind::Io, e.to_string())),
            };
        }

        if meta.is_dir() {
            return Processed {
                entry: Some(entry_from_metadata(&path, &meta)),
                warning: None,
                descend: recursive.then_some(path),
            };
        }

        if meta.is_file() {
            return self.hashed(entry_from_metadata(&path, &meta));
        }

        trace!(path = %path.display(), "skipping special file");
        Processed::default()
    }

    /// Fingerprints `entry`, degrading to an undigested entry plus warning
    fn hashed(&self, entry: FileEntry) -> Processed {
        let path = entry.path().to_path_buf();
        match self.fingerprint_entry(entry.clone()) {
            Ok(entry) => Processed {
                entry: Some(entry),
                ..Processed::default()
            },
            Err(FsError::NotFound(_)) => Processed::default(),
            Err(e) => {
                let kind = if e.is_permission_denied() {
                    ScanWarningKind::AccessDenied
                } else {
                    ScanWarningKind::Io
                };
                Processed {
                    entry: Some(entry),
                    warning: Some(ScanWarning::new(path, kind, e.to_string())),
                    descend: None,
                }
            }
        }
    }
}

impl Processed {
    fn warning(warning: ScanWarning) -> Self {
        Self {
            warning: Some(warning),
            ..Self::default()
        }
    }
}

fn warning_for(path: &Path, err: &io::Error) -> ScanWarning {
    let kind = if err.kind() == io::ErrorKind::PermissionDenied {
        ScanWarningKind::AccessDenied
    } else {
        ScanWarningKind::Io
    };
    ScanWarning::new(path.to_path_buf(), kind, err.to_string())
}

// ============================================================================
// Scan iterator
// ============================================================================

/// Lazy, depth-first scan; see [`DirectoryScanner::scan`]
pub struct Scan<'a> {
    scanner: &'a DirectoryScanner,
    recursive: bool,
    /// Paths still to visit, next one on top
    stack: Vec<PathBuf>,
    pending: VecDeque<ScanItem>,
}

impl Scan<'_> {
    fn list(&mut self, dir: &Path) {
        let mut children = match fs::read_dir(dir) {
            Ok(iter) => {
                let mut children = Vec::new();
                for entry in iter {
                    match entry {
                        Ok(entry) => children.push(entry.path()),
                        Err(e) => self.pending.push_back(ScanItem::Warning(warning_for(dir, &e))),
                    }
                }
                children
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => return,
            Err(e) => {
                debug!(path = %dir.display(), error = %e, "skipping unreadable subtree");
                self.pending.push_back(ScanItem::Warning(warning_for(dir, &e)));
                return;
            }
        };
        children.sort_unstable_by(|a, b| b.cmp(a));
        self.stack.extend(children);
    }

    /// Drains the scan into entries and warnings
    #[must_use]
    pub fn into_report(self) -> ScanReport {
        let mut report = ScanReport::default();
        for item in self {
            match item {
                ScanItem::Entry(entry) => report.entries.push(entry),
                ScanItem::Warning(warning) => report.warnings.push(warning),
            }
        }
        report
    }
}

impl Iterator for Scan<'_> {
    type Item = ScanItem;

    fn next(&mut self) -> Option<ScanItem> {
        loop {
            if let Some(item) = self.pending.pop_front() {
                return Some(item);
            }
            let path = self.stack.pop()?;
            let processed = self.scanner.process(path, self.recursive);
            if let Some(entry) = processed.entry {
                self.pending.push_back(ScanItem::Entry(entry));
            }
            if let Some(warning) = processed.warning {
                self.pending.push_back(ScanItem::Warning(warning));
            }
            if let Some(dir) = processed.descend {
                self.list(&dir);
            }
        }
    }
}

// ============================================================================
// Containment check
// ============================================================================

/// Whether `path` resolves inside `candidate_root`
///
/// Both sides are canonicalized: `..` segments and symlinks are resolved
/// before comparing, so `/root/../etc/passwd` is not under `/root` and
/// neither is a link inside `/root` pointing elsewhere. Relative paths are
/// taken relative to the root. Components past the last existing directory
/// are applied lexically. The root counts as its own descendant. Any
/// resolution failure answers `false`.
#[must_use]
pub fn is_descendant(candidate_root: &Path, path: &Path) -> bool {
    let Ok(root) = fs::canonicalize(candidate_root) else {
        return false;
    };
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path)
    };
    resolve_lenient(&joined).is_some_and(|resolved| resolved.starts_with(&root))
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;
    use treesync_core::config::SymlinkPolicy;

    use super::*;

    fn scanner(root: &Path, policy: SymlinkPolicy) -> DirectoryScanner {
        DirectoryScanner::new(SymlinkNormalizer::new(policy, vec![root.to_path_buf()]))
    }

    fn canonical_tempdir() -> (TempDir, PathBuf) {
        let dir = TempDir::new().unwrap();
        let root = fs::canonicalize(dir.path()).unwrap();
        (dir, root)
    }

    #[test]
    fn test_single_level_lists_children_only() {
        let (_dir, root) = canonical_tempdir();
        fs::create_dir(root.join("sub")).unwrap();
        fs::write(root.join("sub/deep.txt"), b"deep").unwrap();
        fs::write(root.join("top.txt"), b"top").unwrap();

        let report = scanner(&root, SymlinkPolicy::Report)
            .scan(&root, false)
            .unwrap()
            .into_report();
        let paths: Vec<_> = report.entries.iter().map(|e| e.path().to_path_buf()).collect();
        assert_eq!(paths, vec![root.join("sub"), root.join("top.txt")]);
    }

    #[test]
    fn test_recursive_order_is_lexicographic_and_stable() {
        let (_dir, root) = canonical_tempdir();
        for dir in ["b", "a", "a/z", "a.d"] {
            fs::create_dir(root.join(dir)).unwrap();
        }
        for file in ["a/z/1", "a/2", "a.d/3", "b/4", "c"] {
            fs::write(root.join(file), file.as_bytes()).unwrap();
        }
        let scanner = scanner(&root, SymlinkPolicy::Report);

        let first: Vec<_> = scanner.scan(&root, true).unwrap().collect();
        let second: Vec<_> = scanner.scan(&root, true).unwrap().collect();
        assert_eq!(first, second);

        let paths: Vec<PathBuf> = first
            .iter()
            .filter_map(|item| match item {
                ScanItem::Entry(e) => Some(e.path().to_path_buf()),
                ScanItem::Warning(_) => None,
            })
            .collect();
        let mut sorted = paths.clone();
        sorted.sort();
        assert_eq!(paths, sorted);
        assert_eq!(paths.len(), 9);
    }

    #[test]
    fn test_directories_have_no_digest_files_do() {
        let (_dir, root) = canonical_tempdir();
        fs::create_dir(root.join("d")).unwrap();
        fs::write(root.join("f"), b"hello").unwrap();

        let report = scanner(&root, SymlinkPolicy::Report)
            .scan(&root, true)
            .unwrap()
            .into_report();
        assert!(report.entries[0].digest().is_none());
        assert_eq!(
            report.entries[1].digest().unwrap().to_hex(),
            "aaf4c61ddcc5e8a2dabede0f3b482cd9aea9434d"
        );
    }

    #[test]
    fn test_fingerprint_disabled() {
        let (_dir, root) = canonical_tempdir();
        fs::write(root.join("f"), b"hello").unwrap();
        let scanner = scanner(&root, SymlinkPolicy::Report).with_fingerprint(None);
        let report = scanner.scan(&root, true).unwrap().into_report();
        assert!(report.entries[0].digest().is_none());
    }

    #[test]
    fn test_scan_missing_root_is_error() {
        let (_dir, root) = canonical_tempdir();
        let scanner = scanner(&root, SymlinkPolicy::Report);
        let result = scanner.scan(&root.join("nope"), true);
        assert!(matches!(result, Err(FsError::NotFound(_))));
    }

    #[test]
    fn test_scan_entry() {
        let (_dir, root) = canonical_tempdir();
        fs::write(root.join("f"), b"hello").unwrap();
        let scanner = scanner(&root, SymlinkPolicy::Report);

        let entry = scanner.scan_entry(&root.join("f")).unwrap().unwrap();
        assert!(entry.digest().is_some());
        assert!(scanner.scan_entry(&root.join("gone")).unwrap().is_none());
    }

    #[test]
    fn test_last_known_digest_without_store_is_none() {
        let (_dir, root) = canonical_tempdir();
        fs::write(root.join("f"), b"hello").unwrap();
        let scanner = scanner(&root, SymlinkPolicy::Report);
        assert_eq!(scanner.last_known_digest(&root.join("f")).unwrap(), None);
    }

    #[test]
    fn test_is_descendant_rejects_dotdot_escape() {
        let (_dir, root) = canonical_tempdir();
        let tracked = root.join("tracked");
        fs::create_dir(&tracked).unwrap();
        fs::write(root.join("outside.txt"), b"x").unwrap();

        assert!(is_descendant(&tracked, &tracked));
        assert!(is_descendant(&tracked, &tracked.join("new/file.txt")));
        assert!(is_descendant(&tracked, Path::new("relative.txt")));
        assert!(!is_descendant(&tracked, &tracked.join("../outside.txt")));
        assert!(!is_descendant(&tracked, &tracked.join("ghost/../../outside.txt")));
        assert!(!is_descendant(&tracked, Path::new("../outside.txt")));
        assert!(!is_descendant(&root.join("missing-root"), &tracked));
    }

    #[cfg(unix)]
    #[test]
    fn test_is_descendant_rejects_symlink_escape() {
        let (_dir, root) = canonical_tempdir();
        let tracked = root.join("tracked");
        let elsewhere = root.join("elsewhere");
        fs::create_dir(&tracked).unwrap();
        fs::create_dir(&elsewhere).unwrap();
        std::os::unix::fs::symlink(&elsewhere, tracked.join("portal")).unwrap();

        assert!(!is_descendant(&tracked, &tracked.join("portal/secret")));
    }
}
