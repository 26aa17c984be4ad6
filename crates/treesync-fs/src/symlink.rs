//! Symlink detection and normalization
//!
//! Two policies apply to a link:
//!
//! - **Replace** materializes a copy of the target in place of the link, but
//!   only when the target is a regular file under a trusted root. Anything
//!   else is reported instead.
//! - **Report** leaves the link alone and returns a symlink entry with its
//!   target recorded.
//!
//! Materialization writes a temporary sibling and renames it over the link
//! while holding the link's write guard, so watchers can ignore the events it
//! causes and readers never see a half-copied file.

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, info, instrument, warn};
use treesync_core::config::SymlinkPolicy;
use treesync_core::domain::{FileEntry, PathKind, ScanWarning, ScanWarningKind};

use crate::coordinator::WriteCoordinator;
use crate::paths::{entry_from_metadata, kind_of, open_for_writing, system_time_millis, temp_sibling};
use crate::{FsError, Result};

// ============================================================================
// Detection
// ============================================================================

/// What a path is, as far as symlink handling cares
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkStatus {
    /// A symbolic link, with its raw (unresolved) target
    Link { target: PathBuf },
    /// An existing path that is not a link
    NotLink(PathKind),
    /// Nothing exists at the path
    Missing,
}

/// Classifies `path` without following it
///
/// # Errors
/// Returns [`FsError::Io`] when the path cannot be inspected for a reason
/// other than not existing.
pub fn detect_link(path: &Path) -> Result<LinkStatus> {
    let meta = match fs::symlink_metadata(path) {
        Ok(meta) => meta,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(LinkStatus::Missing),
        Err(e) => return Err(FsError::io(path, e)),
    };
    if meta.file_type().is_symlink() {
        let target = fs::read_link(path).map_err(|e| FsError::io(path, e))?;
        Ok(LinkStatus::Link { target })
    } else {
        Ok(LinkStatus::NotLink(kind_of(&meta)))
    }
}

// ============================================================================
// Outcomes
// ============================================================================

/// Result of normalizing one path
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NormalizeOutcome {
    /// Not a link; returned as-is
    Unchanged(FileEntry),
    /// The link was replaced by a regular-file copy of its target
    Materialized(FileEntry),
    /// The link was left in place
    Reported {
        entry: FileEntry,
        warning: Option<ScanWarning>,
    },
}

impl NormalizeOutcome {
    #[must_use]
    pub fn entry(&self) -> &FileEntry {
        match self {
            NormalizeOutcome::Unchanged(entry)
            | NormalizeOutcome::Materialized(entry)
            | NormalizeOutcome::Reported { entry, .. } => entry,
        }
    }

    #[must_use]
    pub fn into_parts(self) -> (FileEntry, Option<ScanWarning>) {
        match self {
            NormalizeOutcome::Unchanged(entry) | NormalizeOutcome::Materialized(entry) => {
                (entry, None)
            }
            NormalizeOutcome::Reported { entry, warning } => (entry, warning),
        }
    }
}

/// Summary of a recursive normalization pass
#[derive(Debug, Default)]
pub struct NormalizeReport {
    /// Links replaced by copies
    pub materialized: Vec<PathBuf>,
    /// Links left in place, with the reason
    pub reported: Vec<ScanWarning>,
    /// Paths that failed; the walk continued past each of them
    pub failures: Vec<(PathBuf, FsError)>,
}

impl NormalizeReport {
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.reported.is_empty() && self.failures.is_empty()
    }
}

// ============================================================================
// SymlinkNormalizer
// ============================================================================

/// Applies the configured symlink policy to individual paths or whole trees
#[derive(Debug, Clone)]
pub struct SymlinkNormalizer {
    policy: SymlinkPolicy,
    trusted_roots: Vec<PathBuf>,
    coordinator: Option<WriteCoordinator>,
}

impl SymlinkNormalizer {
    /// Roots are canonicalized up front; roots that do not exist are dropped
    pub fn new<I>(policy: SymlinkPolicy, trusted_roots: I) -> Self
    where
        I: IntoIterator<Item = PathBuf>,
    {
        let trusted_roots = trusted_roots
            .into_iter()
            .filter_map(|root| match fs::canonicalize(&root) {
                Ok(canonical) => Some(canonical),
                Err(e) => {
                    warn!(root = %root.display(), error = %e, "ignoring unusable trusted root");
                    None
                }
            })
            .collect();
        Self {
            policy,
            trusted_roots,
            coordinator: None,
        }
    }

    #[must_use]
    pub fn with_coordinator(mut self, coordinator: WriteCoordinator) -> Self {
        self.coordinator = Some(coordinator);
        self
    }

    #[must_use]
    pub fn policy(&self) -> SymlinkPolicy {
        self.policy
    }

    #[must_use]
    pub fn trusted_roots(&self) -> &[PathBuf] {
        &self.trusted_roots
    }

    /// Normalizes `path` under the configured policy
    pub fn normalize(&self, path: &Path) -> Result<NormalizeOutcome> {
        self.normalize_with(path, self.policy)
    }

    /// Normalizes `path` under an explicit policy
    ///
    /// Running the replace policy on an already materialized path is a no-op
    /// that returns [`NormalizeOutcome::Unchanged`] with the same entry.
    ///
    /// # Errors
    /// - [`FsError::NotFound`] if nothing exists at `path`
    /// - [`FsError::BrokenSymlink`] under the replace policy when the
    ///   target does not resolve
    /// - [`FsError::Io`] for copy or rename failures
    #[instrument(skip(self), fields(path = %path.display()))]
    pub fn normalize_with(&self, path: &Path, policy: SymlinkPolicy) -> Result<NormalizeOutcome> {
        let meta = fs::symlink_metadata(path).map_err(|e| FsError::io(path, e))?;
        if !meta.file_type().is_symlink() {
            return Ok(NormalizeOutcome::Unchanged(entry_from_metadata(path, &meta)));
        }

        let target = fs::read_link(path).map_err(|e| FsError::io(path, e))?;
        let modified = meta.modified().map(system_time_millis).unwrap_or(0);
        let link_entry = FileEntry::symlink(path.to_path_buf(), target.clone(), modified);

        match policy {
            SymlinkPolicy::Report => {
                let warning = match fs::metadata(path) {
                    Ok(_) => None,
                    Err(e) if e.kind() == io::ErrorKind::NotFound => Some(ScanWarning::new(
                        path.to_path_buf(),
                        ScanWarningKind::BrokenSymlink,
                        format!("target {} does not exist", target.display()),
                    )),
                    Err(e) => return Err(FsError::io(path, e)),
                };
                Ok(NormalizeOutcome::Reported {
                    entry: link_entry,
                    warning,
                })
            }
            SymlinkPolicy::Replace => self.replace(path, target, link_entry),
        }
    }

    fn replace(&self, path: &Path, target: PathBuf, link_entry: FileEntry) -> Result<NormalizeOutcome> {
        let resolved = match fs::canonicalize(path) {
            Ok(resolved) => resolved,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(FsError::BrokenSymlink {
                    link: path.to_path_buf(),
                    target,
                })
            }
            Err(e) => return Err(FsError::io(path, e)),
        };

        let target_meta = fs::metadata(&resolved).map_err(|e| FsError::io(&resolved, e))?;
        if !target_meta.is_file() {
            return Ok(self.report(
                link_entry,
                ScanWarningKind::NotRegularTarget,
                format!("target {} is not a regular file", resolved.display()),
            ));
        }
        if !self.is_trusted(&resolved) {
            return Ok(self.report(
                link_entry,
                ScanWarningKind::UntrustedSymlink,
                format!("target {} is outside every trusted root", resolved.display()),
            ));
        }

        let entry = self.materialize(path, &resolved)?;
        info!(path = %path.display(), target = %resolved.display(), "symlink materialized");
        Ok(NormalizeOutcome::Materialized(entry))
    }

    fn report(&self, entry: FileEntry, kind: ScanWarningKind, message: String) -> NormalizeOutcome {
        debug!(path = %entry.path().display(), ?kind, "symlink left in place");
        let warning = ScanWarning::new(entry.path().to_path_buf(), kind, message);
        NormalizeOutcome::Reported {
            entry,
            warning: Some(warning),
        }
    }

    fn is_trusted(&self, resolved: &Path) -> bool {
        self.trusted_roots.iter().any(|root| resolved.starts_with(root))
    }

    fn materialize(&self, link: &Path, source: &Path) -> Result<FileEntry> {
        let tmp = temp_sibling(link);
        let mut guard = self.coordinator.as_ref().map(|c| c.begin_write(link));
        if let Some(guard) = guard.as_mut() {
            guard.also_touches(&tmp);
        }

        let result = copy_over(source, &tmp, link);
        if result.is_err() {
            let _ = fs::remove_file(&tmp);
        }
        result?;

        let meta = fs::symlink_metadata(link).map_err(|e| FsError::io(link, e))?;
        Ok(entry_from_metadata(link, &meta))
    }

    /// Depth-first walk materializing every link under `root`
    ///
    /// Always uses the replace policy. A failure on one path is recorded and
    /// the walk continues with its siblings.
    pub fn remove_symlinks_recursive(&self, root: &Path) -> NormalizeReport {
        let mut report = NormalizeReport::default();
        self.walk(root, &mut report);
        info!(
            root = %root.display(),
            materialized = report.materialized.len(),
            reported = report.reported.len(),
            failures = report.failures.len(),
            "recursive symlink normalization finished"
        );
        report
    }

    fn walk(&self, path: &Path, report: &mut NormalizeReport) {
        let meta = match fs::symlink_metadata(path) {
            Ok(meta) => meta,
            Err(e) => {
                report.failures.push((path.to_path_buf(), FsError::io(path, e)));
                return;
            }
        };

        if meta.file_type().is_symlink() {
            match self.normalize_with(path, SymlinkPolicy::Replace) {
                Ok(NormalizeOutcome::Materialized(_)) => report.materialized.push(path.to_path_buf()),
                Ok(NormalizeOutcome::Reported { warning: Some(w), .. }) => report.reported.push(w),
                Ok(_) => {}
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "symlink normalization failed");
                    report.failures.push((path.to_path_buf(), e));
                }
            }
            return;
        }

        if !meta.is_dir() {
            return;
        }

        let mut children = match fs::read_dir(path) {
            Ok(iter) => iter
                .filter_map(|entry| entry.ok().map(|e| e.path()))
                .collect::<Vec<_>>(),
            Err(e) => {
                report.failures.push((path.to_path_buf(), FsError::io(path, e)));
                return;
            }
        };
        children.sort();
        for child in children {
            self.walk(&child, report);
        }
    }
}

/// Copies `source` into `tmp`, then renames `tmp` over `dest`
fn copy_over(source: &Path, tmp: &Path, dest: &Path) -> Result<()> {
    let mut reader = File::open(source).map_err(|e| FsError::io(source, e))?;
    let mut writer = open_for_writing(tmp)?;
    io::copy(&mut reader, &mut writer).map_err(|e| FsError::io(tmp, e))?;
    writer.sync_all().map_err(|e| FsError::io(tmp, e))?;
    drop(writer);

    let permissions = fs::metadata(source)
        .map_err(|e| FsError::io(source, e))?
        .permissions();
    fs::set_permissions(tmp, permissions).map_err(|e| FsError::io(tmp, e))?;
    fs::rename(tmp, dest).map_err(|e| FsError::io(dest, e))
}
