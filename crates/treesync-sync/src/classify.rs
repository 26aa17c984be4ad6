//! Change classification
//!
//! A settled change is classified by re-scanning its path and diffing the
//! fresh entry against the digest persisted in the attribute store. The
//! notify hint only breaks ties the disk cannot answer (was this a create?
//! where did a rename come from?). Persisted state, not memory, is the
//! baseline, so classification survives restarts.

use std::path::Path;
use std::sync::Arc;

use tracing::{debug, instrument, warn};
use treesync_core::domain::{ChangeEvent, ChangeKind, ContentDigest, FileEntry};
use treesync_fs::attributes::{bump_generation, move_attributes, read_content_digest, write_content_digest};
use treesync_fs::{is_descendant, AttributeStore, DirectoryScanner, FsError};

use crate::events::RawKind;
use crate::queue::CoalescedChange;

/// Turns settled changes into [`ChangeEvent`]s
pub struct ChangeClassifier {
    scanner: Arc<DirectoryScanner>,
    store: Option<Arc<dyn AttributeStore>>,
}

impl ChangeClassifier {
    /// Without a store every file looks new: nothing is remembered between
    /// events and nothing is persisted
    #[must_use]
    pub fn new(scanner: Arc<DirectoryScanner>, store: Option<Arc<dyn AttributeStore>>) -> Self {
        Self { scanner, store }
    }

    #[must_use]
    pub fn scanner(&self) -> &DirectoryScanner {
        &self.scanner
    }

    /// Classifies one settled change; `Ok(None)` means nothing to report
    ///
    /// Blocking: re-scanning hashes the file.
    ///
    /// # Errors
    /// The scan error that prevented an entry, e.g. a broken link under the
    /// replace policy.
    #[instrument(skip(self, change), fields(path = %change.path.display(), hint = ?change.kind))]
    pub fn classify(&self, change: &CoalescedChange) -> Result<Option<ChangeEvent>, FsError> {
        if !within_root(&change.root, &change.path) {
            debug!("path resolves outside its root, dropping");
            return Ok(None);
        }

        let Some(entry) = self.scanner.scan_entry(&change.path)? else {
            return Ok(self.classify_gone(change));
        };

        if entry.is_directory() {
            return Ok(Some(directory_event(change)));
        }
        Ok(self.classify_file(change, entry))
    }

    fn classify_gone(&self, change: &CoalescedChange) -> Option<ChangeEvent> {
        let previous = self.stored_digest(&change.path);
        if previous.is_none() && change.saw_create {
            debug!("created and removed within one window");
            return None;
        }
        if previous.is_some() {
            if let Some(store) = &self.store {
                if let Err(e) = store.clear_attributes(&change.path) {
                    debug!(error = %e, "stale attributes not cleared");
                }
            }
        }
        Some(ChangeEvent::new(change.path.clone(), ChangeKind::Deleted).with_digests(previous, None))
    }

    fn classify_file(&self, change: &CoalescedChange, entry: FileEntry) -> Option<ChangeEvent> {
        let path = &change.path;
        let renamed_from = change
            .from
            .as_ref()
            .filter(|_| change.kind == RawKind::Rename);

        let mut previous = self.stored_digest(path);
        if previous.is_none() {
            if let Some(from) = renamed_from {
                previous = self.adopt_attributes(from, path);
            }
        }

        let current = match (&previous, entry.digest()) {
            (Some(prev), Some(cur)) if prev.algorithm() != cur.algorithm() => {
                self.rehash(path, prev).or_else(|| Some(cur.clone()))
            }
            (_, cur) => cur.cloned(),
        };

        let event = if let Some(from) = renamed_from {
            ChangeEvent::renamed(from.clone(), path.clone())
        } else {
            let kind = match (&previous, &current) {
                (Some(prev), Some(cur)) if prev == cur && !change.saw_create => {
                    debug!("content unchanged, suppressing");
                    return None;
                }
                (Some(_), _) => ChangeKind::Modified,
                (None, _) if change.saw_create => ChangeKind::Created,
                (None, _) => ChangeKind::Modified,
            };
            ChangeEvent::new(path.clone(), kind)
        };

        if let Some(digest) = &current {
            self.persist(path, digest);
        }
        Some(event.with_digests(previous, current))
    }

    /// Digest of `path` with the algorithm its stored digest was made with
    fn rehash(&self, path: &Path, previous: &ContentDigest) -> Option<ContentDigest> {
        match self.scanner.hasher().digest_file(previous.algorithm(), path) {
            Ok(digest) => Some(digest),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "rehash with stored algorithm failed");
                None
            }
        }
    }

    fn stored_digest(&self, path: &Path) -> Option<ContentDigest> {
        let store = self.store.as_deref()?;
        match read_content_digest(store, path) {
            Ok(digest) => digest,
            Err(e) if e.is_unsupported() || matches!(e, FsError::NotFound(_)) => None,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "stored digest unreadable");
                None
            }
        }
    }

    /// Moves a path-keyed record from a rename source to its destination
    ///
    /// Native attributes travel with the inode and never reach this point.
    fn adopt_attributes(&self, from: &Path, to: &Path) -> Option<ContentDigest> {
        let previous = self.stored_digest(from)?;
        let store = self.store.as_deref()?;
        match move_attributes(store, from, to) {
            Ok(moved) => debug!(moved, "attributes re-associated after rename"),
            Err(e) => warn!(from = %from.display(), error = %e, "attributes not re-associated"),
        }
        Some(previous)
    }

    fn persist(&self, path: &Path, digest: &ContentDigest) {
        let Some(store) = self.store.as_deref() else {
            return;
        };
        let result = write_content_digest(store, path, digest).and_then(|()| bump_generation(store, path));
        match result {
            Ok(generation) => debug!(path = %path.display(), generation, "attributes persisted"),
            Err(e) if e.is_unsupported() || matches!(e, FsError::NotFound(_)) => {
                debug!(path = %path.display(), error = %e, "attributes not persisted");
            }
            Err(e) => warn!(path = %path.display(), error = %e, "attribute persistence failed"),
        }
    }
}

fn directory_event(change: &CoalescedChange) -> ChangeEvent {
    match (change.kind, &change.from) {
        (RawKind::Rename, Some(from)) => ChangeEvent::renamed(from.clone(), change.path.clone()),
        (RawKind::Create, _) => ChangeEvent::new(change.path.clone(), ChangeKind::Created),
        _ if change.saw_create => ChangeEvent::new(change.path.clone(), ChangeKind::Created),
        _ => ChangeEvent::new(change.path.clone(), ChangeKind::Modified),
    }
}

/// Containment of the path itself, without following a final symlink
///
/// A link inside the root that points elsewhere is still a change inside
/// the root; where its target lives is the normalizer's concern.
fn within_root(root: &Path, path: &Path) -> bool {
    if path == root {
        return true;
    }
    match (path.parent(), path.file_name()) {
        (Some(parent), Some(_)) => is_descendant(root, parent),
        _ => is_descendant(root, path),
    }
}
