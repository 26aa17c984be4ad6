//! Event admission
//!
//! Runs synchronously on the reactor for every mapped event, before it
//! reaches the debounce queue. Decides which tracked root an event belongs
//! to and drops what must not surface: events outside every root, events
//! inside internal directories, self-generated events, and file-level events
//! in coarse mode.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::trace;
use treesync_core::domain::WatchConfiguration;
use treesync_fs::WriteCoordinator;

use crate::events::{RawChange, RawKind};

/// Admission policy applied to raw changes
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    coordinator: Option<WriteCoordinator>,
    ignored_dirs: Vec<PathBuf>,
}

impl EventFilter {
    /// `coordinator` is the registry of in-flight self-writes; without one
    /// nothing counts as self-generated
    #[must_use]
    pub fn new(coordinator: Option<WriteCoordinator>) -> Self {
        Self {
            coordinator,
            ignored_dirs: Vec::new(),
        }
    }

    /// Never admit events under `dir`, e.g. a sidecar index inside a root
    #[must_use]
    pub fn with_ignored_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.ignored_dirs.push(dir.into());
        self
    }

    #[must_use]
    pub fn ignored_dirs(&self) -> &[PathBuf] {
        &self.ignored_dirs
    }

    /// Returns the owning root and the (possibly rewritten) change, or
    /// `None` if the event is dropped
    ///
    /// A rename into a root from outside is admitted as a create; a rename
    /// out of a root is admitted as a remove of the source.
    pub fn admit(&self, change: RawChange, config: &WatchConfiguration) -> Option<(PathBuf, RawChange)> {
        let (root, change) = Self::attach_root(change, config)?;

        if self.is_ignored(&change.path) || change.from.as_deref().is_some_and(|f| self.is_ignored(f)) {
            trace!(path = %change.path.display(), "dropping event in internal directory");
            return None;
        }

        if config.ignore_self_generated && self.is_self_generated(&change) {
            trace!(path = %change.path.display(), kind = ?change.kind, "dropping self-generated event");
            return None;
        }

        if config.observe_file_events {
            return Some((root, change));
        }
        Self::coarsen(root, change)
    }

    fn attach_root(change: RawChange, config: &WatchConfiguration) -> Option<(PathBuf, RawChange)> {
        let root = config.root_for(&change.path).map(Path::to_path_buf);
        let Some(from) = change.from.as_deref() else {
            return root.map(|root| (root, change));
        };
        let from_root = config.root_for(from).map(Path::to_path_buf);

        match (root, from_root) {
            (Some(root), Some(_)) => Some((root, change)),
            (Some(root), None) => {
                let created = RawChange::new(change.path, RawKind::Create).with_is_dir(change.is_dir);
                Some((root, created))
            }
            (None, Some(from_root)) => {
                let removed = RawChange::new(from.to_path_buf(), RawKind::Remove).with_is_dir(change.is_dir);
                Some((from_root, removed))
            }
            (None, None) => None,
        }
    }

    fn is_ignored(&self, path: &Path) -> bool {
        self.ignored_dirs.iter().any(|dir| path.starts_with(dir))
    }

    fn is_self_generated(&self, change: &RawChange) -> bool {
        let Some(coordinator) = &self.coordinator else {
            return false;
        };
        let own_path = if change.kind == RawKind::Metadata {
            coordinator.is_self_metadata(&change.path)
        } else {
            coordinator.is_self_generated(&change.path)
        };
        own_path || change.from.as_deref().is_some_and(|f| coordinator.is_self_generated(f))
    }

    /// Directory-granularity view of a change
    fn coarsen(root: PathBuf, change: RawChange) -> Option<(PathBuf, RawChange)> {
        let is_dir = change.is_dir.unwrap_or_else(|| {
            fs::symlink_metadata(&change.path)
                .map(|meta| meta.is_dir())
                .unwrap_or(false)
        });

        if is_dir {
            return change.kind.is_structural().then(|| (root, change.with_is_dir(Some(true))));
        }
        if !change.kind.is_structural() {
            trace!(path = %change.path.display(), "dropping file event in coarse mode");
            return None;
        }

        let parent = change.path.parent()?.to_path_buf();
        if !parent.starts_with(&root) {
            return None;
        }
        let folded = RawChange::new(parent, RawKind::Other).with_is_dir(Some(true));
        Some((root, folded))
    }
}
