//! Raw filesystem notifications
//!
//! [`map_notify_event`] turns a `notify::Event` into a [`RawChange`]: a path
//! plus a hint about what happened. Hints only steer classification; the
//! classifier re-scans the path and decides from what is on disk.

use std::path::{Path, PathBuf};

use notify::event::{CreateKind, ModifyKind, RemoveKind, RenameMode};
use notify::EventKind;
use tracing::trace;

/// What the OS says happened to a path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RawKind {
    Create,
    /// File content written
    Data,
    /// Permissions, timestamps or extended attributes changed
    Metadata,
    Remove,
    /// Moved here from [`RawChange::from`]
    Rename,
    /// A modification the backend could not qualify
    Other,
}

impl RawKind {
    /// Structural kinds survive coarse (directory-only) mode
    #[must_use]
    pub fn is_structural(self) -> bool {
        matches!(self, RawKind::Create | RawKind::Remove | RawKind::Rename)
    }

    /// Combines two hints for the same path, `newer` arriving later
    ///
    /// Create, remove and rename replace whatever came before. A content or
    /// metadata touch after a create or rename keeps the earlier hint, since
    /// the interesting fact is still that the path appeared.
    #[must_use]
    pub fn merge(self, newer: RawKind) -> RawKind {
        match (self, newer) {
            (_, RawKind::Create | RawKind::Remove | RawKind::Rename) => newer,
            (RawKind::Create | RawKind::Rename, _) => self,
            (RawKind::Data, RawKind::Metadata | RawKind::Other) => RawKind::Data,
            (RawKind::Remove, _) => RawKind::Other,
            _ => newer,
        }
    }
}

/// One notification for one path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawChange {
    pub path: PathBuf,
    pub kind: RawKind,
    /// Source path of a rename
    pub from: Option<PathBuf>,
    /// Directory hint from the backend, when it has one
    pub is_dir: Option<bool>,
}

impl RawChange {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, kind: RawKind) -> Self {
        Self {
            path: path.into(),
            kind,
            from: None,
            is_dir: None,
        }
    }

    #[must_use]
    pub fn renamed(from: impl Into<PathBuf>, to: impl Into<PathBuf>) -> Self {
        Self {
            from: Some(from.into()),
            ..Self::new(to, RawKind::Rename)
        }
    }

    #[must_use]
    pub fn with_is_dir(mut self, is_dir: Option<bool>) -> Self {
        self.is_dir = is_dir;
        self
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Converts a `notify::Event` into a [`RawChange`]
///
/// - `Create(*)` -> `Create`
/// - `Modify(Data(*))` -> `Data`
/// - `Modify(Metadata(*))` -> `Metadata`
/// - `Modify(Name(Both))` with two paths -> `Rename`
/// - `Modify(Name(From))` -> `Remove` of the old path
/// - `Modify(Name(To))` -> `Create` of the new path
/// - `Remove(*)` -> `Remove`
/// - other `Modify(*)` -> `Other`
///
/// Access events and events without paths map to `None`.
pub fn map_notify_event(event: &notify::Event) -> Option<RawChange> {
    let paths = &event.paths;
    let first = || paths.first().cloned();

    let change = match &event.kind {
        EventKind::Create(kind) => {
            let is_dir = match kind {
                CreateKind::Folder => Some(true),
                CreateKind::File => Some(false),
                _ => None,
            };
            RawChange::new(first()?, RawKind::Create).with_is_dir(is_dir)
        }
        EventKind::Remove(kind) => {
            let is_dir = match kind {
                RemoveKind::Folder => Some(true),
                RemoveKind::File => Some(false),
                _ => None,
            };
            RawChange::new(first()?, RawKind::Remove).with_is_dir(is_dir)
        }
        EventKind::Modify(ModifyKind::Data(_)) => RawChange::new(first()?, RawKind::Data),
        EventKind::Modify(ModifyKind::Metadata(_)) => RawChange::new(first()?, RawKind::Metadata),
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) if paths.len() >= 2 => {
            RawChange::renamed(paths[0].clone(), paths[1].clone())
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
            RawChange::new(first()?, RawKind::Remove)
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
            RawChange::new(first()?, RawKind::Create)
        }
        EventKind::Modify(_) => RawChange::new(first()?, RawKind::Other),
        _ => {
            trace!(kind = ?event.kind, "ignoring event kind");
            return None;
        }
    };
    trace!(path = %change.path.display(), kind = ?change.kind, "mapped notify event");
    Some(change)
}
