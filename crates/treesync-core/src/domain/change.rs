//! Classified change events
//!
//! These are what the watcher hands to the sync-decision layer. They are
//! emitted once and never retained.

use std::fmt::{self, Display, Formatter};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::digest::ContentDigest;

/// The kind of change observed at a path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Created,
    Modified,
    Deleted,
    Renamed,
}

impl Display for ChangeKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let s = match self {
            ChangeKind::Created => "created",
            ChangeKind::Modified => "modified",
            ChangeKind::Deleted => "deleted",
            ChangeKind::Renamed => "renamed",
        };
        f.write_str(s)
    }
}

/// A change at one path, classified by diffing a fresh scan against the
/// persisted state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub path: PathBuf,
    pub kind: ChangeKind,
    /// Source path of a [`ChangeKind::Renamed`] event
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_path: Option<PathBuf>,
    pub previous_digest: Option<ContentDigest>,
    pub current_digest: Option<ContentDigest>,
    /// When the classifier produced the event
    pub detected_at: DateTime<Utc>,
}

impl ChangeEvent {
    #[must_use]
    pub fn new(path: PathBuf, kind: ChangeKind) -> Self {
        Self {
            path,
            kind,
            previous_path: None,
            previous_digest: None,
            current_digest: None,
            detected_at: Utc::now(),
        }
    }

    #[must_use]
    pub fn renamed(from: PathBuf, to: PathBuf) -> Self {
        Self {
            previous_path: Some(from),
            ..Self::new(to, ChangeKind::Renamed)
        }
    }

    #[must_use]
    pub fn with_digests(
        mut self,
        previous: Option<ContentDigest>,
        current: Option<ContentDigest>,
    ) -> Self {
        self.previous_digest = previous;
        self.current_digest = current;
        self
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// True if the content identity differs between the two digests
    ///
    /// An unknown previous digest counts as a content change.
    #[must_use]
    pub fn content_changed(&self) -> bool {
        match (&self.previous_digest, &self.current_digest) {
            (Some(prev), Some(cur)) => prev != cur,
            (None, None) => false,
            _ => true,
        }
    }
}
