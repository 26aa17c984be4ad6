//! Non-fatal scan warnings

use std::fmt::{self, Display, Formatter};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Why a path was skipped or only partly processed during a scan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanWarningKind {
    /// A directory could not be listed; its subtree was skipped
    AccessDenied,
    /// A symlink whose target does not exist
    BrokenSymlink,
    /// A symlink pointing outside every trusted root
    UntrustedSymlink,
    /// A symlink whose target is not a regular file (directory, fifo, ...)
    NotRegularTarget,
    /// Any other I/O failure isolated to this path
    Io,
}

/// A warning collected alongside otherwise successful scan results
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanWarning {
    pub path: PathBuf,
    pub kind: ScanWarningKind,
    pub message: String,
}

impl ScanWarning {
    #[must_use]
    pub fn new(path: PathBuf, kind: ScanWarningKind, message: impl Into<String>) -> Self {
        Self {
            path,
            kind,
            message: message.into(),
        }
    }
}

impl Display for ScanWarning {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {:?}: {}", self.path.display(), self.kind, self.message)
    }
}
