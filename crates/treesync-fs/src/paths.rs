//! Path probes and small filesystem helpers

use std::fs::{self, File, Metadata, OpenOptions};
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use treesync_core::domain::{FileEntry, PathKind};

use crate::{FsError, Result};

/// Reports what `path` refers to, without following a final symlink
///
/// A missing path is [`PathKind::Missing`]; any other failure (permission
/// denied on a parent, I/O error) is returned as an error rather than
/// folded into "missing".
pub fn probe_path(path: &Path) -> Result<PathKind> {
    match fs::symlink_metadata(path) {
        Ok(meta) => Ok(kind_of(&meta)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(PathKind::Missing),
        Err(e) => Err(FsError::io(path, e)),
    }
}

pub(crate) fn kind_of(meta: &Metadata) -> PathKind {
    let ft = meta.file_type();
    if ft.is_symlink() {
        PathKind::Symlink
    } else if ft.is_dir() {
        PathKind::Directory
    } else if ft.is_file() {
        PathKind::File
    } else {
        PathKind::Other
    }
}

/// Milliseconds since the Unix epoch, negative for earlier times
pub fn system_time_millis(time: SystemTime) -> i64 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(d) => i64::try_from(d.as_millis()).unwrap_or(i64::MAX),
        Err(e) => -i64::try_from(e.duration().as_millis()).unwrap_or(i64::MAX),
    }
}

/// Modification time of `path` in milliseconds since the Unix epoch
pub fn modified_millis(path: &Path) -> Result<i64> {
    let meta = fs::metadata(path).map_err(|e| FsError::io(path, e))?;
    let modified = meta.modified().map_err(|e| FsError::io(path, e))?;
    Ok(system_time_millis(modified))
}

/// Builds a [`FileEntry`] from `lstat` metadata
///
/// Symlinks must go through the normalizer instead; this only covers
/// directories and regular files.
pub(crate) fn entry_from_metadata(path: &Path, meta: &Metadata) -> FileEntry {
    let modified = meta.modified().map(system_time_millis).unwrap_or(0);
    if meta.is_dir() {
        FileEntry::directory(path.to_path_buf(), modified)
    } else {
        FileEntry::file(path.to_path_buf(), meta.len(), modified)
    }
}

/// Opens `path` for writing, creating missing parent directories and
/// truncating any existing file
pub fn open_for_writing(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(|e| FsError::io(parent, e))?;
        }
    }
    OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)
        .map_err(|e| FsError::io(path, e))
}

/// Makes `path` absolute against the current directory without touching
/// the filesystem
pub fn absolutize(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        let cwd = std::env::current_dir()?;
        Ok(cwd.join(path))
    }
}

/// Sibling path used while replacing `path` atomically
pub(crate) fn temp_sibling(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{name}.treesync-tmp"))
}

/// Resolves `path` as far as it exists on disk, then applies the remaining
/// components lexically
///
/// Existing prefixes are canonicalized (symlinks and `..` resolved by the
/// OS); the non-existent tail cannot contain symlinks, so popping on `..`
/// there is exact.
pub fn resolve_lenient(path: &Path) -> Option<PathBuf> {
    let components: Vec<Component<'_>> = path.components().collect();
    for split in (1..=components.len()).rev() {
        let prefix: PathBuf = components[..split].iter().collect();
        let Ok(mut resolved) = fs::canonicalize(&prefix) else {
            continue;
        };
        for component in &components[split..] {
            match component {
                Component::Normal(name) => resolved.push(name),
                Component::ParentDir => {
                    resolved.pop();
                }
                Component::CurDir => {}
                Component::RootDir | Component::Prefix(_) => return None,
            }
        }
        return Some(resolved);
    }
    None
}

/// Normalizes `path` so the same file always yields the same key
///
/// The parent is resolved through the filesystem but the final component is
/// kept as-is, so a symlink is keyed by its own location and not its target.
/// Works for paths that no longer exist.
pub fn stable_key(path: &Path) -> PathBuf {
    let absolute = absolutize(path).unwrap_or_else(|_| path.to_path_buf());
    match (absolute.parent(), absolute.file_name()) {
        (Some(parent), Some(name)) => resolve_lenient(parent)
            .unwrap_or_else(|| parent.to_path_buf())
            .join(name),
        _ => absolute,
    }
}
