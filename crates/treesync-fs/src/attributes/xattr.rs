//! Native extended attribute backend
//!
//! Names are stored as `<namespace>.<name>`, e.g. `user.treesync.content-digest`.
//! Listing only returns names under the namespace, with the prefix stripped.

use std::ffi::CString;
use std::io;
use std::path::Path;

use tracing::{instrument, trace};
use treesync_core::domain::{AttributeRecord, DomainError};

use super::{AttributeStore, Coordination};
use crate::coordinator::WriteCoordinator;
use crate::{FsError, Result};

/// Retries when an attribute grows between the size query and the read
const MAX_RANGE_RETRIES: usize = 4;

#[cfg(any(target_os = "linux", target_os = "android"))]
mod sys {
    use std::ffi::CStr;
    use std::io;

    pub const NO_ATTR: i32 = libc::ENODATA;

    fn check_len(ret: libc::ssize_t) -> io::Result<usize> {
        usize::try_from(ret).map_err(|_| io::Error::last_os_error())
    }

    fn check(ret: libc::c_int) -> io::Result<()> {
        if ret == 0 {
            Ok(())
        } else {
            Err(io::Error::last_os_error())
        }
    }

    pub fn get(path: &CStr, name: &CStr, buf: &mut [u8]) -> io::Result<usize> {
        // SAFETY: both strings are NUL-terminated and `buf` is valid for `buf.len()` bytes.
        check_len(unsafe {
            libc::getxattr(path.as_ptr(), name.as_ptr(), buf.as_mut_ptr().cast(), buf.len())
        })
    }

    pub fn set(path: &CStr, name: &CStr, value: &[u8]) -> io::Result<()> {
        // SAFETY: as above, `value` is valid for `value.len()` bytes.
        check(unsafe {
            libc::setxattr(path.as_ptr(), name.as_ptr(), value.as_ptr().cast(), value.len(), 0)
        })
    }

    pub fn list(path: &CStr, buf: &mut [u8]) -> io::Result<usize> {
        // SAFETY: as above.
        check_len(unsafe { libc::listxattr(path.as_ptr(), buf.as_mut_ptr().cast(), buf.len()) })
    }

    pub fn remove(path: &CStr, name: &CStr) -> io::Result<()> {
        // SAFETY: both strings are NUL-terminated.
        check(unsafe { libc::removexattr(path.as_ptr(), name.as_ptr()) })
    }
}

#[cfg(target_os = "macos")]
mod sys {
    use std::ffi::CStr;
    use std::io;

    pub const NO_ATTR: i32 = libc::ENOATTR;

    fn check_len(ret: libc::ssize_t) -> io::Result<usize> {
        usize::try_from(ret).map_err(|_| io::Error::last_os_error())
    }

    fn check(ret: libc::c_int) -> io::Result<()> {
        if ret == 0 {
            Ok(())
        } else {
            Err(io::Error::last_os_error())
        }
    }

    pub fn get(path: &CStr, name: &CStr, buf: &mut [u8]) -> io::Result<usize> {
        // SAFETY: both strings are NUL-terminated and `buf` is valid for `buf.len()` bytes.
        check_len(unsafe {
            libc::getxattr(path.as_ptr(), name.as_ptr(), buf.as_mut_ptr().cast(), buf.len(), 0, 0)
        })
    }

    pub fn set(path: &CStr, name: &CStr, value: &[u8]) -> io::Result<()> {
        // SAFETY: as above, `value` is valid for `value.len()` bytes.
        check(unsafe {
            libc::setxattr(path.as_ptr(), name.as_ptr(), value.as_ptr().cast(), value.len(), 0, 0)
        })
    }

    pub fn list(path: &CStr, buf: &mut [u8]) -> io::Result<usize> {
        // SAFETY: as above.
        check_len(unsafe { libc::listxattr(path.as_ptr(), buf.as_mut_ptr().cast(), buf.len(), 0) })
    }

    pub fn remove(path: &CStr, name: &CStr) -> io::Result<()> {
        // SAFETY: both strings are NUL-terminated.
        check(unsafe { libc::removexattr(path.as_ptr(), name.as_ptr(), 0) })
    }
}

#[cfg(not(any(target_os = "linux", target_os = "android", target_os = "macos")))]
mod sys {
    use std::ffi::CStr;
    use std::io;

    pub const NO_ATTR: i32 = -1;

    fn unsupported<T>() -> io::Result<T> {
        Err(io::Error::from(io::ErrorKind::Unsupported))
    }

    pub fn get(_path: &CStr, _name: &CStr, _buf: &mut [u8]) -> io::Result<usize> {
        unsupported()
    }

    pub fn set(_path: &CStr, _name: &CStr, _value: &[u8]) -> io::Result<()> {
        unsupported()
    }

    pub fn list(_path: &CStr, _buf: &mut [u8]) -> io::Result<usize> {
        unsupported()
    }

    pub fn remove(_path: &CStr, _name: &CStr) -> io::Result<()> {
        unsupported()
    }
}

fn is_unsupported(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::Unsupported || err.raw_os_error().is_some_and(is_unsupported_errno)
}

#[cfg(unix)]
fn is_unsupported_errno(code: i32) -> bool {
    code == libc::ENOTSUP || code == libc::EOPNOTSUPP
}

#[cfg(not(unix))]
fn is_unsupported_errno(_code: i32) -> bool {
    false
}

fn is_no_attr(err: &io::Error) -> bool {
    err.raw_os_error() == Some(sys::NO_ATTR)
}

#[cfg(unix)]
fn is_range(err: &io::Error) -> bool {
    err.raw_os_error() == Some(libc::ERANGE)
}

#[cfg(not(unix))]
fn is_range(_err: &io::Error) -> bool {
    false
}

fn map_err(path: &Path, operation: &'static str, err: io::Error) -> FsError {
    if is_unsupported(&err) {
        FsError::unsupported(path, operation)
    } else {
        FsError::io(path, err)
    }
}

#[cfg(unix)]
fn c_path(path: &Path) -> Result<CString> {
    use std::os::unix::ffi::OsStrExt;
    CString::new(path.as_os_str().as_bytes())
        .map_err(|_| DomainError::InvalidPath(path.display().to_string()).into())
}

#[cfg(not(unix))]
fn c_path(path: &Path) -> Result<CString> {
    CString::new(path.to_string_lossy().into_owned())
        .map_err(|_| DomainError::InvalidPath(path.display().to_string()).into())
}

/// Attribute store backed by the filesystem's extended attributes
#[derive(Debug, Clone)]
pub struct XattrStore {
    namespace: String,
    coordination: Coordination,
}

impl XattrStore {
    /// `namespace` is the dotted prefix, e.g. `user.treesync`
    #[must_use]
    pub fn new(namespace: impl Into<String>, coordinator: Option<WriteCoordinator>) -> Self {
        Self {
            namespace: namespace.into(),
            coordination: Coordination::new(coordinator),
        }
    }

    pub(crate) fn without_coordinator(self) -> Self {
        Self {
            coordination: Coordination::default(),
            ..self
        }
    }

    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    fn full_name(&self, name: &str) -> Result<CString> {
        if name.is_empty() {
            return Err(DomainError::ValidationFailed("attribute name is empty".into()).into());
        }
        CString::new(format!("{}.{}", self.namespace, name))
            .map_err(|_| DomainError::ValidationFailed(format!("attribute name {name:?} contains NUL")).into())
    }

    fn strip_namespace<'a>(&self, full: &'a str) -> Option<&'a str> {
        full.strip_prefix(self.namespace.as_str())
            .and_then(|rest| rest.strip_prefix('.'))
            .filter(|rest| !rest.is_empty())
    }

    fn read_value(&self, path: &Path, c_path: &CString, c_name: &CString) -> Result<Option<Vec<u8>>> {
        for _ in 0..MAX_RANGE_RETRIES {
            let size = match sys::get(c_path, c_name, &mut []) {
                Ok(size) => size,
                Err(e) if is_no_attr(&e) => return Ok(None),
                Err(e) => return Err(map_err(path, "getxattr", e)),
            };
            let mut buf = vec![0u8; size];
            match sys::get(c_path, c_name, &mut buf) {
                Ok(n) => {
                    buf.truncate(n);
                    return Ok(Some(buf));
                }
                Err(e) if is_range(&e) => continue,
                Err(e) if is_no_attr(&e) => return Ok(None),
                Err(e) => return Err(map_err(path, "getxattr", e)),
            }
        }
        Err(FsError::io(path, io::Error::from_raw_os_error(libc::ERANGE)))
    }

    /// Full attribute names (with namespace) present on `path`
    fn list_names(&self, path: &Path, c_path: &CString) -> Result<Vec<String>> {
        for _ in 0..MAX_RANGE_RETRIES {
            let size = sys::list(c_path, &mut []).map_err(|e| map_err(path, "listxattr", e))?;
            if size == 0 {
                return Ok(Vec::new());
            }
            let mut buf = vec![0u8; size];
            match sys::list(c_path, &mut buf) {
                Ok(n) => {
                    buf.truncate(n);
                    return Ok(buf
                        .split(|b| *b == 0)
                        .filter(|raw| !raw.is_empty())
                        .filter_map(|raw| std::str::from_utf8(raw).ok())
                        .filter_map(|full| self.strip_namespace(full))
                        .map(str::to_owned)
                        .collect());
                }
                Err(e) if is_range(&e) => continue,
                Err(e) => return Err(map_err(path, "listxattr", e)),
            }
        }
        Err(FsError::io(path, io::Error::from_raw_os_error(libc::ERANGE)))
    }
}

impl AttributeStore for XattrStore {
    fn backend_name(&self) -> &'static str {
        "xattr"
    }

    #[instrument(skip(self, value), fields(path = %path.display(), len = value.len()))]
    fn set_attribute(&self, path: &Path, name: &str, value: &[u8]) -> Result<()> {
        let c_name = self.full_name(name)?;
        let c_path = c_path(path)?;
        let _guard = self.coordination.write(path);
        sys::set(&c_path, &c_name, value).map_err(|e| map_err(path, "setxattr", e))?;
        trace!(name, "xattr written");
        Ok(())
    }

    fn get_attribute(&self, path: &Path, name: &str) -> Result<Option<Vec<u8>>> {
        let c_name = self.full_name(name)?;
        let c_path = c_path(path)?;
        let _guard = self.coordination.read(path);
        self.read_value(path, &c_path, &c_name)
    }

    fn get_all_attributes(&self, path: &Path) -> Result<AttributeRecord> {
        let c_path = c_path(path)?;
        let _guard = self.coordination.read(path);
        let mut record = AttributeRecord::new();
        for name in self.list_names(path, &c_path)? {
            let c_name = self.full_name(&name)?;
            // Removed between list and read
            if let Some(value) = self.read_value(path, &c_path, &c_name)? {
                record.insert(name, value);
            }
        }
        Ok(record)
    }

    fn remove_attribute(&self, path: &Path, name: &str) -> Result<bool> {
        let c_name = self.full_name(name)?;
        let c_path = c_path(path)?;
        let _guard = self.coordination.write(path);
        match sys::remove(&c_path, &c_name) {
            Ok(()) => Ok(true),
            Err(e) if is_no_attr(&e) => Ok(false),
            Err(e) => Err(map_err(path, "removexattr", e)),
        }
    }

    fn has_extended_attributes(&self, path: &Path) -> Result<bool> {
        let c_path = c_path(path)?;
        let _guard = self.coordination.read(path);
        Ok(!self.list_names(path, &c_path)?.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::TempDir;

    use super::*;

    /// Returns `None` when the temp filesystem has no user xattrs
    fn capable_store(dir: &TempDir) -> Option<(XattrStore, std::path::PathBuf)> {
        let file = dir.path().join("support.txt");
        fs::write(&file, b"x").unwrap();
        let store = XattrStore::new("user.treesync", None);
        match store.set_attribute(&file, "support-check", b"1") {
            Ok(()) => {
                store.remove_attribute(&file, "support-check").unwrap();
                Some((store, file))
            }
            Err(e) if e.is_unsupported() || e.is_permission_denied() => None,
            Err(e) => panic!("unexpected xattr error: {e}"),
        }
    }

    #[test]
    fn test_strip_namespace() {
        let store = XattrStore::new("user.treesync", None);
        assert_eq!(store.strip_namespace("user.treesync.content-digest"), Some("content-digest"));
        assert_eq!(store.strip_namespace("user.treesyncx.other"), None);
        assert_eq!(store.strip_namespace("user.treesync."), None);
        assert_eq!(store.strip_namespace("security.selinux"), None);
    }

    #[test]
    fn test_full_name_rejects_empty_and_nul() {
        let store = XattrStore::new("user.treesync", None);
        assert!(store.full_name("").is_err());
        assert!(store.full_name("a\0b").is_err());
        assert_eq!(
            store.full_name("sync-generation").unwrap().to_str().unwrap(),
            "user.treesync.sync-generation"
        );
    }

    #[test]
    fn test_round_trip_arbitrary_bytes() {
        let dir = TempDir::new().unwrap();
        let Some((store, file)) = capable_store(&dir) else {
            return;
        };
        let value: Vec<u8> = (0..=255u8).collect();

        assert!(!store.has_extended_attributes(&file).unwrap());
        store.set_attribute(&file, "blob", &value).unwrap();
        assert_eq!(store.get_attribute(&file, "blob").unwrap(), Some(value.clone()));
        assert!(store.has_extended_attributes(&file).unwrap());

        store.set_attribute(&file, "empty", b"").unwrap();
        assert_eq!(store.get_attribute(&file, "empty").unwrap(), Some(Vec::new()));

        let all = store.get_all_attributes(&file).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all["blob"], value);
    }

    #[test]
    fn test_missing_attribute_is_none() {
        let dir = TempDir::new().unwrap();
        let Some((store, file)) = capable_store(&dir) else {
            return;
        };
        assert_eq!(store.get_attribute(&file, "never-set").unwrap(), None);
        assert!(!store.remove_attribute(&file, "never-set").unwrap());
    }

    #[test]
    fn test_missing_file_is_not_found() {
        let dir = TempDir::new().unwrap();
        let store = XattrStore::new("user.treesync", None);
        let err = store
            .get_attribute(&dir.path().join("missing"), "k")
            .unwrap_err();
        assert!(matches!(err, FsError::NotFound(_)));
    }
}
