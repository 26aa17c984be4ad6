//! Write coordination for tracked paths
//!
//! Two concerns share one handle:
//!
//! - **Per-path serialization.** Every mutation of a path (symlink
//!   materialization, attribute writes) holds that path's lock for its
//!   duration, so no two mutations of one path interleave. Readers take the
//!   same lock, so they see a value from before or after a write, never a
//!   partial one.
//! - **In-flight registry.** Writes announce the paths they touch. The
//!   watcher asks [`WriteCoordinator::is_self_generated`] to tell its own
//!   filesystem events apart from user activity. A path stays marked for a
//!   grace period after the write completes, since kernel notifications can
//!   arrive later than the write returns. Each registration carries a
//!   [`WriteScope`]: a content write accounts for any event on the path,
//!   an attribute write only for metadata events. A user edit landing in the
//!   grace window of an attribute write is therefore still reported.
//!
//! Locks are not reentrant: a thread holding a path's guard must not call
//! anything that locks the same path again.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tracing::trace;

use crate::paths;

/// Default time a finished write still counts as self-generated
pub const DEFAULT_SELF_WRITE_GRACE: Duration = Duration::from_millis(1000);

/// What a self-write can change about a path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteScope {
    /// The path is created, replaced, renamed or has its data written
    Content,
    /// Only the path's extended attributes change
    Metadata,
}

#[derive(Debug, Default, Clone, Copy)]
struct Span {
    active: usize,
    last_finished: Option<Instant>,
}

impl Span {
    fn is_live(&self, grace: Duration) -> bool {
        self.active > 0 || self.last_finished.is_some_and(|t| t.elapsed() <= grace)
    }
}

#[derive(Debug, Default)]
struct InFlight {
    content: Span,
    metadata: Span,
}

impl InFlight {
    fn span_mut(&mut self, scope: WriteScope) -> &mut Span {
        match scope {
            WriteScope::Content => &mut self.content,
            WriteScope::Metadata => &mut self.metadata,
        }
    }

    fn is_active(&self) -> bool {
        self.content.active > 0 || self.metadata.active > 0
    }
}

#[derive(Debug)]
struct Inner {
    locked: Mutex<HashSet<PathBuf>>,
    released: Condvar,
    in_flight: DashMap<PathBuf, InFlight>,
    grace: Duration,
}

impl Inner {
    fn locked_set(&self) -> MutexGuard<'_, HashSet<PathBuf>> {
        self.locked.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn register(&self, key: &Path, scope: WriteScope) {
        self.in_flight
            .entry(key.to_path_buf())
            .or_default()
            .span_mut(scope)
            .active += 1;
    }

    fn finish(&self, key: &Path, scope: WriteScope) {
        if let Some(mut entry) = self.in_flight.get_mut(key) {
            let span = entry.span_mut(scope);
            span.active = span.active.saturating_sub(1);
            span.last_finished = Some(Instant::now());
        }
    }
}

/// Shared handle serializing writes and tracking in-flight self-writes
///
/// Cloning is cheap; all clones share one lock table and registry.
#[derive(Debug, Clone)]
pub struct WriteCoordinator {
    inner: Arc<Inner>,
}

impl Default for WriteCoordinator {
    fn default() -> Self {
        Self::new(DEFAULT_SELF_WRITE_GRACE)
    }
}

impl WriteCoordinator {
    #[must_use]
    pub fn new(grace: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                locked: Mutex::new(HashSet::new()),
                released: Condvar::new(),
                in_flight: DashMap::new(),
                grace,
            }),
        }
    }

    #[must_use]
    pub fn grace(&self) -> Duration {
        self.inner.grace
    }

    /// Blocks until `path` is free, then holds it until the guard drops
    pub fn lock_path(&self, path: &Path) -> PathGuard {
        let key = paths::stable_key(path);
        let mut locked = self.inner.locked_set();
        while locked.contains(&key) {
            locked = self
                .inner
                .released
                .wait(locked)
                .unwrap_or_else(PoisonError::into_inner);
        }
        locked.insert(key.clone());
        PathGuard {
            inner: Arc::clone(&self.inner),
            key,
        }
    }

    /// Locks `path` and registers a content write of it by this process
    pub fn begin_write(&self, path: &Path) -> WriteGuard {
        self.begin(path, WriteScope::Content)
    }

    /// Locks `path` and registers an attribute-only write of it
    pub fn begin_attribute_write(&self, path: &Path) -> WriteGuard {
        self.begin(path, WriteScope::Metadata)
    }

    fn begin(&self, path: &Path, scope: WriteScope) -> WriteGuard {
        let lock = self.lock_path(path);
        self.inner.register(&lock.key, scope);
        trace!(path = %lock.key.display(), ?scope, "self-write started");
        WriteGuard {
            touched: vec![(lock.key.clone(), scope)],
            inner: Arc::clone(&self.inner),
            lock,
        }
    }

    /// Whether any event on `path` is an expected consequence of our own
    /// content writes
    #[must_use]
    pub fn is_self_generated(&self, path: &Path) -> bool {
        let key = paths::stable_key(path);
        self.inner
            .in_flight
            .get(&key)
            .is_some_and(|entry| entry.content.is_live(self.inner.grace))
    }

    /// Whether a metadata event on `path` is explained by our own writes of
    /// either scope
    #[must_use]
    pub fn is_self_metadata(&self, path: &Path) -> bool {
        let key = paths::stable_key(path);
        let grace = self.inner.grace;
        self.inner
            .in_flight
            .get(&key)
            .is_some_and(|entry| entry.content.is_live(grace) || entry.metadata.is_live(grace))
    }

    /// Drops registry entries whose grace period has passed
    pub fn prune_expired(&self) {
        let grace = self.inner.grace;
        self.inner
            .in_flight
            .retain(|_, entry| entry.content.is_live(grace) || entry.metadata.is_live(grace));
    }

    /// Number of paths with a write currently in progress
    #[must_use]
    pub fn in_flight_count(&self) -> usize {
        self.inner
            .in_flight
            .iter()
            .filter(|entry| entry.is_active())
            .count()
    }
}

/// Exclusive hold on one path; released on drop
#[derive(Debug)]
pub struct PathGuard {
    inner: Arc<Inner>,
    key: PathBuf,
}

impl PathGuard {
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.key
    }
}

impl Drop for PathGuard {
    fn drop(&mut self) {
        let mut locked = self.inner.locked_set();
        locked.remove(&self.key);
        drop(locked);
        self.inner.released.notify_all();
    }
}

/// A registered self-write; its grace period starts when it drops
#[derive(Debug)]
pub struct WriteGuard {
    touched: Vec<(PathBuf, WriteScope)>,
    inner: Arc<Inner>,
    lock: PathGuard,
}

impl WriteGuard {
    /// Registers another path this write creates or removes, such as a
    /// temporary sibling or a sidecar file
    ///
    /// The extra path is registered as a content write but not locked.
    pub fn also_touches(&mut self, path: &Path) {
        let key = paths::stable_key(path);
        if !self.touched.iter().any(|(k, scope)| *k == key && *scope == WriteScope::Content) {
            self.inner.register(&key, WriteScope::Content);
            self.touched.push((key, WriteScope::Content));
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        self.lock.path()
    }
}

impl Drop for WriteGuard {
    fn drop(&mut self) {
        for (key, scope) in &self.touched {
            self.inner.finish(key, *scope);
        }
        trace!(paths = self.touched.len(), "self-write finished");
    }
}
