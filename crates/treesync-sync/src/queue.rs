//! Debounced change queue
//!
//! Collects admitted raw changes and coalesces them per path. A path settles
//! once it has been quiet for the debounce window; every new event for it
//! restarts the window. One path has at most one pending entry, which is
//! what keeps same-path processing in arrival order.
//!
//! A rename is reported by the backend as a remove of the source, a create
//! of the destination and a rename pairing both. The rename absorbs the
//! pending remove of its source, so a move surfaces once, on the
//! destination.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tracing::debug;

use crate::events::{RawChange, RawKind};

/// The merged state of a burst of events for one path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoalescedChange {
    pub path: PathBuf,
    /// Tracked root the path was admitted under
    pub root: PathBuf,
    /// Merged hint, see [`RawKind::merge`]
    pub kind: RawKind,
    /// A create was seen at some point in the burst
    pub saw_create: bool,
    /// Source of the first rename in the burst
    pub from: Option<PathBuf>,
    pub is_dir: Option<bool>,
    /// Number of raw events merged into this one
    pub event_count: usize,
}

impl CoalescedChange {
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

struct Pending {
    change: CoalescedChange,
    last_seen: Instant,
}

/// Queue that coalesces rapid filesystem changes into settled ones
pub struct DebouncedChangeQueue {
    pending: HashMap<PathBuf, Pending>,
    debounce_delay: Duration,
}

impl DebouncedChangeQueue {
    #[must_use]
    pub fn new(debounce_delay: Duration) -> Self {
        Self {
            pending: HashMap::new(),
            debounce_delay,
        }
    }

    #[must_use]
    pub fn debounce_delay(&self) -> Duration {
        self.debounce_delay
    }

    /// Merges `change` into the pending entry for its path
    pub fn push(&mut self, root: &Path, change: RawChange) {
        self.push_at(root, change, Instant::now());
    }

    pub(crate) fn push_at(&mut self, root: &Path, change: RawChange, now: Instant) {
        let RawChange {
            path,
            mut kind,
            mut from,
            is_dir,
        } = change;

        if kind == RawKind::Rename {
            if let Some(source) = from.as_deref().and_then(|src| self.absorb_source(src)) {
                debug!(from = %source.path.display(), to = %path.display(), "rename absorbed source removal");
                if source.saw_create {
                    // The source appeared inside this window and was never
                    // reported, so the destination is simply new.
                    kind = RawKind::Create;
                    from = None;
                }
            }
        }

        match self.pending.get_mut(&path) {
            Some(pending) => {
                let merged = &mut pending.change;
                merged.kind = merged.kind.merge(kind);
                merged.saw_create |= kind == RawKind::Create;
                if merged.from.is_none() {
                    merged.from = from;
                }
                merged.is_dir = is_dir.or(merged.is_dir);
                merged.event_count += 1;
                pending.last_seen = now;
            }
            None => {
                let change = CoalescedChange {
                    path: path.clone(),
                    root: root.to_path_buf(),
                    kind,
                    saw_create: kind == RawKind::Create,
                    from,
                    is_dir,
                    event_count: 1,
                };
                self.pending.insert(
                    path,
                    Pending {
                        change,
                        last_seen: now,
                    },
                );
            }
        }
    }

    /// Takes the pending entry of a rename source if it is the removal half
    /// of that rename
    fn absorb_source(&mut self, source: &Path) -> Option<CoalescedChange> {
        let is_removal = self
            .pending
            .get(source)
            .is_some_and(|p| p.change.kind == RawKind::Remove);
        if is_removal {
            self.pending.remove(source).map(|p| p.change)
        } else {
            None
        }
    }

    /// Removes and returns every change quiet for at least the debounce delay
    ///
    /// Settled changes come out oldest first.
    pub fn poll(&mut self) -> Vec<CoalescedChange> {
        self.poll_at(Instant::now())
    }

    pub(crate) fn poll_at(&mut self, now: Instant) -> Vec<CoalescedChange> {
        let delay = self.debounce_delay;
        let mut settled_paths: Vec<(Instant, PathBuf)> = self
            .pending
            .iter()
            .filter(|(_, p)| now.saturating_duration_since(p.last_seen) >= delay)
            .map(|(path, p)| (p.last_seen, path.clone()))
            .collect();
        settled_paths.sort();

        let settled: Vec<CoalescedChange> = settled_paths
            .into_iter()
            .filter_map(|(_, path)| self.pending.remove(&path))
            .map(|p| p.change)
            .collect();

        if !settled.is_empty() {
            debug!(count = settled.len(), "settled change events");
        }
        settled
    }

    /// When the earliest pending path settles, if any is pending
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending
            .values()
            .map(|p| p.last_seen + self.debounce_delay)
            .min()
    }

    /// Drops every pending change
    pub fn clear(&mut self) {
        self.pending.clear();
    }

    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ROOT: &str = "/r";

    fn queue(ms: u64) -> DebouncedChangeQueue {
        DebouncedChangeQueue::new(Duration::from_millis(ms))
    }

    #[test]
    fn test_push_coalesces_same_path() {
        let mut q = queue(100);
        let t0 = Instant::now();
        q.push_at(Path::new(ROOT), RawChange::new("/r/a", RawKind::Create), t0);
        q.push_at(Path::new(ROOT), RawChange::new("/r/a", RawKind::Data), t0);
        q.push_at(Path::new(ROOT), RawChange::new("/r/b", RawKind::Data), t0);
        assert_eq!(q.pending_count(), 2);

        let settled = q.poll_at(t0 + Duration::from_millis(100));
        let a = settled.iter().find(|c| c.path == Path::new("/r/a")).unwrap();
        assert_eq!(a.kind, RawKind::Create);
        assert!(a.saw_create);
        assert_eq!(a.event_count, 2);
        assert_eq!(a.root, Path::new(ROOT));
    }

    #[test]
    fn test_create_then_remove_keeps_create_flag() {
        let mut q = queue(0);
        let t0 = Instant::now();
        q.push_at(Path::new(ROOT), RawChange::new("/r/tmp", RawKind::Create), t0);
        q.push_at(Path::new(ROOT), RawChange::new("/r/tmp", RawKind::Remove), t0);

        let settled = q.poll_at(t0);
        assert_eq!(settled[0].kind, RawKind::Remove);
        assert!(settled[0].saw_create);
    }

    #[test]
    fn test_rename_source_is_kept() {
        let mut q = queue(0);
        let t0 = Instant::now();
        q.push_at(Path::new(ROOT), RawChange::renamed("/r/old", "/r/new"), t0);
        q.push_at(Path::new(ROOT), RawChange::new("/r/new", RawKind::Metadata), t0);

        let settled = q.poll_at(t0);
        assert_eq!(settled[0].kind, RawKind::Rename);
        assert_eq!(settled[0].from.as_deref(), Some(Path::new("/r/old")));
    }

    #[test]
    fn test_rename_absorbs_source_removal() {
        let mut q = queue(0);
        let t0 = Instant::now();
        // inotify order: Name(From), Name(To), Name(Both)
        q.push_at(Path::new(ROOT), RawChange::new("/r/a", RawKind::Remove), t0);
        q.push_at(Path::new(ROOT), RawChange::new("/r/c", RawKind::Create), t0);
        q.push_at(Path::new(ROOT), RawChange::renamed("/r/a", "/r/c"), t0);
        assert_eq!(q.pending_count(), 1);

        let settled = q.poll_at(t0);
        assert_eq!(settled.len(), 1);
        assert_eq!(settled[0].path, Path::new("/r/c"));
        assert_eq!(settled[0].kind, RawKind::Rename);
        assert_eq!(settled[0].from.as_deref(), Some(Path::new("/r/a")));
    }

    #[test]
    fn test_rename_of_unreported_file_is_a_create() {
        let mut q = queue(0);
        let t0 = Instant::now();
        q.push_at(Path::new(ROOT), RawChange::new("/r/a", RawKind::Create), t0);
        q.push_at(Path::new(ROOT), RawChange::new("/r/a", RawKind::Remove), t0);
        q.push_at(Path::new(ROOT), RawChange::renamed("/r/a", "/r/c"), t0);

        let settled = q.poll_at(t0);
        assert_eq!(settled.len(), 1);
        assert_eq!(settled[0].kind, RawKind::Create);
        assert!(settled[0].from.is_none());
    }

    #[test]
    fn test_rename_keeps_unrelated_source_activity() {
        let mut q = queue(0);
        let t0 = Instant::now();
        q.push_at(Path::new(ROOT), RawChange::new("/r/a", RawKind::Data), t0);
        q.push_at(Path::new(ROOT), RawChange::renamed("/r/a", "/r/c"), t0);
        assert_eq!(q.pending_count(), 2);
    }

    #[test]
    fn test_poll_returns_nothing_for_recent_events() {
        let mut q = queue(60_000);
        q.push(Path::new(ROOT), RawChange::new("/r/a", RawKind::Data));
        assert!(q.poll().is_empty());
        assert_eq!(q.pending_count(), 1);
    }

    #[test]
    fn test_coalescing_resets_window() {
        let mut q = queue(50);
        let t0 = Instant::now();
        q.push_at(Path::new(ROOT), RawChange::new("/r/a", RawKind::Data), t0);
        q.push_at(
            Path::new(ROOT),
            RawChange::new("/r/a", RawKind::Data),
            t0 + Duration::from_millis(30),
        );

        assert!(q.poll_at(t0 + Duration::from_millis(60)).is_empty());
        assert_eq!(q.poll_at(t0 + Duration::from_millis(80)).len(), 1);
        assert!(q.is_empty());
    }

    #[test]
    fn test_partial_settlement_in_age_order() {
        let mut q = queue(50);
        let t0 = Instant::now();
        q.push_at(Path::new(ROOT), RawChange::new("/r/b", RawKind::Data), t0);
        q.push_at(Path::new(ROOT), RawChange::new("/r/a", RawKind::Data), t0 + Duration::from_millis(10));
        q.push_at(Path::new(ROOT), RawChange::new("/r/c", RawKind::Data), t0 + Duration::from_millis(100));

        let settled = q.poll_at(t0 + Duration::from_millis(70));
        let paths: Vec<_> = settled.iter().map(|c| c.path.clone()).collect();
        assert_eq!(paths, vec![PathBuf::from("/r/b"), PathBuf::from("/r/a")]);
        assert_eq!(q.pending_count(), 1);
    }

    #[test]
    fn test_next_deadline() {
        let mut q = queue(50);
        assert!(q.next_deadline().is_none());
        let t0 = Instant::now();
        q.push_at(Path::new(ROOT), RawChange::new("/r/a", RawKind::Data), t0 + Duration::from_millis(20));
        q.push_at(Path::new(ROOT), RawChange::new("/r/b", RawKind::Data), t0);
        assert_eq!(q.next_deadline(), Some(t0 + Duration::from_millis(50)));
        q.clear();
        assert!(q.next_deadline().is_none());
    }
}
