//! Bounded rescan pool
//!
//! Settled changes are classified off the reactor. Each path gets a lane: a
//! FIFO served by one task at a time, so changes to the same path are
//! classified in the order they settled while different paths proceed in
//! parallel. A semaphore bounds how many classifications (scan + hash) run
//! at once.
//!
//! After [`RescanPool::close`] returns no further event is emitted. A
//! classification already running completes, but its result is discarded.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::{mpsc, RwLock, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};
use treesync_core::domain::ChangeEvent;

use crate::classify::ChangeClassifier;
use crate::queue::CoalescedChange;

struct PoolInner {
    classifier: Arc<ChangeClassifier>,
    permits: Semaphore,
    lanes: DashMap<PathBuf, VecDeque<CoalescedChange>>,
    events: mpsc::Sender<ChangeEvent>,
    cancel: CancellationToken,
    /// Emission gate: senders hold the read side, `close` takes the write side
    open: RwLock<bool>,
}

/// Worker pool classifying settled changes
#[derive(Clone)]
pub struct RescanPool {
    inner: Arc<PoolInner>,
}

impl RescanPool {
    #[must_use]
    pub fn new(
        classifier: Arc<ChangeClassifier>,
        max_concurrent: usize,
        events: mpsc::Sender<ChangeEvent>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                classifier,
                permits: Semaphore::new(max_concurrent.max(1)),
                lanes: DashMap::new(),
                events,
                cancel,
                open: RwLock::new(true),
            }),
        }
    }

    /// Queues `change` on its path's lane
    ///
    /// Must be called from within a Tokio runtime. Changes dispatched after
    /// [`close`](Self::close) are dropped.
    pub fn dispatch(&self, change: CoalescedChange) {
        if self.inner.cancel.is_cancelled() {
            debug!(path = %change.path.display(), "pool closed, dropping change");
            return;
        }

        let path = change.path.clone();
        let start_lane = match self.inner.lanes.entry(path.clone()) {
            Entry::Occupied(mut lane) => {
                lane.get_mut().push_back(change);
                false
            }
            Entry::Vacant(slot) => {
                slot.insert(VecDeque::from([change]));
                true
            }
        };

        if start_lane {
            let inner = Arc::clone(&self.inner);
            tokio::spawn(async move { inner.run_lane(path).await });
        }
    }

    /// Number of paths with queued or running work
    #[must_use]
    pub fn active_lanes(&self) -> usize {
        self.inner.lanes.len()
    }

    /// Stops all emission and drops queued work
    pub async fn close(&self) {
        self.inner.cancel.cancel();
        *self.inner.open.write().await = false;
        self.inner.lanes.clear();
        debug!("rescan pool closed");
    }
}

impl PoolInner {
    async fn run_lane(&self, path: PathBuf) {
        loop {
            let next = match self.lanes.get_mut(&path) {
                Some(mut lane) => lane.pop_front(),
                None => return,
            };
            match next {
                Some(change) => self.process(change).await,
                None => {
                    // A dispatch may have refilled the lane since the pop.
                    if self.lanes.remove_if(&path, |_, lane| lane.is_empty()).is_some()
                        || !self.lanes.contains_key(&path)
                    {
                        return;
                    }
                }
            }
        }
    }

    async fn process(&self, change: CoalescedChange) {
        let Ok(permit) = self.permits.acquire().await else {
            return;
        };
        if self.cancel.is_cancelled() {
            return;
        }

        let path = change.path.clone();
        let classifier = Arc::clone(&self.classifier);
        let outcome = tokio::task::spawn_blocking(move || classifier.classify(&change)).await;
        drop(permit);

        let event = match outcome {
            Ok(Ok(Some(event))) => event,
            Ok(Ok(None)) => return,
            Ok(Err(e)) => {
                warn!(path = %path.display(), error = %e, "rescan failed, dropping change");
                return;
            }
            Err(e) => {
                error!(path = %path.display(), error = %e, "rescan task failed");
                return;
            }
        };

        let open = self.open.read().await;
        if !*open || self.cancel.is_cancelled() {
            debug!(path = %path.display(), "watcher stopped, discarding classified change");
            return;
        }
        debug!(path = %event.path.display(), kind = %event.kind, "change classified");
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => {
                debug!(path = %path.display(), "watcher stopped while emitting");
            }
            sent = self.events.send(event) => {
                if sent.is_err() {
                    debug!("change receiver dropped");
                }
            }
        }
        drop(open);
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::Path;
    use std::time::Duration;

    use tempfile::TempDir;
    use treesync_core::config::SymlinkPolicy;
    use treesync_core::domain::ChangeKind;
    use treesync_fs::{DirectoryScanner, SymlinkNormalizer};

    use super::*;
    use crate::events::RawKind;

    fn pool(root: &Path) -> (RescanPool, mpsc::Receiver<ChangeEvent>) {
        let scanner = DirectoryScanner::new(SymlinkNormalizer::new(SymlinkPolicy::Report, vec![root.to_path_buf()]));
        let classifier = Arc::new(ChangeClassifier::new(Arc::new(scanner), None));
        let (tx, rx) = mpsc::channel(16);
        (RescanPool::new(classifier, 2, tx, CancellationToken::new()), rx)
    }

    fn created(root: &Path, path: PathBuf) -> CoalescedChange {
        CoalescedChange {
            path,
            root: root.to_path_buf(),
            kind: RawKind::Create,
            saw_create: true,
            from: None,
            is_dir: None,
            event_count: 1,
        }
    }

    #[tokio::test]
    async fn test_dispatch_emits_classified_events() {
        let dir = TempDir::new().unwrap();
        let root = fs::canonicalize(dir.path()).unwrap();
        for name in ["a.txt", "b.txt", "c.txt"] {
            fs::write(root.join(name), name).unwrap();
        }
        let (pool, mut rx) = pool(&root);

        for name in ["a.txt", "b.txt", "c.txt"] {
            pool.dispatch(created(&root, root.join(name)));
        }

        let mut paths = Vec::new();
        for _ in 0..3 {
            let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
                .await
                .unwrap()
                .unwrap();
            assert_eq!(event.kind, ChangeKind::Created);
            paths.push(event.path);
        }
        paths.sort();
        assert_eq!(paths, vec![root.join("a.txt"), root.join("b.txt"), root.join("c.txt")]);
    }

    #[tokio::test]
    async fn test_closed_pool_emits_nothing() {
        let dir = TempDir::new().unwrap();
        let root = fs::canonicalize(dir.path()).unwrap();
        fs::write(root.join("a.txt"), b"a").unwrap();
        let (pool, mut rx) = pool(&root);

        pool.close().await;
        pool.dispatch(created(&root, root.join("a.txt")));

        let received = tokio::time::timeout(Duration::from_millis(200), rx.recv()).await;
        assert!(received.is_err());
        assert_eq!(pool.active_lanes(), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_close_discards_rescan_in_progress() {
        let dir = TempDir::new().unwrap();
        let root = fs::canonicalize(dir.path()).unwrap();
        let big = root.join("big.bin");
        // Sparse, but every byte is still read and hashed.
        fs::File::create(&big).unwrap().set_len(256 * 1024 * 1024).unwrap();
        let (pool, mut rx) = pool(&root);

        pool.dispatch(created(&root, big));
        let started = async {
            while pool.inner.permits.available_permits() == 2 {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        };
        tokio::time::timeout(Duration::from_secs(5), started).await.unwrap();

        pool.close().await;

        let finished = async {
            while pool.inner.permits.available_permits() < 2 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        };
        tokio::time::timeout(Duration::from_secs(30), finished).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(rx.try_recv().is_err());
    }
}
