//! Change watcher
//!
//! [`ChangeWatcher`] owns the notify backend and the reactor task:
//!
//! ```text
//! inotify / kqueue
//!       │  callback thread: map_notify_event
//!       ▼
//!  mpsc<RawChange> ──→ reactor: EventFilter ──→ DebouncedChangeQueue
//!                                                   │ settled
//!                                                   ▼
//!                     mpsc<ChangeEvent> ←── RescanPool
//! ```
//!
//! The reactor suspends until a notification arrives or the earliest
//! pending path settles; it never touches the disk itself.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use treesync_core::config::Config;
use treesync_core::domain::{ChangeEvent, WatchConfiguration};
use treesync_fs::WriteCoordinator;

use crate::classify::ChangeClassifier;
use crate::events::{map_notify_event, RawChange};
use crate::filter::EventFilter;
use crate::pool::RescanPool;
use crate::queue::DebouncedChangeQueue;
use crate::{Result, WatchError};

/// Default quiet period before a path is classified
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(300);

/// Lifecycle of a [`ChangeWatcher`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatcherState {
    Stopped,
    Watching,
}

/// Tuning that does not change while watching
#[derive(Debug, Clone)]
pub struct WatcherOptions {
    pub debounce: Duration,
    /// Capacity of the raw and classified channels
    pub event_capacity: usize,
    pub max_concurrent_rescans: usize,
    /// Directories whose events never surface, e.g. the sidecar index
    pub internal_dirs: Vec<PathBuf>,
}

impl Default for WatcherOptions {
    fn default() -> Self {
        Self {
            debounce: DEFAULT_DEBOUNCE,
            event_capacity: 1024,
            max_concurrent_rescans: 4,
            internal_dirs: Vec::new(),
        }
    }
}

impl WatcherOptions {
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            debounce: config.watch.debounce(),
            event_capacity: config.watch.event_capacity.max(1),
            max_concurrent_rescans: config.workers.max_concurrent_rescans,
            internal_dirs: vec![config.attributes.sidecar_dir.clone()],
        }
    }
}

struct Running {
    notifier: RecommendedWatcher,
    subscribed: BTreeSet<PathBuf>,
    cancel: CancellationToken,
    reactor: JoinHandle<()>,
    pool: RescanPool,
}

/// Watches tracked trees and emits classified [`ChangeEvent`]s
///
/// Events are delivered on the receiver returned by [`ChangeWatcher::new`].
/// Configuration may change while watching; path changes resubscribe the
/// backend, the other settings apply to the next event.
pub struct ChangeWatcher {
    config: watch::Sender<WatchConfiguration>,
    options: WatcherOptions,
    classifier: Arc<ChangeClassifier>,
    coordinator: Option<WriteCoordinator>,
    events: mpsc::Sender<ChangeEvent>,
    running: Option<Running>,
}

impl ChangeWatcher {
    /// `coordinator` must be the one shared with the normalizer and the
    /// attribute store for self-generated events to be recognized
    #[must_use]
    pub fn new(
        config: WatchConfiguration,
        options: WatcherOptions,
        classifier: ChangeClassifier,
        coordinator: Option<WriteCoordinator>,
    ) -> (Self, mpsc::Receiver<ChangeEvent>) {
        let (events, events_rx) = mpsc::channel(options.event_capacity.max(1));
        let (config, _) = watch::channel(config);
        let watcher = Self {
            config,
            options,
            classifier: Arc::new(classifier),
            coordinator,
            events,
            running: None,
        };
        (watcher, events_rx)
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Subscribes to every tracked path and starts the reactor
    ///
    /// # Errors
    /// [`WatchError::AlreadyWatching`] if already started,
    /// [`WatchError::PathNotFound`] if a tracked path is missing, or the
    /// backend error that prevented a subscription.
    pub async fn start_watching(&mut self) -> Result<()> {
        if self.running.is_some() {
            return Err(WatchError::AlreadyWatching);
        }
        let paths = self.config.borrow().tracked_paths.clone();
        for path in &paths {
            ensure_exists(path)?;
        }

        let capacity = self.options.event_capacity.max(1);
        let (raw_tx, raw_rx) = mpsc::channel::<RawChange>(capacity);
        let mut notifier = RecommendedWatcher::new(
            move |res: std::result::Result<notify::Event, notify::Error>| match res {
                Ok(event) => {
                    if let Some(change) = map_notify_event(&event) {
                        if raw_tx.blocking_send(change).is_err() {
                            debug!("reactor gone, dropping notification");
                        }
                    }
                }
                Err(err) => error!(error = %err, "notification backend error"),
            },
            notify::Config::default(),
        )?;
        for path in &paths {
            notifier.watch(path, RecursiveMode::Recursive)?;
            debug!(path = %path.display(), "subscribed");
        }

        let cancel = CancellationToken::new();
        let pool = RescanPool::new(
            Arc::clone(&self.classifier),
            self.options.max_concurrent_rescans,
            self.events.clone(),
            cancel.child_token(),
        );
        let filter = self
            .options
            .internal_dirs
            .iter()
            .fold(EventFilter::new(self.coordinator.clone()), |filter, dir| {
                filter.with_ignored_dir(dir.clone())
            });
        let reactor = Reactor {
            raw: raw_rx,
            config: self.config.subscribe(),
            filter,
            queue: DebouncedChangeQueue::new(self.options.debounce),
            pool: pool.clone(),
            coordinator: self.coordinator.clone(),
            cancel: cancel.clone(),
        };

        self.running = Some(Running {
            notifier,
            subscribed: paths,
            cancel,
            reactor: tokio::spawn(reactor.run()),
            pool,
        });
        info!(
            paths = self.config.borrow().tracked_paths.len(),
            debounce_ms = self.options.debounce.as_millis() as u64,
            "watching started"
        );
        Ok(())
    }

    /// Releases every subscription and stops emission
    ///
    /// Pending debounce timers are dropped and rescans still queued never
    /// emit. Once this returns no further event is delivered.
    pub async fn stop_watching(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };
        running.cancel.cancel();
        drop(running.notifier);
        if let Err(e) = running.reactor.await {
            warn!(error = %e, "reactor task ended abnormally");
        }
        running.pool.close().await;
        info!("watching stopped");
    }

    // ========================================================================
    // Configuration
    // ========================================================================

    /// Replaces the tracked paths, resubscribing if watching
    ///
    /// # Errors
    /// While watching: [`WatchError::PathNotFound`] for a missing new path,
    /// or the backend error of a failed subscription. The configuration is
    /// left unchanged on error.
    pub fn set_paths<I, P>(&mut self, paths: I) -> Result<()>
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        let paths: BTreeSet<PathBuf> = paths.into_iter().map(Into::into).collect();

        if let Some(running) = self.running.as_mut() {
            let added: Vec<PathBuf> = paths.difference(&running.subscribed).cloned().collect();
            for path in &added {
                ensure_exists(path)?;
            }
            for path in added {
                running.notifier.watch(&path, RecursiveMode::Recursive)?;
                debug!(path = %path.display(), "subscribed");
                running.subscribed.insert(path);
            }
            let removed: Vec<PathBuf> = running.subscribed.difference(&paths).cloned().collect();
            for path in removed {
                if let Err(e) = running.notifier.unwatch(&path) {
                    warn!(path = %path.display(), error = %e, "unsubscribe failed");
                }
                running.subscribed.remove(&path);
                debug!(path = %path.display(), "unsubscribed");
            }
        }

        self.config.send_modify(|config| config.tracked_paths = paths);
        Ok(())
    }

    /// Toggles file-level events; `false` is coarse, directory-only mode
    pub fn should_observe_files(&self, observe: bool) {
        self.config.send_modify(|config| config.observe_file_events = observe);
    }

    pub fn should_ignore_self(&self, ignore: bool) {
        self.config.send_modify(|config| config.ignore_self_generated = ignore);
    }

    #[must_use]
    pub fn state(&self) -> WatcherState {
        if self.running.is_some() {
            WatcherState::Watching
        } else {
            WatcherState::Stopped
        }
    }

    #[must_use]
    pub fn tracked_paths(&self) -> BTreeSet<PathBuf> {
        self.config.borrow().tracked_paths.clone()
    }

    #[must_use]
    pub fn observe_files(&self) -> bool {
        self.config.borrow().observe_file_events
    }

    #[must_use]
    pub fn ignore_self(&self) -> bool {
        self.config.borrow().ignore_self_generated
    }

    /// Snapshot of the current configuration
    #[must_use]
    pub fn configuration(&self) -> WatchConfiguration {
        self.config.borrow().clone()
    }
}

impl Drop for ChangeWatcher {
    fn drop(&mut self) {
        if let Some(running) = &self.running {
            running.cancel.cancel();
        }
    }
}

fn ensure_exists(path: &Path) -> Result<()> {
    match path.try_exists() {
        Ok(true) => Ok(()),
        _ => Err(WatchError::PathNotFound(path.to_path_buf())),
    }
}

// ============================================================================
// Reactor
// ============================================================================

struct Reactor {
    raw: mpsc::Receiver<RawChange>,
    config: watch::Receiver<WatchConfiguration>,
    filter: EventFilter,
    queue: DebouncedChangeQueue,
    pool: RescanPool,
    coordinator: Option<WriteCoordinator>,
    cancel: CancellationToken,
}

impl Reactor {
    async fn run(mut self) {
        loop {
            let deadline = self.queue.next_deadline();
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                raw = self.raw.recv() => match raw {
                    Some(change) => self.admit(change),
                    None => break,
                },
                () = settle(deadline) => self.flush(),
            }
        }
        if !self.queue.is_empty() {
            debug!(pending = self.queue.pending_count(), "discarding unsettled changes");
        }
        self.queue.clear();
    }

    fn admit(&mut self, change: RawChange) {
        let admitted = {
            let config = self.config.borrow();
            self.filter.admit(change, &config)
        };
        if let Some((root, change)) = admitted {
            debug!(path = %change.path.display(), kind = ?change.kind, "change admitted");
            self.queue.push(&root, change);
        }
    }

    fn flush(&mut self) {
        for change in self.queue.poll() {
            self.pool.dispatch(change);
        }
        if let Some(coordinator) = &self.coordinator {
            coordinator.prune_expired();
        }
    }
}

/// Resolves at `deadline`, or never without one
async fn settle(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(tokio::time::Instant::from_std(deadline)).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::TempDir;
    use treesync_core::config::SymlinkPolicy;
    use treesync_fs::{DirectoryScanner, SymlinkNormalizer};

    use super::*;

    fn watcher(root: &Path) -> (ChangeWatcher, mpsc::Receiver<ChangeEvent>) {
        let scanner = DirectoryScanner::new(SymlinkNormalizer::new(SymlinkPolicy::Report, vec![root.to_path_buf()]));
        let classifier = ChangeClassifier::new(Arc::new(scanner), None);
        let options = WatcherOptions {
            debounce: Duration::from_millis(50),
            ..WatcherOptions::default()
        };
        ChangeWatcher::new(WatchConfiguration::new([root]), options, classifier, None)
    }

    #[tokio::test]
    async fn test_state_transitions() {
        let dir = TempDir::new().unwrap();
        let (mut watcher, _rx) = watcher(dir.path());
        assert_eq!(watcher.state(), WatcherState::Stopped);

        watcher.start_watching().await.unwrap();
        assert_eq!(watcher.state(), WatcherState::Watching);
        assert!(matches!(watcher.start_watching().await, Err(WatchError::AlreadyWatching)));

        watcher.stop_watching().await;
        assert_eq!(watcher.state(), WatcherState::Stopped);
        watcher.stop_watching().await;

        watcher.start_watching().await.unwrap();
        watcher.stop_watching().await;
    }

    #[tokio::test]
    async fn test_missing_path_is_rejected() {
        let dir = TempDir::new().unwrap();
        let (mut watcher, _rx) = watcher(&dir.path().join("missing"));
        assert!(matches!(watcher.start_watching().await, Err(WatchError::PathNotFound(_))));
        assert_eq!(watcher.state(), WatcherState::Stopped);
    }

    #[tokio::test]
    async fn test_setters_update_configuration() {
        let dir = TempDir::new().unwrap();
        let other = TempDir::new().unwrap();
        let (mut watcher, _rx) = watcher(dir.path());
        watcher.start_watching().await.unwrap();

        watcher.should_observe_files(false);
        watcher.should_ignore_self(false);
        watcher.set_paths([other.path()]).unwrap();

        assert!(!watcher.observe_files());
        assert!(!watcher.ignore_self());
        assert_eq!(watcher.tracked_paths(), BTreeSet::from([other.path().to_path_buf()]));

        let missing = other.path().join("missing");
        assert!(watcher.set_paths([missing]).is_err());
        assert_eq!(watcher.tracked_paths(), BTreeSet::from([other.path().to_path_buf()]));
        watcher.stop_watching().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_created_file_is_reported() {
        let dir = TempDir::new().unwrap();
        let root = fs::canonicalize(dir.path()).unwrap();
        let (mut watcher, mut rx) = watcher(&root);
        watcher.start_watching().await.unwrap();

        fs::write(root.join("new.txt"), b"hello").unwrap();

        let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.path, root.join("new.txt"));
        watcher.stop_watching().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_no_events_after_stop() {
        let dir = TempDir::new().unwrap();
        let root = fs::canonicalize(dir.path()).unwrap();
        let (mut watcher, mut rx) = watcher(&root);
        watcher.start_watching().await.unwrap();
        watcher.stop_watching().await;

        fs::write(root.join("late.txt"), b"late").unwrap();

        let received = tokio::time::timeout(Duration::from_millis(400), rx.recv()).await;
        assert!(received.is_err());
    }
}
