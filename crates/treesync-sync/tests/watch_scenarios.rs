//! Watcher scenarios over real temporary trees

#![cfg(unix)]

use std::fs;
use std::os::unix::fs::symlink;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tokio::sync::mpsc;
use tokio::time::timeout;
use treesync_core::config::SymlinkPolicy;
use treesync_core::domain::{ChangeEvent, ChangeKind, HashAlgorithm, WatchConfiguration};
use treesync_fs::attributes::write_content_digest;
use treesync_fs::{
    AttributeStore, ContentHasher, DirectoryScanner, SidecarStore, SymlinkNormalizer, WriteCoordinator,
};
use treesync_sync::{ChangeClassifier, ChangeWatcher, WatcherOptions};

const DEBOUNCE: Duration = Duration::from_millis(200);

struct Harness {
    _tree: TempDir,
    _index: TempDir,
    root: PathBuf,
    index: PathBuf,
    coordinator: WriteCoordinator,
    normalizer: SymlinkNormalizer,
    watcher: ChangeWatcher,
    events: mpsc::Receiver<ChangeEvent>,
}

fn harness(config: impl FnOnce(PathBuf) -> WatchConfiguration) -> Harness {
    let tree = TempDir::new().unwrap();
    let index_dir = TempDir::new().unwrap();
    let root = fs::canonicalize(tree.path()).unwrap();
    let index = fs::canonicalize(index_dir.path()).unwrap();

    let coordinator = WriteCoordinator::default();
    let store: Arc<dyn AttributeStore> = Arc::new(SidecarStore::new(index.clone(), Some(coordinator.clone())));
    let normalizer =
        SymlinkNormalizer::new(SymlinkPolicy::Replace, vec![root.clone()]).with_coordinator(coordinator.clone());
    let scanner = DirectoryScanner::new(normalizer.clone()).with_attribute_store(Arc::clone(&store));
    let classifier = ChangeClassifier::new(Arc::new(scanner), Some(store));

    let options = WatcherOptions {
        debounce: DEBOUNCE,
        internal_dirs: vec![index.clone()],
        ..WatcherOptions::default()
    };
    let (watcher, events) = ChangeWatcher::new(config(root.clone()), options, classifier, Some(coordinator.clone()));

    Harness {
        _tree: tree,
        _index: index_dir,
        root,
        index,
        coordinator,
        normalizer,
        watcher,
        events,
    }
}

async fn next_event(events: &mut mpsc::Receiver<ChangeEvent>, within: Duration) -> Option<ChangeEvent> {
    timeout(within, events.recv()).await.ok().flatten()
}

fn sha1(path: &Path) -> treesync_core::domain::ContentDigest {
    ContentHasher::new().digest_file(HashAlgorithm::Sha1, path).unwrap()
}

#[tokio::test(flavor = "multi_thread")]
async fn self_generated_normalization_is_silent_but_user_edit_is_reported() {
    let mut h = harness(|root| WatchConfiguration::new([root]));
    let a = h.root.join("a.txt");
    let b = h.root.join("b");
    fs::write(&a, b"hello").unwrap();
    symlink(&a, &b).unwrap();

    // Seeded outside the coordinator so the seed itself is not a self-write.
    let seed = SidecarStore::new(h.index.clone(), None);
    write_content_digest(&seed, &a, &sha1(&a)).unwrap();

    h.watcher.start_watching().await.unwrap();
    assert!(h.watcher.ignore_self());

    let normalized = h.normalizer.normalize(&b).unwrap();
    assert!(normalized.entry().is_regular_file());
    assert!(fs::symlink_metadata(&b).unwrap().file_type().is_file());
    assert!(h.coordinator.is_self_generated(&b));

    assert!(next_event(&mut h.events, DEBOUNCE * 3).await.is_none());

    fs::write(&a, b"hello, edited").unwrap();

    let event = next_event(&mut h.events, Duration::from_secs(5))
        .await
        .expect("edit was not reported");
    assert_eq!(event.kind, ChangeKind::Modified);
    assert_eq!(event.path, a);
    assert_eq!(
        event.previous_digest,
        Some(ContentHasher::new().digest_str(HashAlgorithm::Sha1, "hello"))
    );
    assert_eq!(event.current_digest, Some(sha1(&a)));

    assert!(next_event(&mut h.events, Duration::from_secs(1)).await.is_none());
    h.watcher.stop_watching().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn self_generated_events_surface_when_not_ignored() {
    let mut h = harness(|root| WatchConfiguration {
        ignore_self_generated: false,
        ..WatchConfiguration::new([root])
    });
    let a = h.root.join("a.txt");
    let b = h.root.join("b");
    fs::write(&a, b"hello").unwrap();
    symlink(&a, &b).unwrap();

    h.watcher.start_watching().await.unwrap();
    h.normalizer.normalize(&b).unwrap();

    let event = next_event(&mut h.events, Duration::from_secs(5))
        .await
        .expect("normalization was not reported");
    assert_eq!(event.path, b);
    h.watcher.stop_watching().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn coarse_mode_reports_parent_directory_only() {
    let mut h = harness(|root| WatchConfiguration {
        observe_file_events: false,
        ..WatchConfiguration::new([root])
    });
    let sub = h.root.join("sub");
    fs::create_dir(&sub).unwrap();

    h.watcher.start_watching().await.unwrap();
    fs::write(sub.join("x.txt"), b"x").unwrap();

    let event = next_event(&mut h.events, Duration::from_secs(5))
        .await
        .expect("directory change was not reported");
    assert_eq!(event.path, sub);
    assert_eq!(event.kind, ChangeKind::Modified);
    assert_eq!(event.current_digest, None);

    fs::write(sub.join("x.txt"), b"xx").unwrap();
    assert!(next_event(&mut h.events, Duration::from_secs(1)).await.is_none());
    h.watcher.stop_watching().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn deleted_file_reports_last_known_digest() {
    let mut h = harness(|root| WatchConfiguration::new([root]));
    let a = h.root.join("a.txt");
    fs::write(&a, b"hello").unwrap();
    let seed = SidecarStore::new(h.index.clone(), None);
    write_content_digest(&seed, &a, &sha1(&a)).unwrap();

    h.watcher.start_watching().await.unwrap();
    fs::remove_file(&a).unwrap();

    let event = next_event(&mut h.events, Duration::from_secs(5))
        .await
        .expect("deletion was not reported");
    assert_eq!(event.kind, ChangeKind::Deleted);
    assert_eq!(
        event.previous_digest,
        Some(ContentHasher::new().digest_str(HashAlgorithm::Sha1, "hello"))
    );
    assert!(seed.get_all_attributes(&a).unwrap().is_empty());
    h.watcher.stop_watching().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn edit_right_after_classification_is_reported() {
    let mut h = harness(|root| WatchConfiguration::new([root]));
    let a = h.root.join("a.txt");

    h.watcher.start_watching().await.unwrap();
    fs::write(&a, b"hello").unwrap();

    let created = next_event(&mut h.events, Duration::from_secs(5))
        .await
        .expect("creation was not reported");
    assert_eq!(created.kind, ChangeKind::Created);
    assert_eq!(created.path, a);

    // Well inside the grace window of the digest just persisted for a.txt.
    tokio::time::sleep(Duration::from_millis(100)).await;
    fs::write(&a, b"hello, edited").unwrap();

    let modified = next_event(&mut h.events, Duration::from_secs(4))
        .await
        .expect("edit after classification was not reported");
    assert_eq!(modified.kind, ChangeKind::Modified);
    assert_eq!(modified.path, a);
    assert_eq!(modified.previous_digest, created.current_digest);
    assert_eq!(modified.current_digest, Some(sha1(&a)));

    assert!(next_event(&mut h.events, Duration::from_secs(1)).await.is_none());
    h.watcher.stop_watching().await;
}

#[cfg(target_os = "linux")]
#[tokio::test(flavor = "multi_thread")]
async fn rename_reports_one_renamed_event() {
    let mut h = harness(|root| WatchConfiguration::new([root]));
    let a = h.root.join("a.txt");
    let c = h.root.join("c.txt");
    fs::write(&a, b"hello").unwrap();
    let seed = SidecarStore::new(h.index.clone(), None);
    write_content_digest(&seed, &a, &sha1(&a)).unwrap();

    h.watcher.start_watching().await.unwrap();
    fs::rename(&a, &c).unwrap();

    let mut events = Vec::new();
    while let Some(event) = next_event(&mut h.events, Duration::from_secs(2)).await {
        events.push(event);
    }

    assert_eq!(events.len(), 1, "unexpected events: {events:?}");
    let renamed = &events[0];
    assert_eq!(renamed.kind, ChangeKind::Renamed);
    assert_eq!(renamed.path, c);
    assert_eq!(renamed.previous_path.as_deref(), Some(a.as_path()));
    assert_eq!(
        renamed.previous_digest,
        Some(ContentHasher::new().digest_str(HashAlgorithm::Sha1, "hello"))
    );
    assert!(seed.get_all_attributes(&a).unwrap().is_empty());
    h.watcher.stop_watching().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn set_paths_resubscribes_while_watching() {
    let mut h = harness(|root| {
        fs::create_dir(root.join("one")).unwrap();
        fs::create_dir(root.join("two")).unwrap();
        WatchConfiguration::new([root.join("one")])
    });
    let one = h.root.join("one");
    let two = h.root.join("two");

    h.watcher.start_watching().await.unwrap();
    fs::write(two.join("early.txt"), b"x").unwrap();
    assert!(next_event(&mut h.events, DEBOUNCE * 3).await.is_none());

    h.watcher.set_paths([one.clone(), two.clone()]).unwrap();
    fs::write(two.join("late.txt"), b"y").unwrap();
    let event = next_event(&mut h.events, Duration::from_secs(5))
        .await
        .expect("event under the added path was not reported");
    assert_eq!(event.path, two.join("late.txt"));
    assert_eq!(event.kind, ChangeKind::Created);

    h.watcher.set_paths([two.clone()]).unwrap();
    fs::write(one.join("ignored.txt"), b"z").unwrap();
    assert!(next_event(&mut h.events, Duration::from_secs(1)).await.is_none());

    fs::write(two.join("late.txt"), b"yy").unwrap();
    let event = next_event(&mut h.events, Duration::from_secs(5))
        .await
        .expect("event under the kept path was not reported");
    assert_eq!(event.path, two.join("late.txt"));
    assert_eq!(event.kind, ChangeKind::Modified);
    h.watcher.stop_watching().await;
}
