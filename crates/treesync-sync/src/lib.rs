//! treesync-sync - Change watching for tracked trees
//!
//! Turns OS filesystem notifications into classified [`ChangeEvent`]s:
//!
//! ```text
//! notify ─→ map_notify_event ─→ EventFilter ─→ DebouncedChangeQueue
//!                                                     │ settled
//!                                                     ▼
//!     mpsc::Receiver<ChangeEvent> ←─ RescanPool ←─ ChangeClassifier
//! ```
//!
//! The reactor never blocks on disk work: re-scans and hashing run in a
//! bounded pool, one lane per path so same-path changes stay in order.
//!
//! [`ChangeEvent`]: treesync_core::domain::ChangeEvent

use std::path::PathBuf;

use treesync_fs::FsError;

pub mod classify;
pub mod events;
pub mod filter;
pub mod pool;
pub mod queue;
pub mod watcher;

pub use classify::ChangeClassifier;
pub use events::{map_notify_event, RawChange, RawKind};
pub use filter::EventFilter;
pub use pool::RescanPool;
pub use queue::{CoalescedChange, DebouncedChangeQueue};
pub use watcher::{ChangeWatcher, WatcherOptions, WatcherState};

/// Errors from starting or reconfiguring a watch
#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    #[error("Notification backend error: {0}")]
    Notify(#[from] notify::Error),

    #[error("Watcher is already running")]
    AlreadyWatching,

    #[error("Tracked path does not exist: {}", .0.display())]
    PathNotFound(PathBuf),

    #[error(transparent)]
    Fs(#[from] FsError),
}

pub type Result<T> = std::result::Result<T, WatchError>;
