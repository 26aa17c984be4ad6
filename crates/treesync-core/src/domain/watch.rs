//! Watch configuration

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// What the watcher observes and which events it lets through
///
/// Set at construction or reconfiguration; the watcher reads the current
/// value on every event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchConfiguration {
    pub tracked_paths: BTreeSet<PathBuf>,
    /// When false only directory-level create/remove/rename events surface
    pub observe_file_events: bool,
    /// When true events caused by this process's own writes are dropped
    pub ignore_self_generated: bool,
}

impl Default for WatchConfiguration {
    fn default() -> Self {
        Self {
            tracked_paths: BTreeSet::new(),
            observe_file_events: true,
            ignore_self_generated: true,
        }
    }
}

impl WatchConfiguration {
    #[must_use]
    pub fn new<I, P>(paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        Self {
            tracked_paths: paths.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Returns the tracked root that lexically contains `path`, if any
    ///
    /// This is a cheap prefix match for event filtering; canonical
    /// containment is checked again before an event is classified.
    #[must_use]
    pub fn root_for(&self, path: &Path) -> Option<&Path> {
        self.tracked_paths
            .iter()
            .filter(|root| path.starts_with(root))
            .max_by_key(|root| root.components().count())
            .map(PathBuf::as_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = WatchConfiguration::default();
        assert!(config.tracked_paths.is_empty());
        assert!(config.observe_file_events);
        assert!(config.ignore_self_generated);
    }

    #[test]
    fn test_root_for_picks_deepest_root() {
        let config = WatchConfiguration::new(["/data", "/data/photos"]);
        assert_eq!(
            config.root_for(Path::new("/data/photos/a.jpg")),
            Some(Path::new("/data/photos"))
        );
        assert_eq!(
            config.root_for(Path::new("/data/notes.txt")),
            Some(Path::new("/data"))
        );
        assert_eq!(config.root_for(Path::new("/elsewhere/x")), None);
    }

    #[test]
    fn test_root_for_is_component_wise() {
        let config = WatchConfiguration::new(["/data"]);
        assert_eq!(config.root_for(Path::new("/database/x")), None);
    }
}
