//! treesync Daemon - Background change watcher
//!
//! This binary runs as a user service and:
//! - Normalizes and fingerprints every tracked tree once at startup
//! - Watches the tracked trees and logs classified change events
//! - Shuts down gracefully on SIGTERM/SIGINT
//!
//! # Architecture
//!
//! The daemon wires one [`WriteCoordinator`] through the attribute store,
//! the scanner and the watcher, so the watcher recognizes its own writes.
//! The event loop is controlled by a `CancellationToken` that is triggered
//! on receipt of SIGTERM or SIGINT.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;
use treesync_core::config::{Config, LoggingConfig};
use treesync_core::domain::ChangeEvent;
use treesync_fs::{open_attribute_store, AttributeStore, DirectoryScanner, WriteCoordinator};
use treesync_sync::{ChangeClassifier, ChangeWatcher, WatcherOptions};

/// Overrides the configuration file location
const CONFIG_ENV: &str = "TREESYNC_CONFIG";

// ============================================================================
// DaemonService
// ============================================================================

/// Owns the configuration and the shutdown token for one daemon run
struct DaemonService {
    config: Config,
    shutdown: CancellationToken,
}

impl DaemonService {
    fn new(config: Config, shutdown: CancellationToken) -> Self {
        Self { config, shutdown }
    }

    /// Runs until shutdown is requested or the event stream ends
    async fn run(&self) -> Result<()> {
        let config = &self.config;
        let coordinator = WriteCoordinator::new(config.watch.self_write_grace());
        let store = open_attribute_store(&config.attributes, Some(coordinator.clone()));
        info!(backend = store.backend_name(), "attribute store ready");

        let scanner = Arc::new(
            DirectoryScanner::from_config(config, Some(coordinator.clone())).with_attribute_store(Arc::clone(&store)),
        );

        self.initial_scan(&scanner).await?;

        let classifier = ChangeClassifier::new(Arc::clone(&scanner), Some(store));
        let (mut watcher, mut events) = ChangeWatcher::new(
            config.watch.to_watch_configuration(),
            WatcherOptions::from_config(config),
            classifier,
            Some(coordinator),
        );
        watcher
            .start_watching()
            .await
            .context("Failed to start watching")?;

        loop {
            tokio::select! {
                () = self.shutdown.cancelled() => {
                    info!("Shutdown signal received");
                    break;
                }
                event = events.recv() => match event {
                    Some(event) => log_event(&event),
                    None => {
                        warn!("Change stream closed");
                        break;
                    }
                },
            }
        }

        watcher.stop_watching().await;
        Ok(())
    }

    /// Scans every tracked root once so symlinks are normalized before the
    /// watch starts
    async fn initial_scan(&self, scanner: &Arc<DirectoryScanner>) -> Result<()> {
        for root in &self.config.watch.tracked_paths {
            let scanner = Arc::clone(scanner);
            let root = root.clone();
            let report = tokio::task::spawn_blocking(move || scanner.scan(&root, true).map(|scan| (root, scan.into_report())))
                .await
                .context("Initial scan task failed")?;

            match report {
                Ok((root, report)) => {
                    info!(
                        root = %root.display(),
                        entries = report.entries.len(),
                        warnings = report.warnings.len(),
                        "Initial scan complete"
                    );
                    for warning in &report.warnings {
                        warn!(path = %warning.path.display(), kind = ?warning.kind, "{}", warning.message);
                    }
                }
                Err(e) => warn!(error = %e, "Initial scan failed"),
            }
            if self.shutdown.is_cancelled() {
                break;
            }
        }
        Ok(())
    }
}

fn log_event(event: &ChangeEvent) {
    info!(
        path = %event.path.display(),
        kind = %event.kind,
        previous_path = ?event.previous_path,
        digest = ?event.current_digest.as_ref().map(ToString::to_string),
        "Change detected"
    );
    match serde_json::to_string(event) {
        Ok(json) => debug!(event = %json, "Change event"),
        Err(e) => debug!(error = %e, "Change event not serializable"),
    }
}

// ============================================================================
// Configuration and logging
// ============================================================================

fn config_path() -> PathBuf {
    std::env::var_os(CONFIG_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(Config::default_path)
}

/// Loads and validates the configuration at `path`
///
/// A missing file yields the defaults; an unreadable or invalid one is an
/// error.
fn load_config(path: &Path) -> Result<Config> {
    let config = if path.exists() {
        Config::load(path).with_context(|| format!("Failed to load configuration from {}", path.display()))?
    } else {
        Config::default()
    };

    let errors = config.validate();
    if !errors.is_empty() {
        let details: Vec<String> = errors.iter().map(ToString::to_string).collect();
        bail!("Invalid configuration {}: {}", path.display(), details.join("; "));
    }
    if config.watch.tracked_paths.is_empty() {
        bail!("No tracked paths configured in {}", path.display());
    }
    Ok(config)
}

fn init_tracing(logging: &LoggingConfig) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(logging.level.as_str()));

    if logging.format == "json" {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }
}

// ============================================================================
// Graceful shutdown signal handler
// ============================================================================

/// Waits for SIGTERM or SIGINT and triggers the cancellation token
async fn shutdown_signal(token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received SIGINT (Ctrl+C)");
        }
        () = terminate => {
            info!("Received SIGTERM");
        }
    }

    token.cancel();
}

// ============================================================================
// Main entry point
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let path = config_path();
    let config = load_config(&path)?;
    init_tracing(&config.logging);

    info!(
        config_path = %path.display(),
        roots = config.watch.tracked_paths.len(),
        "treesync daemon starting (treesyncd)"
    );

    let shutdown_token = CancellationToken::new();
    let signal_token = shutdown_token.clone();
    tokio::spawn(async move {
        shutdown_signal(signal_token).await;
    });

    let service = DaemonService::new(config, shutdown_token);
    let result = service.run().await;

    match &result {
        Ok(()) => info!("treesync daemon shut down gracefully"),
        Err(e) => error!(error = %e, "treesync daemon exiting with error"),
    }

    result
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::TempDir;

    use super::*;

    #[test]
    fn test_load_config_requires_tracked_paths() {
        let dir = TempDir::new().unwrap();
        let err = load_config(&dir.path().join("missing.yaml")).unwrap_err();
        assert!(err.to_string().contains("No tracked paths"));
    }

    #[test]
    fn test_load_config_reads_yaml() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("tree");
        fs::create_dir(&root).unwrap();
        let path = dir.path().join("config.yaml");
        fs::write(
            &path,
            format!("watch:\n  tracked_paths:\n    - {}\n  debounce_ms: 250\n", root.display()),
        )
        .unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.watch.tracked_paths, vec![root]);
        assert_eq!(config.watch.debounce_ms, 250);
    }

    #[test]
    fn test_load_config_rejects_invalid_values() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.yaml");
        fs::write(&path, "watch:\n  tracked_paths:\n    - relative/path\n").unwrap();

        let err = load_config(&path).unwrap_err();
        assert!(err.to_string().contains("watch.tracked_paths[0]"));
    }

    #[test]
    fn test_cancellation_token_child_propagation() {
        let parent = CancellationToken::new();
        let child = parent.child_token();
        assert!(!child.is_cancelled());
        parent.cancel();
        assert!(child.is_cancelled());
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let dir = TempDir::new().unwrap();
        let root = fs::canonicalize(dir.path()).unwrap().join("tree");
        fs::create_dir(&root).unwrap();
        let mut config = Config::default();
        config.watch.tracked_paths = vec![root];
        config.attributes.sidecar_dir = dir.path().join("index");

        let token = CancellationToken::new();
        let service = DaemonService::new(config, token.clone());
        token.cancel();
        service.run().await.unwrap();
    }
}
