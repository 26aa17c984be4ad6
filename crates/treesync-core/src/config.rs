//! Configuration module for treesync.
//!
//! Provides typed configuration structs that map to the YAML configuration file,
//! with loading, validation, defaults, and a builder pattern for programmatic use.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::attributes::DEFAULT_NAMESPACE;
use crate::domain::{HashAlgorithm, WatchConfiguration};

// ---------------------------------------------------------------------------
// Config struct with sub-sections
// ---------------------------------------------------------------------------

/// Top-level configuration for treesync.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub watch: WatchConfig,
    pub scan: ScanConfig,
    pub workers: WorkersConfig,
    pub attributes: AttributesConfig,
    pub logging: LoggingConfig,
}

/// Change watcher settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    /// Root directories to observe.
    pub tracked_paths: Vec<PathBuf>,
    /// Surface file-level events (`false` keeps only directory-level events).
    pub observe_file_events: bool,
    /// Drop events caused by treesync's own normalization and attribute writes.
    pub ignore_self_generated: bool,
    /// Quiet period (milliseconds) a path must reach before it is classified.
    pub debounce_ms: u64,
    /// How long (milliseconds) after a self-write its events are still ignored.
    pub self_write_grace_ms: u64,
    /// Capacity of the raw and classified event channels.
    pub event_capacity: usize,
}

/// What to do with symbolic links found in a tracked tree.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SymlinkPolicy {
    /// Materialize a copy of a trusted regular-file target in place of the link.
    Replace,
    /// Leave the link untouched and report it with its target.
    #[default]
    Report,
}

/// Directory scanning settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    pub symlink_policy: SymlinkPolicy,
    /// Roots a symlink target must resolve under to be materialized.
    /// Empty means the tracked paths.
    pub trusted_roots: Vec<PathBuf>,
    /// Algorithm for change-detection fingerprints.
    pub fingerprint_algorithm: HashAlgorithm,
    /// Read buffer size (KiB) for streaming file digests.
    pub chunk_size_kb: usize,
}

/// Rescan worker pool settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkersConfig {
    /// Maximum rescans (scan + hash) running at once.
    pub max_concurrent_rescans: usize,
}

/// Which metadata facility backs the attribute store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttributeBackend {
    /// Native extended attributes when the tracked filesystem supports them,
    /// the sidecar index otherwise.
    #[default]
    Auto,
    Xattr,
    Sidecar,
}

/// Attribute persistence settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AttributesConfig {
    /// Extended attribute namespace prefix, e.g. `user.treesync`.
    pub namespace: String,
    pub backend: AttributeBackend,
    /// Directory holding the sidecar index.
    pub sidecar_dir: PathBuf,
}

/// Logging / tracing settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: `trace`, `debug`, `info`, `warn`, or `error`.
    pub level: String,
    /// Output format: `pretty` or `json`.
    pub format: String,
}

// ---------------------------------------------------------------------------
// Config::load()
// ---------------------------------------------------------------------------

impl Config {
    /// Load configuration from a YAML file at `path`.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Try to load from `path`; fall back to [`Config::default`] on any error.
    pub fn load_or_default(path: &Path) -> Self {
        Self::load(path).unwrap_or_default()
    }

    /// Platform-appropriate default path for the configuration file.
    ///
    /// Typically `$XDG_CONFIG_HOME/treesync/config.yaml` on Linux.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("~/.config"))
            .join("treesync")
            .join("config.yaml")
    }

    /// Roots symlink targets must resolve under: the configured trusted
    /// roots, or the tracked paths when none are configured.
    pub fn effective_trusted_roots(&self) -> Vec<PathBuf> {
        if self.scan.trusted_roots.is_empty() {
            self.watch.tracked_paths.clone()
        } else {
            self.scan.trusted_roots.clone()
        }
    }
}

impl WatchConfig {
    /// The domain view of this section, as read by the watcher.
    pub fn to_watch_configuration(&self) -> WatchConfiguration {
        WatchConfiguration {
            tracked_paths: self.tracked_paths.iter().cloned().collect::<BTreeSet<_>>(),
            observe_file_events: self.observe_file_events,
            ignore_self_generated: self.ignore_self_generated,
        }
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn self_write_grace(&self) -> Duration {
        Duration::from_millis(self.self_write_grace_ms)
    }
}

impl ScanConfig {
    pub fn chunk_size_bytes(&self) -> usize {
        self.chunk_size_kb * 1024
    }
}

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            tracked_paths: Vec::new(),
            observe_file_events: true,
            ignore_self_generated: true,
            debounce_ms: 300,
            self_write_grace_ms: 1000,
            event_capacity: 1024,
        }
    }
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            symlink_policy: SymlinkPolicy::Report,
            trusted_roots: Vec::new(),
            fingerprint_algorithm: HashAlgorithm::Sha1,
            chunk_size_kb: 64,
        }
    }
}

impl Default for WorkersConfig {
    fn default() -> Self {
        Self {
            max_concurrent_rescans: 4,
        }
    }
}

impl Default for AttributesConfig {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("~/.local/share"))
            .join("treesync");
        Self {
            namespace: DEFAULT_NAMESPACE.to_string(),
            backend: AttributeBackend::Auto,
            sidecar_dir: data_dir.join("attributes"),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Config::validate()
// ---------------------------------------------------------------------------

/// A single validation error found in the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path to the offending field, e.g. `"watch.debounce_ms"`.
    pub field: String,
    /// Human-readable explanation.
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Valid values for `logging.level`.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Valid values for `logging.format`.
const VALID_LOG_FORMATS: &[&str] = &["pretty", "json"];

impl Config {
    /// Validate the configuration and return all errors found.
    ///
    /// An empty vector means the configuration is valid.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        // --- watch ---
        for (i, path) in self.watch.tracked_paths.iter().enumerate() {
            if !path.is_absolute() {
                errors.push(ValidationError {
                    field: format!("watch.tracked_paths[{i}]"),
                    message: format!("must be an absolute path: {}", path.display()),
                });
            } else if !path.is_dir() {
                errors.push(ValidationError {
                    field: format!("watch.tracked_paths[{i}]"),
                    message: format!("directory does not exist: {}", path.display()),
                });
            }
        }
        if self.watch.debounce_ms == 0 {
            errors.push(ValidationError {
                field: "watch.debounce_ms".into(),
                message: "must be greater than 0".into(),
            });
        }
        if self.watch.self_write_grace_ms < self.watch.debounce_ms {
            errors.push(ValidationError {
                field: "watch.self_write_grace_ms".into(),
                message: format!(
                    "self_write_grace_ms ({}) must not be shorter than debounce_ms ({})",
                    self.watch.self_write_grace_ms, self.watch.debounce_ms
                ),
            });
        }
        if self.watch.event_capacity == 0 {
            errors.push(ValidationError {
                field: "watch.event_capacity".into(),
                message: "must be greater than 0".into(),
            });
        }

        // --- scan ---
        for (i, path) in self.scan.trusted_roots.iter().enumerate() {
            if !path.is_absolute() {
                errors.push(ValidationError {
                    field: format!("scan.trusted_roots[{i}]"),
                    message: format!("must be an absolute path: {}", path.display()),
                });
            }
        }
        if self.scan.chunk_size_kb == 0 || self.scan.chunk_size_kb > 16 * 1024 {
            errors.push(ValidationError {
                field: "scan.chunk_size_kb".into(),
                message: "must be in range 1..=16384".into(),
            });
        }

        // --- workers ---
        if self.workers.max_concurrent_rescans == 0 || self.workers.max_concurrent_rescans > 64 {
            errors.push(ValidationError {
                field: "workers.max_concurrent_rescans".into(),
                message: "must be in range 1..=64".into(),
            });
        }

        // --- attributes ---
        if self.attributes.namespace.is_empty()
            || self.attributes.namespace.ends_with('.')
            || self.attributes.namespace.contains('\0')
        {
            errors.push(ValidationError {
                field: "attributes.namespace".into(),
                message: format!(
                    "invalid namespace '{}'; expected e.g. '{}'",
                    self.attributes.namespace, DEFAULT_NAMESPACE
                ),
            });
        }

        // --- logging ---
        if !VALID_LOG_LEVELS.contains(&self.logging.level.as_str()) {
            errors.push(ValidationError {
                field: "logging.level".into(),
                message: format!(
                    "invalid level '{}'; valid options: {}",
                    self.logging.level,
                    VALID_LOG_LEVELS.join(", ")
                ),
            });
        }
        if !VALID_LOG_FORMATS.contains(&self.logging.format.as_str()) {
            errors.push(ValidationError {
                field: "logging.format".into(),
                message: format!(
                    "invalid format '{}'; valid options: {}",
                    self.logging.format,
                    VALID_LOG_FORMATS.join(", ")
                ),
            });
        }

        errors
    }
}

// ---------------------------------------------------------------------------
// ConfigBuilder
// ---------------------------------------------------------------------------

/// Builder for constructing a [`Config`] programmatically.
///
/// Starts from [`Config::default`] and allows selective overrides.
///
/// # Example
///
/// ```rust,no_run
/// use treesync_core::config::{ConfigBuilder, SymlinkPolicy};
/// use std::path::PathBuf;
///
/// let config = ConfigBuilder::new()
///     .track_path(PathBuf::from("/home/user/Shared"))
///     .symlink_policy(SymlinkPolicy::Replace)
///     .debounce_ms(250)
///     .build();
/// ```
#[derive(Debug, Clone)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Create a new builder initialised with [`Config::default`] values.
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    // --- watch ---

    pub fn track_path(mut self, path: PathBuf) -> Self {
        self.config.watch.tracked_paths.push(path);
        self
    }

    pub fn observe_file_events(mut self, observe: bool) -> Self {
        self.config.watch.observe_file_events = observe;
        self
    }

    pub fn ignore_self_generated(mut self, ignore: bool) -> Self {
        self.config.watch.ignore_self_generated = ignore;
        self
    }

    pub fn debounce_ms(mut self, ms: u64) -> Self {
        self.config.watch.debounce_ms = ms;
        self
    }

    pub fn self_write_grace_ms(mut self, ms: u64) -> Self {
        self.config.watch.self_write_grace_ms = ms;
        self
    }

    // --- scan ---

    pub fn symlink_policy(mut self, policy: SymlinkPolicy) -> Self {
        self.config.scan.symlink_policy = policy;
        self
    }

    pub fn trusted_root(mut self, root: PathBuf) -> Self {
        self.config.scan.trusted_roots.push(root);
        self
    }

    pub fn fingerprint_algorithm(mut self, algorithm: HashAlgorithm) -> Self {
        self.config.scan.fingerprint_algorithm = algorithm;
        self
    }

    // --- workers ---

    pub fn max_concurrent_rescans(mut self, n: usize) -> Self {
        self.config.workers.max_concurrent_rescans = n;
        self
    }

    // --- attributes ---

    pub fn attribute_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.config.attributes.namespace = namespace.into();
        self
    }

    pub fn attribute_backend(mut self, backend: AttributeBackend) -> Self {
        self.config.attributes.backend = backend;
        self
    }

    pub fn sidecar_dir(mut self, dir: PathBuf) -> Self {
        self.config.attributes.sidecar_dir = dir;
        self
    }

    // --- logging ---

    pub fn logging_level(mut self, level: impl Into<String>) -> Self {
        self.config.logging.level = level.into();
        self
    }

    // --- build ---

    /// Consume the builder and return the finished [`Config`].
    pub fn build(self) -> Config {
        self.config
    }

    /// Build and validate in one step. Returns `Err` with the list of
    /// validation errors if the configuration is invalid.
    pub fn build_validated(self) -> Result<Config, Vec<ValidationError>> {
        let config = self.build();
        let errors = config.validate();
        if errors.is_empty() {
            Ok(config)
        } else {
            Err(errors)
        }
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
