//! Config command - View and manage treesync configuration
//!
//! Provides the `treesync config` CLI command which:
//! 1. Shows the effective configuration (YAML or JSON)
//! 2. Sets individual configuration values via dot-notation keys
//! 3. Validates the configuration file and reports errors

use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{bail, Context, Result};
use clap::Subcommand;
use tracing::info;
use treesync_core::config::{AttributeBackend, Config, SymlinkPolicy};
use treesync_core::domain::HashAlgorithm;

use super::CommandContext;

const SUPPORTED_KEYS: &[(&str, &str)] = &[
    ("watch.tracked_paths", "Comma-separated absolute roots"),
    ("watch.observe_file_events", "true|false"),
    ("watch.ignore_self_generated", "true|false"),
    ("watch.debounce_ms", "Quiet period before classification"),
    ("watch.self_write_grace_ms", "How long self-writes stay ignored"),
    ("watch.event_capacity", "Event channel capacity"),
    ("scan.symlink_policy", "replace|report"),
    ("scan.trusted_roots", "Comma-separated absolute roots"),
    ("scan.fingerprint_algorithm", "sha1|sha512"),
    ("scan.chunk_size_kb", "Hash read buffer (KiB)"),
    ("workers.max_concurrent_rescans", "Parallel rescans"),
    ("attributes.namespace", "Extended attribute prefix"),
    ("attributes.backend", "auto|xattr|sidecar"),
    ("attributes.sidecar_dir", "Sidecar index directory"),
    ("logging.level", "trace|debug|info|warn|error"),
    ("logging.format", "pretty|json"),
];

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Display current configuration
    Show,
    /// Set a configuration value
    Set {
        /// Configuration key (e.g., "watch.debounce_ms")
        key: String,
        /// New value
        value: String,
    },
    /// Validate configuration file
    Validate,
}

impl ConfigCommand {
    pub async fn execute(&self, ctx: &CommandContext) -> Result<()> {
        match self {
            ConfigCommand::Show => self.execute_show(ctx),
            ConfigCommand::Set { key, value } => self.execute_set(ctx, key, value),
            ConfigCommand::Validate => self.execute_validate(ctx),
        }
    }

    fn execute_show(&self, ctx: &CommandContext) -> Result<()> {
        let out = ctx.output();
        let config = ctx.load_config()?;

        info!(config_path = %ctx.config_path.display(), "Showing configuration");

        if ctx.is_json() {
            let json = serde_json::to_value(&config).context("Failed to serialize configuration to JSON")?;
            out.json(&json);
        } else {
            out.success(&format!("Configuration ({})", ctx.config_path.display()));
            out.info("");
            let yaml = serde_yaml::to_string(&config).context("Failed to serialize configuration to YAML")?;
            for line in yaml.lines() {
                out.info(line);
            }
        }
        Ok(())
    }

    fn execute_set(&self, ctx: &CommandContext, key: &str, value: &str) -> Result<()> {
        let out = ctx.output();
        let mut config = ctx.load_config()?;

        info!(key = %key, value = %value, "Setting configuration value");

        if let Err(e) = apply_config_value(&mut config, key, value) {
            if ctx.is_json() {
                out.json(&serde_json::json!({
                    "success": false,
                    "key": key,
                    "value": value,
                    "error": e.to_string(),
                }));
            } else {
                out.error(&format!("Failed to set '{}': {}", key, e));
                out.info("");
                out.info("Supported keys:");
                for (name, help) in SUPPORTED_KEYS {
                    out.info(&format!("  {:<34} - {}", name, help));
                }
            }
            return Ok(());
        }

        // Roots may be configured before they are created.
        let errors: Vec<String> = config
            .validate()
            .iter()
            .filter(|e| !e.message.starts_with("directory does not exist"))
            .map(ToString::to_string)
            .collect();
        if !errors.is_empty() {
            if ctx.is_json() {
                out.json(&serde_json::json!({
                    "success": false,
                    "key": key,
                    "value": value,
                    "errors": errors,
                }));
            } else {
                out.error(&format!("Invalid value for '{}': {}", key, errors.join("; ")));
            }
            return Ok(());
        }

        if let Some(parent) = ctx.config_path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create configuration directory")?;
        }
        let yaml = serde_yaml::to_string(&config).context("Failed to serialize configuration")?;
        std::fs::write(&ctx.config_path, yaml).context("Failed to write configuration file")?;

        if ctx.is_json() {
            out.json(&serde_json::json!({
                "success": true,
                "key": key,
                "value": value,
                "config_path": ctx.config_path.display().to_string(),
            }));
        } else {
            out.success(&format!("Set {} = {}", key, value));
            out.info(&format!("Saved to {}", ctx.config_path.display()));
        }
        Ok(())
    }

    fn execute_validate(&self, ctx: &CommandContext) -> Result<()> {
        let out = ctx.output();
        let path = &ctx.config_path;

        if !path.exists() {
            if ctx.is_json() {
                out.json(&serde_json::json!({
                    "valid": false,
                    "config_path": path.display().to_string(),
                    "errors": ["Configuration file not found. Using defaults."],
                }));
            } else {
                out.info(&format!("Configuration file not found at {}", path.display()));
                out.info("Using default configuration. Run 'treesync config set <key> <value>' to create one.");
            }
            return Ok(());
        }

        let config = match Config::load(path) {
            Ok(config) => config,
            Err(e) => {
                if ctx.is_json() {
                    out.json(&serde_json::json!({
                        "valid": false,
                        "config_path": path.display().to_string(),
                        "errors": [format!("Failed to parse configuration: {}", e)],
                    }));
                } else {
                    out.error(&format!("Failed to parse configuration: {}", e));
                    out.info(&format!("File: {}", path.display()));
                }
                return Ok(());
            }
        };

        info!(config_path = %path.display(), "Validating configuration");
        let errors = config.validate();

        if ctx.is_json() {
            let error_strings: Vec<String> = errors.iter().map(ToString::to_string).collect();
            out.json(&serde_json::json!({
                "valid": errors.is_empty(),
                "config_path": path.display().to_string(),
                "errors": error_strings,
            }));
        } else if errors.is_empty() {
            out.success("Configuration is valid");
            out.info(&format!("File: {}", path.display()));
        } else {
            out.error(&format!(
                "Configuration has {} error{}:",
                errors.len(),
                if errors.len() == 1 { "" } else { "s" }
            ));
            out.info(&format!("File: {}", path.display()));
            out.info("");
            for error in &errors {
                out.info(&format!("  {} - {}", error.field, error.message));
            }
        }
        Ok(())
    }
}

fn parse_paths(value: &str) -> Vec<PathBuf> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(PathBuf::from)
        .collect()
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    value
        .parse::<bool>()
        .with_context(|| format!("Expected true or false for {}", key))
}

/// Apply a dot-notation key/value pair to a Config struct
fn apply_config_value(config: &mut Config, key: &str, value: &str) -> Result<()> {
    match key {
        // --- watch ---
        "watch.tracked_paths" => config.watch.tracked_paths = parse_paths(value),
        "watch.observe_file_events" => config.watch.observe_file_events = parse_bool(key, value)?,
        "watch.ignore_self_generated" => config.watch.ignore_self_generated = parse_bool(key, value)?,
        "watch.debounce_ms" => {
            config.watch.debounce_ms = value
                .parse::<u64>()
                .context("Expected a positive integer for watch.debounce_ms")?;
        }
        "watch.self_write_grace_ms" => {
            config.watch.self_write_grace_ms = value
                .parse::<u64>()
                .context("Expected a positive integer for watch.self_write_grace_ms")?;
        }
        "watch.event_capacity" => {
            config.watch.event_capacity = value.parse::<usize>().context("Expected a positive integer")?;
        }

        // --- scan ---
        "scan.symlink_policy" => {
            config.scan.symlink_policy = match value {
                "replace" => SymlinkPolicy::Replace,
                "report" => SymlinkPolicy::Report,
                other => bail!("Unknown symlink policy '{}'; expected replace or report", other),
            };
        }
        "scan.trusted_roots" => config.scan.trusted_roots = parse_paths(value),
        "scan.fingerprint_algorithm" => {
            config.scan.fingerprint_algorithm = HashAlgorithm::from_str(value)?;
        }
        "scan.chunk_size_kb" => {
            config.scan.chunk_size_kb = value.parse::<usize>().context("Expected a positive integer")?;
        }

        // --- workers ---
        "workers.max_concurrent_rescans" => {
            config.workers.max_concurrent_rescans =
                value.parse::<usize>().context("Expected a positive integer")?;
        }

        // --- attributes ---
        "attributes.namespace" => config.attributes.namespace = value.to_string(),
        "attributes.backend" => {
            config.attributes.backend = match value {
                "auto" => AttributeBackend::Auto,
                "xattr" => AttributeBackend::Xattr,
                "sidecar" => AttributeBackend::Sidecar,
                other => bail!("Unknown attribute backend '{}'; expected auto, xattr or sidecar", other),
            };
        }
        "attributes.sidecar_dir" => config.attributes.sidecar_dir = PathBuf::from(value),

        // --- logging ---
        "logging.level" => config.logging.level = value.to_string(),
        "logging.format" => config.logging.format = value.to_string(),

        _ => bail!("Unknown configuration key: '{}'", key),
    }
    Ok(())
}
