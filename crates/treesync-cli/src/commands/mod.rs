//! Subcommand implementations and the context they share

pub mod attr;
pub mod config;
pub mod contains;
pub mod hash;
pub mod normalize;
pub mod scan;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use treesync_core::config::Config;
use treesync_fs::{open_attribute_store, paths, AttributeStore};

use crate::output::{Output, OutputFormat};

/// Global options resolved once and handed to every command
#[derive(Debug, Clone)]
pub struct CommandContext {
    pub format: OutputFormat,
    pub config_path: PathBuf,
}

impl CommandContext {
    pub fn new(format: OutputFormat, config_path: Option<PathBuf>) -> Self {
        Self {
            format,
            config_path: config_path.unwrap_or_else(Config::default_path),
        }
    }

    pub fn output(&self) -> Output {
        Output::new(self.format)
    }

    pub fn is_json(&self) -> bool {
        self.format.is_json()
    }

    /// The configuration file, or the defaults if there is none
    pub fn load_config(&self) -> Result<Config> {
        if self.config_path.exists() {
            Config::load(&self.config_path)
                .with_context(|| format!("Failed to load configuration from {}", self.config_path.display()))
        } else {
            Ok(Config::default())
        }
    }

    /// Attribute store selected by the configuration
    pub fn attribute_store(&self) -> Result<Arc<dyn AttributeStore>> {
        let config = self.load_config()?;
        Ok(open_attribute_store(&config.attributes, None))
    }
}

/// Resolves a user-supplied path against the working directory
pub fn absolute(path: &Path) -> Result<PathBuf> {
    paths::absolutize(path).with_context(|| format!("Failed to resolve path {}", path.display()))
}
