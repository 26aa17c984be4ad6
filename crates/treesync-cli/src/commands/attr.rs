//! Attr command - Read and write per-file attributes
//!
//! Values live in the store selected by `attributes.backend`: native
//! extended attributes under `attributes.namespace`, or the sidecar index.
//! Names are given without the namespace prefix.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Subcommand;
use tracing::info;
use treesync_fs::attributes::record_to_json;

use super::{absolute, CommandContext};

#[derive(Debug, Subcommand)]
pub enum AttrCommand {
    /// Print one attribute value
    Get {
        path: PathBuf,
        /// Attribute name, e.g. "content-digest"
        name: String,
    },
    /// Set an attribute to a UTF-8 value
    Set {
        path: PathBuf,
        name: String,
        value: String,
    },
    /// List every attribute of a file
    List { path: PathBuf },
    /// Remove one attribute
    Remove { path: PathBuf, name: String },
}

impl AttrCommand {
    pub async fn execute(&self, ctx: &CommandContext) -> Result<()> {
        let out = ctx.output();
        let store = ctx.attribute_store()?;

        match self {
            AttrCommand::Get { path, name } => {
                let path = absolute(path)?;
                let value = store
                    .get_attribute(&path, name)
                    .with_context(|| format!("Failed to read '{}' on {}", name, path.display()))?;
                if ctx.is_json() {
                    out.json(&serde_json::json!({
                        "path": path.display().to_string(),
                        "name": name,
                        "value": value.as_deref().map(|v| String::from_utf8_lossy(v).into_owned()),
                    }));
                } else {
                    match value {
                        Some(value) => println!("{}", String::from_utf8_lossy(&value)),
                        None => out.info(&format!("'{}' is not set on {}", name, path.display())),
                    }
                }
            }
            AttrCommand::Set { path, name, value } => {
                let path = absolute(path)?;
                info!(path = %path.display(), name = %name, backend = store.backend_name(), "Setting attribute");
                store
                    .set_attribute(&path, name, value.as_bytes())
                    .with_context(|| format!("Failed to set '{}' on {}", name, path.display()))?;
                if ctx.is_json() {
                    out.json(&serde_json::json!({
                        "success": true,
                        "path": path.display().to_string(),
                        "name": name,
                    }));
                } else {
                    out.success(&format!("Set {} on {}", name, path.display()));
                }
            }
            AttrCommand::List { path } => {
                let path = absolute(path)?;
                let record = store
                    .get_all_attributes(&path)
                    .with_context(|| format!("Failed to list attributes of {}", path.display()))?;
                if ctx.is_json() {
                    out.json(&serde_json::json!({
                        "path": path.display().to_string(),
                        "backend": store.backend_name(),
                        "attributes": record_to_json(&record),
                    }));
                } else if record.is_empty() {
                    out.info(&format!("No attributes on {}", path.display()));
                } else {
                    let rows: Vec<[String; 2]> = record
                        .iter()
                        .map(|(name, value)| [name.clone(), String::from_utf8_lossy(value).into_owned()])
                        .collect();
                    out.table(&rows);
                }
            }
            AttrCommand::Remove { path, name } => {
                let path = absolute(path)?;
                let removed = store
                    .remove_attribute(&path, name)
                    .with_context(|| format!("Failed to remove '{}' from {}", name, path.display()))?;
                if ctx.is_json() {
                    out.json(&serde_json::json!({
                        "path": path.display().to_string(),
                        "name": name,
                        "removed": removed,
                    }));
                } else if removed {
                    out.success(&format!("Removed {} from {}", name, path.display()));
                } else {
                    out.info(&format!("'{}' was not set on {}", name, path.display()));
                }
            }
        }
        Ok(())
    }
}
