//! Normalize command - Materialize symlinks in place
//!
//! Always applies the replace policy: each link whose target is a regular
//! file under a trusted root is replaced by a copy of that file. Links that
//! cannot be materialized are reported and left alone.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use treesync_core::config::SymlinkPolicy;
use treesync_fs::{NormalizeOutcome, SymlinkNormalizer};

use super::{absolute, CommandContext};

#[derive(Debug, Args)]
pub struct NormalizeCommand {
    /// A symlink, or a directory with --recursive
    pub path: PathBuf,

    /// Normalize every link under the directory
    #[arg(long, short)]
    pub recursive: bool,

    /// Additional root that link targets may resolve under
    #[arg(long = "trust")]
    pub trusted_roots: Vec<PathBuf>,
}

impl NormalizeCommand {
    pub async fn execute(&self, ctx: &CommandContext) -> Result<()> {
        let out = ctx.output();
        let config = ctx.load_config()?;
        let path = absolute(&self.path)?;

        let mut trusted = config.effective_trusted_roots();
        trusted.extend(self.trusted_roots.iter().cloned());
        if trusted.is_empty() {
            let fallback = if self.recursive { path.clone() } else { path.parent().map_or_else(|| path.clone(), PathBuf::from) };
            trusted.push(fallback);
        }
        let normalizer = SymlinkNormalizer::new(SymlinkPolicy::Replace, trusted);

        if !self.recursive {
            let outcome = normalizer
                .normalize_with(&path, SymlinkPolicy::Replace)
                .with_context(|| format!("Failed to normalize {}", path.display()))?;
            let (status, warning) = match &outcome {
                NormalizeOutcome::Unchanged(_) => ("unchanged", None),
                NormalizeOutcome::Materialized(_) => ("materialized", None),
                NormalizeOutcome::Reported { warning, .. } => ("reported", warning.as_ref()),
            };
            if ctx.is_json() {
                out.json(&serde_json::json!({
                    "path": path.display().to_string(),
                    "status": status,
                    "entry": serde_json::to_value(outcome.entry()).context("Failed to serialize entry")?,
                    "warning": warning.map(ToString::to_string),
                }));
            } else {
                if let Some(warning) = warning {
                    out.warn(&warning.to_string());
                }
                out.success(&format!("{}: {}", path.display(), status));
            }
            return Ok(());
        }

        let report = normalizer.remove_symlinks_recursive(&path);
        if ctx.is_json() {
            let failures: Vec<serde_json::Value> = report
                .failures
                .iter()
                .map(|(path, e)| serde_json::json!({"path": path.display().to_string(), "error": e.to_string()}))
                .collect();
            out.json(&serde_json::json!({
                "root": path.display().to_string(),
                "materialized": report.materialized,
                "reported": serde_json::to_value(&report.reported).context("Failed to serialize warnings")?,
                "failures": failures,
            }));
            return Ok(());
        }

        for link in &report.materialized {
            out.info(&format!("materialized {}", link.display()));
        }
        for warning in &report.reported {
            out.warn(&warning.to_string());
        }
        for (failed, e) in &report.failures {
            out.error(&format!("{}: {}", failed.display(), e));
        }
        out.success(&format!(
            "Materialized {} links ({} reported, {} failed)",
            report.materialized.len(),
            report.reported.len(),
            report.failures.len()
        ));
        Ok(())
    }
}
