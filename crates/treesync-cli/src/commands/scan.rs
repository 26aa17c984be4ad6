//! Scan command - Walk a tree and print its entries
//!
//! Provides the `treesync scan <root>` CLI command which:
//! 1. Normalizes symlinks under the configured (or given) policy
//! 2. Fingerprints every regular file
//! 3. Prints entries in scan order, followed by the scan warnings

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, ValueEnum};
use tracing::info;
use treesync_core::config::SymlinkPolicy;
use treesync_core::domain::{FileEntry, HashAlgorithm};
use treesync_fs::{ContentHasher, DirectoryScanner, ScanReport, SymlinkNormalizer};

use super::{absolute, CommandContext};

/// Symlink policy as accepted on the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum PolicyArg {
    Replace,
    Report,
}

impl From<PolicyArg> for SymlinkPolicy {
    fn from(arg: PolicyArg) -> Self {
        match arg {
            PolicyArg::Replace => SymlinkPolicy::Replace,
            PolicyArg::Report => SymlinkPolicy::Report,
        }
    }
}

#[derive(Debug, Args)]
pub struct ScanCommand {
    /// Root directory to scan
    pub root: PathBuf,

    /// Only list the root's direct children
    #[arg(long)]
    pub no_recursive: bool,

    /// Override the configured symlink policy
    #[arg(long, value_enum)]
    pub policy: Option<PolicyArg>,

    /// Fingerprint algorithm (sha1 or sha512)
    #[arg(long)]
    pub algorithm: Option<HashAlgorithm>,
}

impl ScanCommand {
    pub async fn execute(&self, ctx: &CommandContext) -> Result<()> {
        let out = ctx.output();
        let config = ctx.load_config()?;
        let root = absolute(&self.root)?;

        let policy = self.policy.map_or(config.scan.symlink_policy, SymlinkPolicy::from);
        let mut trusted = config.effective_trusted_roots();
        if trusted.is_empty() {
            trusted.push(root.clone());
        }
        let algorithm = self.algorithm.unwrap_or(config.scan.fingerprint_algorithm);

        info!(root = %root.display(), ?policy, %algorithm, "Scanning");

        let scanner = DirectoryScanner::new(SymlinkNormalizer::new(policy, trusted))
            .with_hasher(ContentHasher::with_chunk_size(config.scan.chunk_size_bytes()))
            .with_fingerprint(Some(algorithm));
        let report = scanner
            .scan(&root, !self.no_recursive)
            .with_context(|| format!("Failed to scan {}", root.display()))?
            .into_report();

        if ctx.is_json() {
            out.json(&report_json(&root, &report)?);
            return Ok(());
        }

        let rows: Vec<[String; 3]> = report
            .entries
            .iter()
            .map(|entry| {
                [
                    kind_label(entry).to_string(),
                    entry.digest().map(ToString::to_string).unwrap_or_else(|| "-".into()),
                    entry.path().display().to_string(),
                ]
            })
            .collect();
        out.table(&rows);
        for warning in &report.warnings {
            out.warn(&warning.to_string());
        }
        out.success(&format!(
            "Scanned {} entries ({} warnings)",
            report.entries.len(),
            report.warnings.len()
        ));
        Ok(())
    }
}

fn kind_label(entry: &FileEntry) -> &'static str {
    if entry.is_directory() {
        "dir"
    } else if entry.is_symlink() {
        "link"
    } else {
        "file"
    }
}

fn report_json(root: &Path, report: &ScanReport) -> Result<serde_json::Value> {
    Ok(serde_json::json!({
        "root": root.display().to_string(),
        "entries": serde_json::to_value(&report.entries).context("Failed to serialize entries")?,
        "warnings": serde_json::to_value(&report.warnings).context("Failed to serialize warnings")?,
        "content_entries": report.content_entries().count(),
        "directories": report
            .entries
            .iter()
            .filter(|e| e.is_directory())
            .count(),
    }))
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::TempDir;

    use super::*;

    #[test]
    fn test_policy_arg_conversion() {
        assert_eq!(SymlinkPolicy::from(PolicyArg::Replace), SymlinkPolicy::Replace);
        assert_eq!(SymlinkPolicy::from(PolicyArg::Report), SymlinkPolicy::Report);
    }

    #[test]
    fn test_report_json_shape() {
        let dir = TempDir::new().unwrap();
        let root = fs::canonicalize(dir.path()).unwrap();
        fs::write(root.join("a.txt"), b"hello").unwrap();
        fs::create_dir(root.join("sub")).unwrap();

        let scanner = DirectoryScanner::new(SymlinkNormalizer::new(SymlinkPolicy::Report, vec![root.clone()]));
        let report = scanner.scan(&root, true).unwrap().into_report();
        let json = report_json(&root, &report).unwrap();

        assert_eq!(json["entries"].as_array().unwrap().len(), 2);
        assert_eq!(json["content_entries"], 1);
        assert_eq!(json["directories"], 1);
        assert!(json["warnings"].as_array().unwrap().is_empty());
    }
}
