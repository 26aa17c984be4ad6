//! Contains command - Canonical containment check
//!
//! `treesync contains <root> <path>` answers whether `path` resolves inside
//! `root` once `..` segments and symlinks are resolved. The exit status is
//! 0 when it does and 1 when it does not.

use std::path::PathBuf;

use anyhow::Result;
use clap::Args;
use treesync_fs::is_descendant;

use super::CommandContext;

#[derive(Debug, Args)]
pub struct ContainsCommand {
    /// Candidate root directory
    pub root: PathBuf,
    /// Path to test; relative paths are taken relative to the root
    pub path: PathBuf,
}

impl ContainsCommand {
    /// Returns whether the path is contained
    pub async fn execute(&self, ctx: &CommandContext) -> Result<bool> {
        let out = ctx.output();
        let contained = is_descendant(&self.root, &self.path);

        if ctx.is_json() {
            out.json(&serde_json::json!({
                "root": self.root.display().to_string(),
                "path": self.path.display().to_string(),
                "contained": contained,
            }));
        } else if contained {
            out.success(&format!("{} is inside {}", self.path.display(), self.root.display()));
        } else {
            out.info(&format!("{} is not inside {}", self.path.display(), self.root.display()));
        }
        Ok(contained)
    }
}
