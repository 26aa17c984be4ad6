//! Hash command - Print content digests
//!
//! `treesync hash <file>...` streams each file through the hasher;
//! `treesync hash --string <text>` digests the UTF-8 bytes of a string.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Args;
use treesync_core::domain::{ContentDigest, HashAlgorithm};
use treesync_fs::ContentHasher;

use super::CommandContext;

#[derive(Debug, Args)]
pub struct HashCommand {
    /// Files to hash
    pub paths: Vec<PathBuf>,

    /// Hash this string instead of files
    #[arg(long, conflicts_with = "paths")]
    pub string: Option<String>,

    /// Digest algorithm (sha1 or sha512)
    #[arg(long, short, default_value = "sha1")]
    pub algorithm: HashAlgorithm,
}

impl HashCommand {
    pub async fn execute(&self, ctx: &CommandContext) -> Result<()> {
        let out = ctx.output();
        let config = ctx.load_config()?;
        let hasher = ContentHasher::with_chunk_size(config.scan.chunk_size_bytes());

        let digests: Vec<(String, ContentDigest)> = match &self.string {
            Some(text) => vec![("-".to_string(), hasher.digest_str(self.algorithm, text))],
            None => {
                if self.paths.is_empty() {
                    bail!("Nothing to hash: pass files or --string");
                }
                self.paths
                    .iter()
                    .map(|path| {
                        hasher
                            .digest_file(self.algorithm, path)
                            .map(|digest| (path.display().to_string(), digest))
                            .with_context(|| format!("Failed to hash {}", path.display()))
                    })
                    .collect::<Result<_>>()?
            }
        };

        if ctx.is_json() {
            let items: Vec<serde_json::Value> = digests
                .iter()
                .map(|(source, digest)| {
                    serde_json::json!({
                        "source": source,
                        "algorithm": digest.algorithm().to_string(),
                        "hex": digest.to_hex(),
                    })
                })
                .collect();
            out.json(&serde_json::Value::Array(items));
        } else {
            for (source, digest) in &digests {
                println!("{}  {}", digest.to_hex(), source);
            }
        }
        Ok(())
    }
}
