//! Payload encryption port (driven/secondary port)
//!
//! The encrypted output is an ordinary file to the observation layer: it is
//! hashed and attributed under the same rules as any other file.

use std::path::Path;

/// Encrypts a file into a separate artifact
pub trait FileEncryptor: Send + Sync {
    /// Encrypts `source` into `dest`, creating or replacing `dest`
    ///
    /// # Errors
    /// Returns an error if the source cannot be read or the artifact written
    fn encrypt(&self, source: &Path, dest: &Path, passphrase: &str) -> anyhow::Result<()>;
}
