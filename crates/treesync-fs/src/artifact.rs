//! Encrypted artifacts
//!
//! The encryptor is an external collaborator. Its output is an ordinary file
//! here: sealing hashes it with SHA-512 and records `content-digest` and
//! `sync-generation` on it, exactly as for any other tracked file.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use tracing::{info, instrument, warn};
use treesync_core::domain::{ContentDigest, HashAlgorithm};
use treesync_core::ports::FileEncryptor;

use crate::attributes::{bump_generation, read_content_digest, write_content_digest, AttributeStore};
use crate::coordinator::WriteCoordinator;
use crate::hasher::ContentHasher;

/// A produced artifact and the identity recorded for it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedArtifact {
    pub path: PathBuf,
    pub digest: ContentDigest,
    /// `None` when the filesystem could not hold attributes
    pub generation: Option<u64>,
}

/// Runs the encryption port and records the artifact's identity
pub struct ArtifactSealer {
    encryptor: Arc<dyn FileEncryptor>,
    hasher: ContentHasher,
    store: Arc<dyn AttributeStore>,
    coordinator: Option<WriteCoordinator>,
}

impl ArtifactSealer {
    #[must_use]
    pub fn new(encryptor: Arc<dyn FileEncryptor>, store: Arc<dyn AttributeStore>) -> Self {
        Self {
            encryptor,
            hasher: ContentHasher::new(),
            store,
            coordinator: None,
        }
    }

    /// Registers the artifact write as self-generated so a watcher over the
    /// destination ignores it
    #[must_use]
    pub fn with_coordinator(mut self, coordinator: WriteCoordinator) -> Self {
        self.coordinator = Some(coordinator);
        self
    }

    #[must_use]
    pub fn with_hasher(mut self, hasher: ContentHasher) -> Self {
        self.hasher = hasher;
        self
    }

    /// Encrypts `source` into `dest` and records the artifact's SHA-512
    ///
    /// # Errors
    /// Fails if encryption or hashing fails. Missing attribute support is
    /// not an error; the returned generation is then `None`.
    #[instrument(skip(self, passphrase), fields(source = %source.display(), dest = %dest.display()))]
    pub fn seal_artifact(&self, source: &Path, dest: &Path, passphrase: &str) -> anyhow::Result<SealedArtifact> {
        {
            let _guard = self.coordinator.as_ref().map(|c| c.begin_write(dest));
            self.encryptor
                .encrypt(source, dest, passphrase)
                .with_context(|| format!("Failed to encrypt {}", source.display()))?;
        }

        let digest = self
            .hasher
            .digest_file(HashAlgorithm::Sha512, dest)
            .with_context(|| format!("Failed to hash artifact {}", dest.display()))?;

        let generation = match write_content_digest(self.store.as_ref(), dest, &digest)
            .and_then(|()| bump_generation(self.store.as_ref(), dest))
        {
            Ok(generation) => Some(generation),
            Err(e) if e.is_unsupported() => {
                warn!(error = %e, "artifact identity not persisted");
                None
            }
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to record attributes on {}", dest.display()))
            }
        };

        info!(digest = %digest, ?generation, "artifact sealed");
        Ok(SealedArtifact {
            path: dest.to_path_buf(),
            digest,
            generation,
        })
    }

    /// Whether `path` still matches the digest recorded when it was sealed
    ///
    /// A file with no recorded digest does not verify.
    pub fn verify(&self, path: &Path) -> anyhow::Result<bool> {
        let Some(recorded) = read_content_digest(self.store.as_ref(), path)
            .with_context(|| format!("Failed to read recorded digest of {}", path.display()))?
        else {
            return Ok(false);
        };
        let current = self
            .hasher
            .digest_file(recorded.algorithm(), path)
            .with_context(|| format!("Failed to hash {}", path.display()))?;
        Ok(current == recorded)
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::TempDir;

    use super::*;
    use crate::attributes::read_generation;
    use crate::SidecarStore;

    /// Test encryptor that reverses the bytes
    struct ReversingEncryptor;

    impl FileEncryptor for ReversingEncryptor {
        fn encrypt(&self, source: &Path, dest: &Path, passphrase: &str) -> anyhow::Result<()> {
            anyhow::ensure!(!passphrase.is_empty(), "empty passphrase");
            let mut data = fs::read(source)?;
            data.reverse();
            fs::write(dest, data)?;
            Ok(())
        }
    }

    fn sealer(dir: &TempDir) -> (ArtifactSealer, Arc<SidecarStore>) {
        let store = Arc::new(SidecarStore::new(dir.path().join("index"), None));
        let sealer = ArtifactSealer::new(Arc::new(ReversingEncryptor), store.clone())
            .with_coordinator(WriteCoordinator::default());
        (sealer, store)
    }

    #[test]
    fn test_seal_records_sha512_and_generation() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("plain.txt");
        let dest = dir.path().join("plain.txt.enc");
        fs::write(&source, b"olleh").unwrap();
        let (sealer, store) = sealer(&dir);

        let sealed = sealer.seal_artifact(&source, &dest, "secret").unwrap();

        assert_eq!(fs::read(&dest).unwrap(), b"hello");
        assert_eq!(sealed.digest.algorithm(), HashAlgorithm::Sha512);
        assert_eq!(
            sealed.digest,
            ContentHasher::new().digest_str(HashAlgorithm::Sha512, "hello")
        );
        assert_eq!(sealed.generation, Some(1));
        assert_eq!(read_generation(store.as_ref(), &dest).unwrap(), Some(1));
        assert!(sealer.verify(&dest).unwrap());
    }

    #[test]
    fn test_verify_detects_tampering() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("plain.txt");
        let dest = dir.path().join("plain.txt.enc");
        fs::write(&source, b"payload").unwrap();
        let (sealer, _store) = sealer(&dir);

        sealer.seal_artifact(&source, &dest, "secret").unwrap();
        fs::write(&dest, b"tampered").unwrap();
        assert!(!sealer.verify(&dest).unwrap());
        assert!(!sealer.verify(&source).unwrap());
    }

    #[test]
    fn test_encryptor_failure_propagates() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("plain.txt");
        fs::write(&source, b"payload").unwrap();
        let (sealer, _store) = sealer(&dir);

        let err = sealer
            .seal_artifact(&source, &dir.path().join("out.enc"), "")
            .unwrap_err();
        assert!(err.to_string().contains("Failed to encrypt"));
    }
}
