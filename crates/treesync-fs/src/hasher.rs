//! Streaming content digests
//!
//! [`ContentHasher`] turns bytes into a [`ContentDigest`]. Files are read in
//! fixed-size chunks, so memory use is bounded by the chunk size no matter
//! how large the file is. No salt or state is mixed in: identical bytes
//! always produce identical digests.

use std::fs::File;
use std::io::{ErrorKind, Read};
use std::path::Path;

use sha1::Sha1;
use sha2::{Digest, Sha512};
use tracing::{debug, instrument};
use treesync_core::domain::{ContentDigest, HashAlgorithm};

use crate::{FsError, Result};

/// Default read buffer size for streaming digests
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// Input to [`ContentHasher::digest`]
pub enum DigestSource<'a> {
    /// A bounded in-memory buffer
    Bytes(&'a [u8]),
    /// A sequential byte stream, read to EOF
    Stream(&'a mut dyn Read),
}

/// Running state for one of the supported algorithms
enum Engine {
    Sha1(Sha1),
    Sha512(Sha512),
}

impl Engine {
    fn new(algorithm: HashAlgorithm) -> Self {
        match algorithm {
            HashAlgorithm::Sha1 => Engine::Sha1(Sha1::new()),
            HashAlgorithm::Sha512 => Engine::Sha512(Sha512::new()),
        }
    }

    fn update(&mut self, data: &[u8]) {
        match self {
            Engine::Sha1(h) => h.update(data),
            Engine::Sha512(h) => h.update(data),
        }
    }

    fn finalize(self) -> ContentDigest {
        let (algorithm, bytes) = match self {
            Engine::Sha1(h) => (HashAlgorithm::Sha1, h.finalize().to_vec()),
            Engine::Sha512(h) => (HashAlgorithm::Sha512, h.finalize().to_vec()),
        };
        // Output length is fixed by the algorithm.
        match ContentDigest::new(algorithm, bytes) {
            Ok(digest) => digest,
            Err(e) => unreachable!("digest length mismatch for {algorithm}: {e}"),
        }
    }
}

/// Computes content digests of buffers, streams and files
#[derive(Debug, Clone)]
pub struct ContentHasher {
    chunk_size: usize,
}

impl Default for ContentHasher {
    fn default() -> Self {
        Self::new()
    }
}

impl ContentHasher {
    #[must_use]
    pub fn new() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    /// Uses `chunk_size` bytes per read; zero falls back to the default
    #[must_use]
    pub fn with_chunk_size(chunk_size: usize) -> Self {
        Self {
            chunk_size: if chunk_size == 0 {
                DEFAULT_CHUNK_SIZE
            } else {
                chunk_size
            },
        }
    }

    #[must_use]
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Digests either an in-memory buffer or a stream
    ///
    /// # Errors
    /// Returns [`FsError::Io`] if the stream cannot be read
    pub fn digest(&self, algorithm: HashAlgorithm, source: DigestSource<'_>) -> Result<ContentDigest> {
        match source {
            DigestSource::Bytes(data) => Ok(self.digest_bytes(algorithm, data)),
            DigestSource::Stream(reader) => self.digest_reader(algorithm, reader),
        }
    }

    /// Like [`digest`](Self::digest), with the algorithm given by name
    ///
    /// # Errors
    /// Returns [`FsError::UnsupportedAlgorithm`] for names other than
    /// `sha1` / `sha512`, or [`FsError::Io`] if the stream cannot be read
    pub fn digest_named(&self, algorithm: &str, source: DigestSource<'_>) -> Result<ContentDigest> {
        let algorithm: HashAlgorithm = algorithm.parse()?;
        self.digest(algorithm, source)
    }

    #[must_use]
    pub fn digest_bytes(&self, algorithm: HashAlgorithm, data: &[u8]) -> ContentDigest {
        let mut engine = Engine::new(algorithm);
        engine.update(data);
        engine.finalize()
    }

    /// Digest of the UTF-8 bytes of `text`
    #[must_use]
    pub fn digest_str(&self, algorithm: HashAlgorithm, text: &str) -> ContentDigest {
        self.digest_bytes(algorithm, text.as_bytes())
    }

    /// Streams `reader` to EOF in fixed-size chunks
    ///
    /// # Errors
    /// Returns [`FsError::Io`] on any read failure other than `Interrupted`
    pub fn digest_reader<R: Read + ?Sized>(
        &self,
        algorithm: HashAlgorithm,
        reader: &mut R,
    ) -> Result<ContentDigest> {
        let mut engine = Engine::new(algorithm);
        let mut buffer = vec![0u8; self.chunk_size];
        loop {
            match reader.read(&mut buffer) {
                Ok(0) => break,
                Ok(n) => engine.update(&buffer[..n]),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(FsError::from(e)),
            }
        }
        Ok(engine.finalize())
    }

    /// Digests the file at `path`
    ///
    /// # Errors
    /// Returns [`FsError::NotFound`] if the file is missing and
    /// [`FsError::Io`] if it cannot be opened or read
    #[instrument(skip(self), fields(path = %path.display()))]
    pub fn digest_file(&self, algorithm: HashAlgorithm, path: &Path) -> Result<ContentDigest> {
        let mut file = File::open(path).map_err(|e| FsError::io(path, e))?;
        let digest = self.digest_reader(algorithm, &mut file).map_err(|e| match e {
            FsError::Io { source, .. } => FsError::io(path, source),
            other => other,
        })?;
        debug!(digest = %digest, "file digest computed");
        Ok(digest)
    }
}
