//! Content digests
//!
//! A [`ContentDigest`] is the identity of a byte stream: two files are the same
//! content exactly when their digests are equal. The algorithm is part of the
//! value, so a SHA-1 and a SHA-512 digest of the same bytes never compare equal.

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::errors::DomainError;

// ============================================================================
// HashAlgorithm
// ============================================================================

/// Supported digest algorithms
///
/// SHA-1 is the fast change-detection fingerprint. SHA-512 is used where a
/// stronger identity check is wanted, such as verifying a transferred file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    #[default]
    Sha1,
    Sha512,
}

impl HashAlgorithm {
    /// Length of a digest produced by this algorithm, in bytes
    #[must_use]
    pub const fn digest_len(self) -> usize {
        match self {
            HashAlgorithm::Sha1 => 20,
            HashAlgorithm::Sha512 => 64,
        }
    }

    /// Canonical lowercase tag used in persisted digests
    #[must_use]
    pub const fn tag(self) -> &'static str {
        match self {
            HashAlgorithm::Sha1 => "sha1",
            HashAlgorithm::Sha512 => "sha512",
        }
    }
}

impl Display for HashAlgorithm {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for HashAlgorithm {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sha1" | "sha-1" => Ok(HashAlgorithm::Sha1),
            "sha512" | "sha-512" => Ok(HashAlgorithm::Sha512),
            other => Err(DomainError::UnsupportedAlgorithm(other.to_string())),
        }
    }
}

// ============================================================================
// ContentDigest
// ============================================================================

/// An algorithm-tagged digest of some content
///
/// Immutable once computed. Rendered and persisted as `<algorithm>:<hex>`,
/// e.g. `sha1:aaf4c61ddcc5e8a2dabede0f3b482cd9aea9434d`.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct ContentDigest {
    algorithm: HashAlgorithm,
    bytes: Vec<u8>,
}

impl ContentDigest {
    /// Wraps raw digest bytes, checking the length against the algorithm
    ///
    /// # Errors
    /// Returns [`DomainError::InvalidDigest`] if `bytes` has the wrong length
    pub fn new(algorithm: HashAlgorithm, bytes: Vec<u8>) -> Result<Self, DomainError> {
        if bytes.len() != algorithm.digest_len() {
            return Err(DomainError::InvalidDigest(format!(
                "{} digest must be {} bytes, got {}",
                algorithm,
                algorithm.digest_len(),
                bytes.len()
            )));
        }
        Ok(Self { algorithm, bytes })
    }

    #[must_use]
    pub fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Lowercase hex encoding of the digest bytes (no algorithm tag)
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(&self.bytes)
    }
}

impl fmt::Debug for ContentDigest {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let hex = self.to_hex();
        write!(
            f,
            "ContentDigest({}:{})",
            self.algorithm,
            hex.get(..16).unwrap_or(&hex)
        )
    }
}

impl Display for ContentDigest {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm, self.to_hex())
    }
}

impl FromStr for ContentDigest {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (tag, hex_part) = s
            .split_once(':')
            .ok_or_else(|| DomainError::InvalidDigest(format!("missing algorithm tag: {s}")))?;
        let algorithm = HashAlgorithm::from_str(tag)?;
        let bytes = hex::decode(hex_part)
            .map_err(|e| DomainError::InvalidDigest(format!("invalid hex in {s}: {e}")))?;
        Self::new(algorithm, bytes)
    }
}

impl Serialize for ContentDigest {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ContentDigest {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HELLO_SHA1: &str = "aaf4c61ddcc5e8a2dabede0f3b482cd9aea9434d";

    fn hello_digest() -> ContentDigest {
        ContentDigest::new(HashAlgorithm::Sha1, hex::decode(HELLO_SHA1).unwrap()).unwrap()
    }

    #[test]
    fn test_algorithm_parse() {
        assert_eq!("sha1".parse::<HashAlgorithm>().unwrap(), HashAlgorithm::Sha1);
        assert_eq!("SHA-1".parse::<HashAlgorithm>().unwrap(), HashAlgorithm::Sha1);
        assert_eq!(
            "sha512".parse::<HashAlgorithm>().unwrap(),
            HashAlgorithm::Sha512
        );
        assert_eq!(
            "md5".parse::<HashAlgorithm>(),
            Err(DomainError::UnsupportedAlgorithm("md5".to_string()))
        );
    }

    #[test]
    fn test_digest_rejects_wrong_length() {
        let err = ContentDigest::new(HashAlgorithm::Sha512, vec![0u8; 20]).unwrap_err();
        assert!(matches!(err, DomainError::InvalidDigest(_)));
    }

    #[test]
    fn test_digest_display_is_tagged_hex() {
        assert_eq!(hello_digest().to_string(), format!("sha1:{HELLO_SHA1}"));
    }

    #[test]
    fn test_digest_parse_tagged() {
        let parsed: ContentDigest = format!("sha1:{HELLO_SHA1}").parse().unwrap();
        assert_eq!(parsed, hello_digest());
    }

    #[test]
    fn test_digest_parse_errors() {
        assert!("aaf4c61d".parse::<ContentDigest>().is_err());
        assert!("sha1:not-hex".parse::<ContentDigest>().is_err());
        assert!(matches!(
            "crc32:00000000".parse::<ContentDigest>(),
            Err(DomainError::UnsupportedAlgorithm(_))
        ));
    }

    #[test]
    fn test_same_bytes_different_algorithm_not_equal() {
        let a = ContentDigest::new(HashAlgorithm::Sha1, vec![7u8; 20]).unwrap();
        let b = ContentDigest::new(HashAlgorithm::Sha512, vec![7u8; 64]).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_digest_serde_as_string() {
        let json = serde_json::to_string(&hello_digest()).unwrap();
        assert_eq!(json, format!("\"sha1:{HELLO_SHA1}\""));
        let back: ContentDigest = serde_json::from_str(&json).unwrap();
        assert_eq!(back, hello_digest());
    }
}
