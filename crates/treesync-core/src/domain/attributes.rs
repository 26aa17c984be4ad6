//! Per-file attribute records
//!
//! Attribute values are opaque bytes. The only names the core interprets are
//! the two reserved ones below, and only through the typed helpers here.

use std::collections::BTreeMap;

use super::digest::ContentDigest;
use super::errors::DomainError;

/// Last known content digest, stored as the tagged string `sha1:<hex>`
pub const ATTR_CONTENT_DIGEST: &str = "content-digest";

/// Monotonic counter bumped on every classified change, stored as decimal text
pub const ATTR_SYNC_GENERATION: &str = "sync-generation";

/// Default namespace prefix for native extended attributes
pub const DEFAULT_NAMESPACE: &str = "user.treesync";

/// Returns the reserved attribute names the core recognizes
#[must_use]
pub fn reserved_attributes() -> Vec<&'static str> {
    vec![ATTR_CONTENT_DIGEST, ATTR_SYNC_GENERATION]
}

/// All attributes of one file, keyed by attribute name (without namespace)
pub type AttributeRecord = BTreeMap<String, Vec<u8>>;

/// Encodes a digest for the `content-digest` attribute
#[must_use]
pub fn encode_digest(digest: &ContentDigest) -> Vec<u8> {
    digest.to_string().into_bytes()
}

/// Decodes a `content-digest` attribute value
///
/// # Errors
/// Returns [`DomainError::InvalidDigest`] if the value is not a tagged digest
pub fn decode_digest(value: &[u8]) -> Result<ContentDigest, DomainError> {
    let text = std::str::from_utf8(value)
        .map_err(|_| DomainError::InvalidDigest("digest attribute is not UTF-8".into()))?;
    text.parse()
}

/// Encodes a generation for the `sync-generation` attribute
#[must_use]
pub fn encode_generation(generation: u64) -> Vec<u8> {
    generation.to_string().into_bytes()
}

/// Decodes a `sync-generation` attribute value
///
/// # Errors
/// Returns [`DomainError::InvalidGeneration`] if the value is not decimal text
pub fn decode_generation(value: &[u8]) -> Result<u64, DomainError> {
    std::str::from_utf8(value)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .ok_or_else(|| DomainError::InvalidGeneration(String::from_utf8_lossy(value).into()))
}
