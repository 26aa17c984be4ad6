//! Domain error types
//!
//! Validation failures raised while building or parsing domain values.

use thiserror::Error;

/// Errors that can occur in domain operations
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Invalid path format or content
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    /// A digest string or byte length did not match its algorithm
    #[error("Invalid digest: {0}")]
    InvalidDigest(String),

    /// A hash algorithm outside the supported set was requested
    #[error("Unsupported hash algorithm: {0}")]
    UnsupportedAlgorithm(String),

    /// A persisted sync generation was not a decimal integer
    #[error("Invalid sync generation: {0}")]
    InvalidGeneration(String),

    /// Generic validation failure
    #[error("Validation failed: {0}")]
    ValidationFailed(String),
}
