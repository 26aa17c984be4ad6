//! Port definitions for the collaborators outside the observation layer
//!
//! - [`discovery`] - resolved peer services, consumed by the sync-decision layer
//! - [`encryption`] - payload encryption producing an opaque artifact file
//!
//! Both use `anyhow::Result` because their failures are adapter-specific.

pub mod discovery;
pub mod encryption;

pub use discovery::{PeerDescriptor, ServiceDirectory};
pub use encryption::FileEncryptor;
