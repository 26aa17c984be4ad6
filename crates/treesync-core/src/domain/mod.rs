//! Domain module containing the values shared by every treesync layer
//!
//! - [`digest`] - `HashAlgorithm` and `ContentDigest`
//! - [`entry`] - `FileEntry` and `PathKind`
//! - [`attributes`] - `AttributeRecord` and the reserved attribute names
//! - [`watch`] - `WatchConfiguration`
//! - [`change`] - `ChangeEvent` and `ChangeKind`
//! - [`warning`] - `ScanWarning`

pub mod attributes;
pub mod change;
pub mod digest;
pub mod entry;
pub mod errors;
pub mod warning;
pub mod watch;

pub use attributes::{AttributeRecord, ATTR_CONTENT_DIGEST, ATTR_SYNC_GENERATION};
pub use change::{ChangeEvent, ChangeKind};
pub use digest::{ContentDigest, HashAlgorithm};
pub use entry::{FileEntry, PathKind};
pub use errors::DomainError;
pub use warning::{ScanWarning, ScanWarningKind};
pub use watch::WatchConfiguration;
