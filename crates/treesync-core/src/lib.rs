//! treesync Core - Domain types and configuration
//!
//! This crate holds everything the observation layer agrees on:
//! - **Domain values** - `FileEntry`, `ContentDigest`, `AttributeRecord`,
//!   `WatchConfiguration`, `ChangeEvent`, `ScanWarning`
//! - **Configuration** - the YAML config file and its validation
//! - **Ports** - narrow traits for the excluded collaborators (peer discovery
//!   and payload encryption)
//!
//! # Architecture
//!
//! The domain module has no filesystem access. `treesync-fs` produces these
//! values from a real tree and `treesync-sync` turns raw notifications into
//! [`domain::ChangeEvent`] values built from them.

pub mod config;
pub mod domain;
pub mod ports;
