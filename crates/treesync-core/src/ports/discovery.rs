//! Peer discovery port (driven/secondary port)
//!
//! The observation layer never depends on peer identity. These types exist
//! so the sync-decision layer can pair a local [`ChangeEvent`] with a
//! transfer target without the core knowing about service announcement.
//!
//! [`ChangeEvent`]: crate::domain::ChangeEvent

use std::fmt::{self, Display, Formatter};

use serde::{Deserialize, Serialize};

/// A resolved peer service
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeerDescriptor {
    pub host: String,
    pub port: u16,
    pub service_name: String,
}

impl PeerDescriptor {
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16, service_name: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            service_name: service_name.into(),
        }
    }

    /// `host:port`, suitable for a socket address lookup
    #[must_use]
    pub fn authority(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Display for PeerDescriptor {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}:{})", self.service_name, self.host, self.port)
    }
}

/// Source of services that have been both announced and resolved
pub trait ServiceDirectory: Send + Sync {
    /// Snapshot of the currently resolved services
    fn resolved_services(&self) -> Vec<PeerDescriptor>;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StaticDirectory(Vec<PeerDescriptor>);

    impl ServiceDirectory for StaticDirectory {
        fn resolved_services(&self) -> Vec<PeerDescriptor> {
            self.0.clone()
        }
    }

    #[test]
    fn test_peer_authority() {
        let peer = PeerDescriptor::new("192.168.1.20", 7070, "treesync-peer");
        assert_eq!(peer.authority(), "192.168.1.20:7070");
        assert_eq!(peer.to_string(), "treesync-peer (192.168.1.20:7070)");
    }

    #[test]
    fn test_directory_as_trait_object() {
        let directory: Box<dyn ServiceDirectory> = Box::new(StaticDirectory(vec![
            PeerDescriptor::new("a.local", 1, "one"),
            PeerDescriptor::new("b.local", 2, "two"),
        ]));
        let services = directory.resolved_services();
        assert_eq!(services.len(), 2);
        assert_eq!(services[1].service_name, "two");
    }
}
