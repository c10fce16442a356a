//! Peer identity and discovery data.

use std::fmt;

use uuid::Uuid;

/// Stable address of a peripheral as reported by the transport driver.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerAddress(String);

impl PeerAddress {
    /// Creates a peer address.
    #[must_use]
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    /// Returns the address text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeerAddress {
    fn from(address: &str) -> Self {
        Self::new(address)
    }
}

/// One advertisement seen during discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Advertisement {
    /// Advertising peer.
    pub address: PeerAddress,
    /// Advertised local name, if the packet carried one.
    pub name: Option<String>,
    /// Advertised service identifiers.
    pub service_uuids: Vec<Uuid>,
}

impl Advertisement {
    /// Creates an advertisement without a name or services.
    #[must_use]
    pub fn new(address: impl Into<PeerAddress>) -> Self {
        Self {
            address: address.into(),
            name: None,
            service_uuids: Vec::new(),
        }
    }

    /// Sets the advertised name.
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Adds an advertised service.
    #[must_use]
    pub fn service(mut self, uuid: Uuid) -> Self {
        self.service_uuids.push(uuid);
        self
    }

    /// Returns true if the peer advertises the given service.
    #[must_use]
    pub fn has_service(&self, uuid: &Uuid) -> bool {
        self.service_uuids.contains(uuid)
    }
}
