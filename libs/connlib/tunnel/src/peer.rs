use std::fmt;

use parking_lot::Mutex;
use socket_factory::Endpoint;

/// Identifies a peer by its static public key.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PeerKey(pub [u8; 32]);

impl fmt::Display for PeerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // The first few bytes are enough to tell peers apart in logs.
        for byte in &self.0[..4] {
            write!(f, "{byte:02x}")?;
        }

        Ok(())
    }
}

impl fmt::Debug for PeerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PeerKey({self})")
    }
}

/// A remote peer and the endpoint we last exchanged datagrams with.
#[derive(Debug)]
pub struct Peer {
    key: PeerKey,
    endpoint: Mutex<Option<Endpoint>>,
}

impl Peer {
    pub(crate) fn new(key: PeerKey) -> Self {
        Self {
            key,
            endpoint: Mutex::new(None),
        }
    }

    pub fn key(&self) -> PeerKey {
        self.key
    }

    pub fn endpoint(&self) -> Option<Endpoint> {
        *self.endpoint.lock()
    }

    pub fn set_endpoint(&self, endpoint: Endpoint) {
        *self.endpoint.lock() = Some(endpoint);
    }

    /// Forgets the local address cached in the endpoint.
    pub(crate) fn clear_src(&self) {
        if let Some(endpoint) = self.endpoint.lock().as_mut() {
            endpoint.clear_src();
        }
    }
}
