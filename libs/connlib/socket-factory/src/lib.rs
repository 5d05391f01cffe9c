#![cfg_attr(test, allow(clippy::unwrap_used))]

mod endpoint;
#[cfg(target_family = "unix")]
mod udp;

use std::io;
use std::sync::Arc;

pub use endpoint::{Endpoint, EndpointError, parse_endpoint};
#[cfg(target_family = "unix")]
pub use udp::{MAX_EPHEMERAL_BIND_ATTEMPTS, UdpBind, UdpNetworking};

/// Creates [`Bind`]s and [`Endpoint`]s for the current platform.
pub trait Networking: Send + Sync + 'static {
    /// Binds UDP sockets on `port` for both IPv4 and IPv6, returning the port that was actually bound.
    ///
    /// `0` requests an ephemeral port.
    fn create_bind(&self, port: u16) -> io::Result<(Arc<dyn Bind>, u16)>;

    /// Parses a literal `ip:port` address; IPv6 addresses must be in brackets.
    fn create_endpoint(&self, addr: &str) -> Result<Endpoint, EndpointError>;
}

/// Listens on one port for both IPv4 and IPv6 datagrams.
///
/// All methods may be called concurrently. [`Bind::close`] wakes up any pending receive or send.
pub trait Bind: Send + Sync + 'static {
    /// Sets the firewall mark on every socket of this bind.
    fn set_mark(&self, mark: u32) -> io::Result<()>;

    /// Blocks until an IPv4 datagram arrives, returning its length and where it came from.
    fn receive_ipv4(&self, buf: &mut [u8]) -> io::Result<(usize, Endpoint)>;

    /// Blocks until an IPv6 datagram arrives, returning its length and where it came from.
    fn receive_ipv6(&self, buf: &mut [u8]) -> io::Result<(usize, Endpoint)>;

    /// Sends `buf` to the endpoint's destination, from its cached source address if there is one.
    fn send(&self, buf: &[u8], endpoint: &Endpoint) -> io::Result<()>;

    fn close(&self) -> io::Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, derive_more::Display)]
pub enum IpVersion {
    #[display("IPv4")]
    V4,
    #[display("IPv6")]
    V6,
}

impl IpVersion {
    pub const ALL: [IpVersion; 2] = [IpVersion::V4, IpVersion::V6];

    /// Receives on the socket of this IP version.
    pub fn receive(self, bind: &dyn Bind, buf: &mut [u8]) -> io::Result<(usize, Endpoint)> {
        match self {
            IpVersion::V4 => bind.receive_ipv4(buf),
            IpVersion::V6 => bind.receive_ipv6(buf),
        }
    }
}
