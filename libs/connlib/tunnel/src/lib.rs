//! The socket side of the tunnel: bind lifecycle, peers and the routines connecting them to the TUN device.

#![cfg_attr(test, allow(clippy::unwrap_used))]

mod device;
mod peer;

use std::io;
use std::net::SocketAddr;

use socket_factory::{Endpoint, IpVersion};
use tun::{InterfaceEvent, Tun};

pub use device::{Device, MAX_DATAGRAM_SIZE};
pub use peer::{Peer, PeerKey};

/// A datagram received on the active bind, to be decrypted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inbound {
    pub packet: Vec<u8>,
    pub endpoint: Endpoint,
    pub version: IpVersion,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Failed to bind UDP sockets on port {port}")]
    CreateBind {
        port: u16,
        #[source]
        source: io::Error,
    },
    #[error("Failed to set firewall mark {mark}")]
    SetMark {
        mark: u32,
        #[source]
        source: io::Error,
    },
    #[error("Failed to close UDP sockets")]
    CloseBind(#[source] io::Error),
    #[error("Failed to start receive routine")]
    SpawnReceiveRoutine(#[source] io::Error),
    #[error("Failed to send datagram to {dst}")]
    Send {
        dst: SocketAddr,
        #[source]
        source: io::Error,
    },
    #[error("Device is not bound")]
    NotBound,
    #[error("Unknown peer {0}")]
    UnknownPeer(PeerKey),
    #[error("Peer {0} has no endpoint")]
    NoEndpoint(PeerKey),
}

/// Follows the state of the TUN interface until its event stream ends.
///
/// The device is brought up and down together with the interface and learns about MTU changes.
/// A fatal monitor error ends the stream too; it surfaces on the next read from `tun`.
pub fn run_tun_events(device: &Device, tun: &dyn Tun) {
    let events = tun.events();

    for event in events.iter() {
        match event {
            InterfaceEvent::Up => {
                tracing::info!(name = %tun.name(), "Interface is up");

                logging::unwrap_or_warn!(device.up(), "Failed to bring device up: {}");
            }
            InterfaceEvent::Down => {
                tracing::info!(name = %tun.name(), "Interface is down");

                logging::unwrap_or_warn!(device.down(), "Failed to bring device down: {}");
            }
            InterfaceEvent::MtuChanged => match tun.mtu() {
                Ok(mtu) => {
                    tracing::info!(name = %tun.name(), %mtu, "MTU changed");

                    device.set_mtu(mtu);
                }
                Err(e) => {
                    tracing::warn!("Failed to read MTU: {}", logging::err_with_src(&e));
                }
            },
        }
    }

    tracing::debug!(name = %tun.name(), "Interface event stream ended");
}
