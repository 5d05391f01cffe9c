#![cfg_attr(test, allow(clippy::unwrap_used))]

use std::io;

#[cfg(any(target_os = "dragonfly", target_os = "freebsd"))]
pub mod bsd;
#[cfg(target_family = "unix")]
mod device;
#[cfg(target_family = "unix")]
pub mod ioctl;
#[cfg(target_family = "unix")]
mod kernel;
#[cfg(target_family = "unix")]
pub mod route;
#[cfg(all(target_family = "unix", any(test, feature = "test")))]
pub mod testing;
#[cfg(target_family = "unix")]
pub mod unix;

#[cfg(target_family = "unix")]
pub use device::{MAX_PROBED_UNITS, PACKET_INFORMATION_LEN, TunDevice, packet_information};
#[cfg(target_family = "unix")]
pub use kernel::{Kernel, LinkStatus, discover_name, get_mtu, rename, set_mtu};

/// A state change of the TUN interface, as observed by the route monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterfaceEvent {
    Up,
    Down,
    MtuChanged,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Interface name `{name}` is longer than {max} bytes")]
    InvalidName { name: String, max: usize },
    #[error("Interface `{0}` already exists")]
    AlreadyExists(String),
    #[error("No TUN device node is available")]
    NoDeviceAvailable(#[source] io::Error),
    #[error("Failed to determine the name of the TUN interface")]
    NameDiscovery(#[source] io::Error),
    #[error("Failed to {op} on `{name}`")]
    Ioctl {
        op: &'static str,
        name: String,
        #[source]
        source: io::Error,
    },
    #[error("Failed to rename interface `{old}` to `{new}`")]
    Rename {
        old: String,
        new: String,
        #[source]
        source: io::Error,
    },
    #[error("Failed to set MTU of `{name}`")]
    SetMtu {
        name: String,
        #[source]
        source: io::Error,
    },
    #[error("Failed to get MTU of `{name}`")]
    GetMtu {
        name: String,
        #[source]
        source: io::Error,
    },
    #[error("TUN device is closed")]
    DeviceClosed,
    #[error("Header offset {offset} leaves no room for the packet information prefix")]
    InvalidOffset { offset: usize },
    #[error("Cannot write an empty packet")]
    EmptyPacket,
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// The packet transport consumed by the encryption layer.
///
/// `offset` marks where the IP packet starts within `buf`; the bytes before it are reserved for headers.
pub trait Tun: Send + Sync + 'static {
    /// Reads one IP packet into `buf[offset..]`, returning its length.
    fn read(&self, buf: &mut [u8], offset: usize) -> Result<usize, Error>;

    /// Writes the IP packet in `buf[offset..]`, returning how many bytes of it were written.
    fn write(&self, buf: &mut [u8], offset: usize) -> Result<usize, Error>;

    /// The current name of the interface.
    fn name(&self) -> String;

    fn mtu(&self) -> Result<u32, Error>;

    /// State changes of the interface.
    ///
    /// The stream ends when the device is closed or the monitor hits a fatal error.
    fn events(&self) -> flume::Receiver<InterfaceEvent>;

    fn close(&self) -> Result<(), Error>;
}
