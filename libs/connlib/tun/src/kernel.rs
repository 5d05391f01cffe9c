use std::io;
use std::os::fd::{BorrowedFd, OwnedFd};
use std::path::Path;

use crate::Error;

/// Flags and MTU of an interface, as currently reported by the OS.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkStatus {
    pub up: bool,
    pub mtu: u32,
}

/// The OS control surface needed to acquire and manage a TUN interface.
///
/// Every method maps to a single syscall or `ioctl` (or a short sequence of them on a short-lived control socket).
pub trait Kernel: Send + Sync + 'static {
    /// Index of the interface called `name`, `None` if there is no such interface.
    fn interface_index(&self, name: &str) -> io::Result<Option<u32>>;

    /// Names of all interfaces, in index order.
    fn interface_names(&self) -> io::Result<Vec<String>>;

    /// Fails with [`io::ErrorKind::NotFound`] if the interface is gone.
    fn link_status(&self, index: u32) -> io::Result<LinkStatus>;

    fn open_device(&self, path: &Path) -> io::Result<OwnedFd>;

    /// Records the calling process as the owner of the device.
    fn bind_to_process(&self, device: BorrowedFd<'_>) -> io::Result<()>;

    /// The driver's status text for the interface.
    fn interface_status(&self, name: &str) -> io::Result<String>;

    /// Makes the device prefix every packet with its 4-byte address family.
    fn enable_packet_information(&self, device: BorrowedFd<'_>) -> io::Result<()>;

    fn set_broadcast_mode(&self, device: BorrowedFd<'_>) -> io::Result<()>;

    fn rename(&self, old: &str, new: &str) -> io::Result<()>;

    fn set_mtu(&self, name: &str, mtu: u32) -> io::Result<()>;

    fn mtu(&self, name: &str) -> io::Result<u32>;

    /// Opens a socket that receives the kernel's routing and interface notifications.
    fn open_route_socket(&self) -> io::Result<OwnedFd>;
}

/// Finds the name of the interface backing `device`.
///
/// There is no `ioctl` that returns it directly, so we claim the device for `pid` and then look for
/// the interface whose status text says it was opened by `pid`.
///
/// This is racy if the same process creates several devices concurrently.
pub fn discover_name(kernel: &dyn Kernel, device: BorrowedFd<'_>, pid: u32) -> Result<String, Error> {
    kernel
        .bind_to_process(device)
        .map_err(|source| Error::Ioctl {
            op: "assign TUN device to process",
            name: format!("pid {pid}"),
            source,
        })?;

    for name in kernel.interface_names().map_err(Error::NameDiscovery)? {
        let status = match kernel.interface_status(&name) {
            Ok(status) => status,
            Err(e) => {
                tracing::trace!(%name, "Failed to get interface status: {e}");
                continue;
            }
        };

        if crate::ioctl::parse_owner_pid(&status) == Some(pid) {
            return Ok(name);
        }
    }

    Err(Error::NameDiscovery(io::Error::new(
        io::ErrorKind::NotFound,
        format!("No interface is owned by PID {pid}"),
    )))
}

/// Renames an interface, wrapping failures with both names.
pub fn rename(kernel: &dyn Kernel, old: &str, new: &str) -> Result<(), Error> {
    kernel.rename(old, new).map_err(|source| Error::Rename {
        old: old.to_owned(),
        new: new.to_owned(),
        source,
    })?;

    tracing::debug!(%old, %new, "Renamed interface");

    Ok(())
}

pub fn set_mtu(kernel: &dyn Kernel, name: &str, mtu: u32) -> Result<(), Error> {
    kernel.set_mtu(name, mtu).map_err(|source| Error::SetMtu {
        name: name.to_owned(),
        source,
    })
}

pub fn get_mtu(kernel: &dyn Kernel, name: &str) -> Result<u32, Error> {
    kernel.mtu(name).map_err(|source| Error::GetMtu {
        name: name.to_owned(),
        source,
    })
}
