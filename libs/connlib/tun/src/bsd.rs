//! The real [`Kernel`], talking to the `tun(4)` driver and the interface `ioctl`s.

use std::ffi::CStr;
use std::fs::OpenOptions;
use std::io;
use std::os::fd::{AsFd as _, BorrowedFd, OwnedFd};
use std::path::Path;
use std::sync::Arc;

use nix::errno::Errno;
use nix::net::if_::{if_nameindex, if_nametoindex};
use nix::sys::socket::{AddressFamily, SockFlag, SockType, socket};

use crate::ioctl::{self, RenameRequest, Request, StatusRequest};
use crate::{Error, Kernel, LinkStatus, TunDevice};

/// Creates a TUN interface called `name`.
pub fn create(name: &str, mtu: u32) -> Result<TunDevice, Error> {
    TunDevice::create(Arc::new(BsdKernel), name, mtu)
}

/// Adopts an already opened TUN device.
pub fn from_fd(fd: OwnedFd, mtu: u32) -> Result<TunDevice, Error> {
    TunDevice::from_fd(Arc::new(BsdKernel), fd, mtu)
}

#[derive(Debug, Default, Clone, Copy)]
pub struct BsdKernel;

impl BsdKernel {
    /// Name of the interface with the given index, `None` if there is no such interface.
    fn interface_name(&self, index: u32) -> io::Result<Option<String>> {
        let mut buf = [0 as libc::c_char; libc::IF_NAMESIZE];

        // Safety: `buf` has room for `IF_NAMESIZE` bytes as required.
        let ptr = unsafe { libc::if_indextoname(index, buf.as_mut_ptr()) };
        if ptr.is_null() {
            return Ok(None);
        }

        // Safety: `if_indextoname` wrote a NUL-terminated name into `buf`.
        let name = unsafe { CStr::from_ptr(buf.as_ptr()) };

        Ok(Some(name.to_string_lossy().into_owned()))
    }

    /// Interface `ioctl`s are issued on a throw-away datagram socket.
    fn control_socket(&self) -> io::Result<OwnedFd> {
        let fd = socket(
            AddressFamily::Inet,
            SockType::Datagram,
            SockFlag::SOCK_CLOEXEC,
            None,
        )?;

        Ok(fd)
    }

    fn interface_request(&self, code: libc::c_ulong, req: &mut Request) -> io::Result<()> {
        let control = self.control_socket()?;

        // Safety: All interface requests we issue take a `struct ifreq`.
        unsafe { ioctl::exec(control.as_fd(), code, req) }
    }
}

impl Kernel for BsdKernel {
    fn interface_index(&self, name: &str) -> io::Result<Option<u32>> {
        match if_nametoindex(name) {
            Ok(index) => Ok(Some(index)),
            Err(Errno::ENXIO | Errno::ENODEV | Errno::ENOENT) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn interface_names(&self) -> io::Result<Vec<String>> {
        let interfaces = if_nameindex()?;

        Ok(interfaces
            .iter()
            .map(|i| i.name().to_string_lossy().into_owned())
            .collect())
    }

    fn link_status(&self, index: u32) -> io::Result<LinkStatus> {
        let name = self.interface_name(index)?.ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("No interface with index {index}"),
            )
        })?;

        let mut flags = Request::new(&name)?;
        self.interface_request(ioctl::SIOCGIFFLAGS, &mut flags)?;

        Ok(LinkStatus {
            up: flags.flags() & libc::IFF_UP as u32 != 0,
            mtu: self.mtu(&name)?,
        })
    }

    fn open_device(&self, path: &Path) -> io::Result<OwnedFd> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;

        Ok(OwnedFd::from(file))
    }

    fn bind_to_process(&self, device: BorrowedFd<'_>) -> io::Result<()> {
        // Safety: `TUNSIFPID` takes no argument.
        unsafe { ioctl::exec_void(device, ioctl::TUNSIFPID) }
    }

    fn interface_status(&self, name: &str) -> io::Result<String> {
        let mut req = StatusRequest::new(name)?;
        let control = self.control_socket()?;

        // Safety: `SIOCGIFSTATUS` takes a `struct ifstat`.
        unsafe { ioctl::exec(control.as_fd(), ioctl::SIOCGIFSTATUS, &mut req)? };

        Ok(req.text().unwrap_or_default())
    }

    fn enable_packet_information(&self, device: BorrowedFd<'_>) -> io::Result<()> {
        let mut enabled: libc::c_int = 1;

        // Safety: `TUNSIFHEAD` takes an `int`.
        unsafe { ioctl::exec(device, ioctl::TUNSIFHEAD, &mut enabled) }
    }

    fn set_broadcast_mode(&self, device: BorrowedFd<'_>) -> io::Result<()> {
        let mut mode: libc::c_int = libc::IFF_BROADCAST;

        // Safety: `TUNSIFMODE` takes an `int`.
        unsafe { ioctl::exec(device, ioctl::TUNSIFMODE, &mut mode) }
    }

    fn rename(&self, old: &str, new: &str) -> io::Result<()> {
        let new_name = ioctl::encode_name(new)?;
        let mut req = RenameRequest::new(old, &new_name)?;
        let control = self.control_socket()?;

        // Safety: `SIOCSIFNAME` takes a `struct ifreq` whose data points at the new name, which `req` borrows.
        unsafe { ioctl::exec(control.as_fd(), ioctl::SIOCSIFNAME, &mut req) }
    }

    fn set_mtu(&self, name: &str, mtu: u32) -> io::Result<()> {
        let mut req = Request::with_mtu(name, mtu)?;

        self.interface_request(ioctl::SIOCSIFMTU, &mut req)
    }

    fn mtu(&self, name: &str) -> io::Result<u32> {
        let mut req = Request::new(name)?;
        self.interface_request(ioctl::SIOCGIFMTU, &mut req)?;

        u32::try_from(req.mtu()).map_err(|_| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("Kernel reported a negative MTU for `{name}`"),
            )
        })
    }

    fn open_route_socket(&self) -> io::Result<OwnedFd> {
        let fd = socket(
            AddressFamily::Route,
            SockType::Raw,
            SockFlag::SOCK_CLOEXEC,
            None,
        )?;

        Ok(fd)
    }
}
