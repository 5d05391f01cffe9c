//! Fixed-layout control requests for interface `ioctl`s.
//!
//! Every request is an explicit byte record that is encoded and decoded here.
//! The only place where memory is handed to the kernel is [`exec`].

use std::{
    ffi::c_void,
    io,
    marker::PhantomData,
    os::fd::{AsRawFd as _, BorrowedFd},
};

/// Length of an interface name field, including the terminating NUL.
pub const IFNAMSIZ: usize = 16;
/// Size of `struct ifreq` on the BSDs: the name followed by a 16-byte union.
pub const IFREQ_SIZE: usize = IFNAMSIZ + 16;
/// Capacity of the status text returned by `SIOCGIFSTATUS`.
pub const IFSTATMAX: usize = 800;
/// Size of `struct ifstat`.
pub const IFSTAT_SIZE: usize = IFNAMSIZ + IFSTATMAX + 1;

const IOCPARM_MASK: libc::c_ulong = 0x1fff;
const IOC_VOID: libc::c_ulong = 0x2000_0000;
const IOC_OUT: libc::c_ulong = 0x4000_0000;
const IOC_IN: libc::c_ulong = 0x8000_0000;
const IOC_INOUT: libc::c_ulong = IOC_IN | IOC_OUT;

const fn ioc(inout: libc::c_ulong, group: u8, num: u8, len: usize) -> libc::c_ulong {
    inout
        | ((len as libc::c_ulong & IOCPARM_MASK) << 16)
        | ((group as libc::c_ulong) << 8)
        | num as libc::c_ulong
}

pub const fn io(group: u8, num: u8) -> libc::c_ulong {
    ioc(IOC_VOID, group, num, 0)
}

pub const fn iow(group: u8, num: u8, len: usize) -> libc::c_ulong {
    ioc(IOC_IN, group, num, len)
}

pub const fn iowr(group: u8, num: u8, len: usize) -> libc::c_ulong {
    ioc(IOC_INOUT, group, num, len)
}

const C_INT: usize = std::mem::size_of::<libc::c_int>();

/// Prefix every packet with its address family.
pub const TUNSIFHEAD: libc::c_ulong = iow(b't', 96, C_INT);
/// Set the link-layer mode of the interface (`IFF_BROADCAST` or `IFF_POINTOPOINT`).
pub const TUNSIFMODE: libc::c_ulong = iow(b't', 94, C_INT);
/// Assign the device to the calling process.
pub const TUNSIFPID: libc::c_ulong = io(b't', 95);

pub const SIOCGIFFLAGS: libc::c_ulong = iowr(b'i', 17, IFREQ_SIZE);
pub const SIOCSIFNAME: libc::c_ulong = iow(b'i', 40, IFREQ_SIZE);
pub const SIOCGIFMTU: libc::c_ulong = iowr(b'i', 51, IFREQ_SIZE);
pub const SIOCSIFMTU: libc::c_ulong = iow(b'i', 52, IFREQ_SIZE);
pub const SIOCGIFSTATUS: libc::c_ulong = iowr(b'i', 59, IFSTAT_SIZE);

/// Memory that may be handed to the kernel as the argument of an `ioctl`.
///
/// # Safety
///
/// `as_mut_ptr` must point to memory owned by `self` that stays valid for as long as `self` is borrowed.
pub unsafe trait Argument {
    fn as_mut_ptr(&mut self) -> *mut c_void;
}

unsafe impl Argument for libc::c_int {
    fn as_mut_ptr(&mut self) -> *mut c_void {
        self as *mut libc::c_int as *mut c_void
    }
}

/// Executes the `ioctl` syscall on the given file descriptor with the provided request.
///
/// # Safety
///
/// `code` must be a request whose argument has the exact layout of `arg`.
pub unsafe fn exec<A>(fd: BorrowedFd<'_>, code: libc::c_ulong, arg: &mut A) -> io::Result<()>
where
    A: Argument + ?Sized,
{
    let ret = unsafe { libc::ioctl(fd.as_raw_fd(), code as _, arg.as_mut_ptr()) };

    if ret < 0 {
        return Err(io::Error::last_os_error());
    }

    Ok(())
}

/// Executes an `ioctl` that takes no argument.
///
/// # Safety
///
/// `code` must be a request without an argument.
pub unsafe fn exec_void(fd: BorrowedFd<'_>, code: libc::c_ulong) -> io::Result<()> {
    let ret = unsafe { libc::ioctl(fd.as_raw_fd(), code as _, std::ptr::null_mut::<c_void>()) };

    if ret < 0 {
        return Err(io::Error::last_os_error());
    }

    Ok(())
}

/// Encodes `name` as a NUL-terminated interface name field.
pub fn encode_name(name: &str) -> io::Result<[u8; IFNAMSIZ]> {
    let bytes = name.as_bytes();

    if bytes.len() >= IFNAMSIZ {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("Interface name `{name}` is longer than {} bytes", IFNAMSIZ - 1),
        ));
    }
    if bytes.contains(&0) {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "Interface name must not contain NUL bytes",
        ));
    }

    let mut field = [0u8; IFNAMSIZ];
    field[..bytes.len()].copy_from_slice(bytes);

    Ok(field)
}

/// Decodes a NUL-terminated name field.
pub fn decode_name(field: &[u8]) -> String {
    let len = field.iter().position(|b| *b == 0).unwrap_or(field.len());

    String::from_utf8_lossy(&field[..len]).into_owned()
}

/// A `struct ifreq`: the interface name followed by a request-specific payload.
#[derive(Clone)]
pub struct Request {
    bytes: [u8; IFREQ_SIZE],
}

impl Request {
    pub fn new(name: &str) -> io::Result<Self> {
        let mut bytes = [0u8; IFREQ_SIZE];
        bytes[..IFNAMSIZ].copy_from_slice(&encode_name(name)?);

        Ok(Self { bytes })
    }

    pub fn with_mtu(name: &str, mtu: u32) -> io::Result<Self> {
        let mut req = Self::new(name)?;
        let mtu = libc::c_int::try_from(mtu).map_err(|_| {
            io::Error::new(io::ErrorKind::InvalidInput, format!("MTU {mtu} out of range"))
        })?;
        req.payload_mut()[..C_INT].copy_from_slice(&mtu.to_ne_bytes());

        Ok(req)
    }

    pub fn name(&self) -> String {
        decode_name(&self.bytes[..IFNAMSIZ])
    }

    /// The `ifr_mtu` member.
    pub fn mtu(&self) -> i32 {
        let mut int = [0u8; C_INT];
        int.copy_from_slice(&self.payload()[..C_INT]);

        libc::c_int::from_ne_bytes(int)
    }

    /// The `ifr_flags` and `ifr_flagshigh` members, combined.
    pub fn flags(&self) -> u32 {
        let payload = self.payload();
        let low = u16::from_ne_bytes([payload[0], payload[1]]);
        let high = u16::from_ne_bytes([payload[2], payload[3]]);

        (u32::from(high) << 16) | u32::from(low)
    }

    fn payload(&self) -> &[u8] {
        &self.bytes[IFNAMSIZ..]
    }

    fn payload_mut(&mut self) -> &mut [u8] {
        &mut self.bytes[IFNAMSIZ..]
    }
}

unsafe impl Argument for Request {
    fn as_mut_ptr(&mut self) -> *mut c_void {
        self.bytes.as_mut_ptr() as *mut c_void
    }
}

/// A `struct ifreq` for `SIOCSIFNAME`, whose `ifr_data` points at the new name.
///
/// The request borrows the new name so the pointer cannot outlive it.
pub struct RenameRequest<'a> {
    req: Request,
    _new_name: PhantomData<&'a [u8; IFNAMSIZ]>,
}

impl<'a> RenameRequest<'a> {
    pub fn new(old_name: &str, new_name: &'a [u8; IFNAMSIZ]) -> io::Result<Self> {
        let mut req = Request::new(old_name)?;

        let ptr = (new_name.as_ptr() as usize).to_ne_bytes();
        req.payload_mut()[..ptr.len()].copy_from_slice(&ptr);

        Ok(Self {
            req,
            _new_name: PhantomData,
        })
    }

    pub fn old_name(&self) -> String {
        self.req.name()
    }

    #[cfg(test)]
    fn data_ptr(&self) -> usize {
        let mut ptr = [0u8; std::mem::size_of::<usize>()];
        let len = ptr.len();
        ptr.copy_from_slice(&self.req.payload()[..len]);

        usize::from_ne_bytes(ptr)
    }
}

unsafe impl Argument for RenameRequest<'_> {
    fn as_mut_ptr(&mut self) -> *mut c_void {
        self.req.as_mut_ptr()
    }
}

/// A `struct ifstat`, filled by `SIOCGIFSTATUS` with a human-readable status text.
pub struct StatusRequest {
    bytes: [u8; IFSTAT_SIZE],
}

impl StatusRequest {
    pub fn new(name: &str) -> io::Result<Self> {
        let mut bytes = [0u8; IFSTAT_SIZE];
        bytes[..IFNAMSIZ].copy_from_slice(&encode_name(name)?);

        Ok(Self { bytes })
    }

    /// The status text, `None` if the kernel returned nothing.
    pub fn text(&self) -> Option<String> {
        let text = decode_name(&self.bytes[IFNAMSIZ..]);

        (!text.is_empty()).then_some(text)
    }
}

unsafe impl Argument for StatusRequest {
    fn as_mut_ptr(&mut self) -> *mut c_void {
        self.bytes.as_mut_ptr() as *mut c_void
    }
}

/// Extracts the owning process from the status text of a TUN interface.
///
/// The driver reports it as a line of the form `\tOpened by PID <pid>\n`.
pub fn parse_owner_pid(status: &str) -> Option<u32> {
    status.split_inclusive('\n').find_map(|line| {
        line.strip_prefix("\tOpened by PID ")?
            .strip_suffix('\n')?
            .parse()
            .ok()
    })
}
