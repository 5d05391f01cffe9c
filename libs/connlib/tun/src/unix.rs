use std::io;
use std::os::fd::{AsRawFd as _, BorrowedFd, IntoRawFd as _, OwnedFd};

/// Read from the given file descriptor into the buffer.
pub fn read(fd: BorrowedFd<'_>, dst: &mut [u8]) -> io::Result<usize> {
    // Safety: `dst` is valid for writes of `dst.len()` bytes and `fd` is borrowed for the duration of the call.
    match unsafe { libc::read(fd.as_raw_fd(), dst.as_mut_ptr() as _, dst.len()) } {
        -1 => Err(io::Error::last_os_error()),
        n => Ok(n as usize),
    }
}

/// Write the buffer to the given file descriptor.
pub fn write(fd: BorrowedFd<'_>, src: &[u8]) -> io::Result<usize> {
    // Safety: `src` is valid for reads of `src.len()` bytes and `fd` is borrowed for the duration of the call.
    match unsafe { libc::write(fd.as_raw_fd(), src.as_ptr() as _, src.len() as _) } {
        -1 => Err(io::Error::last_os_error()),
        n => Ok(n as usize),
    }
}

/// Closes the file descriptor and reports the result, unlike dropping an [`OwnedFd`].
pub fn close(fd: OwnedFd) -> io::Result<()> {
    // Safety: We own the FD and give up ownership here.
    match unsafe { libc::close(fd.into_raw_fd()) } {
        -1 => Err(io::Error::last_os_error()),
        _ => Ok(()),
    }
}

/// Whether a failed read or write should be attempted again once the descriptor is ready.
pub fn is_retryable(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::sys::socket::{AddressFamily, SockFlag, SockType, socketpair};
    use std::os::fd::AsFd as _;

    #[test]
    fn non_blocking_read_without_data_is_retryable() {
        let (a, _b) = socketpair(
            AddressFamily::Unix,
            SockType::SeqPacket,
            None,
            SockFlag::empty(),
        )
        .unwrap();
        rwcancel::set_non_blocking(a.as_fd()).unwrap();

        let err = read(a.as_fd(), &mut [0u8; 16]).unwrap_err();

        assert!(is_retryable(&err));
    }

    #[test]
    fn write_then_read_preserves_packet() {
        let (a, b) = socketpair(
            AddressFamily::Unix,
            SockType::SeqPacket,
            None,
            SockFlag::empty(),
        )
        .unwrap();

        write(a.as_fd(), b"hello").unwrap();
        let mut buf = [0u8; 16];
        let n = read(b.as_fd(), &mut buf).unwrap();

        assert_eq!(&buf[..n], b"hello");
    }

    #[test]
    fn closing_reports_success() {
        let (a, b) = socketpair(
            AddressFamily::Unix,
            SockType::SeqPacket,
            None,
            SockFlag::empty(),
        )
        .unwrap();

        close(a).unwrap();

        assert_eq!(read(b.as_fd(), &mut [0u8; 16]).unwrap(), 0);
    }
}
