//! Interruptible readiness waits on a non-blocking file descriptor.

#![cfg(target_family = "unix")]
#![cfg_attr(test, allow(clippy::unwrap_used))]

use std::io;
use std::os::fd::{AsFd as _, BorrowedFd, OwnedFd};
use std::sync::atomic::{AtomicBool, Ordering};

use nix::errno::Errno;
use nix::fcntl::{FcntlArg, OFlag, fcntl};
use nix::poll::{PollFd, PollFlags, PollTimeout, poll};
use parking_lot::{Condvar, Mutex};

/// Lets one side wait for a descriptor to become ready while another side can cancel that wait.
///
/// Cancellation is a token (a self-pipe that stays readable once written) plus a rendezvous:
/// [`RwCancel::cancel`] returns only after every waiter currently inside [`RwCancel::ready_read`]
/// or [`RwCancel::ready_write`] has observed the token and left.
///
/// A `true` result only says that the descriptor _was_ ready.
/// It may be spurious, so callers must re-attempt the actual I/O and come back here on `EAGAIN`.
pub struct RwCancel {
    closing_reader: OwnedFd,
    closing_writer: OwnedFd,
    cancelled: AtomicBool,
    waiters: Mutex<usize>,
    left: Condvar,
}

impl RwCancel {
    pub fn new() -> io::Result<Self> {
        let (closing_reader, closing_writer) = nix::unistd::pipe()?;
        set_non_blocking(closing_reader.as_fd())?;
        set_non_blocking(closing_writer.as_fd())?;

        Ok(Self {
            closing_reader,
            closing_writer,
            cancelled: AtomicBool::new(false),
            waiters: Mutex::new(0),
            left: Condvar::new(),
        })
    }

    /// Blocks until `fd` is readable; `false` if the wait was cancelled or failed.
    pub fn ready_read(&self, fd: BorrowedFd<'_>) -> bool {
        self.ready(fd, PollFlags::POLLIN)
    }

    /// Blocks until `fd` is writable; `false` if the wait was cancelled or failed.
    pub fn ready_write(&self, fd: BorrowedFd<'_>) -> bool {
        self.ready(fd, PollFlags::POLLOUT)
    }

    /// Wakes all current waiters and makes every future wait fail immediately.
    ///
    /// Returns once no waiter is left inside a readiness wait.
    pub fn cancel(&self) -> io::Result<()> {
        let result = match self.cancelled.swap(true, Ordering::SeqCst) {
            true => Ok(()),
            false => nix::unistd::write(&self.closing_writer, &[0])
                .map(|_| ())
                .map_err(io::Error::from),
        };

        let mut waiters = self.waiters.lock();
        while *waiters > 0 {
            self.left.wait(&mut waiters);
        }

        result
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    fn ready(&self, fd: BorrowedFd<'_>, interest: PollFlags) -> bool {
        let _waiter = self.enter();

        if self.is_cancelled() {
            return false;
        }

        loop {
            let mut fds = [
                PollFd::new(fd, interest),
                PollFd::new(self.closing_reader.as_fd(), PollFlags::POLLIN),
            ];

            match poll(&mut fds, PollTimeout::NONE) {
                Ok(_) => {}
                Err(Errno::EINTR) => continue,
                Err(e) => {
                    tracing::debug!("Failed to poll for readiness: {e}");
                    return false;
                }
            }

            if fds[1].any().unwrap_or(false) {
                return false;
            }

            // Errors and hang-ups also count as ready: the next I/O attempt surfaces them.
            return fds[0].any().unwrap_or(false);
        }
    }

    fn enter(&self) -> Waiter<'_> {
        *self.waiters.lock() += 1;

        Waiter { rwcancel: self }
    }
}

/// Sets `O_NONBLOCK` on the given file descriptor.
pub fn set_non_blocking(fd: BorrowedFd<'_>) -> io::Result<()> {
    let flags = OFlag::from_bits_retain(fcntl(fd, FcntlArg::F_GETFL)?);
    fcntl(fd, FcntlArg::F_SETFL(flags | OFlag::O_NONBLOCK))?;

    Ok(())
}

/// Marks one thread inside a readiness wait.
struct Waiter<'a> {
    rwcancel: &'a RwCancel,
}

impl Drop for Waiter<'_> {
    fn drop(&mut self) {
        let mut waiters = self.rwcancel.waiters.lock();
        *waiters -= 1;

        if *waiters == 0 {
            self.rwcancel.left.notify_all();
        }
    }
}
