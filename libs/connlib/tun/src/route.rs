//! Translates routing-socket notifications for one interface into [`InterfaceEvent`]s.

use std::io;
use std::os::fd::{AsFd as _, OwnedFd};
use std::sync::Arc;
use std::thread::JoinHandle;

use crate::kernel::{Kernel, LinkStatus};
use crate::{InterfaceEvent, unix};

/// `RTM_IFINFO` from `net/route.h`.
pub const RTM_IFINFO: u8 = 0x0e;

/// Everything up to and including `ifm_index` of `struct if_msghdr`.
pub const MIN_MESSAGE_LEN: usize = 14;
const TYPE_OFFSET: usize = 3;
const INDEX_OFFSET: usize = 12;

const READ_BUFFER_SIZE: usize = 4096;

/// The interface index of an interface-info message, `None` for any other message.
pub fn interface_info_index(message: &[u8]) -> Option<u16> {
    if message.len() < MIN_MESSAGE_LEN {
        return None;
    }
    if message[TYPE_OFFSET] != RTM_IFINFO {
        return None;
    }

    Some(u16::from_ne_bytes([
        message[INDEX_OFFSET],
        message[INDEX_OFFSET + 1],
    ]))
}

/// The last observed state of the interface.
///
/// Starts out as down with an unknown (zero) MTU.
#[derive(Debug, Default, Clone, Copy)]
pub struct LinkState {
    up: bool,
    mtu: u32,
}

impl LinkState {
    /// Records the new status, yielding an event for every edge.
    pub fn observe(&mut self, status: LinkStatus) -> impl Iterator<Item = InterfaceEvent> + use<> {
        let up_down = match (self.up, status.up) {
            (false, true) => Some(InterfaceEvent::Up),
            (true, false) => Some(InterfaceEvent::Down),
            (true, true) | (false, false) => None,
        };
        let mtu = (self.mtu != status.mtu).then_some(InterfaceEvent::MtuChanged);

        self.up = status.up;
        self.mtu = status.mtu;

        [up_down, mtu].into_iter().flatten()
    }
}

/// Watches the routing socket on a dedicated thread.
///
/// Fatal errors go to `errors`; in every case the thread drops `events` when it exits, ending the stream.
pub(crate) struct Monitor {
    pub(crate) kernel: Arc<dyn Kernel>,
    pub(crate) socket: Arc<OwnedFd>,
    pub(crate) index: u32,
    pub(crate) events: flume::Sender<InterfaceEvent>,
    pub(crate) errors: flume::Sender<io::Error>,
}

impl Monitor {
    pub(crate) fn spawn(self) -> io::Result<JoinHandle<()>> {
        std::thread::Builder::new()
            .name("route monitor".to_owned())
            .spawn(move || self.run())
    }

    fn run(self) {
        let index = self.index;

        match self.listen() {
            Ok(()) => tracing::debug!(%index, "Route monitor stopped"),
            Err(e) => {
                tracing::debug!(%index, "Route monitor failed: {e}");

                let _ = self.errors.try_send(e);
            }
        }
    }

    fn listen(&self) -> io::Result<()> {
        let mut state = LinkState::default();
        let mut buf = vec![0u8; READ_BUFFER_SIZE];

        loop {
            let n = match unix::read(self.socket.as_fd(), &mut buf) {
                Ok(0) => return Ok(()), // Socket was shut down.
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            };

            let Some(index) = interface_info_index(&buf[..n]) else {
                continue;
            };
            if u32::from(index) != self.index {
                continue;
            }

            let status = self.kernel.link_status(self.index)?;

            for event in state.observe(status) {
                tracing::debug!(index = %self.index, ?event, "Interface changed");

                if self.events.send(event).is_err() {
                    return Ok(()); // Nobody is listening anymore.
                }
            }
        }
    }
}
