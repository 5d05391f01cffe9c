//! A BSD-style TUN device: numbered device nodes, a 4-byte address-family prefix on every packet
//! and interface state reported through a routing socket.

use std::io;
use std::os::fd::{AsFd as _, AsRawFd as _, OwnedFd};
use std::path::PathBuf;
use std::sync::Arc;

use nix::sys::socket::{Shutdown, shutdown};
use parking_lot::{MappedRwLockReadGuard, Mutex, RwLock, RwLockReadGuard};
use rwcancel::RwCancel;

use crate::kernel::{self, Kernel};
use crate::route::Monitor;
use crate::{Error, InterfaceEvent, Tun, ioctl, unix};

/// How many numbered device nodes we try before falling back to the cloning node.
pub const MAX_PROBED_UNITS: u32 = 99;

/// Length of the address-family prefix in front of every packet.
pub const PACKET_INFORMATION_LEN: usize = 4;

const EVENT_QUEUE_SIZE: usize = 10;

const CLONING_DEVICE: &str = "/dev/tun";

/// The address-family prefix for an IP packet starting with `first_byte`.
pub fn packet_information(first_byte: u8) -> [u8; PACKET_INFORMATION_LEN] {
    let family = match first_byte >> 4 {
        6 => libc::AF_INET6,
        _ => libc::AF_INET,
    };

    [0, 0, 0, family as u8]
}

pub struct TunDevice {
    kernel: Arc<dyn Kernel>,

    /// `None` once closed.
    ///
    /// Readers and writers hold the read-lock for the duration of their I/O, so taking the write-lock
    /// waits for them to leave after the [`RwCancel`] has been cancelled.
    fd: RwLock<Option<OwnedFd>>,
    rwcancel: RwCancel,

    name: Mutex<String>,
    /// The name the kernel gave the interface, restored on close.
    orig_name: String,

    /// Ends once the route monitor has stopped.
    events: flume::Receiver<InterfaceEvent>,
    errors: flume::Receiver<io::Error>,
    route_socket: Mutex<Option<Arc<OwnedFd>>>,
}

impl TunDevice {
    /// Creates a new TUN interface called `name`.
    ///
    /// Device creation must be serialised within a process; see [`kernel::discover_name`].
    pub fn create(kernel: Arc<dyn Kernel>, name: &str, mtu: u32) -> Result<Self, Error> {
        if name.len() > ioctl::IFNAMSIZ - 1 {
            return Err(Error::InvalidName {
                name: name.to_owned(),
                max: ioctl::IFNAMSIZ - 1,
            });
        }

        if kernel.interface_index(name)?.is_some() {
            return Err(Error::AlreadyExists(name.to_owned()));
        }

        let fd = open_free_device(kernel.as_ref())?;

        let assigned_name = kernel::discover_name(kernel.as_ref(), fd.as_fd(), std::process::id())?;

        kernel
            .enable_packet_information(fd.as_fd())
            .map_err(|source| Error::Ioctl {
                op: "enable packet information",
                name: assigned_name.clone(),
                source,
            })?;
        kernel
            .set_broadcast_mode(fd.as_fd())
            .map_err(|source| Error::Ioctl {
                op: "set broadcast mode",
                name: assigned_name.clone(),
                source,
            })?;

        kernel::rename(kernel.as_ref(), &assigned_name, name)?;

        Self::adopt(kernel.clone(), fd, mtu, Some(assigned_name.clone())).inspect_err(|_| {
            // Once adopted, dropping the device already restored the name.
            if !matches!(kernel.interface_index(name), Ok(Some(_))) {
                return;
            }

            if let Err(e) = kernel::rename(kernel.as_ref(), name, &assigned_name) {
                tracing::debug!("{}", logging::err_with_src(&e));
            }
        })
    }

    /// Takes over an already opened TUN device.
    pub fn from_fd(kernel: Arc<dyn Kernel>, fd: OwnedFd, mtu: u32) -> Result<Self, Error> {
        Self::adopt(kernel, fd, mtu, None)
    }

    fn adopt(
        kernel: Arc<dyn Kernel>,
        fd: OwnedFd,
        mtu: u32,
        orig_name: Option<String>,
    ) -> Result<Self, Error> {
        let name = kernel::discover_name(kernel.as_ref(), fd.as_fd(), std::process::id())?;
        let index = kernel.interface_index(&name)?.ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("Interface `{name}` disappeared"),
            )
        })?;

        rwcancel::set_non_blocking(fd.as_fd())?;
        let rwcancel = RwCancel::new()?;

        let route_socket = Arc::new(kernel.open_route_socket()?);

        let (events_tx, events) = flume::bounded(EVENT_QUEUE_SIZE);
        let (errors_tx, errors) = flume::bounded(1);

        let device = Self {
            orig_name: orig_name.unwrap_or_else(|| name.clone()),
            name: Mutex::new(name),
            fd: RwLock::new(Some(fd)),
            rwcancel,
            kernel: kernel.clone(),
            events,
            errors,
            route_socket: Mutex::new(Some(route_socket.clone())),
        };

        Monitor {
            kernel,
            socket: route_socket,
            index,
            events: events_tx,
            errors: errors_tx,
        }
        .spawn()?;

        device.set_mtu(mtu)?;

        tracing::info!(name = %device.name(), %index, %mtu, "Created TUN device");

        Ok(device)
    }

    pub fn name(&self) -> String {
        self.name.lock().clone()
    }

    /// Looks up the name of the interface again, e.g. after somebody else renamed it.
    pub fn refresh_name(&self) -> Result<String, Error> {
        let fd = self.fd.read();
        let fd = fd.as_ref().ok_or(Error::DeviceClosed)?;

        let name = kernel::discover_name(self.kernel.as_ref(), fd.as_fd(), std::process::id())?;
        *self.name.lock() = name.clone();

        Ok(name)
    }

    /// The device's file descriptor, `None` once closed.
    ///
    /// [`TunDevice::close`] blocks while the returned guard is alive.
    pub fn file(&self) -> Option<MappedRwLockReadGuard<'_, OwnedFd>> {
        RwLockReadGuard::try_map(self.fd.read(), Option::as_ref).ok()
    }

    pub fn events(&self) -> flume::Receiver<InterfaceEvent> {
        self.events.clone()
    }

    pub fn mtu(&self) -> Result<u32, Error> {
        kernel::get_mtu(self.kernel.as_ref(), &self.name())
    }

    pub fn set_mtu(&self, mtu: u32) -> Result<(), Error> {
        kernel::set_mtu(self.kernel.as_ref(), &self.name(), mtu)
    }

    pub fn read(&self, buf: &mut [u8], offset: usize) -> Result<usize, Error> {
        let start = offset
            .checked_sub(PACKET_INFORMATION_LEN)
            .ok_or(Error::InvalidOffset { offset })?;

        let buf = buf
            .get_mut(start..)
            .ok_or(Error::InvalidOffset { offset })?;

        let fd = self.fd.read();
        let fd = fd.as_ref().ok_or(Error::DeviceClosed)?;

        loop {
            if let Ok(e) = self.errors.try_recv() {
                return Err(Error::Io(e));
            }

            match unix::read(fd.as_fd(), buf) {
                Ok(n) if n < PACKET_INFORMATION_LEN => return Ok(0),
                Ok(n) => return Ok(n - PACKET_INFORMATION_LEN),
                Err(e) if unix::is_retryable(&e) => {
                    if !self.rwcancel.ready_read(fd.as_fd()) {
                        return Err(Error::DeviceClosed);
                    }
                }
                Err(e) => return Err(Error::Io(e)),
            }
        }
    }

    pub fn write(&self, buf: &mut [u8], offset: usize) -> Result<usize, Error> {
        let start = offset
            .checked_sub(PACKET_INFORMATION_LEN)
            .ok_or(Error::InvalidOffset { offset })?;
        let first_byte = *buf.get(offset).ok_or(Error::EmptyPacket)?;

        let frame = &mut buf[start..];
        frame[..PACKET_INFORMATION_LEN].copy_from_slice(&packet_information(first_byte));

        let fd = self.fd.read();
        let fd = fd.as_ref().ok_or(Error::DeviceClosed)?;

        loop {
            match unix::write(fd.as_fd(), frame) {
                Ok(n) => return Ok(n.saturating_sub(PACKET_INFORMATION_LEN)),
                Err(e) if unix::is_retryable(&e) => {
                    if !self.rwcancel.ready_write(fd.as_fd()) {
                        return Err(Error::DeviceClosed);
                    }
                }
                Err(e) => return Err(Error::Io(e)),
            }
        }
    }

    /// Restores the original interface name, wakes pending I/O and releases all descriptors.
    ///
    /// Every step is attempted even if an earlier one fails.
    /// The first error in the order cancellation, descriptor close, rename is returned.
    pub fn close(&self) -> Result<(), Error> {
        let rename_result = self.restore_name();

        let cancel_result = self.rwcancel.cancel();

        let close_result = match self.fd.write().take() {
            Some(fd) => unix::close(fd),
            None => Ok(()),
        };

        // Wakes the monitor, which closes the socket and the event queue on its way out.
        if let Some(socket) = self.route_socket.lock().take()
            && let Err(e) = shutdown(socket.as_raw_fd(), Shutdown::Both)
        {
            tracing::debug!("Failed to shut down route socket: {e}");
        }

        cancel_result?;
        close_result?;
        rename_result?;

        Ok(())
    }

    fn restore_name(&self) -> Result<(), Error> {
        let mut name = self.name.lock();

        if *name == self.orig_name {
            return Ok(());
        }

        if let Err(e) = kernel::rename(self.kernel.as_ref(), &name, &self.orig_name) {
            tracing::warn!("{}", logging::err_with_src(&e));

            return Err(e);
        }

        *name = self.orig_name.clone();

        Ok(())
    }
}

impl Drop for TunDevice {
    fn drop(&mut self) {
        if self.fd.get_mut().is_none() {
            return;
        }

        logging::unwrap_or_debug!(self.close(), "Failed to close TUN device: {}");
    }
}

impl Tun for TunDevice {
    fn read(&self, buf: &mut [u8], offset: usize) -> Result<usize, Error> {
        TunDevice::read(self, buf, offset)
    }

    fn write(&self, buf: &mut [u8], offset: usize) -> Result<usize, Error> {
        TunDevice::write(self, buf, offset)
    }

    fn name(&self) -> String {
        TunDevice::name(self)
    }

    fn mtu(&self) -> Result<u32, Error> {
        TunDevice::mtu(self)
    }

    fn events(&self) -> flume::Receiver<InterfaceEvent> {
        TunDevice::events(self)
    }

    fn close(&self) -> Result<(), Error> {
        TunDevice::close(self)
    }
}

fn open_free_device(kernel: &dyn Kernel) -> Result<OwnedFd, Error> {
    for unit in 0..MAX_PROBED_UNITS {
        let path = PathBuf::from(format!("{CLONING_DEVICE}{unit}"));

        match kernel.open_device(&path) {
            Ok(fd) => {
                tracing::debug!(path = %path.display(), "Opened TUN device node");

                return Ok(fd);
            }
            Err(e) => tracing::trace!(path = %path.display(), "Device node is not usable: {e}"),
        }
    }

    kernel
        .open_device(&PathBuf::from(CLONING_DEVICE))
        .map_err(Error::NoDeviceAvailable)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Call, ScriptedKernel};
    use crate::{LinkStatus, route};
    use proptest::prelude::*;
    use std::time::Duration;

    const MTU: u32 = 1420;

    fn kernel() -> Arc<ScriptedKernel> {
        Arc::new(ScriptedKernel::new())
    }

    fn ipv4_packet() -> Vec<u8> {
        let mut packet = vec![0u8; 20];
        packet[0] = 0x45;
        packet[19] = 0xaa;
        packet
    }

    fn ipv6_packet() -> Vec<u8> {
        let mut packet = vec![0u8; 40];
        packet[0] = 0x60;
        packet[39] = 0xbb;
        packet
    }

    fn if_info(index: u32) -> Vec<u8> {
        let mut msg = vec![0u8; 16];
        msg[3] = route::RTM_IFINFO;
        msg[12..14].copy_from_slice(&(index as u16).to_ne_bytes());
        msg
    }

    #[test]
    fn rejects_long_names_before_opening_anything() {
        let kernel = kernel();

        let err = TunDevice::create(kernel.clone(), "a-very-long-ifname", MTU)
            .err()
            .unwrap();

        assert!(matches!(err, Error::InvalidName { max: 15, .. }));
        assert!(kernel.opened_paths().is_empty());
    }

    #[test]
    fn rejects_existing_interface() {
        let kernel = kernel();
        kernel.add_foreign_interface("wg0", 1500);

        let err = TunDevice::create(kernel.clone(), "wg0", MTU).err().unwrap();

        assert!(matches!(err, Error::AlreadyExists(name) if name == "wg0"));
        assert!(kernel.opened_paths().is_empty());
    }

    #[test]
    fn probes_numbered_nodes_then_falls_back_to_cloning_node() {
        let kernel = kernel();
        kernel.deny_numbered_units();

        let tun = TunDevice::create(kernel.clone(), "wg0", MTU).unwrap();

        let opened = kernel.opened_paths();
        assert_eq!(opened.len(), MAX_PROBED_UNITS as usize + 1);
        assert_eq!(opened[0], PathBuf::from("/dev/tun0"));
        assert_eq!(opened[98], PathBuf::from("/dev/tun98"));
        assert_eq!(opened[99], PathBuf::from("/dev/tun"));
        assert_eq!(tun.name(), "wg0");
    }

    #[test]
    fn fails_when_no_node_is_available() {
        let kernel = kernel();
        kernel.deny_numbered_units();
        kernel.deny_cloning_node();

        let err = TunDevice::create(kernel.clone(), "wg0", MTU).err().unwrap();

        assert!(matches!(err, Error::NoDeviceAvailable(_)));
        assert_eq!(kernel.opened_paths().len(), MAX_PROBED_UNITS as usize + 1);
    }

    #[test]
    fn uses_first_free_numbered_node() {
        let kernel = kernel();
        kernel.mark_busy_units(2);

        let _tun = TunDevice::create(kernel.clone(), "wg0", MTU).unwrap();

        assert_eq!(
            kernel.opened_paths(),
            [
                PathBuf::from("/dev/tun0"),
                PathBuf::from("/dev/tun1"),
                PathBuf::from("/dev/tun2")
            ]
        );
    }

    #[test]
    fn create_configures_device_then_renames_and_sets_mtu() {
        let kernel = kernel();

        let tun = TunDevice::create(kernel.clone(), "wg0", MTU).unwrap();

        assert_eq!(
            kernel.calls(),
            [
                Call::BindToProcess,
                Call::EnablePacketInformation,
                Call::SetBroadcastMode,
                Call::Rename {
                    old: "tun0".to_owned(),
                    new: "wg0".to_owned()
                },
                Call::BindToProcess,
                Call::SetMtu {
                    name: "wg0".to_owned(),
                    mtu: MTU
                },
            ]
        );
        assert_eq!(tun.mtu().unwrap(), MTU);
    }

    #[test]
    fn failed_ioctl_closes_device() {
        let kernel = kernel();
        kernel.fail_broadcast_mode();

        let err = TunDevice::create(kernel.clone(), "wg0", MTU).err().unwrap();

        assert!(matches!(
            err,
            Error::Ioctl {
                op: "set broadcast mode",
                ..
            }
        ));
        assert!(kernel.device_peer_is_closed(0));
    }

    #[test]
    fn failed_rename_closes_device() {
        let kernel = kernel();
        kernel.fail_renames_to("wg0");

        let err = TunDevice::create(kernel.clone(), "wg0", MTU).err().unwrap();

        assert!(matches!(err, Error::Rename { .. }));
        assert!(kernel.device_peer_is_closed(0));
    }

    #[test]
    fn failed_mtu_closes_device_and_restores_name() {
        let kernel = kernel();
        kernel.fail_set_mtu();

        let err = TunDevice::create(kernel.clone(), "wg0", MTU).err().unwrap();

        assert!(matches!(err, Error::SetMtu { name, .. } if name == "wg0"));
        assert!(kernel.device_peer_is_closed(0));
        assert!(kernel.interface_index("tun0").unwrap().is_some());
    }

    #[test]
    fn write_prefixes_ipv4_family() {
        let kernel = kernel();
        let tun = TunDevice::create(kernel.clone(), "wg0", MTU).unwrap();
        let peer = kernel.device_peer(0);

        let mut buf = vec![0xffu8; 8];
        buf.extend_from_slice(&ipv4_packet());
        let n = tun.write(&mut buf, 8).unwrap();

        let mut frame = [0u8; 64];
        let len = unix::read(peer.as_fd(), &mut frame).unwrap();
        assert_eq!(n, 20);
        assert_eq!(len, 24);
        assert_eq!(frame[..4], [0, 0, 0, libc::AF_INET as u8]);
        assert_eq!(frame[4..24], ipv4_packet()[..]);
    }

    #[test]
    fn write_prefixes_ipv6_family() {
        let kernel = kernel();
        let tun = TunDevice::create(kernel.clone(), "wg0", MTU).unwrap();
        let peer = kernel.device_peer(0);

        let mut buf = vec![0u8; 4];
        buf.extend_from_slice(&ipv6_packet());
        tun.write(&mut buf, 4).unwrap();

        let mut frame = [0u8; 64];
        let len = unix::read(peer.as_fd(), &mut frame).unwrap();
        assert_eq!(frame[..4], [0, 0, 0, libc::AF_INET6 as u8]);
        assert_eq!(frame[4..len], ipv6_packet()[..]);
    }

    #[test]
    fn read_strips_prefix() {
        let kernel = kernel();
        let tun = TunDevice::create(kernel.clone(), "wg0", MTU).unwrap();
        let peer = kernel.device_peer(0);

        let mut frame = packet_information(0x45).to_vec();
        frame.extend_from_slice(&ipv4_packet());
        unix::write(peer.as_fd(), &frame).unwrap();

        let mut buf = [0u8; 128];
        let n = tun.read(&mut buf, 16).unwrap();

        assert_eq!(n, 20);
        assert_eq!(buf[16..36], ipv4_packet()[..]);
    }

    #[test]
    fn written_packet_reads_back_identically() {
        let kernel = kernel();
        let tun = TunDevice::create(kernel.clone(), "wg0", MTU).unwrap();
        let peer = kernel.device_peer(0);

        let mut out = vec![0u8; 4];
        out.extend_from_slice(&ipv6_packet());
        let written = tun.write(&mut out, 4).unwrap();

        // Loop the frame back into the device.
        let mut frame = [0u8; 128];
        let len = unix::read(peer.as_fd(), &mut frame).unwrap();
        unix::write(peer.as_fd(), &frame[..len]).unwrap();

        let mut buf = [0u8; 128];
        let read = tun.read(&mut buf, 4).unwrap();

        assert_eq!(read, written);
        assert_eq!(buf[4..4 + read], ipv6_packet()[..]);
    }

    #[test]
    fn short_read_yields_zero_length() {
        let kernel = kernel();
        let tun = TunDevice::create(kernel.clone(), "wg0", MTU).unwrap();
        let peer = kernel.device_peer(0);

        unix::write(peer.as_fd(), &[0, 0]).unwrap();

        assert_eq!(tun.read(&mut [0u8; 64], 4).unwrap(), 0);
    }

    #[test]
    fn rejects_offsets_without_room_for_prefix() {
        let kernel = kernel();
        let tun = TunDevice::create(kernel.clone(), "wg0", MTU).unwrap();

        assert!(matches!(
            tun.read(&mut [0u8; 64], 3),
            Err(Error::InvalidOffset { offset: 3 })
        ));
        assert!(matches!(
            tun.write(&mut [0x45u8; 64], 2),
            Err(Error::InvalidOffset { offset: 2 })
        ));
    }

    #[test]
    fn rejects_empty_writes() {
        let kernel = kernel();
        let tun = TunDevice::create(kernel.clone(), "wg0", MTU).unwrap();

        assert!(matches!(
            tun.write(&mut [0u8; 4], 4),
            Err(Error::EmptyPacket)
        ));
    }

    #[test]
    fn close_cancels_blocked_read() {
        let kernel = kernel();
        let tun = Arc::new(TunDevice::create(kernel.clone(), "wg0", MTU).unwrap());

        let reader = std::thread::spawn({
            let tun = tun.clone();

            move || tun.read(&mut [0u8; 64], 4)
        });
        std::thread::sleep(Duration::from_millis(50));

        tun.close().unwrap();

        assert!(matches!(reader.join().unwrap(), Err(Error::DeviceClosed)));
        assert!(matches!(
            tun.read(&mut [0u8; 64], 4),
            Err(Error::DeviceClosed)
        ));
    }

    #[test]
    fn close_restores_original_name_before_closing_descriptor() {
        let kernel = kernel();
        let tun = TunDevice::create(kernel.clone(), "wg0", MTU).unwrap();

        tun.close().unwrap();

        assert_eq!(
            kernel.calls().last(),
            Some(&Call::Rename {
                old: "wg0".to_owned(),
                new: "tun0".to_owned()
            })
        );
        assert_eq!(tun.name(), "tun0");
        assert!(!kernel.renamed_with_closed_device());
        assert!(kernel.device_peer_is_closed(0));
    }

    #[test]
    fn close_surfaces_rename_failure_but_still_closes_descriptor() {
        let kernel = kernel();
        let tun = TunDevice::create(kernel.clone(), "wg0", MTU).unwrap();
        kernel.fail_renames_to("tun0");

        let err = tun.close().unwrap_err();

        assert!(matches!(err, Error::Rename { old, new, .. } if old == "wg0" && new == "tun0"));
        assert!(kernel.device_peer_is_closed(0));
        assert!(tun.file().is_none());
    }

    #[test]
    fn adopted_device_keeps_its_name_on_close() {
        let kernel = kernel();
        let fd = kernel.open_device(&PathBuf::from("/dev/tun0")).unwrap();

        let tun = TunDevice::from_fd(kernel.clone(), fd, MTU).unwrap();
        tun.close().unwrap();

        assert_eq!(tun.name(), "tun0");
        assert!(
            !kernel
                .calls()
                .iter()
                .any(|c| matches!(c, Call::Rename { .. }))
        );
    }

    #[test]
    fn refresh_name_picks_up_external_rename() {
        let kernel = kernel();
        let tun = TunDevice::create(kernel.clone(), "wg0", MTU).unwrap();

        kernel.rename("wg0", "wg1").unwrap();

        assert_eq!(tun.refresh_name().unwrap(), "wg1");
        assert_eq!(tun.name(), "wg1");
    }

    #[test]
    fn monitor_reports_link_changes_for_own_interface() {
        let kernel = kernel();
        let tun = TunDevice::create(kernel.clone(), "wg0", MTU).unwrap();
        let events = tun.events();
        let route = kernel.route_peer(0);
        let index = kernel.interface_index("wg0").unwrap().unwrap();
        let timeout = Duration::from_secs(5);

        kernel.set_link_status(index, LinkStatus { up: true, mtu: MTU });
        unix::write(route.as_fd(), &if_info(index + 1)).unwrap(); // Someone else's interface.
        unix::write(route.as_fd(), &if_info(index)).unwrap();

        assert_eq!(events.recv_timeout(timeout).unwrap(), InterfaceEvent::Up);
        assert_eq!(
            events.recv_timeout(timeout).unwrap(),
            InterfaceEvent::MtuChanged
        );

        kernel.set_link_status(index, LinkStatus { up: false, mtu: MTU });
        unix::write(route.as_fd(), &if_info(index)).unwrap();

        assert_eq!(events.recv_timeout(timeout).unwrap(), InterfaceEvent::Down);
    }

    #[test]
    fn monitor_failure_is_reported_once_and_ends_event_stream() {
        let kernel = kernel();
        let tun = TunDevice::create(kernel.clone(), "wg0", MTU).unwrap();
        let events = tun.events();
        let route = kernel.route_peer(0);
        let index = kernel.interface_index("wg0").unwrap().unwrap();

        kernel.remove_interface(index);
        unix::write(route.as_fd(), &if_info(index)).unwrap();

        assert!(events.recv_timeout(Duration::from_secs(5)).is_err());
        assert!(matches!(tun.read(&mut [0u8; 64], 4), Err(Error::Io(e)) if e.kind() == io::ErrorKind::NotFound));
    }

    #[test]
    fn close_ends_event_stream() {
        let kernel = kernel();
        let tun = TunDevice::create(kernel.clone(), "wg0", MTU).unwrap();
        let events = tun.events();

        tun.close().unwrap();

        assert!(matches!(
            events.recv_timeout(Duration::from_secs(5)),
            Err(flume::RecvTimeoutError::Disconnected)
        ));
    }

    proptest! {
        #[test]
        fn prefix_tags_family_by_version_nibble(first_byte in any::<u8>()) {
            let prefix = packet_information(first_byte);

            let expected = if first_byte >> 4 == 6 { libc::AF_INET6 } else { libc::AF_INET };
            prop_assert_eq!(prefix, [0, 0, 0, expected as u8]);
        }
    }
}
