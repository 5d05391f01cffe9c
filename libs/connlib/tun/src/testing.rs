//! An in-memory [`Kernel`] for tests.
//!
//! Device nodes and the routing socket are `SOCK_SEQPACKET` socket pairs, so packet boundaries are
//! preserved just like on a real TUN device. The far ends stay with the kernel and can be borrowed
//! by tests to play the role of the OS.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::io;
use std::os::fd::{AsRawFd as _, BorrowedFd, OwnedFd, RawFd};
use std::path::{Path, PathBuf};

use nix::sys::socket::{AddressFamily, MsgFlags, SockFlag, SockType, recv, socketpair};
use parking_lot::Mutex;

use crate::kernel::{Kernel, LinkStatus};

/// A configuration call the code under test made.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    BindToProcess,
    EnablePacketInformation,
    SetBroadcastMode,
    Rename { old: String, new: String },
    SetMtu { name: String, mtu: u32 },
}

#[derive(Default)]
pub struct ScriptedKernel {
    state: Mutex<State>,
}

#[derive(Default)]
struct State {
    interfaces: BTreeMap<u32, Interface>,
    next_index: u32,

    /// Which interface backs each open device descriptor.
    devices: HashMap<RawFd, u32>,
    device_peers: Vec<OwnedFd>,
    route_peers: Vec<OwnedFd>,

    opened: Vec<PathBuf>,
    calls: Vec<Call>,
    renamed_with_closed_device: bool,

    busy_units: u32,
    deny_numbered_units: bool,
    deny_cloning_node: bool,
    failing_renames: HashSet<String>,
    fail_broadcast_mode: bool,
    fail_set_mtu: bool,
}

struct Interface {
    name: String,
    up: bool,
    mtu: u32,
    owner: Option<u32>,
}

impl ScriptedKernel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an interface that is not backed by a TUN device, returning its index.
    pub fn add_foreign_interface(&self, name: &str, mtu: u32) -> u32 {
        self.state.lock().add_interface(name, mtu)
    }

    pub fn remove_interface(&self, index: u32) {
        self.state.lock().interfaces.remove(&index);
    }

    pub fn set_link_status(&self, index: u32, status: LinkStatus) {
        if let Some(interface) = self.state.lock().interfaces.get_mut(&index) {
            interface.up = status.up;
            interface.mtu = status.mtu;
        }
    }

    /// The first `n` numbered device nodes are in use by someone else.
    pub fn mark_busy_units(&self, n: u32) {
        self.state.lock().busy_units = n;
    }

    pub fn deny_numbered_units(&self) {
        self.state.lock().deny_numbered_units = true;
    }

    pub fn deny_cloning_node(&self) {
        self.state.lock().deny_cloning_node = true;
    }

    pub fn fail_renames_to(&self, name: &str) {
        self.state.lock().failing_renames.insert(name.to_owned());
    }

    pub fn fail_broadcast_mode(&self) {
        self.state.lock().fail_broadcast_mode = true;
    }

    pub fn fail_set_mtu(&self) {
        self.state.lock().fail_set_mtu = true;
    }

    /// Every device path an open was attempted on, in order.
    pub fn opened_paths(&self) -> Vec<PathBuf> {
        self.state.lock().opened.clone()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().calls.clone()
    }

    /// The OS side of the `n`-th successfully opened device.
    pub fn device_peer(&self, n: usize) -> OwnedFd {
        dup(&self.state.lock().device_peers[n])
    }

    /// Whether the `n`-th opened device has been closed by its user.
    pub fn device_peer_is_closed(&self, n: usize) -> bool {
        is_hung_up(&self.state.lock().device_peers[n])
    }

    /// Whether any rename happened after one of the opened devices was closed.
    pub fn renamed_with_closed_device(&self) -> bool {
        self.state.lock().renamed_with_closed_device
    }

    /// The OS side of the `n`-th opened routing socket.
    pub fn route_peer(&self, n: usize) -> OwnedFd {
        dup(&self.state.lock().route_peers[n])
    }
}

impl State {
    fn add_interface(&mut self, name: &str, mtu: u32) -> u32 {
        self.next_index += 1;
        self.interfaces.insert(
            self.next_index,
            Interface {
                name: name.to_owned(),
                up: false,
                mtu,
                owner: None,
            },
        );

        self.next_index
    }

    fn find(&mut self, name: &str) -> io::Result<&mut Interface> {
        self.interfaces
            .values_mut()
            .find(|i| i.name == name)
            .ok_or_else(|| not_found(name))
    }

    fn has(&self, name: &str) -> bool {
        self.interfaces.values().any(|i| i.name == name)
    }

    fn lowest_free_unit(&self) -> u32 {
        (0..)
            .find(|unit| !self.has(&format!("tun{unit}")))
            .unwrap_or_default()
    }
}

impl Kernel for ScriptedKernel {
    fn interface_index(&self, name: &str) -> io::Result<Option<u32>> {
        let state = self.state.lock();

        Ok(state
            .interfaces
            .iter()
            .find_map(|(index, i)| (i.name == name).then_some(*index)))
    }

    fn interface_names(&self) -> io::Result<Vec<String>> {
        Ok(self
            .state
            .lock()
            .interfaces
            .values()
            .map(|i| i.name.clone())
            .collect())
    }

    fn link_status(&self, index: u32) -> io::Result<LinkStatus> {
        self.state
            .lock()
            .interfaces
            .get(&index)
            .map(|i| LinkStatus {
                up: i.up,
                mtu: i.mtu,
            })
            .ok_or_else(|| not_found(&format!("#{index}")))
    }

    fn open_device(&self, path: &Path) -> io::Result<OwnedFd> {
        let mut state = self.state.lock();
        state.opened.push(path.to_owned());

        let unit = match path.to_str().and_then(|p| p.strip_prefix("/dev/tun")) {
            Some("") if state.deny_cloning_node => {
                return Err(io::Error::from(io::ErrorKind::NotFound));
            }
            Some("") => state.lowest_free_unit(),
            Some(_) if state.deny_numbered_units => {
                return Err(io::Error::from(io::ErrorKind::NotFound));
            }
            Some(unit) => unit
                .parse::<u32>()
                .map_err(|_| io::Error::from(io::ErrorKind::NotFound))?,
            None => return Err(io::Error::from(io::ErrorKind::NotFound)),
        };
        if unit < state.busy_units {
            return Err(io::Error::from(io::ErrorKind::ResourceBusy));
        }

        let (ours, theirs) = seqpacket_pair()?;
        let index = state.add_interface(&format!("tun{unit}"), 1500);
        state.devices.insert(ours.as_raw_fd(), index);
        state.device_peers.push(theirs);

        Ok(ours)
    }

    fn bind_to_process(&self, device: BorrowedFd<'_>) -> io::Result<()> {
        let mut state = self.state.lock();
        state.calls.push(Call::BindToProcess);

        let index = *state
            .devices
            .get(&device.as_raw_fd())
            .ok_or_else(|| io::Error::from(io::ErrorKind::InvalidInput))?;

        if let Some(interface) = state.interfaces.get_mut(&index) {
            interface.owner = Some(std::process::id());
        }

        Ok(())
    }

    fn interface_status(&self, name: &str) -> io::Result<String> {
        let mut state = self.state.lock();
        let interface = state.find(name)?;

        Ok(interface
            .owner
            .map(|pid| format!("\tOpened by PID {pid}\n"))
            .unwrap_or_default())
    }

    fn enable_packet_information(&self, _: BorrowedFd<'_>) -> io::Result<()> {
        self.state.lock().calls.push(Call::EnablePacketInformation);

        Ok(())
    }

    fn set_broadcast_mode(&self, _: BorrowedFd<'_>) -> io::Result<()> {
        let mut state = self.state.lock();
        state.calls.push(Call::SetBroadcastMode);

        if state.fail_broadcast_mode {
            return Err(io::Error::from(io::ErrorKind::PermissionDenied));
        }

        Ok(())
    }

    fn rename(&self, old: &str, new: &str) -> io::Result<()> {
        let mut state = self.state.lock();
        state.calls.push(Call::Rename {
            old: old.to_owned(),
            new: new.to_owned(),
        });
        if state.device_peers.iter().any(is_hung_up) {
            state.renamed_with_closed_device = true;
        }

        if state.failing_renames.contains(new) {
            return Err(io::Error::from(io::ErrorKind::PermissionDenied));
        }
        if state.has(new) {
            return Err(io::Error::from(io::ErrorKind::AlreadyExists));
        }

        state.find(old)?.name = new.to_owned();

        Ok(())
    }

    fn set_mtu(&self, name: &str, mtu: u32) -> io::Result<()> {
        let mut state = self.state.lock();
        state.calls.push(Call::SetMtu {
            name: name.to_owned(),
            mtu,
        });

        if state.fail_set_mtu {
            return Err(io::Error::from(io::ErrorKind::InvalidInput));
        }

        state.find(name)?.mtu = mtu;

        Ok(())
    }

    fn mtu(&self, name: &str) -> io::Result<u32> {
        Ok(self.state.lock().find(name)?.mtu)
    }

    fn open_route_socket(&self) -> io::Result<OwnedFd> {
        let (ours, theirs) = seqpacket_pair()?;
        self.state.lock().route_peers.push(theirs);

        Ok(ours)
    }
}

fn seqpacket_pair() -> io::Result<(OwnedFd, OwnedFd)> {
    let pair = socketpair(
        AddressFamily::Unix,
        SockType::SeqPacket,
        None,
        SockFlag::empty(),
    )?;

    Ok(pair)
}

#[expect(clippy::unwrap_used, reason = "Only used in tests.")]
fn dup(fd: &OwnedFd) -> OwnedFd {
    fd.try_clone().unwrap()
}

fn not_found(name: &str) -> io::Error {
    io::Error::new(
        io::ErrorKind::NotFound,
        format!("No such interface: {name}"),
    )
}

fn is_hung_up(peer: &OwnedFd) -> bool {
    matches!(
        recv(
            peer.as_raw_fd(),
            &mut [0u8; 1],
            MsgFlags::MSG_PEEK | MsgFlags::MSG_DONTWAIT
        ),
        Ok(0)
    )
}
