use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use parking_lot::Mutex;
use socket_factory::{Bind, Endpoint, IpVersion, Networking};

use crate::peer::{Peer, PeerKey};
use crate::{Error, Inbound};

/// The largest datagram a receive routine accepts.
pub const MAX_DATAGRAM_SIZE: usize = u16::MAX as usize;

/// The socket side of a tunnel: the active [`Bind`], the peers and the routines feeding inbound datagrams.
///
/// Lock order is always `net` before `peers`.
pub struct Device {
    net: Mutex<NetworkState>,
    peers: Mutex<HashMap<PeerKey, Arc<Peer>>>,

    mtu: AtomicU32,

    networking: Arc<dyn Networking>,
    inbound: flume::Sender<Inbound>,
}

/// `bind` is only ever set while `is_up`; both change under the same lock.
#[derive(Default)]
struct NetworkState {
    bind: Option<Arc<dyn Bind>>,
    port: u16,
    mark: u32,
    is_up: bool,
}

impl NetworkState {
    /// Closes and forgets the current bind, if any.
    fn close_bind(&mut self) -> Result<(), Error> {
        let Some(bind) = self.bind.take() else {
            return Ok(());
        };

        bind.close().map_err(Error::CloseBind)
    }
}

impl Device {
    /// Creates a device that is down; datagrams received once it is up are sent to `inbound`.
    pub fn new(networking: Arc<dyn Networking>, inbound: flume::Sender<Inbound>) -> Self {
        Self {
            net: Mutex::new(NetworkState::default()),
            peers: Mutex::new(HashMap::new()),
            mtu: AtomicU32::new(0),
            networking,
            inbound,
        }
    }

    /// Replaces the active bind.
    ///
    /// The existing bind is always closed. Only if the device is up, a new one is created on the stored port,
    /// the stored firewall mark is applied and the cached source address of every peer is cleared because it
    /// belonged to the old sockets. Finally, a receive routine is started per IP version.
    pub fn bind_update(&self) -> Result<(), Error> {
        let mut net = self.net.lock();

        self.bind_update_locked(&mut net)
    }

    fn bind_update_locked(&self, net: &mut NetworkState) -> Result<(), Error> {
        let peers = self.peers.lock();

        net.close_bind()?;

        if !net.is_up {
            return Ok(());
        }

        let (bind, port) = self
            .networking
            .create_bind(net.port)
            .map_err(|source| Error::CreateBind {
                port: net.port,
                source,
            })?;

        if net.mark != 0
            && let Err(source) = bind.set_mark(net.mark)
        {
            logging::unwrap_or_debug!(bind.close(), "Failed to close rejected bind: {}");

            return Err(Error::SetMark {
                mark: net.mark,
                source,
            });
        }

        for peer in peers.values() {
            peer.clear_src();
        }

        for version in IpVersion::ALL {
            if let Err(e) = spawn_receive_routine(version, bind.clone(), self.inbound.clone()) {
                logging::unwrap_or_debug!(bind.close(), "Failed to close abandoned bind: {}");

                return Err(e);
            }
        }

        net.bind = Some(bind);
        net.port = port;

        tracing::debug!(%port, peers = %peers.len(), "UDP bind has been updated");

        Ok(())
    }

    /// Stores the firewall mark and applies it to the active bind.
    ///
    /// Setting the mark that is already stored does nothing.
    pub fn bind_set_mark(&self, mark: u32) -> Result<(), Error> {
        let mut net = self.net.lock();
        let _peers = self.peers.lock();

        if net.mark == mark {
            return Ok(());
        }

        net.mark = mark;

        if net.is_up
            && let Some(bind) = net.bind.as_ref()
        {
            bind.set_mark(mark)
                .map_err(|source| Error::SetMark { mark, source })?;
        }

        tracing::debug!(%mark, "Updated firewall mark");

        Ok(())
    }

    /// Closes the active bind.
    pub fn bind_close(&self) -> Result<(), Error> {
        self.net.lock().close_bind()
    }

    /// Marks the device as administratively up and binds the sockets.
    ///
    /// If binding fails, the device stays down and a later call tries again.
    pub fn up(&self) -> Result<(), Error> {
        let mut net = self.net.lock();
        if net.is_up && net.bind.is_some() {
            return Ok(());
        }

        net.is_up = true;

        if let Err(e) = self.bind_update_locked(&mut net) {
            net.is_up = false;

            return Err(e);
        }

        tracing::info!("Device is up");

        Ok(())
    }

    /// Marks the device as administratively down and closes the sockets.
    pub fn down(&self) -> Result<(), Error> {
        let mut net = self.net.lock();
        if !net.is_up {
            return Ok(());
        }

        net.is_up = false;

        tracing::info!("Device is down");

        net.close_bind()
    }

    pub fn is_up(&self) -> bool {
        self.net.lock().is_up
    }

    /// The port we are bound to or, while down, the port we will bind to.
    pub fn port(&self) -> u16 {
        self.net.lock().port
    }

    pub fn mark(&self) -> u32 {
        self.net.lock().mark
    }

    /// Stores the listen port and re-binds if the device is up.
    pub fn set_listen_port(&self, port: u16) -> Result<(), Error> {
        let mut net = self.net.lock();
        if net.port == port && net.bind.is_some() {
            return Ok(());
        }

        net.port = port;

        if !net.is_up {
            return Ok(());
        }

        self.bind_update_locked(&mut net)
    }

    pub fn mtu(&self) -> u32 {
        self.mtu.load(Ordering::SeqCst)
    }

    pub fn set_mtu(&self, mtu: u32) {
        self.mtu.store(mtu, Ordering::SeqCst);
    }

    /// Adds a peer, returning the existing one if the key is already known.
    pub fn add_peer(&self, key: PeerKey) -> Arc<Peer> {
        self.peers
            .lock()
            .entry(key)
            .or_insert_with(|| Arc::new(Peer::new(key)))
            .clone()
    }

    pub fn remove_peer(&self, key: &PeerKey) -> Option<Arc<Peer>> {
        self.peers.lock().remove(key)
    }

    pub fn peer(&self, key: &PeerKey) -> Option<Arc<Peer>> {
        self.peers.lock().get(key).cloned()
    }

    /// Remembers where a peer's datagram came from so replies go back the same way.
    pub fn update_peer_endpoint(&self, key: &PeerKey, endpoint: Endpoint) -> Result<(), Error> {
        let peer = self.peer(key).ok_or(Error::UnknownPeer(*key))?;
        peer.set_endpoint(endpoint);

        Ok(())
    }

    /// Sends an encrypted datagram to the peer's current endpoint.
    pub fn send_to_peer(&self, key: &PeerKey, buf: &[u8]) -> Result<(), Error> {
        let bind = self.net.lock().bind.clone().ok_or(Error::NotBound)?;
        let peer = self.peer(key).ok_or(Error::UnknownPeer(*key))?;
        let endpoint = peer.endpoint().ok_or(Error::NoEndpoint(*key))?;

        bind.send(buf, &endpoint).map_err(|source| Error::Send {
            dst: endpoint.dst(),
            source,
        })
    }
}

fn spawn_receive_routine(
    version: IpVersion,
    bind: Arc<dyn Bind>,
    inbound: flume::Sender<Inbound>,
) -> Result<(), Error> {
    std::thread::Builder::new()
        .name(format!("receive {version}"))
        .spawn(move || receive_incoming(version, bind, inbound))
        .map_err(Error::SpawnReceiveRoutine)?;

    Ok(())
}

/// Forwards datagrams from one socket of `bind` until it is closed or nobody consumes them anymore.
fn receive_incoming(version: IpVersion, bind: Arc<dyn Bind>, inbound: flume::Sender<Inbound>) {
    let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];

    loop {
        let (len, endpoint) = match version.receive(bind.as_ref(), &mut buf) {
            Ok(received) => received,
            Err(e) => {
                tracing::debug!(%version, "Receive routine stopped: {e}");
                return;
            }
        };

        if len == 0 {
            continue;
        }

        let datagram = Inbound {
            packet: buf[..len].to_vec(),
            endpoint,
            version,
        };

        if inbound.send(datagram).is_err() {
            tracing::debug!(%version, "Inbound channel closed; stopping receive routine");
            return;
        }
    }
}
