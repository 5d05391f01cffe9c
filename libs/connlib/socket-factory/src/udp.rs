use std::io::{self, IoSliceMut};
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::os::fd::AsFd as _;
use std::sync::Arc;

use parking_lot::RwLock;
use quinn_udp::{RecvMeta, Transmit, UdpSockRef, UdpSocketState};
use rwcancel::RwCancel;

use crate::{Bind, Endpoint, EndpointError, IpVersion, Networking, parse_endpoint};

/// How often we try to find an ephemeral port that is free for both IPv4 and IPv6.
pub const MAX_EPHEMERAL_BIND_ATTEMPTS: usize = 100;

/// Creates dual-stack [`UdpBind`]s.
#[derive(Debug, Default, Clone, Copy)]
pub struct UdpNetworking;

impl Networking for UdpNetworking {
    fn create_bind(&self, port: u16) -> io::Result<(Arc<dyn Bind>, u16)> {
        let bind = UdpBind::bind(port)?;
        let port = bind.port();

        Ok((Arc::new(bind), port))
    }

    fn create_endpoint(&self, addr: &str) -> Result<Endpoint, EndpointError> {
        Ok(Endpoint::new(parse_endpoint(addr)?))
    }
}

/// An IPv4 and (if the host supports it) an IPv6 UDP socket bound to the same port.
#[derive(derive_more::Debug)]
pub struct UdpBind {
    /// Emptied on close.
    #[debug(skip)]
    sockets: RwLock<Sockets>,
    #[debug(skip)]
    rwcancel: RwCancel,
    port: u16,
}

#[derive(Default)]
struct Sockets {
    v4: Option<UdpSocket>,
    v6: Option<UdpSocket>,
}

impl Sockets {
    fn get(&self, version: IpVersion) -> Option<&UdpSocket> {
        match version {
            IpVersion::V4 => self.v4.as_ref(),
            IpVersion::V6 => self.v6.as_ref(),
        }
    }

    fn iter(&self) -> impl Iterator<Item = &UdpSocket> {
        self.v4.iter().chain(self.v6.iter())
    }
}

struct UdpSocket {
    inner: std::net::UdpSocket,
    state: UdpSocketState,
}

impl UdpBind {
    /// Binds IPv4 first and then IPv6 on the same port.
    ///
    /// For an ephemeral `port`, the IPv6 half may find the port taken, in which case we start over.
    /// Hosts without IPv6 get an IPv4-only bind.
    pub fn bind(port: u16) -> io::Result<Self> {
        for attempt in 1..=MAX_EPHEMERAL_BIND_ATTEMPTS {
            let v4 = UdpSocket::bind(SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)))?;
            let actual_port = v4.inner.local_addr()?.port();

            match UdpSocket::bind(SocketAddr::from((Ipv6Addr::UNSPECIFIED, actual_port))) {
                Ok(v6) => return Self::new(Some(v4), Some(v6), actual_port),
                Err(e) if e.kind() == io::ErrorKind::AddrInUse && port == 0 => {
                    tracing::debug!(port = %actual_port, %attempt, "Ephemeral port is taken for IPv6; retrying");
                }
                Err(e) if is_ipv6_unavailable(&e) => {
                    tracing::debug!(port = %actual_port, "Binding IPv4 only: {e}");

                    return Self::new(Some(v4), None, actual_port);
                }
                Err(e) => return Err(e),
            }
        }

        Err(io::Error::new(
            io::ErrorKind::AddrInUse,
            format!("No ephemeral port is free for both IPv4 and IPv6 after {MAX_EPHEMERAL_BIND_ATTEMPTS} attempts"),
        ))
    }

    fn new(v4: Option<UdpSocket>, v6: Option<UdpSocket>, port: u16) -> io::Result<Self> {
        tracing::debug!(%port, ipv6 = %v6.is_some(), "Bound UDP sockets");

        Ok(Self {
            sockets: RwLock::new(Sockets { v4, v6 }),
            rwcancel: RwCancel::new()?,
            port,
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    fn receive(&self, version: IpVersion, buf: &mut [u8]) -> io::Result<(usize, Endpoint)> {
        let sockets = self.sockets.read();
        let socket = sockets.get(version).ok_or_else(|| self.missing(version))?;

        let mut meta = [RecvMeta::default()];

        loop {
            let result = socket.state.recv(
                UdpSockRef::from(&socket.inner),
                &mut [IoSliceMut::new(&mut *buf)],
                &mut meta,
            );

            match result {
                Ok(_) => {
                    let [meta] = meta;
                    let endpoint = match meta.dst_ip {
                        Some(local) => Endpoint::with_src(meta.addr, local),
                        None => Endpoint::new(meta.addr),
                    };

                    return Ok((meta.len, endpoint));
                }
                Err(e) if is_retryable(&e) => {
                    if !self.rwcancel.ready_read(socket.inner.as_fd()) {
                        return Err(closed());
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn missing(&self, version: IpVersion) -> io::Error {
        if self.rwcancel.is_cancelled() {
            return closed();
        }

        io::Error::new(
            io::ErrorKind::AddrNotAvailable,
            format!("Bind has no {version} socket"),
        )
    }
}

impl Bind for UdpBind {
    fn set_mark(&self, mark: u32) -> io::Result<()> {
        for socket in self.sockets.read().iter() {
            set_mark(&socket.inner, mark)?;
        }

        tracing::debug!(port = %self.port, %mark, "Set firewall mark");

        Ok(())
    }

    fn receive_ipv4(&self, buf: &mut [u8]) -> io::Result<(usize, Endpoint)> {
        self.receive(IpVersion::V4, buf)
    }

    fn receive_ipv6(&self, buf: &mut [u8]) -> io::Result<(usize, Endpoint)> {
        self.receive(IpVersion::V6, buf)
    }

    fn send(&self, buf: &[u8], endpoint: &Endpoint) -> io::Result<()> {
        let version = match endpoint.dst() {
            SocketAddr::V4(_) => IpVersion::V4,
            SocketAddr::V6(_) => IpVersion::V6,
        };

        let sockets = self.sockets.read();
        let socket = sockets.get(version).ok_or_else(|| self.missing(version))?;

        let mut transmit = Transmit {
            destination: endpoint.dst(),
            ecn: None,
            contents: buf,
            segment_size: None,
            src_ip: endpoint.src_ip(),
        };

        loop {
            match socket
                .state
                .try_send(UdpSockRef::from(&socket.inner), &transmit)
            {
                Ok(()) => return Ok(()),
                Err(e) if is_retryable(&e) => {
                    if !self.rwcancel.ready_write(socket.inner.as_fd()) {
                        return Err(closed());
                    }
                }
                // The cached source address is no longer ours, let the routing table decide.
                Err(e) if e.raw_os_error() == Some(libc::EINVAL) && transmit.src_ip.is_some() => {
                    tracing::debug!(dst = %endpoint.dst(), src = %endpoint.src_to_string(), "Source address is gone; sending without it");

                    transmit.src_ip = None;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn close(&self) -> io::Result<()> {
        self.rwcancel.cancel()?;

        // Waiters have left, now wait for in-flight I/O before dropping the sockets.
        let mut sockets = self.sockets.write();
        if sockets.iter().next().is_some() {
            tracing::debug!(port = %self.port, "Closing UDP sockets");
        }
        *sockets = Sockets::default();

        Ok(())
    }
}

impl UdpSocket {
    fn bind(addr: SocketAddr) -> io::Result<Self> {
        let sock_addr = socket2::SockAddr::from(addr);
        let socket = socket2::Socket::new(sock_addr.domain(), socket2::Type::DGRAM, None)?;

        // Note: for AF_INET sockets IPV6_V6ONLY is not a valid flag
        if sock_addr.is_ipv6() {
            socket.set_only_v6(true)?;
        }

        socket.set_nonblocking(true)?;
        socket.bind(&sock_addr)?;

        let inner = std::net::UdpSocket::from(socket);
        let state = UdpSocketState::new(UdpSockRef::from(&inner))?;

        #[cfg(target_os = "linux")]
        disable_gro(&inner)?;

        Ok(Self { inner, state })
    }
}

/// `quinn-udp` turns on GRO but we receive one datagram per call.
#[cfg(target_os = "linux")]
fn disable_gro(socket: &std::net::UdpSocket) -> io::Result<()> {
    use std::os::fd::AsRawFd as _;

    let off: libc::c_int = 0;

    // Safety: `off` is a valid `int` for the duration of the call.
    let ret = unsafe {
        libc::setsockopt(
            socket.as_raw_fd(),
            libc::SOL_UDP,
            libc::UDP_GRO,
            &off as *const libc::c_int as *const libc::c_void,
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };

    match ret {
        0 => Ok(()),
        _ => Err(io::Error::last_os_error()),
    }
}

#[cfg(any(target_os = "linux", target_os = "android"))]
fn set_mark(socket: &std::net::UdpSocket, mark: u32) -> io::Result<()> {
    socket2::SockRef::from(socket).set_mark(mark)
}

#[cfg(target_os = "freebsd")]
fn set_mark(socket: &std::net::UdpSocket, mark: u32) -> io::Result<()> {
    socket2::SockRef::from(socket).set_cookie(mark)
}

#[cfg(not(any(target_os = "linux", target_os = "android", target_os = "freebsd")))]
fn set_mark(_: &std::net::UdpSocket, mark: u32) -> io::Result<()> {
    tracing::trace!(%mark, "Firewall marks are not supported on this platform");

    Ok(())
}

fn is_retryable(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    )
}

fn is_ipv6_unavailable(e: &io::Error) -> bool {
    e.kind() == io::ErrorKind::AddrNotAvailable || e.raw_os_error() == Some(libc::EAFNOSUPPORT)
}

fn closed() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "Bind is closed")
}
