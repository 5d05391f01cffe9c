#![cfg(target_family = "unix")]
#![allow(clippy::unwrap_used)]

use std::io;
use std::net::SocketAddr;
use std::os::fd::AsFd as _;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use socket_factory::{Bind, Endpoint, EndpointError, Networking, parse_endpoint};
use tun::testing::ScriptedKernel;
use tun::{Kernel as _, LinkStatus, TunDevice, route};
use tunnel::{Device, run_tun_events};

const MTU: u32 = 1420;

#[test]
fn device_follows_interface_state() {
    let _guard = logging::test("debug");
    let kernel = Arc::new(ScriptedKernel::new());
    let tun = Arc::new(TunDevice::create(kernel.clone(), "wg0", MTU).unwrap());
    let index = kernel.interface_index("wg0").unwrap().unwrap();
    let route = kernel.route_peer(0);
    let (inbound, _rx) = flume::unbounded();
    let device = Arc::new(Device::new(Arc::new(IdleNetworking), inbound));

    let handle = std::thread::spawn({
        let device = device.clone();
        let tun = tun.clone();

        move || run_tun_events(&device, tun.as_ref())
    });

    kernel.set_link_status(index, LinkStatus { up: true, mtu: 1280 });
    tun::unix::write(route.as_fd(), &if_info(index)).unwrap();

    wait_until(|| device.is_up() && device.mtu() == 1280);

    kernel.set_link_status(index, LinkStatus { up: false, mtu: 1280 });
    tun::unix::write(route.as_fd(), &if_info(index)).unwrap();

    wait_until(|| !device.is_up());

    tun.close().unwrap();
    handle.join().unwrap();
}

#[test]
fn ends_when_device_is_closed() {
    let kernel = Arc::new(ScriptedKernel::new());
    let tun = TunDevice::create(kernel, "wg0", MTU).unwrap();
    let (inbound, _rx) = flume::unbounded();
    let device = Device::new(Arc::new(IdleNetworking), inbound);

    tun.close().unwrap();
    run_tun_events(&device, &tun);

    assert!(!device.is_up());
}

fn wait_until(condition: impl Fn() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);

    while !condition() {
        assert!(Instant::now() < deadline, "condition not met in time");

        std::thread::sleep(Duration::from_millis(10));
    }
}

fn if_info(index: u32) -> Vec<u8> {
    let mut msg = vec![0u8; 16];
    msg[3] = route::RTM_IFINFO;
    msg[12..14].copy_from_slice(&(index as u16).to_ne_bytes());
    msg
}

/// Binds that never receive anything until they are closed.
struct IdleNetworking;

impl Networking for IdleNetworking {
    fn create_bind(&self, port: u16) -> io::Result<(Arc<dyn Bind>, u16)> {
        let (closed_tx, closed_rx) = flume::bounded(0);
        let bind = IdleBind {
            closed_tx: Mutex::new(Some(closed_tx)),
            closed_rx,
        };

        Ok((Arc::new(bind), port))
    }

    fn create_endpoint(&self, addr: &str) -> Result<Endpoint, EndpointError> {
        parse_endpoint(addr).map(|dst: SocketAddr| Endpoint::new(dst))
    }
}

struct IdleBind {
    closed_tx: Mutex<Option<flume::Sender<()>>>,
    closed_rx: flume::Receiver<()>,
}

impl IdleBind {
    fn wait_closed(&self) -> io::Result<(usize, Endpoint)> {
        let _ = self.closed_rx.recv();

        Err(io::Error::from(io::ErrorKind::NotConnected))
    }
}

impl Bind for IdleBind {
    fn set_mark(&self, _: u32) -> io::Result<()> {
        Ok(())
    }

    fn receive_ipv4(&self, _: &mut [u8]) -> io::Result<(usize, Endpoint)> {
        self.wait_closed()
    }

    fn receive_ipv6(&self, _: &mut [u8]) -> io::Result<(usize, Endpoint)> {
        self.wait_closed()
    }

    fn send(&self, _: &[u8], _: &Endpoint) -> io::Result<()> {
        Ok(())
    }

    fn close(&self) -> io::Result<()> {
        self.closed_tx.lock().take();

        Ok(())
    }
}
