//! `tunctl` brings up a TUN interface and keeps a UDP bind in sync with it until Ctrl-C.

#![cfg_attr(test, allow(clippy::unwrap_used))]

use std::process::ExitCode;

use anyhow::{Context as _, Result};
use clap::Parser;

#[expect(clippy::print_stderr, reason = "The logger may not be set up")]
fn main() -> ExitCode {
    let cli = Cli::parse();

    match try_main(cli) {
        Ok(()) => {
            tracing::info!("Goodbye!");

            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("{e:#}");

            ExitCode::FAILURE
        }
    }
}

fn try_main(cli: Cli) -> Result<()> {
    let _reload_handle = logging::setup_global_subscriber(&cli.log, cli.log_json)
        .context("Failed to set up logging")?;

    tracing::info!(
        arch = std::env::consts::ARCH,
        os = std::env::consts::OS,
        version = env!("CARGO_PKG_VERSION"),
        "`tunctl` started logging"
    );
    tracing::debug!(?cli);

    run(cli)
}

#[cfg(any(target_os = "dragonfly", target_os = "freebsd"))]
fn run(cli: Cli) -> Result<()> {
    use std::sync::Arc;

    use socket_factory::UdpNetworking;
    use tunnel::{Device, Inbound};

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to create tokio runtime")?;

    let tun: Arc<dyn tun::Tun> = Arc::new(
        tun::bsd::create(&cli.name, cli.mtu).context("Failed to create TUN device")?,
    );
    let (inbound_tx, inbound_rx) = flume::bounded::<Inbound>(1024);
    let device = Arc::new(Device::new(Arc::new(UdpNetworking), inbound_tx));

    device.set_mtu(tun.mtu().context("Failed to read MTU")?);
    device
        .set_listen_port(cli.listen_port)
        .context("Failed to set listen port")?;
    device
        .bind_set_mark(cli.fwmark)
        .context("Failed to set firewall mark")?;

    tracing::info!(name = %tun.name(), mtu = %device.mtu(), "TUN device is ready");

    let events = std::thread::Builder::new()
        .name("tun events".to_owned())
        .spawn({
            let device = device.clone();
            let tun = tun.clone();

            move || tunnel::run_tun_events(&device, tun.as_ref())
        })
        .context("Failed to spawn TUN event routine")?;
    let packets = std::thread::Builder::new()
        .name("tun read".to_owned())
        .spawn({
            let tun = tun.clone();

            move || read_packets(tun.as_ref())
        })
        .context("Failed to spawn TUN read routine")?;
    let datagrams = std::thread::Builder::new()
        .name("inbound".to_owned())
        .spawn(move || {
            for datagram in inbound_rx.iter() {
                tracing::trace!(
                    from = %datagram.endpoint.dst(),
                    version = %datagram.version,
                    len = datagram.packet.len(),
                    "Received datagram"
                );
            }
        })
        .context("Failed to spawn inbound routine")?;

    runtime
        .block_on(tokio::signal::ctrl_c())
        .context("Failed to listen for Ctrl-C")?;

    tracing::info!("Shutting down");

    device.down().context("Failed to bring device down")?;
    tun.close().context("Failed to close TUN device")?;
    drop(device);

    for routine in [events, packets, datagrams] {
        if routine.join().is_err() {
            tracing::warn!("A routine panicked");
        }
    }

    Ok(())
}

#[cfg(any(target_os = "dragonfly", target_os = "freebsd"))]
fn read_packets(tun: &dyn tun::Tun) {
    let mut buf = vec![0u8; tunnel::MAX_DATAGRAM_SIZE];

    loop {
        match tun.read(&mut buf, tun::PACKET_INFORMATION_LEN) {
            Ok(0) => continue,
            Ok(len) => {
                tracing::trace!(%len, "Read packet from TUN device");
            }
            Err(tun::Error::DeviceClosed) => return,
            Err(e) => {
                tracing::warn!("Failed to read from TUN device: {}", logging::err_with_src(&e));
                return;
            }
        }
    }
}

#[cfg(not(any(target_os = "dragonfly", target_os = "freebsd")))]
fn run(_: Cli) -> Result<()> {
    anyhow::bail!(
        "`tunctl` only supports FreeBSD and DragonFly BSD, not {}",
        std::env::consts::OS
    )
}

#[derive(Parser, Debug)]
#[cfg_attr(
    not(any(target_os = "dragonfly", target_os = "freebsd")),
    allow(dead_code, reason = "Only read on BSD")
)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Name of the TUN interface to create.
    #[arg(short = 'n', long, env = "TUNCTL_NAME", default_value = "wg0")]
    name: String,

    #[arg(long, env = "TUNCTL_MTU", default_value_t = 1420)]
    mtu: u32,

    /// UDP port to listen on; `0` picks an ephemeral one.
    #[arg(short = 'p', long, env = "TUNCTL_LISTEN_PORT", default_value_t = 0)]
    listen_port: u16,

    /// Firewall mark for outgoing datagrams; `0` leaves them unmarked.
    #[arg(long, env = "TUNCTL_FWMARK", default_value_t = 0)]
    fwmark: u32,

    /// Filter directives for the logger.
    #[arg(long, env = "RUST_LOG", default_value = "info")]
    log: String,

    /// Log to stdout as JSON.
    #[arg(long, env = "TUNCTL_LOG_JSON", default_value_t = false)]
    log_json: bool,
}
