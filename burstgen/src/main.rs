//
// burstgen - UDP burst generator
//
// Purpose:
//   Sends one fixed UDP datagram in bursts at a steady rate, either out of an AF_XDP
//   socket bound to an interface queue or, with --dry-run, into an in-memory sink.
//
// How it works:
//   - The command line fills a `PacketConfig` and a `DriverConfig`. Unset MAC addresses
//     fall back to the interface's own address and the reference profile.
//   - The transmit loop is blocking and runs on a tokio blocking thread. The AF_XDP port
//     is created on that thread because its pool and egress share non-thread-safe state.
//   - Ctrl-C cancels the loop's token; the loop stops at its next pause and the totals
//     are reported.
//

mod command;

use std::io;
use std::net::SocketAddrV4;
use std::time::Duration;

use clap::Parser;
use eui48::MacAddress;
use tokio_util::sync::CancellationToken;
use udp_burst::config::{DEFAULT_BATCH_SIZE, DEFAULT_PACKET_LEN, DEFAULT_PAYLOAD};
use udp_burst::xdp::{XdpConfig, create_tx_port, if_index_by_name, mac_by_ifindex};
use udp_burst::{DiscardEgress, DriverConfig, DriverStats, HeapPool, PacketConfig, TransmitDriver};

/// Buffers in the dry-run pool.
const DRY_RUN_POOL_SIZE: usize = 4096;
/// Smallest buffer of the dry-run pool, the size of an AF_XDP frame.
const DRY_RUN_BUFFER_SIZE: usize = 2048;

#[derive(Parser, Debug)]
#[command(version, about = "Sends bursts of identical UDP packets")]
struct Args {
    /// source ip:port
    #[clap(default_value = "192.168.0.31:1000")]
    src: SocketAddrV4,

    /// destination ip:port
    #[clap(default_value = "192.168.0.32:2000")]
    dst: SocketAddrV4,

    /// network interface to transmit on, like eth0
    #[clap(short, long)]
    iface: Option<String>,

    /// interface queue the AF_XDP socket is bound to
    #[clap(short, long, default_value_t = 0)]
    queue: u32,

    /// source MAC address, defaults to the interface address
    #[clap(long, value_parser = parse_mac)]
    src_mac: Option<[u8; 6]>,

    /// destination MAC address
    #[clap(long, value_parser = parse_mac)]
    dst_mac: Option<[u8; 6]>,

    /// frame length in bytes, Ethernet header included
    #[clap(short, long, default_value_t = DEFAULT_PACKET_LEN)]
    length: usize,

    /// packets per burst
    #[clap(short, long, default_value_t = DEFAULT_BATCH_SIZE)]
    batch: usize,

    /// pause between bursts like 1s or 100ms
    #[clap(short = 't', long, default_value = "1s", value_parser = humantime::parse_duration)]
    interval: Duration,

    /// text repeated over the payload
    #[clap(short, long)]
    payload: Option<String>,

    /// number of bursts to send, unlimited if not set
    #[clap(short, long)]
    count: Option<u64>,

    /// require zero-copy mode from the driver
    #[clap(long)]
    zero_copy: bool,

    /// back the UMEM with huge pages (true/false), automatic if not set
    #[clap(long)]
    huge_pages: Option<bool>,

    /// build and discard packets without touching the network
    #[clap(long)]
    dry_run: bool,
}

fn parse_mac(s: &str) -> Result<[u8; 6], String> {
    MacAddress::parse_str(s)
        .map(|mac| mac.to_array())
        .map_err(|e| format!("invalid MAC address {s}: {e}"))
}

impl Args {
    fn packet_config(&self, if_index: Option<u32>) -> io::Result<PacketConfig> {
        let defaults = PacketConfig::default();
        let src_mac = match (self.src_mac, if_index) {
            (Some(mac), _) => mac,
            (None, Some(if_index)) => mac_by_ifindex(if_index)?,
            (None, None) => defaults.src_mac,
        };
        Ok(PacketConfig {
            src_mac,
            dst_mac: self.dst_mac.unwrap_or(defaults.dst_mac),
            src_addr: *self.src.ip(),
            dst_addr: *self.dst.ip(),
            src_port: self.src.port(),
            dst_port: self.dst.port(),
            length: self.length,
            payload: self
                .payload
                .as_ref()
                .map_or_else(|| DEFAULT_PAYLOAD.to_vec(), |text| text.as_bytes().to_vec()),
        })
    }

    fn driver_config(&self) -> DriverConfig {
        DriverConfig {
            batch_size: self.batch,
            interval: self.interval,
            bursts: self.count,
        }
    }
}

fn run_dry(args: &Args, stop: &CancellationToken) -> io::Result<DriverStats> {
    let packet = args.packet_config(None)?;
    let mut pool = HeapPool::new(DRY_RUN_POOL_SIZE, packet.length.max(DRY_RUN_BUFFER_SIZE));
    let mut egress = DiscardEgress::new(usize::MAX);
    let mut driver = TransmitDriver::for_egress(&packet, args.driver_config(), &pool, &egress)
        .map_err(io::Error::other)?;
    let stats = driver
        .run(&mut pool, &mut egress, stop)
        .map_err(io::Error::other)?;
    log::info!("discarded {} bytes", egress.bytes());
    Ok(stats)
}

fn run_xdp(args: &Args, stop: &CancellationToken) -> io::Result<DriverStats> {
    let iface = args
        .iface
        .as_deref()
        .ok_or_else(|| io::Error::other("--iface is required unless --dry-run is given"))?;
    command::setup(&[
        caps::Capability::CAP_NET_ADMIN,
        caps::Capability::CAP_NET_RAW,
    ])?;

    let if_index = if_index_by_name(iface)?;
    let packet = args.packet_config(Some(if_index))?;
    let xdp_config = XdpConfig {
        zero_copy: args.zero_copy.then_some(true),
        huge_page: args.huge_pages,
        need_wakeup: None,
    };
    let (mut pool, mut tx) = create_tx_port(if_index, args.queue, Some(xdp_config))
        .map_err(|e| io::Error::other(format!("Failed to create XDP socket: {e}")))?;
    let mut driver = TransmitDriver::for_egress(&packet, args.driver_config(), &pool, &tx)
        .map_err(io::Error::other)?;
    driver
        .run(&mut pool, &mut tx, stop)
        .map_err(io::Error::other)
}

#[tokio::main]
pub async fn main() -> io::Result<()> {
    command::init_logger();
    let args = Args::parse();

    let stop = CancellationToken::new();
    let token = stop.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                log::info!("interrupted, stopping after the current burst");
                token.cancel();
            }
            Err(e) => log::error!("Failed to listen for Ctrl-C: {e}"),
        }
    });

    let worker = tokio::task::spawn_blocking(move || {
        if args.dry_run {
            run_dry(&args, &stop)
        } else {
            run_xdp(&args, &stop)
        }
    });
    let stats = worker.await.map_err(io::Error::other)?.inspect_err(|e| {
        log::error!("transmit loop failed: {e}");
    })?;

    println!(
        "{} bursts, {} packets sent, {} buffers reclaimed, {} allocation failures",
        stats.iterations, stats.sent, stats.reclaimed, stats.alloc_failures
    );
    Ok(())
}
