//
// xdp_port.rs - AF_XDP backend against a veth pair
//
// Purpose:
//   Exercises the UMEM frame pool and the TX ring egress on a real AF_XDP socket: a
//   burst larger than the TX ring is only partly accepted, and every frame comes back
//   through the completion ring once the kernel has sent it.
//
// How it works:
//   - Requires root (CAP_NET_ADMIN, CAP_NET_RAW) and the `ip` tool, so the tests are
//     ignored by default: `cargo test --test xdp_port -- --ignored --test-threads=1`.
//   - A veth pair is created for each test and removed when the test ends.
//
#![cfg(target_os = "linux")]

use std::io::{Error, Result};
use std::process::Command;
use std::time::{Duration, Instant};

use udp_burst::xdp::{FRAME_COUNT, TX_RING_SIZE, XdpConfig, create_tx_port, if_index_by_name};
use udp_burst::{BufferPool as _, DriverConfig, Iteration, PacketConfig, TransmitDriver};

const DEV_PREFIX: &str = "ubVeth";

fn execute_command(command: &str) -> Result<()> {
    let output = Command::new("sh").arg("-c").arg(command).output()?;
    if !output.status.success() {
        return Err(Error::other(format!(
            "Command failed with status {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr)
        )));
    }
    log::debug!("Command succeeded: {command}");
    Ok(())
}

/// A veth pair that is deleted on drop.
struct VethPair {
    dev0: String,
}

impl VethPair {
    fn setup(suffix: &str) -> Result<Self> {
        let prefix = format!("{DEV_PREFIX}{suffix}");
        let _ = execute_command(&format!("ip link del {prefix}0"));
        execute_command(&format!("ip link add {prefix}0 type veth peer {prefix}1"))?;
        execute_command(&format!("ip link set {prefix}0 up"))?;
        execute_command(&format!("ip link set {prefix}1 up"))?;
        Ok(VethPair {
            dev0: format!("{prefix}0"),
        })
    }
}

impl Drop for VethPair {
    fn drop(&mut self) {
        if let Err(e) = execute_command(&format!("ip link del {}", self.dev0)) {
            log::error!("Failed to remove {}: {e}", self.dev0);
        }
    }
}

fn init_logger() {
    let _ = env_logger::builder()
        .filter_level(log::LevelFilter::Debug)
        .is_test(true)
        .try_init();
}

fn full_ring_burst(suffix: &str, need_wakeup: bool) {
    init_logger();
    let veth = VethPair::setup(suffix).unwrap();
    let if_index = if_index_by_name(&veth.dev0).unwrap();
    let config = XdpConfig {
        zero_copy: Some(false),
        huge_page: Some(false),
        need_wakeup: Some(need_wakeup),
    };
    let (mut pool, mut tx) = create_tx_port(if_index, 0, Some(config)).unwrap();
    assert_eq!(pool.available(), FRAME_COUNT);

    let driver_config = DriverConfig {
        batch_size: TX_RING_SIZE + 64,
        interval: Duration::ZERO,
        bursts: None,
    };
    let mut driver =
        TransmitDriver::for_egress(&PacketConfig::default(), driver_config, &pool, &tx).unwrap();

    // the ring is empty, so it takes exactly its size and the rest is reclaimed
    assert_eq!(
        driver.run_once(&mut pool, &mut tx).unwrap(),
        Iteration::Sent {
            accepted: TX_RING_SIZE,
            reclaimed: 64
        }
    );
    assert_eq!(pool.available(), FRAME_COUNT - TX_RING_SIZE);

    let deadline = Instant::now() + Duration::from_secs(5);
    while pool.available() < FRAME_COUNT {
        assert!(
            Instant::now() < deadline,
            "only {} of {FRAME_COUNT} frames came back",
            pool.available()
        );
        tx.kick().unwrap();
        pool.reclaim();
        std::thread::sleep(Duration::from_millis(1));
    }
    assert_eq!(tx.in_flight(), 0);
}

#[test]
#[ignore = "needs root and veth support"]
fn test_full_ring_with_need_wakeup() {
    full_ring_burst("w", true);
}

#[test]
#[ignore = "needs root and veth support"]
fn test_full_ring_without_need_wakeup() {
    full_ring_burst("k", false);
}
