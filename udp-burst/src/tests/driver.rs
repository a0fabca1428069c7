#![cfg(test)]

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::config::{DriverConfig, PacketConfig};
use crate::driver::{DriverStats, Iteration, TransmitDriver};
use crate::egress::{DiscardEgress, Egress};
use crate::error::ConfigError;
use crate::packet::{OffloadFlags, PacketBuf as _, PacketBuilder};
use crate::pool::{BufferPool as _, HeapBuf, HeapPool};

/// Accepts up to `accept` packets per call and keeps them, like a NIC queue that has
/// not completed transmission yet.
struct HoldingEgress {
    accept: usize,
    offered: Vec<u32>,
    held: Vec<HeapBuf>,
}

impl HoldingEgress {
    fn new(accept: usize) -> Self {
        HoldingEgress {
            accept,
            offered: Vec::new(),
            held: Vec::new(),
        }
    }
}

impl Egress for HoldingEgress {
    type Buf = HeapBuf;

    fn send(&mut self, batch: &mut Vec<HeapBuf>) -> usize {
        self.offered = batch.iter().map(|buf| buf.id()).collect();
        let accepted = self.accept.min(batch.len());
        self.held.extend(batch.drain(..accepted));
        accepted
    }
}

/// Takes `take` packets but claims `claim`.
struct MiscountingEgress {
    take: usize,
    claim: usize,
}

impl Egress for MiscountingEgress {
    type Buf = HeapBuf;

    fn send(&mut self, batch: &mut Vec<HeapBuf>) -> usize {
        let take = self.take.min(batch.len());
        batch.drain(..take).for_each(drop);
        self.claim
    }
}

/// Takes nothing and slips a buffer of its own into the batch.
struct PaddingEgress {
    spare: HeapPool,
}

impl Egress for PaddingEgress {
    type Buf = HeapBuf;

    fn send(&mut self, batch: &mut Vec<HeapBuf>) -> usize {
        self.spare.alloc_bulk(1, batch).unwrap();
        0
    }
}

fn driver(batch_size: usize, pool: &HeapPool) -> TransmitDriver<HeapBuf> {
    let builder = PacketBuilder::new(&PacketConfig::default(), OffloadFlags::empty()).unwrap();
    let config = DriverConfig {
        batch_size,
        interval: Duration::ZERO,
        bursts: None,
    };
    TransmitDriver::new(builder, config, pool).unwrap()
}

fn all_ids(pool: &mut HeapPool) -> Vec<u32> {
    let mut bufs = Vec::new();
    pool.alloc_bulk(pool.available(), &mut bufs).unwrap();
    let mut ids: Vec<u32> = bufs.iter().map(|buf| buf.id()).collect();
    ids.sort_unstable();
    ids
}

#[test]
fn test_partial_send_reclaims_tail() {
    let mut pool = HeapPool::new(64, 2048);
    let mut egress = HoldingEgress::new(20);
    let mut driver = driver(32, &pool);

    let outcome = driver.run_once(&mut pool, &mut egress).unwrap();
    assert_eq!(
        outcome,
        Iteration::Sent {
            accepted: 20,
            reclaimed: 12
        }
    );
    assert_eq!(egress.offered.len(), 32);
    // 32 idle before the burst, plus the 12 buffers the egress left behind
    assert_eq!(pool.available(), 44);

    let held: Vec<u32> = egress.held.iter().map(|buf| buf.id()).collect();
    assert_eq!(held, egress.offered[..20]);

    let idle = all_ids(&mut pool);
    for id in &egress.offered[20..] {
        assert!(idle.contains(id), "buffer {id} was not returned");
    }
    for id in &held {
        assert!(!idle.contains(id), "accepted buffer {id} is back in the pool");
    }
}

#[test]
fn test_every_acceptance_count_settles_batch() {
    const BATCH: usize = 8;
    for accept in 0..=BATCH {
        let mut pool = HeapPool::new(BATCH, 256);
        let mut egress = HoldingEgress::new(accept);
        let mut driver = driver(BATCH, &pool);

        let outcome = driver.run_once(&mut pool, &mut egress).unwrap();
        assert_eq!(
            outcome,
            Iteration::Sent {
                accepted: accept,
                reclaimed: BATCH - accept
            }
        );
        assert_eq!(egress.held.len(), accept);
        assert_eq!(pool.available(), BATCH - accept);

        // once the egress lets go, every buffer is idle exactly once
        egress.held.clear();
        assert_eq!(all_ids(&mut pool), (0..BATCH as u32).collect::<Vec<_>>());
    }
}

#[test]
fn test_sent_packets_carry_template() {
    let mut pool = HeapPool::new(16, 2048);
    let mut egress = HoldingEgress::new(16);
    let mut driver = driver(16, &pool);
    driver.run_once(&mut pool, &mut egress).unwrap();
    for buf in &egress.held {
        assert_eq!(buf.data(), driver.builder().template());
        assert_eq!(*buf.meta(), driver.builder().meta());
    }
}

#[test]
fn test_starved_burst_is_skipped() {
    let mut pool = HeapPool::new(10, 2048);
    let mut egress = HoldingEgress::new(32);
    let mut driver = driver(32, &pool);

    let outcome = driver.run_once(&mut pool, &mut egress).unwrap();
    assert_eq!(outcome, Iteration::Starved { available: 10 });
    assert!(egress.offered.is_empty());
    assert_eq!(pool.available(), 10);
    assert_eq!(driver.stats().alloc_failures, 1);
}

#[test]
fn test_recovers_after_exhaustion() {
    let mut pool = HeapPool::new(40, 2048);
    let mut egress = HoldingEgress::new(32);
    let mut driver = driver(32, &pool);

    assert!(matches!(
        driver.run_once(&mut pool, &mut egress).unwrap(),
        Iteration::Sent { accepted: 32, .. }
    ));
    assert_eq!(
        driver.run_once(&mut pool, &mut egress).unwrap(),
        Iteration::Starved { available: 8 }
    );
    // transmission completes, buffers return to the pool
    egress.held.clear();
    assert!(matches!(
        driver.run_once(&mut pool, &mut egress).unwrap(),
        Iteration::Sent { accepted: 32, .. }
    ));
    assert_eq!(
        driver.stats(),
        DriverStats {
            iterations: 3,
            sent: 64,
            reclaimed: 0,
            alloc_failures: 1,
        }
    );
}

#[test]
fn test_run_survives_allocation_failures() {
    let mut pool = HeapPool::new(10, 2048);
    let mut egress = DiscardEgress::new(32);
    let builder = PacketBuilder::new(&PacketConfig::default(), OffloadFlags::empty()).unwrap();
    let config = DriverConfig {
        batch_size: 32,
        interval: Duration::from_millis(1),
        bursts: Some(3),
    };
    let mut driver = TransmitDriver::new(builder, config, &pool).unwrap();

    let stats = driver
        .run(&mut pool, &mut egress, &CancellationToken::new())
        .unwrap();
    assert_eq!(stats.iterations, 3);
    assert_eq!(stats.alloc_failures, 3);
    assert_eq!(stats.sent, 0);
    assert_eq!(pool.available(), 10);
}

#[test]
fn test_run_stops_at_burst_limit() {
    let mut pool = HeapPool::new(64, 2048);
    let mut egress = DiscardEgress::new(24);
    let builder = PacketBuilder::new(&PacketConfig::default(), OffloadFlags::empty()).unwrap();
    let config = DriverConfig {
        batch_size: 32,
        interval: Duration::ZERO,
        bursts: Some(5),
    };
    let mut driver = TransmitDriver::new(builder, config, &pool).unwrap();

    let stats = driver
        .run(&mut pool, &mut egress, &CancellationToken::new())
        .unwrap();
    assert_eq!(stats.iterations, 5);
    assert_eq!(stats.sent, 5 * 24);
    assert_eq!(stats.reclaimed, 5 * 8);
    assert_eq!(egress.packets(), 5 * 24);
    assert_eq!(egress.bytes(), 5 * 24 * 128);
    assert_eq!(pool.available(), 64);
}

#[test]
fn test_run_honours_cancellation() {
    let mut pool = HeapPool::new(64, 2048);
    let mut egress = DiscardEgress::new(32);
    let mut driver = driver(32, &pool);

    let stop = CancellationToken::new();
    stop.cancel();
    let stats = driver.run(&mut pool, &mut egress, &stop).unwrap();
    assert_eq!(stats.iterations, 0);
    assert_eq!(pool.available(), 64);

    let stop = CancellationToken::new();
    let canceller = {
        let stop = stop.clone();
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            stop.cancel();
        })
    };
    let mut driver = TransmitDriver::new(
        driver.builder().clone(),
        DriverConfig {
            batch_size: 32,
            interval: Duration::from_secs(60),
            bursts: None,
        },
        &pool,
    )
    .unwrap();
    let stats = driver.run(&mut pool, &mut egress, &stop).unwrap();
    canceller.join().unwrap();
    assert_eq!(stats.iterations, 1);
    assert_eq!(stats.sent, 32);
}

#[test]
fn test_driver_trusts_batch_over_reported_count() {
    let mut pool = HeapPool::new(32, 2048);
    let mut egress = MiscountingEgress { take: 5, claim: 7 };
    let mut driver = driver(32, &pool);

    assert_eq!(
        driver.run_once(&mut pool, &mut egress).unwrap(),
        Iteration::Sent {
            accepted: 5,
            reclaimed: 27
        }
    );
    assert_eq!(pool.available(), 32);
}

#[test]
fn test_pool_buffers_must_fit_packet() {
    let pool = HeapPool::new(8, 64);
    let builder = PacketBuilder::new(&PacketConfig::default(), OffloadFlags::empty()).unwrap();
    let err = TransmitDriver::new(builder, DriverConfig::default(), &pool)
        .err()
        .unwrap();
    assert_eq!(
        err,
        ConfigError::BufferTooSmall {
            length: 128,
            buffer_size: 64
        }
    );
}

#[test]
fn test_for_egress_follows_offload() {
    let pool = HeapPool::new(8, 2048);
    let egress: DiscardEgress<HeapBuf> =
        DiscardEgress::new(8).with_offload(OffloadFlags::IP_CKSUM | OffloadFlags::UDP_CKSUM);
    let driver = TransmitDriver::for_egress(
        &PacketConfig::default(),
        DriverConfig::default(),
        &pool,
        &egress,
    )
    .unwrap();
    let flags = driver.builder().meta().flags;
    assert!(flags.contains(OffloadFlags::IPV4 | OffloadFlags::IP_CKSUM | OffloadFlags::UDP_CKSUM));
    assert_eq!(&driver.builder().template()[24..26], &[0, 0]);
}

#[test]
fn test_driver_survives_egress_growing_batch() {
    let mut pool = HeapPool::new(8, 2048);
    let mut egress = PaddingEgress {
        spare: HeapPool::new(1, 2048),
    };
    let mut driver = driver(8, &pool);

    assert_eq!(
        driver.run_once(&mut pool, &mut egress).unwrap(),
        Iteration::Sent {
            accepted: 0,
            reclaimed: 9
        }
    );
    assert_eq!(driver.stats().sent, 0);
    assert!(pool.available() >= 8);
}
