//! # Burst Transmit Loop
//!
//! ## Purpose
//!
//! Drives a steady offered load: one batch of identical packets per interval, with
//! partial acceptance by the egress and pool exhaustion handled on every burst.
//!
//! ## How it works
//!
//! Each burst walks the same sequence of states:
//!
//! 1. Allocating: `batch_size` buffers from the pool, all or nothing. Exhaustion is
//!    logged and the burst skips to the pause; the next burst tries again.
//! 2. Building: every buffer is stamped with the same template.
//! 3. Sending: a single `send`; the egress keeps a prefix of the batch.
//! 4. Reclaiming: the remainder goes back to the pool in one `free_bulk`.
//! 5. Throttling: a fixed pause, entered only once the batch is fully settled.
//!
//! The loop runs until its `CancellationToken` is cancelled or an optional burst limit
//! is reached. Cancellation is observed during the pause, so a stop never leaves a
//! batch half owned.
//!
//! ## Main components
//!
//! - `TransmitDriver`: loop state, `run_once()` for a single burst and `run()`.
//! - `Iteration`: outcome of one burst.
//! - `DriverStats`: counters reported when the loop stops.

use std::thread;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use crate::config::{DriverConfig, PacketConfig};
use crate::egress::Egress;
use crate::error::{BuildError, ConfigError};
use crate::packet::{OffloadFlags, PacketBuf, PacketBuilder};
use crate::pool::BufferPool;

/// Longest single sleep inside the pause, bounds how late a stop is noticed.
const THROTTLE_TICK: Duration = Duration::from_millis(10);

/// Outcome of one burst.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Iteration {
    /// The pool could not supply a full batch; nothing was built or sent.
    Starved { available: usize },
    /// The batch was submitted; `accepted` packets were queued and `reclaimed` buffers
    /// went back to the pool.
    Sent { accepted: usize, reclaimed: usize },
}

/// Counters of a transmit loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DriverStats {
    /// Bursts attempted, starved ones included.
    pub iterations: u64,
    /// Packets accepted by the egress.
    pub sent: u64,
    /// Buffers handed back to the pool after a short send.
    pub reclaimed: u64,
    /// Bursts skipped because the pool was exhausted.
    pub alloc_failures: u64,
}

pub struct TransmitDriver<B> {
    builder: PacketBuilder,
    config: DriverConfig,
    batch: Vec<B>,
    stats: DriverStats,
}

impl<B: PacketBuf> TransmitDriver<B> {
    /// Creates a driver stamping packets with `builder`.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if the batch size is zero or the pool's buffers are
    /// smaller than the packets `builder` produces.
    pub fn new<P>(builder: PacketBuilder, config: DriverConfig, pool: &P) -> Result<Self, ConfigError>
    where
        P: BufferPool<Buf = B>,
    {
        config.validate()?;
        if pool.buffer_size() < builder.len() {
            return Err(ConfigError::BufferTooSmall {
                length: builder.len(),
                buffer_size: pool.buffer_size(),
            });
        }
        Ok(TransmitDriver {
            builder,
            batch: Vec::with_capacity(config.batch_size),
            config,
            stats: DriverStats::default(),
        })
    }

    /// Builds the packet template for `egress`'s offload capabilities and creates a
    /// driver over it.
    pub fn for_egress<P, E>(
        packet: &PacketConfig,
        config: DriverConfig,
        pool: &P,
        egress: &E,
    ) -> Result<Self, ConfigError>
    where
        P: BufferPool<Buf = B>,
        E: Egress<Buf = B>,
    {
        let builder = PacketBuilder::new(packet, egress.offload())?;
        Self::new(builder, config, pool)
    }

    pub fn builder(&self) -> &PacketBuilder {
        &self.builder
    }

    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    pub fn stats(&self) -> DriverStats {
        self.stats
    }

    fn limit_reached(&self) -> bool {
        self.config
            .bursts
            .is_some_and(|bursts| self.stats.iterations >= bursts)
    }

    /// Performs one burst: allocate, build, send, reclaim. Does not pause.
    ///
    /// # Errors
    ///
    /// Returns `BuildError` if a pool buffer cannot hold the packet. The whole batch is
    /// returned to the pool before the error is reported.
    pub fn run_once<P, E>(&mut self, pool: &mut P, egress: &mut E) -> Result<Iteration, BuildError>
    where
        P: BufferPool<Buf = B>,
        E: Egress<Buf = B>,
    {
        debug_assert!(self.batch.is_empty());
        self.stats.iterations += 1;
        let burst = self.stats.iterations;

        if let Err(e) = pool.alloc_bulk(self.config.batch_size, &mut self.batch) {
            log::warn!("burst {burst}: failed to allocate: {e}");
            self.stats.alloc_failures += 1;
            return Ok(Iteration::Starved {
                available: pool.available(),
            });
        }

        let built = self
            .batch
            .iter_mut()
            .try_for_each(|buf| self.builder.build(buf));
        if let Err(e) = built {
            pool.free_bulk(self.batch.drain(..));
            return Err(e);
        }

        let submitted = self.batch.len();
        let reported = egress.send(&mut self.batch);
        // what is left in the batch is what the egress did not take
        let reclaimed = self.batch.len();
        if reclaimed > submitted {
            log::error!(
                "burst {burst}: egress left {reclaimed} packets in a batch of {submitted}"
            );
        }
        let accepted = submitted.saturating_sub(reclaimed);
        if reported != accepted {
            log::error!(
                "burst {burst}: egress reported {reported} accepted but took {accepted} of {submitted}"
            );
        }

        if reclaimed > 0 {
            log::debug!("burst {burst}: egress took {accepted} of {submitted}, reclaiming {reclaimed}");
            pool.free_bulk(self.batch.drain(..));
        }
        if accepted > 0 {
            log::debug!("burst {burst}: sent {accepted}");
        }

        self.stats.sent += accepted as u64;
        self.stats.reclaimed += reclaimed as u64;
        Ok(Iteration::Sent {
            accepted,
            reclaimed,
        })
    }

    /// Runs bursts until `stop` is cancelled or the configured burst limit is reached.
    ///
    /// # Returns
    ///
    /// The counters accumulated over the driver's lifetime.
    ///
    /// # Errors
    ///
    /// Stops at the first `BuildError`, see `run_once`.
    pub fn run<P, E>(
        &mut self,
        pool: &mut P,
        egress: &mut E,
        stop: &CancellationToken,
    ) -> Result<DriverStats, BuildError>
    where
        P: BufferPool<Buf = B>,
        E: Egress<Buf = B>,
    {
        let requested =
            self.builder.meta().flags & (OffloadFlags::IP_CKSUM | OffloadFlags::UDP_CKSUM);
        if !egress.offload().contains(requested) {
            log::warn!(
                "packets request {requested:?} offload, egress only provides {:?}",
                egress.offload()
            );
        }
        log::info!(
            "transmit loop started: {} packets of {} bytes every {:?}",
            self.config.batch_size,
            self.builder.len(),
            self.config.interval
        );

        while !stop.is_cancelled() && !self.limit_reached() {
            self.run_once(pool, egress)?;
            if self.limit_reached() {
                break;
            }
            throttle(self.config.interval, stop);
        }

        log::info!(
            "transmit loop stopped: {} bursts, {} sent, {} reclaimed, {} allocation failures",
            self.stats.iterations,
            self.stats.sent,
            self.stats.reclaimed,
            self.stats.alloc_failures
        );
        Ok(self.stats)
    }
}

/// Sleeps for `interval`, returning early once `stop` is cancelled.
fn throttle(interval: Duration, stop: &CancellationToken) {
    let deadline = Instant::now() + interval;
    while !stop.is_cancelled() {
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        thread::sleep((deadline - now).min(THROTTLE_TICK));
    }
}
