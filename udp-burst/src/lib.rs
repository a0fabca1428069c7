//!
//! # udp-burst
//!
//! Fabricates fixed-shape Ethernet/IPv4/UDP packets in bulk and drives them through a
//! burst transmit loop. The loop borrows buffers from a [`BufferPool`], stamps them with
//! a [`PacketBuilder`], submits each batch to an [`Egress`] and hands back whatever the
//! egress did not accept.
//!
//! The AF_XDP backend in [`xdp`] provides a UMEM frame pool and a TX ring egress; the
//! in-memory [`HeapPool`] and [`DiscardEgress`] let the loop run without a NIC.
//!

pub mod checksum;
pub mod config;
pub mod driver;
pub mod egress;
pub mod error;
pub mod packet;
pub mod pool;

#[cfg(target_os = "linux")]
pub mod xdp;

pub use config::{DriverConfig, PacketConfig};
pub use driver::{DriverStats, Iteration, TransmitDriver};
pub use egress::{DiscardEgress, Egress};
pub use error::{BuildError, ConfigError, PoolError};
pub use packet::{OffloadFlags, PacketBuf, PacketBuilder, TxMeta};
pub use pool::{BufferPool, HeapBuf, HeapPool};

#[cfg(test)]
mod tests;
