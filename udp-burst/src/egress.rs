//! # Egress Abstraction
//!
//! ## Purpose
//!
//! The send primitive of a port: it takes a batch of built packets and reports how many
//! of them it queued. Whatever it does not queue stays with the caller.
//!
//! ## How it works
//!
//! `send` receives the batch as a `Vec` and removes the accepted packets from its front
//! by value, so acceptance is always a contiguous prefix and the caller can never touch
//! an accepted buffer again. The packets left in the vector were not accepted and are
//! still owned by the caller.
//!
//! ## Main components
//!
//! - `Egress`: the send interface and its checksum offload capabilities.
//! - `DiscardEgress`: accepts up to a fixed number of packets per call and drops them.

use std::marker::PhantomData;

use crate::packet::{OffloadFlags, PacketBuf};

/// Batch transmit interface of a port or queue.
pub trait Egress {
    type Buf;

    /// Takes ownership of a prefix of `batch` and returns its length.
    ///
    /// Implementations must remove exactly the accepted packets from the front of
    /// `batch` and must not retain anything else. Returns immediately; a full queue is
    /// reported as a short count, never by blocking.
    fn send(&mut self, batch: &mut Vec<Self::Buf>) -> usize;

    /// Checksum offloads performed by the hardware behind this egress.
    fn offload(&self) -> OffloadFlags {
        OffloadFlags::empty()
    }
}

/// Drops accepted packets, returning them to their pool. Used for dry runs.
pub struct DiscardEgress<B> {
    per_call: usize,
    offload: OffloadFlags,
    packets: u64,
    bytes: u64,
    _buf: PhantomData<fn(B)>,
}

impl<B> DiscardEgress<B> {
    /// Accepts at most `per_call` packets per `send`.
    pub fn new(per_call: usize) -> Self {
        DiscardEgress {
            per_call,
            offload: OffloadFlags::empty(),
            packets: 0,
            bytes: 0,
            _buf: PhantomData,
        }
    }

    /// Advertises `offload` as if the packets went to hardware doing that work.
    pub fn with_offload(mut self, offload: OffloadFlags) -> Self {
        self.offload = offload;
        self
    }

    /// Packets accepted so far.
    pub fn packets(&self) -> u64 {
        self.packets
    }

    /// Bytes accepted so far.
    pub fn bytes(&self) -> u64 {
        self.bytes
    }
}

impl<B: PacketBuf> Egress for DiscardEgress<B> {
    type Buf = B;

    fn send(&mut self, batch: &mut Vec<B>) -> usize {
        let accepted = self.per_call.min(batch.len());
        for buf in batch.drain(..accepted) {
            self.bytes += buf.len() as u64;
        }
        self.packets += accepted as u64;
        accepted
    }

    fn offload(&self) -> OffloadFlags {
        self.offload
    }
}
