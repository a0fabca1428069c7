//! # AF_XDP Transmit Port
//!
//! ## Purpose
//!
//! Binds an AF_XDP socket to one queue of a network interface and exposes it to the
//! transmit loop as a buffer pool over the UMEM frames and an egress over the TX ring.
//!
//! ## How it works
//!
//! `create_tx_port` creates the socket, registers an 8 MB UMEM of 2048-byte frames,
//! sizes and maps the TX and completion rings and binds the socket. The UMEM and the
//! socket descriptor live in a shared `Inner` owned by both halves:
//!
//! - `UmemPool` keeps the idle frame addresses. Before each allocation it collects the
//!   frames the kernel has finished transmitting from the completion ring.
//! - `XdpTx` writes a descriptor per accepted frame into the TX ring. It accepts as
//!   many frames as the ring has free slots, publishes them and wakes the kernel
//!   when the ring asks for it.
//!
//! No checksum offload is advertised, so packets carry software checksums.
//!
//! ## Main components
//!
//! - `create_tx_port()`: socket, UMEM and ring setup.
//! - `UmemPool`, `XdpFrame`: frame pool and its buffers.
//! - `XdpTx`: TX ring egress and `kick()`.
//! - `XdpConfig`: zero-copy, huge page and need-wakeup options.

use std::mem::size_of;
use std::os::fd::{AsRawFd as _, FromRawFd as _, OwnedFd};
use std::sync::Arc;
use std::{io, ptr, slice};

use crate::egress::Egress;
use crate::error::PoolError;
use crate::packet::{PacketBuf, TxMeta};
use crate::pool::BufferPool;
use crate::xdp::mmap::OwnedMmap;
use crate::xdp::ring::{
    COMPLETION_RING_SIZE, FRAME_COUNT, FRAME_SIZE, Ring, RingKind, TX_RING_SIZE, XdpDesc,
    ring_offsets,
};

/// Options for binding an AF_XDP socket.
#[derive(Debug, Copy, Clone, Default)]
pub struct XdpConfig {
    /// `Some(true)` binds with `XDP_ZEROCOPY`, `Some(false)` with `XDP_COPY`,
    /// `None` lets the kernel pick.
    pub zero_copy: Option<bool>,
    /// Backs the UMEM with huge pages; `None` uses them when available.
    pub huge_page: Option<bool>,
    /// Binds with `XDP_USE_NEED_WAKEUP`. Defaults to `true`.
    pub need_wakeup: Option<bool>,
}

// UMEM and socket shared by the pool and the egress; released when both are dropped
struct Inner {
    umem: OwnedMmap,
    fd: OwnedFd,
}

/// Creates an AF_XDP socket bound to `queue` of interface `if_index` for transmission.
///
/// # Returns
/// The frame pool and the egress of the port. They share the UMEM and must be used
/// from the same thread.
///
/// # Errors
/// Returns an `io::Error` if any socket, mapping or bind step fails, typically for
/// lack of `CAP_NET_RAW`/`CAP_NET_ADMIN` or an interface without the queue.
pub fn create_tx_port(
    if_index: u32,
    queue: u32,
    config: Option<XdpConfig>,
) -> io::Result<(UmemPool, XdpTx)> {
    let fd = unsafe {
        let fd = libc::socket(libc::AF_XDP, libc::SOCK_RAW | libc::SOCK_CLOEXEC, 0);
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }
        OwnedFd::from_raw_fd(fd)
    };
    let raw_fd = fd.as_raw_fd();
    let umem = setup_umem(raw_fd, config.as_ref())?;

    // the kernel refuses to bind a UMEM without both fill and completion rings
    RingKind::Fill.set_size(raw_fd, COMPLETION_RING_SIZE)?;
    RingKind::Completion.set_size(raw_fd, COMPLETION_RING_SIZE)?;
    RingKind::Tx.set_size(raw_fd, TX_RING_SIZE)?;

    let offsets = ring_offsets(raw_fd)?;
    let c_ring: Ring<u64> = Ring::map(raw_fd, RingKind::Completion, COMPLETION_RING_SIZE, &offsets)?;
    let tx_ring: Ring<XdpDesc> = Ring::map(raw_fd, RingKind::Tx, TX_RING_SIZE, &offsets)?;

    let zero_copy = match config.and_then(|cfg| cfg.zero_copy) {
        Some(true) => libc::XDP_ZEROCOPY,
        Some(false) => libc::XDP_COPY,
        None => 0,
    };
    let need_wakeup = config.and_then(|cfg| cfg.need_wakeup).unwrap_or(true);
    let sxdp = libc::sockaddr_xdp {
        sxdp_family: libc::AF_XDP as libc::sa_family_t,
        sxdp_flags: zero_copy | if need_wakeup { libc::XDP_USE_NEED_WAKEUP } else { 0 },
        sxdp_ifindex: if_index,
        sxdp_queue_id: queue,
        sxdp_shared_umem_fd: 0,
    };
    if unsafe {
        libc::bind(
            raw_fd,
            &sxdp as *const _ as *const libc::sockaddr,
            size_of::<libc::sockaddr_xdp>() as libc::socklen_t,
        )
    } < 0
    {
        return Err(io::Error::other(format!(
            "Failed to bind to interface {if_index} queue {queue}: {}",
            io::Error::last_os_error()
        )));
    }
    log::info!("AF_XDP socket bound to interface {if_index} queue {queue}");

    #[allow(clippy::arc_with_non_send_sync)]
    let inner = Arc::new(Inner { umem, fd });
    let pool = UmemPool::new(Arc::clone(&inner), c_ring);
    let tx = XdpTx {
        inner,
        tx_ring,
        producer: 0,
        need_wakeup,
    };
    Ok((pool, tx))
}

/// Allocates the UMEM and registers it with the socket.
fn setup_umem(raw_fd: libc::c_int, config: Option<&XdpConfig>) -> io::Result<OwnedMmap> {
    let umem = OwnedMmap::anonymous(FRAME_COUNT * FRAME_SIZE, config.and_then(|cfg| cfg.huge_page))
        .map_err(|e| io::Error::other(format!("Failed to allocate UMEM: {e}")))?;

    let reg = unsafe {
        libc::xdp_umem_reg {
            addr: umem.as_void_ptr() as u64,
            len: umem.len() as u64,
            chunk_size: FRAME_SIZE as u32,
            ..std::mem::zeroed()
        }
    };
    if unsafe {
        libc::setsockopt(
            raw_fd,
            libc::SOL_XDP,
            libc::XDP_UMEM_REG,
            &reg as *const _ as *const libc::c_void,
            size_of::<libc::xdp_umem_reg>() as libc::socklen_t,
        )
    } < 0
    {
        return Err(io::Error::other(format!(
            "Failed to register UMEM: {}",
            io::Error::last_os_error()
        )));
    }
    Ok(umem)
}

/// A UMEM frame lent by a `UmemPool`.
///
/// The frame points into the UMEM; it must be handed to the port's `XdpTx` or back
/// to its pool, a frame that is simply dropped is lost to the pool.
pub struct XdpFrame {
    addr: u64,
    data: *mut u8,
    len: usize,
    meta: TxMeta,
}

impl XdpFrame {
    /// Offset of the frame inside the UMEM.
    pub fn addr(&self) -> u64 {
        self.addr
    }
}

impl PacketBuf for XdpFrame {
    fn capacity(&self) -> usize {
        FRAME_SIZE
    }

    fn len(&self) -> usize {
        self.len
    }

    fn set_len(&mut self, len: usize) {
        debug_assert!(len <= FRAME_SIZE);
        self.len = len;
    }

    fn data(&self) -> &[u8] {
        unsafe { slice::from_raw_parts(self.data, self.len) }
    }

    fn data_mut(&mut self) -> &mut [u8] {
        unsafe { slice::from_raw_parts_mut(self.data, FRAME_SIZE) }
    }

    fn meta(&self) -> &TxMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut TxMeta {
        &mut self.meta
    }
}

/// Pool of UMEM frames, replenished from the completion ring.
pub struct UmemPool {
    inner: Arc<Inner>,
    c_ring: Ring<u64>,
    consumer: u32,
    free: Vec<u64>,
}

impl UmemPool {
    fn new(inner: Arc<Inner>, c_ring: Ring<u64>) -> Self {
        let free = (0..FRAME_COUNT as u64)
            .rev()
            .map(|i| i * FRAME_SIZE as u64)
            .collect();
        let consumer = c_ring.consumer();
        UmemPool {
            inner,
            c_ring,
            consumer,
            free,
        }
    }

    /// Moves frames the kernel has finished with from the completion ring to the free
    /// list. Returns how many were collected.
    pub fn reclaim(&mut self) -> usize {
        let producer = self.c_ring.producer();
        let completed = producer.wrapping_sub(self.consumer);
        for _ in 0..completed {
            let addr = self.c_ring.read(self.consumer);
            self.free.push(addr & !(FRAME_SIZE as u64 - 1));
            self.consumer = self.consumer.wrapping_add(1);
        }
        if completed > 0 {
            self.c_ring.set_consumer(self.consumer);
            log::trace!("collected {completed} completed frames");
        }
        completed as usize
    }
}

impl BufferPool for UmemPool {
    type Buf = XdpFrame;

    fn alloc_bulk(&mut self, n: usize, out: &mut Vec<XdpFrame>) -> Result<(), PoolError> {
        if self.free.len() < n {
            self.reclaim();
        }
        let available = self.free.len();
        if available < n {
            return Err(PoolError::Exhausted {
                requested: n,
                available,
            });
        }
        let base = self.inner.umem.as_u8_ptr();
        out.extend(self.free.drain(available - n..).rev().map(|addr| XdpFrame {
            addr,
            data: unsafe { base.add(addr as usize) },
            len: 0,
            meta: TxMeta::default(),
        }));
        Ok(())
    }

    fn free_bulk<I>(&mut self, bufs: I)
    where
        I: IntoIterator<Item = XdpFrame>,
    {
        self.free.extend(bufs.into_iter().map(|frame| frame.addr));
    }

    /// Idle frames on the free list. Completed frames not yet collected are not counted.
    fn available(&self) -> usize {
        self.free.len()
    }

    fn buffer_size(&self) -> usize {
        FRAME_SIZE
    }
}

/// Egress over the TX ring of an AF_XDP socket.
pub struct XdpTx {
    inner: Arc<Inner>,
    tx_ring: Ring<XdpDesc>,
    producer: u32,
    // bound with XDP_USE_NEED_WAKEUP; otherwise every kick goes to the kernel
    need_wakeup: bool,
}

impl XdpTx {
    /// Descriptors published to the kernel and not yet consumed by it.
    pub fn in_flight(&self) -> u32 {
        self.producer.wrapping_sub(self.tx_ring.consumer())
    }

    /// Wakes the kernel up if the TX ring asks for it, or always when the socket was
    /// bound without need-wakeup.
    ///
    /// A zero-length `sendto` signals the kernel to process the ring. `EBUSY`,
    /// `ENOBUFS` and `EAGAIN` mean it is already busy and are ignored; `ENETDOWN` is
    /// logged.
    pub fn kick(&self) -> io::Result<()> {
        if !wakeup_required(self.need_wakeup, self.tx_ring.needs_wakeup()) {
            return Ok(());
        }
        let ret = unsafe {
            libc::sendto(
                self.inner.fd.as_raw_fd(),
                ptr::null(),
                0,
                libc::MSG_DONTWAIT | libc::MSG_NOSIGNAL,
                ptr::null(),
                0,
            )
        };
        if ret < 0 {
            match io::Error::last_os_error().raw_os_error() {
                None | Some(libc::EBUSY | libc::ENOBUFS | libc::EAGAIN) => {}
                Some(libc::ENETDOWN) => {
                    log::warn!("network interface is down, cannot wake up");
                }
                Some(e) => return Err(io::Error::from_raw_os_error(e)),
            }
        }
        Ok(())
    }
}

impl Egress for XdpTx {
    type Buf = XdpFrame;

    fn send(&mut self, batch: &mut Vec<XdpFrame>) -> usize {
        let in_flight = self.in_flight();
        let free_slots = self.tx_ring.len().saturating_sub(in_flight) as usize;
        let accepted = free_slots.min(batch.len());
        for frame in batch.drain(..accepted) {
            let desc = XdpDesc::new(frame.addr, frame.len as u32);
            self.tx_ring.write(self.producer, desc);
            self.producer = self.producer.wrapping_add(1);
        }
        if accepted > 0 {
            self.tx_ring.set_producer(self.producer);
        }
        if in_flight > 0 || accepted > 0 {
            if let Err(e) = self.kick() {
                log::error!("failed to wake up the kernel: {e}");
            }
        }
        accepted
    }
}

/// Without need-wakeup the kernel never raises the ring flag and only transmits on
/// `sendto`.
fn wakeup_required(need_wakeup: bool, ring_flag: bool) -> bool {
    !need_wakeup || ring_flag
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wakeup_required() {
        assert!(wakeup_required(true, true));
        assert!(!wakeup_required(true, false));
        // the flag is never set without need-wakeup, kick anyway
        assert!(wakeup_required(false, false));
        assert!(wakeup_required(false, true));
    }
}
