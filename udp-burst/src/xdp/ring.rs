//! AF_XDP rings shared with the kernel: the TX ring carrying frame descriptors out and
//! the completion ring bringing transmitted frame addresses back.

use std::io;
use std::mem::size_of;
use std::sync::atomic::{AtomicU32, Ordering};

use crate::xdp::mmap::OwnedMmap;

/// Size of one UMEM frame, the largest packet the backend carries.
pub const FRAME_SIZE: usize = 2048;
/// Number of frames in the UMEM: 8 MB in total.
pub const FRAME_COUNT: usize = 4096;
/// Descriptor slots in the TX ring. A full ring is what makes a send partial.
pub const TX_RING_SIZE: usize = 1024;
/// Completion ring slots. Holding every frame, it can never overflow.
pub const COMPLETION_RING_SIZE: usize = FRAME_COUNT;

/// TX ring descriptor, `struct xdp_desc`.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct XdpDesc {
    pub addr: u64,
    pub len: u32,
    pub options: u32,
}

impl XdpDesc {
    pub fn new(addr: u64, len: u32) -> Self {
        XdpDesc {
            addr,
            len,
            options: 0,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RingKind {
    Tx,
    Fill,
    Completion,
}

impl RingKind {
    fn sockopt(self) -> libc::c_int {
        match self {
            RingKind::Tx => libc::XDP_TX_RING,
            RingKind::Fill => libc::XDP_UMEM_FILL_RING,
            RingKind::Completion => libc::XDP_UMEM_COMPLETION_RING,
        }
    }

    fn page_offset(self) -> u64 {
        match self {
            RingKind::Tx => libc::XDP_PGOFF_TX_RING as u64,
            RingKind::Fill => libc::XDP_UMEM_PGOFF_FILL_RING,
            RingKind::Completion => libc::XDP_UMEM_PGOFF_COMPLETION_RING,
        }
    }

    fn offsets(self, offsets: &libc::xdp_mmap_offsets) -> &libc::xdp_ring_offset {
        match self {
            RingKind::Tx => &offsets.tx,
            RingKind::Fill => &offsets.fr,
            RingKind::Completion => &offsets.cr,
        }
    }

    /// Asks the kernel to create this ring with `size` entries.
    pub fn set_size(self, raw_fd: libc::c_int, size: usize) -> io::Result<()> {
        let size = size as u32;
        let rc = unsafe {
            libc::setsockopt(
                raw_fd,
                libc::SOL_XDP,
                self.sockopt(),
                &size as *const u32 as *const libc::c_void,
                size_of::<u32>() as libc::socklen_t,
            )
        };
        if rc < 0 {
            return Err(io::Error::other(format!(
                "Failed to size {self:?} ring: {}",
                io::Error::last_os_error()
            )));
        }
        Ok(())
    }
}

/// A single-producer/single-consumer ring mapped from an AF_XDP socket.
///
/// Indices passed to `read` and `write` are free-running and wrapped with the mask.
pub struct Ring<T> {
    _mmap: OwnedMmap,
    producer: *mut AtomicU32,
    consumer: *mut AtomicU32,
    flags: *mut AtomicU32,
    desc: *mut T,
    len: u32,
}

impl<T: Copy> Ring<T> {
    /// Maps the `kind` ring of `raw_fd`, which must have been sized to `len` entries.
    pub fn map(
        raw_fd: libc::c_int,
        kind: RingKind,
        len: usize,
        offsets: &libc::xdp_mmap_offsets,
    ) -> io::Result<Self> {
        debug_assert!(len.is_power_of_two());
        let offs = kind.offsets(offsets);
        let map_len = (offs.desc as usize).saturating_add(len * size_of::<T>());
        let mmap = OwnedMmap::shared(raw_fd, map_len, kind.page_offset()).map_err(|e| {
            io::Error::other(format!("Failed to map {kind:?} ring: {e}"))
        })?;
        let base = mmap.as_u8_ptr();
        unsafe {
            Ok(Ring {
                producer: base.add(offs.producer as usize) as *mut AtomicU32,
                consumer: base.add(offs.consumer as usize) as *mut AtomicU32,
                flags: base.add(offs.flags as usize) as *mut AtomicU32,
                desc: base.add(offs.desc as usize) as *mut T,
                len: len as u32,
                _mmap: mmap,
            })
        }
    }

    pub fn len(&self) -> u32 {
        self.len
    }

    pub fn producer(&self) -> u32 {
        unsafe { (*self.producer).load(Ordering::Acquire) }
    }

    pub fn consumer(&self) -> u32 {
        unsafe { (*self.consumer).load(Ordering::Acquire) }
    }

    /// Publishes entries written up to `value`.
    pub fn set_producer(&mut self, value: u32) {
        unsafe { (*self.producer).store(value, Ordering::Release) }
    }

    /// Releases entries read up to `value`.
    pub fn set_consumer(&mut self, value: u32) {
        unsafe { (*self.consumer).store(value, Ordering::Release) }
    }

    /// True when the kernel asks for a wakeup before it looks at the ring again.
    pub fn needs_wakeup(&self) -> bool {
        unsafe { (*self.flags).load(Ordering::Relaxed) & libc::XDP_RING_NEED_WAKEUP != 0 }
    }

    pub fn read(&self, index: u32) -> T {
        unsafe { *self.desc.add((index & (self.len - 1)) as usize) }
    }

    pub fn write(&mut self, index: u32, value: T) {
        unsafe { *self.desc.add((index & (self.len - 1)) as usize) = value }
    }
}

/// Queries the kernel for the ring layout of `raw_fd`.
pub fn ring_offsets(raw_fd: libc::c_int) -> io::Result<libc::xdp_mmap_offsets> {
    let mut offsets: libc::xdp_mmap_offsets = unsafe { std::mem::zeroed() };
    let mut optlen = size_of::<libc::xdp_mmap_offsets>() as libc::socklen_t;
    let rc = unsafe {
        libc::getsockopt(
            raw_fd,
            libc::SOL_XDP,
            libc::XDP_MMAP_OFFSETS,
            &mut offsets as *mut _ as *mut libc::c_void,
            &mut optlen,
        )
    };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(offsets)
}
