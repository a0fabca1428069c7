//! # Packet Buffer Pools
//!
//! ## Purpose
//!
//! The transmit loop borrows packet buffers in bulk and returns the ones the egress
//! did not take. `BufferPool` is that narrow interface; `HeapPool` is a fixed set of
//! heap buffers implementing it for runs without a NIC and for tests.
//!
//! ## How it works
//!
//! `HeapPool` pre-allocates `count` buffers of `buffer_size` bytes and keeps the idle
//! ones on a free stack behind a mutex, so clones of the pool can be shared by several
//! loops. Allocation is all-or-nothing. A `HeapBuf` that is dropped anywhere, for
//! instance by an egress after transmission, goes back to the free stack on its own;
//! `free_bulk` returns a whole batch under a single lock.
//!
//! ## Main components
//!
//! - `BufferPool`: bulk allocate / bulk free interface.
//! - `HeapPool`, `HeapBuf`: in-memory pool and its buffers.

use std::mem;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::error::PoolError;
use crate::packet::{PacketBuf, TxMeta};

/// Source of reusable, fixed-size packet buffers.
pub trait BufferPool {
    type Buf: PacketBuf;

    /// Appends exactly `n` buffers to `out`, or none at all.
    ///
    /// # Errors
    ///
    /// Returns `PoolError::Exhausted` if fewer than `n` buffers are idle. This is an
    /// expected condition under load, not a fault.
    fn alloc_bulk(&mut self, n: usize, out: &mut Vec<Self::Buf>) -> Result<(), PoolError>;

    /// Returns buffers to the pool.
    fn free_bulk<I>(&mut self, bufs: I)
    where
        I: IntoIterator<Item = Self::Buf>;

    /// Number of idle buffers.
    fn available(&self) -> usize;

    /// Data room of every buffer in bytes.
    fn buffer_size(&self) -> usize;
}

struct Slot {
    id: u32,
    data: Box<[u8]>,
}

struct Shared {
    free: Mutex<Vec<Slot>>,
    buffer_size: usize,
    count: usize,
}

impl Shared {
    fn free(&self) -> MutexGuard<'_, Vec<Slot>> {
        self.free.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Fixed set of heap-allocated packet buffers.
#[derive(Clone)]
pub struct HeapPool {
    shared: Arc<Shared>,
}

impl HeapPool {
    /// Allocates `count` buffers of `buffer_size` bytes up front.
    ///
    /// # Panics
    ///
    /// Panics if `buffer_size` is zero.
    pub fn new(count: usize, buffer_size: usize) -> Self {
        assert!(buffer_size > 0, "pool buffers must not be empty");
        let free = (0..count)
            .map(|id| Slot {
                id: id as u32,
                data: vec![0u8; buffer_size].into_boxed_slice(),
            })
            .collect();
        log::debug!("heap pool: {count} buffers of {buffer_size} bytes");
        HeapPool {
            shared: Arc::new(Shared {
                free: Mutex::new(free),
                buffer_size,
                count,
            }),
        }
    }

    /// Total number of buffers owned by the pool, idle or lent.
    pub fn capacity(&self) -> usize {
        self.shared.count
    }
}

impl BufferPool for HeapPool {
    type Buf = HeapBuf;

    fn alloc_bulk(&mut self, n: usize, out: &mut Vec<HeapBuf>) -> Result<(), PoolError> {
        let mut free = self.shared.free();
        let available = free.len();
        if available < n {
            return Err(PoolError::Exhausted {
                requested: n,
                available,
            });
        }
        out.extend(free.drain(available - n..).map(|slot| HeapBuf {
            id: slot.id,
            data: slot.data,
            len: 0,
            meta: TxMeta::default(),
            home: Arc::clone(&self.shared),
        }));
        Ok(())
    }

    fn free_bulk<I>(&mut self, bufs: I)
    where
        I: IntoIterator<Item = HeapBuf>,
    {
        let mut free = self.shared.free();
        for mut buf in bufs {
            // taking the data leaves the buffer empty, so its Drop does not return it again
            free.push(Slot {
                id: buf.id,
                data: mem::take(&mut buf.data),
            });
        }
    }

    fn available(&self) -> usize {
        self.shared.free().len()
    }

    fn buffer_size(&self) -> usize {
        self.shared.buffer_size
    }
}

/// A buffer lent by a `HeapPool`. Returns to its pool when dropped.
pub struct HeapBuf {
    id: u32,
    data: Box<[u8]>,
    len: usize,
    meta: TxMeta,
    home: Arc<Shared>,
}

impl HeapBuf {
    /// Index of the buffer inside its pool.
    pub fn id(&self) -> u32 {
        self.id
    }
}

impl PacketBuf for HeapBuf {
    fn capacity(&self) -> usize {
        self.data.len()
    }

    fn len(&self) -> usize {
        self.len
    }

    fn set_len(&mut self, len: usize) {
        debug_assert!(len <= self.data.len());
        self.len = len;
    }

    fn data(&self) -> &[u8] {
        &self.data[..self.len]
    }

    fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    fn meta(&self) -> &TxMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut TxMeta {
        &mut self.meta
    }
}

impl Drop for HeapBuf {
    fn drop(&mut self) {
        if !self.data.is_empty() {
            self.home.free().push(Slot {
                id: self.id,
                data: mem::take(&mut self.data),
            });
        }
    }
}

impl std::fmt::Debug for HeapBuf {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeapBuf")
            .field("id", &self.id)
            .field("len", &self.len)
            .field("meta", &self.meta)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alloc_is_all_or_nothing() {
        let mut pool = HeapPool::new(8, 256);
        let mut bufs = Vec::new();
        pool.alloc_bulk(5, &mut bufs).unwrap();
        assert_eq!(bufs.len(), 5);
        assert_eq!(pool.available(), 3);
        let err = pool.alloc_bulk(4, &mut bufs).unwrap_err();
        assert_eq!(
            err,
            PoolError::Exhausted {
                requested: 4,
                available: 3
            }
        );
        assert_eq!(bufs.len(), 5);
        assert_eq!(pool.available(), 3);
    }

    #[test]
    fn test_free_bulk_and_drop_return_buffers() {
        let mut pool = HeapPool::new(4, 64);
        let mut bufs = Vec::new();
        pool.alloc_bulk(4, &mut bufs).unwrap();
        assert_eq!(pool.available(), 0);
        let kept = bufs.remove(0);
        pool.free_bulk(bufs.drain(..));
        assert_eq!(pool.available(), 3);
        drop(kept);
        assert_eq!(pool.available(), 4);
        assert_eq!(pool.capacity(), 4);
    }

    #[test]
    fn test_buffers_keep_full_capacity_after_reuse() {
        let mut pool = HeapPool::new(1, 128);
        for _ in 0..3 {
            let mut bufs = Vec::new();
            pool.alloc_bulk(1, &mut bufs).unwrap();
            assert_eq!(bufs[0].capacity(), 128);
            assert!(bufs[0].is_empty());
            pool.free_bulk(bufs);
        }
    }
}
