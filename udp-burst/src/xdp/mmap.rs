//! # Memory Mappings for UMEM and Rings
//!
//! ## Purpose
//!
//! Owned `mmap` regions: the anonymous UMEM area that holds packet frames and the
//! shared ring areas the kernel exposes on an AF_XDP socket.
//!
//! ## How it works
//!
//! `OwnedMmap` keeps the pointer and length of a mapping and unmaps it on drop. The
//! UMEM is backed by 2 MB huge pages when requested, or, if unspecified, when
//! `/proc/meminfo` reports free huge pages of that size.
//!
//! ## Main components
//!
//! - `OwnedMmap`: RAII owner of a mapping.
//! - `get_hugepage_info()`: huge page availability from `/proc/meminfo`.

use std::fs::File;
use std::io::{BufRead as _, BufReader};
use std::{io, ptr};

const HUGE_PAGE_SIZE: usize = 2 * 1024 * 1024;

/// A memory mapping released with `munmap` when dropped.
pub struct OwnedMmap {
    ptr: *mut libc::c_void,
    len: usize,
}

impl OwnedMmap {
    /// Maps `size` bytes of anonymous private memory for a UMEM.
    ///
    /// `huge_page` forces (`Some(true)`) or forbids (`Some(false)`) 2 MB huge pages;
    /// with `None` they are used when the system has free ones. The size is rounded
    /// up to the page size in use.
    pub fn anonymous(size: usize, huge_page: Option<bool>) -> io::Result<Self> {
        let huge_tlb = match huge_page {
            Some(yes) => yes,
            None => {
                let info = get_hugepage_info()?;
                matches!((info.free, info.size_kb), (Some(free), Some(2048)) if free > 0)
            }
        };
        let page_size = if huge_tlb {
            HUGE_PAGE_SIZE
        } else {
            unsafe { libc::sysconf(libc::_SC_PAGESIZE) as usize }
        };
        let len = size.div_ceil(page_size) * page_size;
        let flags = libc::MAP_PRIVATE
            | libc::MAP_ANONYMOUS
            | if huge_tlb {
                libc::MAP_HUGETLB | libc::MAP_HUGE_2MB
            } else {
                0
            };
        let ptr = unsafe {
            libc::mmap(
                ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                flags,
                -1,
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }
        log::debug!("mapped {len} bytes of UMEM, huge pages: {huge_tlb}");
        Ok(OwnedMmap { ptr, len })
    }

    /// Maps `len` bytes of a socket's ring area at page offset `offset`.
    pub fn shared(fd: libc::c_int, len: usize, offset: u64) -> io::Result<Self> {
        let ptr = unsafe {
            libc::mmap(
                ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED | libc::MAP_POPULATE,
                fd,
                offset as libc::off_t,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }
        Ok(OwnedMmap { ptr, len })
    }

    pub fn as_void_ptr(&self) -> *mut libc::c_void {
        self.ptr
    }

    pub fn as_u8_ptr(&self) -> *mut u8 {
        self.ptr as *mut u8
    }

    pub fn len(&self) -> usize {
        self.len
    }
}

impl Drop for OwnedMmap {
    fn drop(&mut self) {
        if !self.ptr.is_null()
            && self.ptr != libc::MAP_FAILED
            && unsafe { libc::munmap(self.ptr, self.len) } < 0
        {
            log::error!("Failed to unmap memory: {}", io::Error::last_os_error());
        }
    }
}

/// Huge page figures from `/proc/meminfo`.
#[derive(Debug, Default)]
pub struct HugePageInfo {
    pub size_kb: Option<u64>,
    pub free: Option<u64>,
}

/// Reads `Hugepagesize` and `HugePages_Free` from `/proc/meminfo`.
pub fn get_hugepage_info() -> io::Result<HugePageInfo> {
    let reader = BufReader::new(File::open("/proc/meminfo")?);
    parse_hugepage_info(reader.lines())
}

fn parse_hugepage_info<I>(lines: I) -> io::Result<HugePageInfo>
where
    I: IntoIterator<Item = io::Result<String>>,
{
    let mut info = HugePageInfo::default();
    for line in lines {
        let line = line?;
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim().trim_end_matches(" kB");
        let slot = match key.trim() {
            "Hugepagesize" => &mut info.size_kb,
            "HugePages_Free" => &mut info.free,
            _ => continue,
        };
        *slot = Some(value.parse().map_err(io::Error::other)?);
    }
    Ok(info)
}
