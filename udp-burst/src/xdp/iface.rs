//! Interface lookups used to fill in defaults before a port is created.

use std::ffi::CString;
use std::io;
use std::os::fd::{AsRawFd as _, FromRawFd as _, OwnedFd};

/// Resolves an interface name such as `eth0` to its index.
pub fn if_index_by_name(name: &str) -> io::Result<u32> {
    let c_name = CString::new(name).map_err(|_| {
        io::Error::new(io::ErrorKind::InvalidInput, format!("invalid interface name {name:?}"))
    })?;
    let index = unsafe { libc::if_nametoindex(c_name.as_ptr()) };
    if index == 0 {
        return Err(io::Error::other(format!(
            "Interface {name} not found: {}",
            io::Error::last_os_error()
        )));
    }
    Ok(index)
}

/// Returns the hardware address of the interface with index `if_index`.
///
/// The index is turned into a name with `SIOCGIFNAME`, then the address is read with
/// `SIOCGIFHWADDR` on a throwaway datagram socket.
pub fn mac_by_ifindex(if_index: u32) -> io::Result<[u8; 6]> {
    let socket = unsafe {
        let fd = libc::socket(libc::AF_INET, libc::SOCK_DGRAM | libc::SOCK_CLOEXEC, 0);
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }
        OwnedFd::from_raw_fd(fd)
    };
    let mut if_req: libc::ifreq = unsafe { std::mem::zeroed() };
    if_req.ifr_ifru.ifru_ifindex = if_index as libc::c_int;
    if unsafe { libc::ioctl(socket.as_raw_fd(), libc::SIOCGIFNAME, &mut if_req) } < 0 {
        return Err(io::Error::last_os_error());
    }
    if_req.ifr_ifru.ifru_ifindex = 0;
    if unsafe { libc::ioctl(socket.as_raw_fd(), libc::SIOCGIFHWADDR, &mut if_req) } < 0 {
        return Err(io::Error::last_os_error());
    }
    let mut mac = [0u8; 6];
    let hwaddr = unsafe { if_req.ifr_ifru.ifru_hwaddr };
    for (dst, src) in mac.iter_mut().zip(hwaddr.sa_data.iter()) {
        *dst = *src as u8;
    }
    Ok(mac)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_loopback_lookup() {
        let index = if_index_by_name("lo").unwrap();
        assert!(index > 0);
        // loopback has an all-zero hardware address
        assert_eq!(mac_by_ifindex(index).unwrap(), [0u8; 6]);
    }

    #[test]
    fn test_unknown_interface() {
        assert!(if_index_by_name("no-such-if0").is_err());
        assert!(if_index_by_name("bad\0name").is_err());
    }
}
