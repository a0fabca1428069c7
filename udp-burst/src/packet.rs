//! # UDP Packet Template Construction
//!
//! ## Purpose
//!
//! This module stamps packet buffers with one fixed Ethernet II / IPv4 / UDP datagram.
//! Every buffer produced by a builder is byte-identical, so load generation never pays
//! for per-packet header assembly and no field drifts between packets.
//!
//! ## How it works
//!
//! `PacketBuilder::new` renders a complete frame of `L` bytes into a template once. The
//! Ethernet II, IPv4 and UDP headers are serialized with `etherparse`, software
//! checksums included. The two checksum fields are then adjusted to the offload
//! capabilities of the egress:
//!
//! - IPv4 header checksum offloaded: the field stays zero; otherwise it is computed.
//! - UDP checksum offloaded: the field holds the pseudo-header sum the hardware
//!   completes; otherwise it holds the full checksum over pseudo-header and datagram.
//!
//! `build()` copies the template into a buffer and attaches the matching `TxMeta`.
//!
//! ## Main components
//!
//! - `PacketBuf`: the view of a pool buffer the builder writes into.
//! - `OffloadFlags`, `TxMeta`: per-packet checksum offload descriptor.
//! - `PacketBuilder`: template construction and per-buffer stamping.

use bitflags::bitflags;
use etherparse::{EtherType, Ethernet2Header, IpNumber, Ipv4Header, UdpHeader};

use crate::checksum::pseudo_header_checksum;
use crate::config::PacketConfig;
use crate::error::{BuildError, ConfigError};

pub const ETH_HDR_LEN: usize = 14;
pub const IPV4_HDR_LEN: usize = 20;
pub const UDP_HDR_LEN: usize = 8;
/// Combined Ethernet, IPv4 and UDP header length: the smallest frame the builder makes.
pub const HEADERS_LEN: usize = ETH_HDR_LEN + IPV4_HDR_LEN + UDP_HDR_LEN;
/// Largest frame whose IPv4 total length still fits in 16 bits.
pub const MAX_PACKET_LEN: usize = ETH_HDR_LEN + u16::MAX as usize;

pub const IPPROTO_UDP: u8 = 17;
pub const DEFAULT_TTL: u8 = 64;

const UDP: usize = ETH_HDR_LEN + IPV4_HDR_LEN;
// checksum fields overwritten for offload
const IP_CSUM: usize = ETH_HDR_LEN + 10;
const UDP_CSUM: usize = UDP + 6;

bitflags! {
    /// Checksum work an egress performs in hardware, or a packet asks it to perform.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct OffloadFlags: u8 {
        /// The packet is IPv4; set together with any checksum request.
        const IPV4 = 1 << 0;
        /// Hardware fills the IPv4 header checksum.
        const IP_CKSUM = 1 << 1;
        /// Hardware completes the UDP checksum from the pseudo-header seed.
        const UDP_CKSUM = 1 << 2;
    }
}

/// Offload descriptor attached to each packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TxMeta {
    pub flags: OffloadFlags,
    /// Ethernet header length.
    pub l2_len: u8,
    /// IPv4 header length.
    pub l3_len: u8,
}

/// A packet buffer borrowed from a pool.
pub trait PacketBuf {
    /// Size of the data room in bytes.
    fn capacity(&self) -> usize;
    /// Length of the packet currently held.
    fn len(&self) -> usize;
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
    /// Sets the packet length. Must not exceed `capacity()`.
    fn set_len(&mut self, len: usize);
    /// The packet bytes, `len()` long.
    fn data(&self) -> &[u8];
    /// The whole data room, `capacity()` long.
    fn data_mut(&mut self) -> &mut [u8];
    fn meta(&self) -> &TxMeta;
    fn meta_mut(&mut self) -> &mut TxMeta;
}

/// Stamps buffers with one precomputed frame.
#[derive(Debug, Clone)]
pub struct PacketBuilder {
    template: Box<[u8]>,
    meta: TxMeta,
}

impl PacketBuilder {
    /// Validates `config` and renders the frame for the given egress capabilities.
    ///
    /// # Arguments
    /// * `config` - Addresses, ports, frame length and payload pattern.
    /// * `offload` - Checksum offloads the egress advertises. Only `IP_CKSUM` and
    ///   `UDP_CKSUM` are considered.
    pub fn new(config: &PacketConfig, offload: OffloadFlags) -> Result<Self, ConfigError> {
        config.validate()?;
        let mut template = vec![0u8; config.length].into_boxed_slice();
        let meta = stamp(&mut template, config, offload)?;
        log::debug!(
            "packet template: {} bytes, {}:{} -> {}:{}, offload {:?}",
            config.length,
            config.src_addr,
            config.src_port,
            config.dst_addr,
            config.dst_port,
            meta.flags
        );
        Ok(PacketBuilder { template, meta })
    }

    /// Total frame length `L`.
    pub fn len(&self) -> usize {
        self.template.len()
    }

    pub fn is_empty(&self) -> bool {
        self.template.is_empty()
    }

    /// The frame every built buffer carries.
    pub fn template(&self) -> &[u8] {
        &self.template
    }

    pub fn meta(&self) -> TxMeta {
        self.meta
    }

    /// Writes the frame into `buf`, sets its length to `L` and attaches the offload
    /// descriptor.
    ///
    /// # Errors
    ///
    /// Returns `BuildError::BufferTooSmall` if the buffer cannot hold `L` bytes. The
    /// buffer is left untouched in that case.
    pub fn build<B: PacketBuf + ?Sized>(&self, buf: &mut B) -> Result<(), BuildError> {
        let needed = self.template.len();
        if buf.capacity() < needed {
            return Err(BuildError::BufferTooSmall {
                needed,
                capacity: buf.capacity(),
            });
        }
        buf.data_mut()[..needed].copy_from_slice(&self.template);
        buf.set_len(needed);
        *buf.meta_mut() = self.meta;
        Ok(())
    }
}

/// Renders the frame into `frame`, which is exactly `config.length` bytes long.
fn stamp(frame: &mut [u8], config: &PacketConfig, offload: OffloadFlags) -> Result<TxMeta, ConfigError> {
    debug_assert_eq!(frame.len(), config.length);
    let too_long = || ConfigError::LengthTooLong {
        length: config.length,
        maximum: MAX_PACKET_LEN,
    };

    for (dst, src) in frame[HEADERS_LEN..]
        .iter_mut()
        .zip(config.payload.iter().cycle())
    {
        *dst = *src;
    }

    let eth = Ethernet2Header {
        source: config.src_mac,
        destination: config.dst_mac,
        ether_type: EtherType::IPV4,
    };
    let mut ip = Ipv4Header::new(
        config.udp_length(),
        DEFAULT_TTL,
        IpNumber::UDP,
        config.src_addr.octets(),
        config.dst_addr.octets(),
    )
    .map_err(|_| too_long())?;
    // identification, flags and fragment offset all zero
    ip.dont_fragment = false;
    ip.header_checksum = ip.calc_header_checksum();
    let udp = UdpHeader::with_ipv4_checksum(
        config.src_port,
        config.dst_port,
        &ip,
        &frame[HEADERS_LEN..],
    )
    .map_err(|_| too_long())?;

    frame[..ETH_HDR_LEN].copy_from_slice(&eth.to_bytes());
    frame[ETH_HDR_LEN..UDP].copy_from_slice(&ip.to_bytes());
    frame[UDP..HEADERS_LEN].copy_from_slice(&udp.to_bytes());

    let mut flags = offload & (OffloadFlags::IP_CKSUM | OffloadFlags::UDP_CKSUM);
    if !flags.is_empty() {
        flags |= OffloadFlags::IPV4;
    }
    if flags.contains(OffloadFlags::IP_CKSUM) {
        frame[IP_CSUM..IP_CSUM + 2].fill(0);
    }
    if flags.contains(OffloadFlags::UDP_CKSUM) {
        let pseudo =
            pseudo_header_checksum(config.src_addr, config.dst_addr, IPPROTO_UDP, udp.length);
        frame[UDP_CSUM..UDP_CSUM + 2].copy_from_slice(&pseudo.to_be_bytes());
    }

    Ok(TxMeta {
        flags,
        l2_len: ETH_HDR_LEN as u8,
        l3_len: IPV4_HDR_LEN as u8,
    })
}
