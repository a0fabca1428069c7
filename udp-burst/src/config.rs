//! # Generator Configuration
//!
//! ## Purpose
//!
//! Fixed, process-lifetime parameters of a run: the shape of the single UDP datagram
//! (`PacketConfig`) and the pacing of the transmit loop (`DriverConfig`).
//!
//! ## How it works
//!
//! Both structs are plain values filled by the command line layer. `Default` yields
//! the reference profile: 128-byte frames from 192.168.0.31:1000 to 192.168.0.32:2000,
//! bursts of 32 packets once per second. `validate()` rejects shapes the builder or
//! the loop cannot honour.

use std::net::Ipv4Addr;
use std::time::Duration;

use crate::error::ConfigError;
use crate::packet::{ETH_HDR_LEN, HEADERS_LEN, IPV4_HDR_LEN, MAX_PACKET_LEN};

/// Default payload fill, the digits followed by a terminating zero byte.
pub const DEFAULT_PAYLOAD: &[u8] = b"1234567890\0";
pub const DEFAULT_PACKET_LEN: usize = 128;
pub const DEFAULT_BATCH_SIZE: usize = 32;
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(1);

/// Shape and addressing of the generated datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketConfig {
    pub src_mac: [u8; 6],
    pub dst_mac: [u8; 6],
    pub src_addr: Ipv4Addr,
    pub dst_addr: Ipv4Addr,
    pub src_port: u16,
    pub dst_port: u16,
    /// Total frame length `L`, Ethernet header included.
    pub length: usize,
    /// Bytes repeated cyclically over the payload region.
    pub payload: Vec<u8>,
}

impl Default for PacketConfig {
    fn default() -> Self {
        PacketConfig {
            src_mac: [0xa0, 0x36, 0x9f, 0x53, 0x9e, 0x1c],
            dst_mac: [0xa0, 0x36, 0x9f, 0x3f, 0x20, 0x24],
            src_addr: Ipv4Addr::new(192, 168, 0, 31),
            dst_addr: Ipv4Addr::new(192, 168, 0, 32),
            src_port: 1000,
            dst_port: 2000,
            length: DEFAULT_PACKET_LEN,
            payload: DEFAULT_PAYLOAD.to_vec(),
        }
    }
}

impl PacketConfig {
    /// Checks that the frame length fits the fixed header layout and the IPv4 length field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.length < HEADERS_LEN {
            return Err(ConfigError::LengthTooShort {
                length: self.length,
                minimum: HEADERS_LEN,
            });
        }
        if self.length > MAX_PACKET_LEN {
            return Err(ConfigError::LengthTooLong {
                length: self.length,
                maximum: MAX_PACKET_LEN,
            });
        }
        if self.payload.is_empty() && self.payload_len() > 0 {
            return Err(ConfigError::EmptyPayloadPattern {
                payload: self.payload_len(),
            });
        }
        Ok(())
    }

    /// Value of the IPv4 total-length field: `L` minus the Ethernet header.
    pub fn ip_total_length(&self) -> u16 {
        (self.length - ETH_HDR_LEN) as u16
    }

    /// Value of the UDP length field: `L` minus the Ethernet and IPv4 headers.
    pub fn udp_length(&self) -> u16 {
        (self.length - ETH_HDR_LEN - IPV4_HDR_LEN) as u16
    }

    pub fn payload_len(&self) -> usize {
        self.length.saturating_sub(HEADERS_LEN)
    }
}

/// Pacing of the transmit loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriverConfig {
    /// Buffers requested from the pool and submitted to the egress per burst.
    pub batch_size: usize,
    /// Pause between bursts. Zero means back-to-back bursts.
    pub interval: Duration,
    /// Stop after this many bursts; `None` runs until cancelled.
    pub bursts: Option<u64>,
}

impl Default for DriverConfig {
    fn default() -> Self {
        DriverConfig {
            batch_size: DEFAULT_BATCH_SIZE,
            interval: DEFAULT_INTERVAL,
            bursts: None,
        }
    }
}

impl DriverConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 {
            return Err(ConfigError::ZeroBatch);
        }
        Ok(())
    }
}
