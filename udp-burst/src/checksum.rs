//! # One's-Complement Checksums
//!
//! ## Purpose
//!
//! Internet checksum arithmetic for the packet builder: end-around-carry additions and
//! the UDP pseudo-header sum that checksum offload hardware expects as a seed. Complete
//! software checksums are left to `etherparse` when the headers are serialized.
//!
//! ## How it works
//!
//! Sums are taken over network-order (big-endian) words. A 32-bit accumulator is
//! folded into 16 bits by adding its halves with the same end-around-carry rule. The
//! pseudo-header value is returned uncomplemented.
//!
//! ## Main components
//!
//! - `add16()`, `add32()`, `fold()`: one's-complement additions.
//! - `pseudo_header_checksum()`: src/dst address, protocol and UDP length.

use std::net::Ipv4Addr;

/// One's-complement 16-bit addition: the carry-out is added back into the sum.
#[inline]
pub const fn add16(a: u16, b: u16) -> u16 {
    let (sum, carry) = a.overflowing_add(b);
    sum.wrapping_add(carry as u16)
}

/// One's-complement 32-bit addition: the carry-out is added back into the sum.
#[inline]
pub const fn add32(a: u32, b: u32) -> u32 {
    let (sum, carry) = a.overflowing_add(b);
    sum.wrapping_add(carry as u32)
}

/// Folds a 32-bit accumulator into 16 bits by adding its high and low halves.
#[inline]
pub const fn fold(acc: u32) -> u16 {
    add16((acc >> 16) as u16, acc as u16)
}

/// Computes the UDP pseudo-header contribution for IPv4.
///
/// The result is not complemented. With UDP checksum offload the hardware adds the
/// datagram coverage on top of this value.
///
/// # Arguments
/// * `src` - Source IPv4 address.
/// * `dst` - Destination IPv4 address.
/// * `protocol` - IP protocol number (17 for UDP).
/// * `udp_length` - UDP header plus payload length in bytes.
pub fn pseudo_header_checksum(src: Ipv4Addr, dst: Ipv4Addr, protocol: u8, udp_length: u16) -> u16 {
    // zero byte, protocol byte, then the length: one network-order 32-bit word
    let proto_len = ((protocol as u32) << 16) + udp_length as u32;
    let acc = add32(add32(u32::from(src), u32::from(dst)), proto_len);
    fold(acc)
}

/// Adds `bytes` to `initial` as a sequence of big-endian 16-bit words.
///
/// An odd trailing byte is padded with a zero low byte. Reference sum for checking
/// serialized headers in tests.
#[cfg(test)]
pub(crate) fn sum_be_words(bytes: &[u8], initial: u32) -> u32 {
    let mut chunks = bytes.chunks_exact(2);
    let mut acc = initial;
    for word in &mut chunks {
        acc = add32(acc, u16::from_be_bytes([word[0], word[1]]) as u32);
    }
    if let [last] = chunks.remainder() {
        acc = add32(acc, (*last as u32) << 8);
    }
    acc
}
