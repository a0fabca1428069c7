//! Error types of the generator core.
//!
//! Pool exhaustion is a steady-state condition the transmit loop absorbs. Configuration
//! and build errors are caller contract violations and are surfaced immediately.

use thiserror::Error;

/// Invalid fixed configuration, reported before the first packet is built.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("packet length {length} is shorter than the {minimum}-byte Ethernet/IPv4/UDP headers")]
    LengthTooShort { length: usize, minimum: usize },
    #[error("packet length {length} exceeds the IPv4 limit of {maximum} bytes")]
    LengthTooLong { length: usize, maximum: usize },
    #[error("payload pattern is empty but the packet carries {payload} payload bytes")]
    EmptyPayloadPattern { payload: usize },
    #[error("batch size must be at least one")]
    ZeroBatch,
    #[error("pool buffers hold {buffer_size} bytes, packets need {length}")]
    BufferTooSmall { length: usize, buffer_size: usize },
}

/// Failure to stamp a single buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum BuildError {
    #[error("buffer capacity {capacity} is smaller than packet length {needed}")]
    BufferTooSmall { needed: usize, capacity: usize },
}

/// Failure of a bulk allocation. No buffers are handed out when it is returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PoolError {
    #[error("buffer pool exhausted: requested {requested}, available {available}")]
    Exhausted { requested: usize, available: usize },
}
