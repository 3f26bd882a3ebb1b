//! Protocol error types

use thiserror::Error;

/// Protocol-level errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Packet buffer cannot hold the packetized frame
    #[error("Buffer too small: needed {needed}, got {available}")]
    BufferTooSmall { needed: usize, available: usize },

    /// Maximum payload size cannot carry a payload header plus data
    #[error("Invalid max payload size {size}: must be greater than the {header} byte header")]
    InvalidPayloadSize { size: usize, header: usize },

    /// Control width cannot be advertised through GET_LEN
    #[error("Invalid control width {width}: must be between 1 and {max}")]
    InvalidControlWidth { width: usize, max: usize },
}

/// Type alias for protocol results
pub type Result<T> = std::result::Result<T, ProtocolError>;
