use std::io;
use std::time::Duration;
use thiserror::Error;

/// Custom error types for the radio link
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Radio unavailable: {0}")]
    RadioUnavailable(String),

    #[error("Payload too large: {len} bytes exceeds radio maximum of {max}")]
    PayloadTooLarge { len: usize, max: usize },

    #[error("No acknowledgment received within {0:?}")]
    NoAcknowledgment(Duration),

    #[error("Corrupt packet discarded (CRC failure)")]
    CorruptPacket,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid session state: {0}")]
    InvalidState(String),
}

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Creates a new radio-unavailable error
    pub fn radio_unavailable(msg: impl Into<String>) -> Self {
        Error::RadioUnavailable(msg.into())
    }

    /// Creates a new configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    /// Creates a new invalid state error
    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Error::InvalidState(msg.into())
    }

    /// Returns true for per-packet failures that are local to one loop
    /// iteration and never abort the overall send/receive loop.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::PayloadTooLarge { .. } | Error::NoAcknowledgment(_) | Error::CorruptPacket
        )
    }
}
