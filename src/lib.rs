//! rfmlink: a point-to-point packet radio link over the RFM69HCW
//!
//! Two standalone roles communicate through a half-duplex transceiver on
//! SPI: a sender that constructs a small payload on a fixed cadence and
//! transmits it, and a receiver that listens continuously and reports what
//! arrives. The link is single-threaded and blocking throughout; every
//! driver call is bounded by a timeout.

pub mod core;
pub mod link;
pub mod radio;

// Re-export commonly used items
pub use self::core::{Error, Result};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
