//! Core types and constants for the radio link
//!
//! This module contains the fundamental building blocks used throughout the library.

pub mod error;
pub mod serde;
pub mod types;

pub use self::error::{Error, Result};
pub use self::types::{Packet, PinConfig, RadioConfig};

/// Largest payload the RFM69 variable-length packet engine carries
pub const MAX_PAYLOAD_LEN: usize = 60;

/// Value of the RFM69 silicon version register on working hardware
pub const RFM69_VERSION: u8 = 0x24;

/// Default carrier frequency in megahertz (EU ISM band; 915.0 for US)
pub const DEFAULT_FREQUENCY_MHZ: f64 = 433.0;

/// Default SPI clock rate in hertz
pub const DEFAULT_SPI_CLOCK_HZ: u32 = 1_000_000;

/// Default SPI character device (CE0 chip select)
pub const DEFAULT_SPI_DEVICE: &str = "/dev/spidev0.0";

/// Default GPIO for the radio RST line
pub const DEFAULT_RESET_GPIO: u32 = 25;

/// Default GPIO for the radio G0/DIO0 interrupt line
pub const DEFAULT_IRQ_GPIO: u32 = 24;
