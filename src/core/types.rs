use std::time::{Duration, SystemTime};

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use super::error::{Error, Result};

/// GPIO and bus assignments for the radio module.
///
/// The two wiring guides this project grew out of disagree on the chip-select
/// and interrupt pins, so none of these are hard-coded in the driver; they are
/// plain configuration with defaults matching the runnable scripts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PinConfig {
    /// SPI character device carrying the radio (chip select is implied by
    /// the device number, e.g. CE0 for spidev0.0)
    pub spi_device: String,
    /// GPIO driving the radio RST line
    pub reset_gpio: u32,
    /// GPIO wired to the radio G0/DIO0 interrupt line, unused by the
    /// polling driver but kept as configuration
    pub irq_gpio: Option<u32>,
}

impl Default for PinConfig {
    fn default() -> Self {
        PinConfig {
            spi_device: super::DEFAULT_SPI_DEVICE.to_string(),
            reset_gpio: super::DEFAULT_RESET_GPIO,
            irq_gpio: Some(super::DEFAULT_IRQ_GPIO),
        }
    }
}

/// Configuration for one end of the radio link.
///
/// Frequency, network id and encryption key must match on both ends;
/// the configuration is immutable once a session is open.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RadioConfig {
    /// Carrier frequency in megahertz (must match the hardware band)
    pub frequency_mhz: f64,
    /// Transmit power in dBm (-2 to 20 for the HCW variant)
    pub tx_power_dbm: i8,
    /// This node's address, enables hardware address filtering when set
    pub node_id: Option<u8>,
    /// Peer address used as the destination of outgoing packets
    pub destination_id: Option<u8>,
    /// Network identifier mixed into the radio sync word
    pub network_id: Option<u8>,
    /// 16-byte AES key for the radio's hardware encryption
    pub encryption_key: Option<[u8; 16]>,
    /// Receive and acknowledgment timeout
    #[serde(serialize_with = "super::serde::serialize_duration")]
    #[serde(deserialize_with = "super::serde::deserialize_duration")]
    pub timeout: Duration,
    /// Cadence between transmissions in the sender role
    #[serde(serialize_with = "super::serde::serialize_duration")]
    #[serde(deserialize_with = "super::serde::deserialize_duration")]
    pub send_interval: Duration,
    /// Whether the sender waits for an acknowledgment reply after each send
    pub ack_enabled: bool,
    /// Retries after a missing acknowledgment before giving up on a packet
    pub ack_retries: u32,
    /// Whether the receiver transmits an acknowledgment reply
    pub send_reply: bool,
    /// SPI clock rate in hertz
    pub spi_clock_hz: u32,
    /// Bus and pin assignments
    pub pins: PinConfig,
}

impl Default for RadioConfig {
    fn default() -> Self {
        RadioConfig {
            frequency_mhz: super::DEFAULT_FREQUENCY_MHZ,
            tx_power_dbm: 20,
            node_id: Some(1),
            destination_id: Some(2),
            network_id: None,
            encryption_key: None,
            timeout: Duration::from_secs(5),
            send_interval: Duration::from_secs(2),
            ack_enabled: true,
            ack_retries: 3,
            send_reply: true,
            spi_clock_hz: super::DEFAULT_SPI_CLOCK_HZ,
            pins: PinConfig::default(),
        }
    }
}

impl RadioConfig {
    /// Checks the configuration against the hardware's supported ranges
    pub fn validate(&self) -> Result<()> {
        if !(290.0..=1020.0).contains(&self.frequency_mhz) {
            return Err(Error::config(format!(
                "frequency {} MHz outside the RFM69 synthesizer range (290-1020 MHz)",
                self.frequency_mhz
            )));
        }
        if !(-2..=20).contains(&self.tx_power_dbm) {
            return Err(Error::config(format!(
                "transmit power {} dBm outside the supported range (-2 to 20 dBm)",
                self.tx_power_dbm
            )));
        }
        if self.timeout.is_zero() {
            return Err(Error::config("timeout must be greater than zero"));
        }
        if self.send_interval.is_zero() {
            return Err(Error::config("send interval must be greater than zero"));
        }
        Ok(())
    }
}

/// A received radio packet: the application payload plus reception metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// Payload bytes, exclusive of driver-level framing and CRC
    pub payload: Bytes,
    /// Received signal strength in dBm, if the driver reports it
    pub rssi_dbm: Option<i16>,
    /// Wall-clock time of reception
    pub received_at: SystemTime,
}

impl Packet {
    /// Wraps payload bytes received at the current instant
    pub fn new(payload: impl Into<Bytes>, rssi_dbm: Option<i16>) -> Self {
        Packet {
            payload: payload.into(),
            rssi_dbm,
            received_at: SystemTime::now(),
        }
    }

    /// Payload length in bytes
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    /// Returns true when the payload is empty
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = RadioConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.frequency_mhz, 433.0);
        assert_eq!(config.pins.spi_device, "/dev/spidev0.0");
    }

    #[test]
    fn test_validate_rejects_out_of_band_frequency() {
        let config = RadioConfig {
            frequency_mhz: 144.0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_validate_rejects_excessive_power() {
        let config = RadioConfig {
            tx_power_dbm: 23,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_config_json_round_trip() {
        let original = RadioConfig {
            frequency_mhz: 915.0,
            network_id: Some(100),
            encryption_key: Some(*b"0123456789abcdef"),
            timeout: Duration::from_millis(1500),
            ..Default::default()
        };

        let json = serde_json::to_string(&original).unwrap();
        let parsed: RadioConfig = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed.frequency_mhz, 915.0);
        assert_eq!(parsed.network_id, Some(100));
        assert_eq!(parsed.encryption_key, original.encryption_key);
        assert_eq!(parsed.timeout, Duration::from_millis(1500));
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let parsed: RadioConfig =
            serde_json::from_str(r#"{"frequency_mhz": 868.0, "tx_power_dbm": 13}"#).unwrap();
        assert_eq!(parsed.frequency_mhz, 868.0);
        assert_eq!(parsed.tx_power_dbm, 13);
        assert_eq!(parsed.send_interval, Duration::from_secs(2));
        assert_eq!(parsed.pins, PinConfig::default());
    }

    #[test]
    fn test_packet_accessors() {
        let packet = Packet::new(&b"Hello #1"[..], Some(-42));
        assert_eq!(packet.len(), 8);
        assert!(!packet.is_empty());
        assert_eq!(&packet.payload[..], b"Hello #1");
    }
}
