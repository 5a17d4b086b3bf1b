//! In-memory radio pair used by tests
//!
//! Stations attached to the same [`LoopbackAir`] hear each other's
//! transmissions only when their carrier frequencies match, mirroring how two
//! mis-tuned radios simply never receive. Channel impairments (packet loss,
//! CRC corruption) can be injected for failure-path tests.

use std::sync::{mpsc, Arc, Mutex};

use rand::Rng;
use tracing::trace;

use crate::core::{Error, Packet, RadioConfig, Result, MAX_PAYLOAD_LEN};

use super::driver::RadioDriver;

#[derive(Debug, Clone)]
struct Frame {
    payload: Vec<u8>,
    crc_ok: bool,
}

struct Station {
    id: usize,
    frequency_mhz: f64,
    tx: mpsc::Sender<Frame>,
}

#[derive(Default)]
struct AirInner {
    next_id: usize,
    stations: Vec<Station>,
}

/// Shared medium connecting loopback radios
#[derive(Clone, Default)]
pub struct LoopbackAir {
    inner: Arc<Mutex<AirInner>>,
}

impl LoopbackAir {
    /// Creates an empty medium
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a radio that will attach to this medium when initialized
    pub fn station(&self) -> LoopbackRadio {
        LoopbackRadio {
            air: self.clone(),
            id: None,
            rx: None,
            frequency_mhz: 0.0,
            fail_next_init: false,
            loss_probability: 0.0,
            corrupt_probability: 0.0,
            transmissions: 0,
        }
    }
}

/// One end of an in-memory radio link
pub struct LoopbackRadio {
    air: LoopbackAir,
    id: Option<usize>,
    rx: Option<mpsc::Receiver<Frame>>,
    frequency_mhz: f64,
    fail_next_init: bool,
    loss_probability: f64,
    corrupt_probability: f64,
    transmissions: u64,
}

impl LoopbackRadio {
    /// Number of transmissions this radio has performed
    pub fn transmissions(&self) -> u64 {
        self.transmissions
    }

    /// Makes the next `init` call fail, simulating unreachable hardware
    pub fn fail_next_init(&mut self) {
        self.fail_next_init = true;
    }

    /// Probability that a transmitted frame is silently dropped in the air
    pub fn set_loss_probability(&mut self, p: f64) {
        self.loss_probability = p;
    }

    /// Probability that a transmitted frame arrives with a failed CRC
    pub fn set_corrupt_probability(&mut self, p: f64) {
        self.corrupt_probability = p;
    }

    fn detach(&mut self) {
        if let Some(id) = self.id.take() {
            let mut air = self.air.inner.lock().unwrap();
            air.stations.retain(|s| s.id != id);
        }
        self.rx = None;
    }
}

impl RadioDriver for LoopbackRadio {
    fn init(&mut self, config: &RadioConfig) -> Result<()> {
        if self.fail_next_init {
            self.fail_next_init = false;
            return Err(Error::radio_unavailable("simulated initialization failure"));
        }

        // Reinitialization replaces any previous attachment
        self.detach();

        let (tx, rx) = mpsc::channel();
        let mut air = self.air.inner.lock().unwrap();
        let id = air.next_id;
        air.next_id += 1;
        air.stations.push(Station {
            id,
            frequency_mhz: config.frequency_mhz,
            tx,
        });

        self.id = Some(id);
        self.rx = Some(rx);
        self.frequency_mhz = config.frequency_mhz;
        Ok(())
    }

    fn max_payload(&self) -> usize {
        MAX_PAYLOAD_LEN
    }

    fn transmit(&mut self, payload: &[u8]) -> Result<()> {
        let id = self
            .id
            .ok_or_else(|| Error::radio_unavailable("loopback radio not initialized"))?;

        self.transmissions += 1;

        let mut rng = rand::thread_rng();
        if rng.gen::<f64>() < self.loss_probability {
            trace!("loopback frame lost in the air");
            return Ok(());
        }
        let crc_ok = rng.gen::<f64>() >= self.corrupt_probability;

        let air = self.air.inner.lock().unwrap();
        for station in &air.stations {
            if station.id == id {
                continue;
            }
            if (station.frequency_mhz - self.frequency_mhz).abs() > f64::EPSILON {
                continue;
            }
            let _ = station.tx.send(Frame {
                payload: payload.to_vec(),
                crc_ok,
            });
        }
        Ok(())
    }

    fn try_receive(&mut self) -> Result<Option<Packet>> {
        let rx = self
            .rx
            .as_ref()
            .ok_or_else(|| Error::radio_unavailable("loopback radio not initialized"))?;

        match rx.try_recv() {
            Ok(frame) if !frame.crc_ok => Err(Error::CorruptPacket),
            Ok(frame) => {
                let rssi = rand::thread_rng().gen_range(-80..=-30);
                Ok(Some(Packet::new(frame.payload, Some(rssi))))
            }
            Err(mpsc::TryRecvError::Empty) | Err(mpsc::TryRecvError::Disconnected) => Ok(None),
        }
    }

    fn shutdown(&mut self) -> Result<()> {
        self.detach();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn initialized_pair(air: &LoopbackAir) -> (LoopbackRadio, LoopbackRadio) {
        let config = RadioConfig::default();
        let mut a = air.station();
        let mut b = air.station();
        a.init(&config).unwrap();
        b.init(&config).unwrap();
        (a, b)
    }

    #[test]
    fn test_frames_cross_the_air() {
        let air = LoopbackAir::new();
        let (mut a, mut b) = initialized_pair(&air);

        a.transmit(b"Hello #1").unwrap();

        let packet = b.try_receive().unwrap().expect("frame should arrive");
        assert_eq!(&packet.payload[..], b"Hello #1");
        assert!(packet.rssi_dbm.is_some());

        // The transmitter does not hear itself
        assert!(a.try_receive().unwrap().is_none());
    }

    #[test]
    fn test_frequency_mismatch_yields_no_reception() {
        let air = LoopbackAir::new();
        let mut a = air.station();
        let mut b = air.station();
        a.init(&RadioConfig::default()).unwrap();
        b.init(&RadioConfig {
            frequency_mhz: 915.0,
            ..Default::default()
        })
        .unwrap();

        a.transmit(b"lost").unwrap();
        assert!(b.try_receive().unwrap().is_none());
    }

    #[test]
    fn test_injected_loss_drops_frames() {
        let air = LoopbackAir::new();
        let (mut a, mut b) = initialized_pair(&air);
        a.set_loss_probability(1.0);

        a.transmit(b"dropped").unwrap();
        assert!(b.try_receive().unwrap().is_none());
        assert_eq!(a.transmissions(), 1);
    }

    #[test]
    fn test_injected_corruption_fails_crc() {
        let air = LoopbackAir::new();
        let (mut a, mut b) = initialized_pair(&air);
        a.set_corrupt_probability(1.0);

        a.transmit(b"garbled").unwrap();
        assert!(matches!(b.try_receive(), Err(Error::CorruptPacket)));
    }

    #[test]
    fn test_uninitialized_radio_reports_unavailable() {
        let air = LoopbackAir::new();
        let mut radio = air.station();
        assert!(matches!(
            radio.transmit(b"x"),
            Err(Error::RadioUnavailable(_))
        ));
    }
}
