//! Radio session management
//!
//! A [`Session`] owns a [`RadioDriver`] exclusively for its lifetime and
//! tracks the lifecycle state machine:
//! `Uninitialized -> Ready -> (Transmitting | Listening) -> Ready -> Closed`.
//! Driver faults demote the session back to `Uninitialized`, requiring
//! [`Session::reopen`] before further use; `Closed` is terminal.

mod driver;
mod loopback;
mod rfm69;

pub use self::driver::RadioDriver;
pub use self::loopback::{LoopbackAir, LoopbackRadio};
pub use self::rfm69::Rfm69Driver;

use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::core::{Error, Packet, RadioConfig, Result};

/// How often the driver is polled while waiting for a packet
const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Lifecycle state of a radio session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Driver not initialized, or demoted after a driver fault
    Uninitialized,
    /// Idle and able to send or receive
    Ready,
    /// A transmission is in flight
    Transmitting,
    /// Polling the air for a packet
    Listening,
    /// Terminal; the driver has been shut down
    Closed,
}

/// One role's handle on the radio for the lifetime of the process.
///
/// The underlying half-duplex transceiver is exclusively owned by the single
/// controlling thread; there is no interior locking.
pub struct Session<D: RadioDriver> {
    driver: D,
    config: RadioConfig,
    state: SessionState,
    discarded: u64,
}

impl<D: RadioDriver> Session<D> {
    /// Opens a session by initializing the driver.
    ///
    /// Initialization failure means the radio hardware is unreachable and is
    /// reported as `RadioUnavailable`; callers treat it as fatal.
    pub fn open(mut driver: D, config: RadioConfig) -> Result<Self> {
        config.validate()?;
        driver.init(&config).map_err(|e| match e {
            Error::RadioUnavailable(_) => e,
            other => Error::radio_unavailable(other.to_string()),
        })?;

        debug!(frequency_mhz = config.frequency_mhz, "radio session open");
        Ok(Session {
            driver,
            config,
            state: SessionState::Ready,
            discarded: 0,
        })
    }

    /// Current lifecycle state
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Session configuration, immutable for the session's lifetime
    pub fn config(&self) -> &RadioConfig {
        &self.config
    }

    /// Count of corrupt frames discarded while listening
    pub fn discarded(&self) -> u64 {
        self.discarded
    }

    /// Access to the owned driver, mainly for inspection in tests
    pub fn driver_mut(&mut self) -> &mut D {
        &mut self.driver
    }

    fn ensure_ready(&self) -> Result<()> {
        match self.state {
            SessionState::Ready => Ok(()),
            SessionState::Closed => Err(Error::invalid_state("session is closed")),
            SessionState::Uninitialized => Err(Error::invalid_state(
                "session requires reinitialization after a driver fault",
            )),
            other => Err(Error::invalid_state(format!(
                "session busy in state {:?}",
                other
            ))),
        }
    }

    /// Transmits one payload.
    ///
    /// Oversized payloads are rejected with `PayloadTooLarge` before the
    /// driver is touched, so no RF is radiated. When acknowledgments are
    /// enabled the call then listens up to the configured timeout for any
    /// reply from the peer and returns `Ok(true)` on receipt, or
    /// `Err(NoAcknowledgment)` otherwise; retry and backoff policy belongs to
    /// the caller. With acknowledgments disabled, `Ok(true)` means the driver
    /// reported the transmission complete.
    pub fn send(&mut self, payload: &[u8]) -> Result<bool> {
        self.ensure_ready()?;

        let max = self.driver.max_payload();
        if payload.len() > max {
            return Err(Error::PayloadTooLarge {
                len: payload.len(),
                max,
            });
        }

        self.state = SessionState::Transmitting;
        if let Err(e) = self.driver.transmit(payload) {
            warn!("driver fault during transmit: {}", e);
            self.state = SessionState::Uninitialized;
            return Err(e);
        }
        self.state = SessionState::Ready;

        if !self.config.ack_enabled {
            return Ok(true);
        }

        match self.receive(self.config.timeout)? {
            Some(_) => Ok(true),
            None => Err(Error::NoAcknowledgment(self.config.timeout)),
        }
    }

    /// Polls for a packet until `timeout` elapses.
    ///
    /// `Ok(None)` means quiet air, which is expected and normal. Corrupt
    /// frames are logged, counted and discarded without surfacing as data and
    /// without giving up the remainder of the deadline.
    pub fn receive(&mut self, timeout: Duration) -> Result<Option<Packet>> {
        self.ensure_ready()?;
        self.state = SessionState::Listening;

        let deadline = Instant::now() + timeout;
        let outcome = loop {
            match self.driver.try_receive() {
                Ok(Some(packet)) => break Some(packet),
                Ok(None) => {}
                Err(Error::CorruptPacket) => {
                    self.discarded += 1;
                    debug!("corrupt packet discarded (CRC failure)");
                }
                Err(e) => {
                    warn!("driver fault while listening: {}", e);
                    self.state = SessionState::Uninitialized;
                    return Err(e);
                }
            }
            if Instant::now() >= deadline {
                break None;
            }
            thread::sleep(POLL_INTERVAL);
        };

        self.state = SessionState::Ready;
        Ok(outcome)
    }

    /// Reinitializes the driver after a fault, returning the session to
    /// `Ready`
    pub fn reopen(&mut self) -> Result<()> {
        match self.state {
            SessionState::Uninitialized => {
                self.driver.init(&self.config).map_err(|e| match e {
                    Error::RadioUnavailable(_) => e,
                    other => Error::radio_unavailable(other.to_string()),
                })?;
                self.state = SessionState::Ready;
                Ok(())
            }
            SessionState::Closed => Err(Error::invalid_state("session is closed")),
            _ => Err(Error::invalid_state("session does not need reopening")),
        }
    }

    /// Shuts the driver down; the session is unusable afterwards
    pub fn close(&mut self) {
        if self.state != SessionState::Closed {
            if let Err(e) = self.driver.shutdown() {
                warn!("driver shutdown failed: {}", e);
            }
            self.state = SessionState::Closed;
            debug!("radio session closed");
        }
    }
}

impl<D: RadioDriver> Drop for Session<D> {
    fn drop(&mut self) {
        // Guarantees bus shutdown on all exit paths, including errors
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::MAX_PAYLOAD_LEN;

    fn quick_config() -> RadioConfig {
        RadioConfig {
            ack_enabled: false,
            timeout: Duration::from_millis(100),
            ..Default::default()
        }
    }

    fn open_pair(air: &LoopbackAir, config: &RadioConfig) -> (Session<LoopbackRadio>, Session<LoopbackRadio>) {
        let a = Session::open(air.station(), config.clone()).unwrap();
        let b = Session::open(air.station(), config.clone()).unwrap();
        (a, b)
    }

    #[test]
    fn test_open_reaches_ready() {
        let air = LoopbackAir::new();
        let session = Session::open(air.station(), quick_config()).unwrap();
        assert_eq!(session.state(), SessionState::Ready);
    }

    #[test]
    fn test_open_fails_as_radio_unavailable() {
        let air = LoopbackAir::new();
        let mut radio = air.station();
        radio.fail_next_init();
        let result = Session::open(radio, quick_config());
        assert!(matches!(result, Err(Error::RadioUnavailable(_))));
    }

    #[test]
    fn test_open_rejects_invalid_config() {
        let air = LoopbackAir::new();
        let config = RadioConfig {
            frequency_mhz: 30.0,
            ..quick_config()
        };
        assert!(matches!(
            Session::open(air.station(), config),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_payloads_within_limit_are_accepted() {
        let air = LoopbackAir::new();
        let (mut tx, _rx) = open_pair(&air, &quick_config());

        for len in [0, 1, 32, MAX_PAYLOAD_LEN] {
            let payload = vec![0xA5; len];
            assert!(tx.send(&payload).is_ok(), "len {} should send", len);
        }
    }

    #[test]
    fn test_oversized_payload_rejected_without_transmission() {
        let air = LoopbackAir::new();
        let mut tx = Session::open(air.station(), quick_config()).unwrap();

        let payload = vec![0u8; MAX_PAYLOAD_LEN + 1];
        match tx.send(&payload) {
            Err(Error::PayloadTooLarge { len, max }) => {
                assert_eq!(len, 61);
                assert_eq!(max, 60);
            }
            other => panic!("expected PayloadTooLarge, got {:?}", other.map(|_| ())),
        }

        // No RF side effect occurred
        assert_eq!(tx.driver_mut().transmissions(), 0);
        assert_eq!(tx.state(), SessionState::Ready);
    }

    #[test]
    fn test_receive_times_out_on_quiet_air() {
        let air = LoopbackAir::new();
        let mut session = Session::open(air.station(), quick_config()).unwrap();

        let timeout = Duration::from_millis(200);
        let start = Instant::now();
        let result = session.receive(timeout).unwrap();
        let elapsed = start.elapsed();

        assert!(result.is_none());
        assert!(elapsed >= timeout);
        assert!(elapsed < timeout + Duration::from_millis(500));
        assert_eq!(session.state(), SessionState::Ready);
    }

    #[test]
    fn test_round_trip_is_byte_identical() {
        let air = LoopbackAir::new();
        let (mut tx, mut rx) = open_pair(&air, &quick_config());

        tx.send(b"Hello #1").unwrap();

        let packet = rx
            .receive(Duration::from_secs(5))
            .unwrap()
            .expect("packet should arrive");
        assert_eq!(&packet.payload[..], b"Hello #1");
    }

    #[test]
    fn test_mismatched_frequency_receives_nothing() {
        let air = LoopbackAir::new();
        let mut tx = Session::open(air.station(), quick_config()).unwrap();
        let mut rx = Session::open(
            air.station(),
            RadioConfig {
                frequency_mhz: 915.0,
                ..quick_config()
            },
        )
        .unwrap();

        tx.send(b"Hello #1").unwrap();
        assert!(rx.receive(Duration::from_millis(100)).unwrap().is_none());
    }

    #[test]
    fn test_corrupt_packets_discarded_not_surfaced() {
        let air = LoopbackAir::new();
        let (mut tx, mut rx) = open_pair(&air, &quick_config());
        tx.driver_mut().set_corrupt_probability(1.0);

        tx.send(b"garbled").unwrap();

        let result = rx.receive(Duration::from_millis(100)).unwrap();
        assert!(result.is_none());
        assert_eq!(rx.discarded(), 1);
        assert_eq!(rx.state(), SessionState::Ready);
    }

    #[test]
    fn test_missing_ack_is_reported() {
        let air = LoopbackAir::new();
        let config = RadioConfig {
            ack_enabled: true,
            timeout: Duration::from_millis(100),
            ..Default::default()
        };
        let mut tx = Session::open(air.station(), config).unwrap();

        // Nobody on the air to reply
        assert!(matches!(
            tx.send(b"anyone there?"),
            Err(Error::NoAcknowledgment(_))
        ));
    }

    #[test]
    fn test_ack_round_trip() {
        let air = LoopbackAir::new();
        let config = RadioConfig {
            ack_enabled: true,
            timeout: Duration::from_secs(2),
            ..Default::default()
        };
        let mut tx = Session::open(air.station(), config).unwrap();
        let mut rx = Session::open(air.station(), quick_config()).unwrap();

        let peer = thread::spawn(move || {
            let packet = rx
                .receive(Duration::from_secs(2))
                .unwrap()
                .expect("peer should hear the message");
            rx.send(b"ack").unwrap();
            packet
        });

        // Give the peer a moment to start listening
        thread::sleep(Duration::from_millis(50));

        let acked = tx.send(b"Hello #1").unwrap();
        assert!(acked);
        let heard = peer.join().unwrap();
        assert_eq!(&heard.payload[..], b"Hello #1");
    }

    #[test]
    fn test_driver_fault_demotes_and_reopen_recovers() {
        let air = LoopbackAir::new();
        let mut session = Session::open(air.station(), quick_config()).unwrap();

        // Detach the driver behind the session's back to provoke a fault
        session.driver_mut().shutdown().unwrap();
        assert!(matches!(
            session.send(b"x"),
            Err(Error::RadioUnavailable(_))
        ));
        assert_eq!(session.state(), SessionState::Uninitialized);

        // Further use is refused until reinitialization
        assert!(matches!(session.send(b"x"), Err(Error::InvalidState(_))));

        session.reopen().unwrap();
        assert_eq!(session.state(), SessionState::Ready);
        assert!(session.send(b"x").is_ok());
    }

    #[test]
    fn test_closed_is_terminal() {
        let air = LoopbackAir::new();
        let mut session = Session::open(air.station(), quick_config()).unwrap();

        session.close();
        assert_eq!(session.state(), SessionState::Closed);
        assert!(matches!(session.send(b"x"), Err(Error::InvalidState(_))));
        assert!(matches!(session.reopen(), Err(Error::InvalidState(_))));
    }
}
