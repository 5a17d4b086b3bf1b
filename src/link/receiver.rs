use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use chrono::{DateTime, Local};
use tracing::{error, info, warn};

use crate::core::{Packet, Result};
use crate::radio::{RadioDriver, Session};

use super::LinkStats;

/// How long one receive poll blocks before the shutdown flag is rechecked
const RECEIVE_POLL: Duration = Duration::from_secs(1);

/// Rough link quality from received signal strength
fn signal_quality(rssi_dbm: i16) -> &'static str {
    if rssi_dbm > -50 {
        "excellent"
    } else if rssi_dbm > -70 {
        "good"
    } else if rssi_dbm > -90 {
        "fair"
    } else {
        "weak"
    }
}

/// Receiver role: listens continuously and reports received payloads.
///
/// Replies are transmitted unconfirmed, so the session handed in here should
/// have acknowledgments disabled; otherwise every reply would itself wait
/// for an acknowledgment.
pub struct Receiver<D: RadioDriver> {
    session: Session<D>,
    stats: LinkStats,
    last_activity: Instant,
}

impl<D: RadioDriver> Receiver<D> {
    /// Wraps an open session in the receiver role
    pub fn new(session: Session<D>) -> Self {
        Receiver {
            session,
            stats: LinkStats::default(),
            last_activity: Instant::now(),
        }
    }

    /// Counters accumulated so far
    pub fn stats(&self) -> &LinkStats {
        &self.stats
    }

    /// Runs the listen loop until the shutdown flag is observed
    pub fn run(&mut self, shutdown: &AtomicBool) -> Result<()> {
        info!("receiver ready, waiting for messages");

        while !shutdown.load(Ordering::Relaxed) {
            if let Err(e) = self.poll_once() {
                if e.is_recoverable() {
                    warn!("{}", e);
                } else {
                    error!("driver fault: {}, reinitializing radio", e);
                    self.session.reopen()?;
                }
            }
        }

        info!(
            received = self.stats.received,
            replied = self.stats.replied,
            discarded = self.session.discarded(),
            "receiver stopped"
        );
        Ok(())
    }

    /// One bounded listen: reports a packet if one arrives, otherwise logs a
    /// waiting status once the quiet period exceeds the configured timeout
    pub fn poll_once(&mut self) -> Result<()> {
        match self.session.receive(RECEIVE_POLL)? {
            Some(packet) => {
                self.stats.received += 1;
                self.last_activity = Instant::now();
                self.report(&packet);
                if self.session.config().send_reply {
                    self.send_reply()?;
                }
            }
            None => {
                let quiet = self.last_activity.elapsed();
                if quiet >= self.session.config().timeout {
                    info!("waiting for messages ({}s since last)", quiet.as_secs());
                }
            }
        }
        Ok(())
    }

    fn report(&self, packet: &Packet) {
        let text = String::from_utf8_lossy(&packet.payload);
        let when: DateTime<Local> = packet.received_at.into();
        match packet.rssi_dbm {
            Some(rssi) => info!(
                "[{}] message #{}: '{}' (RSSI {} dBm, {})",
                when.format("%H:%M:%S"),
                self.stats.received,
                text,
                rssi,
                signal_quality(rssi)
            ),
            None => info!(
                "[{}] message #{}: '{}'",
                when.format("%H:%M:%S"),
                self.stats.received,
                text
            ),
        }
    }

    fn send_reply(&mut self) -> Result<()> {
        let reply = match self.session.config().node_id {
            Some(node) => format!(
                "ACK from Node {} - Got msg #{}",
                node, self.stats.received
            ),
            None => format!("ACK - Got msg #{}", self.stats.received),
        };
        self.session.send(reply.as_bytes())?;
        self.stats.replied += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::RadioConfig;
    use crate::radio::LoopbackAir;

    fn receiver_config() -> RadioConfig {
        RadioConfig {
            ack_enabled: false,
            node_id: Some(2),
            destination_id: Some(1),
            timeout: Duration::from_secs(5),
            ..Default::default()
        }
    }

    #[test]
    fn test_signal_quality_labels() {
        assert_eq!(signal_quality(-40), "excellent");
        assert_eq!(signal_quality(-60), "good");
        assert_eq!(signal_quality(-80), "fair");
        assert_eq!(signal_quality(-100), "weak");
    }

    #[test]
    fn test_poll_reports_and_replies() {
        let air = LoopbackAir::new();
        let mut tx = Session::open(
            air.station(),
            RadioConfig {
                ack_enabled: false,
                ..Default::default()
            },
        )
        .unwrap();
        let rx_session = Session::open(air.station(), receiver_config()).unwrap();
        let mut receiver = Receiver::new(rx_session);

        tx.send(b"Hello from Node 1! Msg #1").unwrap();
        receiver.poll_once().unwrap();

        assert_eq!(receiver.stats().received, 1);
        assert_eq!(receiver.stats().replied, 1);

        // The sender hears the acknowledgment reply
        let reply = tx
            .receive(Duration::from_millis(100))
            .unwrap()
            .expect("reply should arrive");
        assert_eq!(&reply.payload[..], b"ACK from Node 2 - Got msg #1");
    }

    #[test]
    fn test_quiet_poll_counts_nothing() {
        let air = LoopbackAir::new();
        let session = Session::open(air.station(), receiver_config()).unwrap();
        let mut receiver = Receiver::new(session);

        receiver.poll_once().unwrap();
        assert_eq!(receiver.stats().received, 0);
        assert_eq!(receiver.stats().replied, 0);
    }
}
