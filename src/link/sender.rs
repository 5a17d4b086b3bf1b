use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{error, info, warn};

use crate::core::{Error, Result};
use crate::radio::{RadioDriver, Session};

use super::LinkStats;

/// Base delay added per retry after a missing acknowledgment.
///
/// Retries back off linearly and are bounded by `ack_retries`; the radio
/// must never retransmit without pause because of duty-cycle limits.
const RETRY_BACKOFF: Duration = Duration::from_millis(500);

/// Builds the sample payload carried by each transmission
fn sample_payload(node_id: Option<u8>, counter: u64) -> String {
    match node_id {
        Some(node) => format!("Hello from Node {}! Msg #{}", node, counter),
        None => format!("Hello! Msg #{}", counter),
    }
}

/// Sender role: constructs a payload on a fixed cadence and transmits it
pub struct Sender<D: RadioDriver> {
    session: Session<D>,
    counter: u64,
    stats: LinkStats,
}

impl<D: RadioDriver> Sender<D> {
    /// Wraps an open session in the sender role
    pub fn new(session: Session<D>) -> Self {
        Sender {
            session,
            counter: 0,
            stats: LinkStats::default(),
        }
    }

    /// Counters accumulated so far
    pub fn stats(&self) -> &LinkStats {
        &self.stats
    }

    /// The owned session, mainly for inspection in tests
    pub fn session_mut(&mut self) -> &mut Session<D> {
        &mut self.session
    }

    /// Runs the send loop until the shutdown flag is observed.
    ///
    /// Per-packet failures are logged and never abort the loop; a driver
    /// fault triggers one reinitialization attempt and is fatal only when
    /// that also fails.
    pub fn run(&mut self, shutdown: &AtomicBool) -> Result<()> {
        let interval = self.session.config().send_interval;
        info!(
            "sender ready, transmitting every {:.1}s",
            interval.as_secs_f64()
        );

        while !shutdown.load(Ordering::Relaxed) {
            if let Err(e) = self.send_next() {
                if e.is_recoverable() {
                    self.stats.failed += 1;
                    warn!("message #{} failed: {}", self.counter, e);
                } else {
                    error!("driver fault: {}, reinitializing radio", e);
                    self.session.reopen()?;
                }
            }
            thread::sleep(interval);
        }

        info!(
            sent = self.stats.sent,
            acked = self.stats.acked,
            failed = self.stats.failed,
            "sender stopped"
        );
        Ok(())
    }

    /// Builds and transmits the next payload, retrying with backoff when an
    /// acknowledgment was requested but not received
    pub fn send_next(&mut self) -> Result<bool> {
        self.counter += 1;
        let payload = sample_payload(self.session.config().node_id, self.counter);

        let started = Instant::now();
        let acked = self.send_with_retry(payload.as_bytes())?;
        let elapsed = started.elapsed();

        self.stats.sent += 1;
        if self.session.config().ack_enabled {
            self.stats.acked += 1;
            info!(
                "sent '{}' (acknowledged in {}ms)",
                payload,
                elapsed.as_millis()
            );
        } else {
            info!("sent '{}' ({}ms)", payload, elapsed.as_millis());
        }
        Ok(acked)
    }

    fn send_with_retry(&mut self, payload: &[u8]) -> Result<bool> {
        let retries = self.session.config().ack_retries;
        let mut attempt = 0;
        loop {
            match self.session.send(payload) {
                Err(Error::NoAcknowledgment(timeout)) if attempt < retries => {
                    attempt += 1;
                    let backoff = RETRY_BACKOFF * attempt;
                    warn!(
                        "no acknowledgment within {:?}, retry {}/{} after {:?}",
                        timeout, attempt, retries, backoff
                    );
                    thread::sleep(backoff);
                }
                other => return other,
            }
        }
    }
}
