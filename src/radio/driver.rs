use crate::core::{Packet, RadioConfig, Result};

/// Hardware seam for a half-duplex packet radio.
///
/// All calls are blocking; the driver is exclusively owned by one session and
/// is never shared between threads. A multi-threaded extension must serialize
/// every call behind a single lock.
pub trait RadioDriver {
    /// Brings the transceiver up with the given configuration.
    ///
    /// Called once when the session opens, and again after a driver fault
    /// when the session is reopened. Failure means the radio hardware is
    /// unreachable (wiring or bus misconfiguration) and is fatal to the
    /// caller.
    fn init(&mut self, config: &RadioConfig) -> Result<()>;

    /// Largest payload this radio accepts in a single packet
    fn max_payload(&self) -> usize;

    /// Transmits one payload, blocking until the radio reports completion.
    ///
    /// Callers must bound the payload by [`max_payload`](Self::max_payload)
    /// before calling; the driver does not truncate.
    fn transmit(&mut self, payload: &[u8]) -> Result<()>;

    /// Polls for a received packet without blocking.
    ///
    /// Returns `Ok(None)` when no packet is pending (quiet air is normal,
    /// not an error) and `Err(Error::CorruptPacket)` when a frame failed the
    /// radio's CRC and was dropped.
    fn try_receive(&mut self) -> Result<Option<Packet>>;

    /// Puts the transceiver back to sleep and releases bus resources
    fn shutdown(&mut self) -> Result<()>;
}
