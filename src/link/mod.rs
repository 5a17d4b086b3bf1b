//! The two link roles
//!
//! A [`Sender`] transmits a bounded payload on a fixed cadence; a
//! [`Receiver`] listens continuously and reports what arrives. Both run a
//! single-threaded blocking loop and observe a shared shutdown flag between
//! iterations (cooperative cancellation only, no mid-call preemption).

mod receiver;
mod sender;

pub use self::receiver::Receiver;
pub use self::sender::Sender;

/// Counters reported when a role's loop stops
#[derive(Debug, Clone, Default)]
pub struct LinkStats {
    /// Payloads handed to the radio
    pub sent: u64,
    /// Sends confirmed by an acknowledgment reply
    pub acked: u64,
    /// Sends abandoned after retries, or rejected payloads
    pub failed: u64,
    /// Packets received and reported
    pub received: u64,
    /// Acknowledgment replies transmitted
    pub replied: u64,
}
