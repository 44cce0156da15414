//! Radio link abstraction.
//!
//! The protocol state machines never talk to radio hardware directly; they
//! drive a [`RadioLink`] implementation injected by the caller. The trait
//! covers the primitives the transfer protocol needs - addressed sends,
//! reply acknowledgments, a non-blocking receive poll, and frequency
//! control for the data-phase channel shift - and layers the shared
//! reliable-exchange primitive [`RadioLink::send_with_retry`] on top of
//! them.
//!
//! ## Architecture
//!
//! ```text
//! +--------------------+     +--------------------+
//! |  Protocol Layer    |     |  Protocol Layer    |
//! | (receiver, sender) |     | (receiver, sender) |
//! +---------+----------+     +---------+----------+
//!           |                          |
//!           v                          v
//! +---------+----------+     +---------+----------+
//! |  RadioLink Trait   |     |  RadioLink Trait   |
//! +---------+----------+     +---------+----------+
//!           |                          |
//!           v                          v
//! +---------+----------+     +---------+----------+
//! |  Packet radio HAL  |     |    ChannelLink     |
//! |  (caller-provided) |     |    (in-memory)     |
//! +--------------------+     +--------------------+
//!        Hardware                Tests / simulation
//! ```

pub mod mem;

use std::thread;
use std::time::{Duration, Instant};

use log::trace;

use crate::error::Result;

/// Frequency offset applied during the data phase, keeping the control
/// channel free of image traffic.
pub const SHIFT_CHANNEL_HZ: u32 = 1_000_000;

/// Retries the reliable-exchange primitive attempts beyond the first send.
pub const DEFAULT_RETRIES: u8 = 2;

/// How long one send waits for its acknowledgment.
pub const DEFAULT_ACK_TIMEOUT: Duration = Duration::from_millis(20);

/// Interval between receive polls inside blocking waits.
pub(crate) const POLL_INTERVAL: Duration = Duration::from_millis(1);

/// One received packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inbound {
    /// Radio address of the node that sent it.
    pub sender: u16,
    /// Raw payload bytes, bounded by the transport's maximum.
    pub payload: Vec<u8>,
    /// Whether this arrived as a reply acknowledgment.
    pub ack: bool,
}

/// Packet radio transport as seen by the transfer protocol.
pub trait RadioLink {
    /// This node's radio address.
    fn node_id(&self) -> u16;

    /// Send one packet to `to`. Fire and forget.
    fn send(&mut self, to: u16, payload: &[u8]) -> Result<()>;

    /// Acknowledge the packet most recently received from `to`, carrying
    /// `payload` back to it.
    fn send_ack(&mut self, to: u16, payload: &[u8]) -> Result<()>;

    /// Poll for an inbound packet. Must never block.
    fn receive(&mut self) -> Result<Option<Inbound>>;

    /// Current center frequency in Hz.
    fn frequency_hz(&self) -> u32;

    /// Retune the radio.
    fn set_frequency_hz(&mut self, hz: u32) -> Result<()>;

    /// Send `payload` to `to` and wait for an acknowledgment from it.
    ///
    /// One send plus up to `retries` re-sends, each waiting `ack_timeout`.
    /// Returns the acknowledgment packet, or `None` once every attempt is
    /// exhausted. Sequence matching and duplicate suppression are layered
    /// above this primitive, not inside it.
    fn send_with_retry(
        &mut self,
        to: u16,
        payload: &[u8],
        retries: u8,
        ack_timeout: Duration,
    ) -> Result<Option<Inbound>> {
        for attempt in 0..=retries {
            if attempt > 0 {
                trace!("re-sending to {to} (attempt {})", attempt + 1);
            }
            self.send(to, payload)?;

            let deadline = Instant::now() + ack_timeout;
            while Instant::now() < deadline {
                if let Some(pkt) = self.receive()? {
                    if pkt.ack && pkt.sender == to {
                        return Ok(Some(pkt));
                    }
                    // not our acknowledgment; the protocol layer has no
                    // use for stray traffic inside this wait
                    trace!("ignoring packet from {} during ACK wait", pkt.sender);
                } else {
                    thread::sleep(POLL_INTERVAL);
                }
            }
        }
        Ok(None)
    }
}
