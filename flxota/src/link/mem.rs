//! In-memory radio link for tests and simulation.
//!
//! [`ChannelLink::pair`] builds two connected endpoints backed by mpsc
//! channels. Delivery honors addressing and the current frequency of both
//! ends - a packet sent while the peer is tuned elsewhere is lost, which is
//! exactly how the channel-shift discipline fails when it is wrong. ACK
//! loss can be injected to exercise the retransmission paths.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::mpsc::{Receiver, Sender, TryRecvError, channel};
use std::sync::Arc;

use log::trace;

use crate::error::{Error, Result};
use crate::link::{Inbound, RadioLink};

struct Airframe {
    from: u16,
    to: u16,
    payload: Vec<u8>,
    ack: bool,
    freq: u32,
}

/// One endpoint of an in-memory radio pair.
pub struct ChannelLink {
    id: u16,
    freq: Arc<AtomicU32>,
    peer_freq: Arc<AtomicU32>,
    tx: Sender<Airframe>,
    rx: Receiver<Airframe>,
    ack_counter: u32,
    dropped_acks: HashSet<u32>,
}

/// Default center frequency both endpoints start on.
pub const DEFAULT_FREQUENCY_HZ: u32 = 915_000_000;

impl ChannelLink {
    /// Build a connected pair of endpoints with the given addresses.
    pub fn pair(id_a: u16, id_b: u16) -> (Self, Self) {
        let (tx_ab, rx_ab) = channel();
        let (tx_ba, rx_ba) = channel();
        let freq_a = Arc::new(AtomicU32::new(DEFAULT_FREQUENCY_HZ));
        let freq_b = Arc::new(AtomicU32::new(DEFAULT_FREQUENCY_HZ));

        let a = Self {
            id: id_a,
            freq: Arc::clone(&freq_a),
            peer_freq: Arc::clone(&freq_b),
            tx: tx_ab,
            rx: rx_ba,
            ack_counter: 0,
            dropped_acks: HashSet::new(),
        };
        let b = Self {
            id: id_b,
            freq: freq_b,
            peer_freq: freq_a,
            tx: tx_ba,
            rx: rx_ab,
            ack_counter: 0,
            dropped_acks: HashSet::new(),
        };
        (a, b)
    }

    /// Drop the `index`-th outgoing acknowledgment (0-based, counted from
    /// link creation), simulating ACK loss.
    pub fn drop_ack(&mut self, index: u32) {
        self.dropped_acks.insert(index);
    }

    fn transmit(&mut self, to: u16, payload: &[u8], ack: bool) -> Result<()> {
        if ack {
            let index = self.ack_counter;
            self.ack_counter += 1;
            if self.dropped_acks.contains(&index) {
                trace!("{}: dropping ACK {index} to {to} (loss injection)", self.id);
                return Ok(());
            }
        }
        let frame = Airframe {
            from: self.id,
            to,
            payload: payload.to_vec(),
            ack,
            freq: self.freq.load(Ordering::SeqCst),
        };
        self.tx
            .send(frame)
            .map_err(|_| Error::Protocol("peer link closed".into()))
    }
}

impl RadioLink for ChannelLink {
    fn node_id(&self) -> u16 {
        self.id
    }

    fn send(&mut self, to: u16, payload: &[u8]) -> Result<()> {
        self.transmit(to, payload, false)
    }

    fn send_ack(&mut self, to: u16, payload: &[u8]) -> Result<()> {
        self.transmit(to, payload, true)
    }

    fn receive(&mut self) -> Result<Option<Inbound>> {
        loop {
            match self.rx.try_recv() {
                Ok(frame) => {
                    // misaddressed or off-channel traffic never reaches us
                    if frame.to != self.id {
                        continue;
                    }
                    if frame.freq != self.freq.load(Ordering::SeqCst) {
                        trace!(
                            "{}: packet from {} lost off-channel",
                            self.id, frame.from
                        );
                        continue;
                    }
                    return Ok(Some(Inbound {
                        sender: frame.from,
                        payload: frame.payload,
                        ack: frame.ack,
                    }));
                },
                Err(TryRecvError::Empty) => return Ok(None),
                Err(TryRecvError::Disconnected) => {
                    return Err(Error::Protocol("peer link closed".into()));
                },
            }
        }
    }

    fn frequency_hz(&self) -> u32 {
        self.freq.load(Ordering::SeqCst)
    }

    fn set_frequency_hz(&mut self, hz: u32) -> Result<()> {
        self.freq.store(hz, Ordering::SeqCst);
        Ok(())
    }
}

// peer_freq is only read by tests asserting both ends retuned; keep the
// accessor public so integration tests outside the crate can use it too
impl ChannelLink {
    /// Frequency the peer endpoint is currently tuned to.
    pub fn peer_frequency_hz(&self) -> u32 {
        self.peer_freq.load(Ordering::SeqCst)
    }
}
