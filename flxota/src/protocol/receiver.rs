//! Target-side transfer state machine.
//!
//! Runs on the node being reprogrammed. Once the firmware's main loop sees
//! an inbound packet, it hands the packet to [`Receiver::check_inbound`];
//! if the packet opens a transfer, the receiver blocks through the whole
//! session - handshake, data phase, finalize - and reboots the node on
//! success so the bootloader can pick the image up.
//!
//! Session state (sequence cursor, write offset, activity timestamp) lives
//! in an explicit session object created at handshake time, so the state
//! machine runs unchanged against in-memory collaborators in tests.

use std::thread;
use std::time::{Duration, Instant};

use log::{debug, info, trace, warn};

use crate::error::{Error, Result};
use crate::flash::{BLOCK_SIZE, FlashStore};
use crate::image;
use crate::link::{Inbound, POLL_INTERVAL, RadioLink, SHIFT_CHANNEL_HZ};
use crate::platform::NodePlatform;
use crate::protocol::frame::{self, PacketView};
use crate::protocol::DEFAULT_TIMEOUT;
use crate::target::{ImageLayout, TargetClass};

/// Attempts the handshake makes to read a stable flash device id.
const FLASH_PROBE_ATTEMPTS: u8 = 10;

/// Receiver configuration.
#[derive(Debug, Clone)]
pub struct ReceiverConfig {
    /// Target class, deciding image layout and the size ceiling.
    pub class: TargetClass,
    /// Inactivity window before the session aborts.
    pub timeout: Duration,
    /// Frequency offset for the data phase, `None` to stay on the
    /// control channel.
    pub shift_channel_hz: Option<u32>,
    /// Probe the flash chip during the handshake.
    pub flash_check: bool,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            class: TargetClass::default(),
            timeout: DEFAULT_TIMEOUT,
            shift_channel_hz: Some(SHIFT_CHANNEL_HZ),
            flash_check: true,
        }
    }
}

/// State of one receiving session.
struct Session {
    /// Next expected sequence number.
    seq: u16,
    /// Flash offset the next payload byte lands at.
    bytes_written: u32,
    /// When the last packet from the peer arrived.
    last_activity: Instant,
}

impl Session {
    fn new(payload_offset: u32) -> Self {
        Self {
            seq: 0,
            bytes_written: payload_offset,
            last_activity: Instant::now(),
        }
    }

    fn touch(&mut self) {
        self.last_activity = Instant::now();
    }
}

/// Target-side receiver.
///
/// Borrows the radio, the flash store and the platform hooks for the
/// duration of the session; nothing else may touch them while a transfer
/// is in progress.
pub struct Receiver<'a, L: RadioLink, F: FlashStore, P: NodePlatform> {
    link: &'a mut L,
    flash: &'a mut F,
    platform: &'a mut P,
    config: ReceiverConfig,
}

impl<'a, L: RadioLink, F: FlashStore, P: NodePlatform> Receiver<'a, L, F, P> {
    /// Create a receiver with default configuration.
    pub fn new(link: &'a mut L, flash: &'a mut F, platform: &'a mut P) -> Self {
        Self {
            link,
            flash,
            platform,
            config: ReceiverConfig::default(),
        }
    }

    /// Create a receiver with custom configuration.
    pub fn with_config(
        link: &'a mut L,
        flash: &'a mut F,
        platform: &'a mut P,
        config: ReceiverConfig,
    ) -> Self {
        Self {
            link,
            flash,
            platform,
            config,
        }
    }

    /// Inspect the last received packet and, if it requests a transfer,
    /// run the whole session.
    ///
    /// Returns `None` when the packet was not a transfer request, the
    /// final payload length once a session completes (after which the
    /// platform reboot has been triggered), or an error for any aborted
    /// session. No flash cleanup is performed on abort.
    pub fn check_inbound(&mut self, pkt: &Inbound) -> Result<Option<u32>> {
        match frame::classify(&pkt.payload) {
            Some(PacketView::Handshake) => {},
            Some(PacketView::HandshakeEof) => {
                // the peer never saw our final ACK; reassure it without
                // opening a new session
                debug!("EOF re-request from node {}", pkt.sender);
                self.link.send(pkt.sender, frame::HANDSHAKE_OK)?;
                return Ok(None);
            },
            _ => return Ok(None),
        }

        let peer = pkt.sender;
        info!("transfer request from node {peer}");
        self.handshake_ack(peer, self.config.flash_check)?;

        let result = self.run_data_phase(peer);
        match &result {
            Ok(len) => {
                info!("image transfer complete: {len} payload bytes, rebooting");
                self.platform.reboot();
            },
            Err(e) => warn!("transfer from node {peer} aborted: {e}"),
        }
        result.map(Some)
    }

    /// Run the data phase, shifted off the control channel when enabled.
    fn run_data_phase(&mut self, peer: u16) -> Result<u32> {
        let Some(shift) = self.config.shift_channel_hz else {
            return self.receive_image(peer);
        };

        let base = self.link.frequency_hz();
        self.link.set_frequency_hz(base + shift)?;
        debug!("data channel shifted to {} Hz", base + shift);

        let result = self.receive_image(peer);

        let restored = self.link.set_frequency_hz(base);
        debug!("data channel restored to {base} Hz");
        let len = result?;
        restored?;
        Ok(len)
    }

    /// Probe flash (optionally) and acknowledge the handshake.
    fn handshake_ack(&mut self, peer: u16, check_flash: bool) -> Result<()> {
        if check_flash && !self.flash_present() {
            warn!("flash chip absent or unresponsive");
            self.link
                .send_ack(peer, &frame::handshake_nok("NOFLASH"))?;
            return Err(Error::FlashAbsent);
        }
        self.link.send_ack(peer, frame::HANDSHAKE_OK)
    }

    /// Whether a flash chip answers with a stable, plausible device id.
    fn flash_present(&mut self) -> bool {
        self.flash.wakeup();
        let mut id = 0u16;
        for attempt in 0..FLASH_PROBE_ATTEMPTS {
            let now = self.flash.device_id();
            if now == 0 || now == 0xFFFF || (attempt > 0 && now != id) {
                return false;
            }
            id = now;
        }
        trace!("flash device id {id:#06x}");
        true
    }

    /// The blocking receive loop: erase, stream payload to flash,
    /// finalize on EOF.
    fn receive_image(&mut self, peer: u16) -> Result<u32> {
        let layout = self.config.class.layout();
        image::write_preamble(self.flash, &layout)?;

        let mut session = Session::new(layout.payload_offset);
        loop {
            if crate::is_interrupt_requested() {
                return Err(Error::Interrupted);
            }

            match self.link.receive()? {
                Some(pkt) if pkt.sender == peer => {
                    session.touch();
                    self.platform.indicator(true);
                    let outcome = self.handle_packet(peer, &pkt.payload, &mut session, &layout);
                    self.platform.indicator(false);
                    if let Some(len) = outcome? {
                        return Ok(len);
                    }
                },
                Some(pkt) => {
                    trace!("ignoring packet from node {} mid-session", pkt.sender);
                },
                None => thread::sleep(POLL_INTERVAL),
            }

            if session.last_activity.elapsed() > self.config.timeout {
                return Err(Error::Timeout(format!(
                    "no packet from node {peer} for {:?}",
                    self.config.timeout
                )));
            }
        }
    }

    /// Dispatch one in-session packet. `Some(len)` ends the session.
    fn handle_packet(
        &mut self,
        peer: u16,
        payload: &[u8],
        session: &mut Session,
        layout: &ImageLayout,
    ) -> Result<Option<u32>> {
        match frame::classify(payload) {
            Some(PacketView::Data { seq, body }) => {
                if seq == session.seq {
                    self.append(body, session)?;
                    session.seq = session.seq.wrapping_add(1);
                    self.link.send_ack(peer, &frame::data_ack(seq))?;
                } else if seq == session.seq.wrapping_sub(1) {
                    // our ACK was lost and the peer resent the packet it
                    // already delivered; acknowledge again, write nothing
                    debug!("duplicate packet {seq}, re-acknowledging");
                    self.link.send_ack(peer, &frame::data_ack(seq))?;
                } else {
                    // out of window: withhold the ACK and let the peer's
                    // retry/timeout machinery decide
                    debug!("packet {seq} outside window, expecting {}", session.seq);
                }
                Ok(None)
            },
            Some(PacketView::Handshake) => {
                debug!("handshake re-request mid-session");
                self.handshake_ack(peer, self.config.flash_check)?;
                Ok(None)
            },
            Some(PacketView::HandshakeEof) => self.finish(peer, session, layout).map(Some),
            None => {
                trace!("dropping malformed packet ({} bytes)", payload.len());
                Ok(None)
            },
        }
    }

    /// Append payload bytes, erasing ahead at block boundaries.
    fn append(&mut self, body: &[u8], session: &mut Session) -> Result<()> {
        for &b in body {
            self.flash.write_byte(session.bytes_written, b)?;
            session.bytes_written += 1;
            if session.bytes_written % BLOCK_SIZE == 0 {
                self.flash.erase_block(session.bytes_written)?;
            }
        }
        Ok(())
    }

    /// Validate the size bound and finalize the stored image.
    fn finish(&mut self, peer: u16, session: &Session, layout: &ImageLayout) -> Result<u32> {
        let payload_len = session.bytes_written - layout.payload_offset;
        if payload_len > layout.max_payload {
            warn!(
                "image of {payload_len} bytes exceeds the {} byte limit",
                layout.max_payload
            );
            let reason = self.config.class.capacity_nok_reason();
            self.link.send_ack(peer, &frame::handshake_nok(reason))?;
            return Err(Error::ImageTooLarge {
                written: payload_len,
                max: layout.max_payload,
            });
        }

        self.handshake_ack(peer, false)?;
        image::finalize(self.flash, layout, payload_len)?;
        Ok(payload_len)
    }
}
