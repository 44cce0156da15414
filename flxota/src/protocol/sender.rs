//! Programmer-side transfer state machine.
//!
//! Runs on the node attached to the serial host that holds the compiled
//! image. The host feeds it one `FLX:<seq>:<record>` line per Intel HEX
//! record; each validated record is repacked into a binary packet and
//! pushed over the radio with retry until the target acknowledges it. The
//! host stream and the radio sequence numbers advance in lockstep - a line
//! whose sequence does not match the cursor is ignored, and the cursor
//! only moves on a matching radio ACK.

use std::time::{Duration, Instant};

use log::{debug, trace};

use crate::error::{Error, Result};
use crate::line::HostLine;
use crate::link::{DEFAULT_ACK_TIMEOUT, DEFAULT_RETRIES, RadioLink, SHIFT_CHANNEL_HZ};
use crate::protocol::DEFAULT_TIMEOUT;
use crate::protocol::{frame, hex};

/// How long one host line read may block before the timeout is re-checked.
pub const DEFAULT_LINE_TIMEOUT: Duration = Duration::from_millis(1000);

/// Sender configuration.
#[derive(Debug, Clone)]
pub struct SenderConfig {
    /// Overall inactivity window for each phase.
    pub timeout: Duration,
    /// Per-attempt acknowledgment wait of the retry primitive.
    pub ack_timeout: Duration,
    /// Re-sends the retry primitive attempts beyond the first.
    pub retries: u8,
    /// Frequency offset for the data phase, `None` to stay on the
    /// control channel.
    pub shift_channel_hz: Option<u32>,
    /// Timeout for a single host line read.
    pub line_timeout: Duration,
}

impl Default for SenderConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            ack_timeout: DEFAULT_ACK_TIMEOUT,
            retries: DEFAULT_RETRIES,
            shift_channel_hz: Some(SHIFT_CHANNEL_HZ),
            line_timeout: DEFAULT_LINE_TIMEOUT,
        }
    }
}

enum LineOutcome {
    Continue,
    Eof,
}

/// Programmer-side sender.
pub struct Sender<'a, L: RadioLink, H: HostLine> {
    link: &'a mut L,
    host: &'a mut H,
    config: SenderConfig,
}

impl<'a, L: RadioLink, H: HostLine> Sender<'a, L, H> {
    /// Create a sender with default configuration.
    pub fn new(link: &'a mut L, host: &'a mut H) -> Self {
        Self {
            link,
            host,
            config: SenderConfig::default(),
        }
    }

    /// Create a sender with custom configuration.
    pub fn with_config(link: &'a mut L, host: &'a mut H, config: SenderConfig) -> Self {
        Self { link, host, config }
    }

    /// Inspect a host line and, if it requests a transfer, drive the
    /// whole session toward `target`.
    ///
    /// Returns `false` when the line was not a transfer request, `true`
    /// once an image was transferred and acknowledged end to end. Every
    /// protocol-visible event is echoed to the host as a `FLX` line.
    pub fn check_for_serial_hex(&mut self, line: &str, target: u16) -> Result<bool> {
        if line.as_bytes() != frame::HANDSHAKE {
            return Ok(false);
        }

        let ack = match self.handshake(target, false) {
            Ok(ack) => ack,
            Err(e) => {
                self.host.write_line("FLX?NOK")?;
                return Err(e);
            },
        };
        if let Some(reason) = frame::handshake_nok_reason(&ack) {
            // relay the target's refusal verbatim
            self.host.write_line(&String::from_utf8_lossy(&ack))?;
            return Err(Error::HandshakeFailed(reason));
        }
        self.host.write_line("FLX?OK")?;

        self.run_data_phase(target)?;
        self.host.write_line("FLX?OK")?;
        Ok(true)
    }

    /// Run the streaming phase, shifted off the control channel when
    /// enabled.
    fn run_data_phase(&mut self, target: u16) -> Result<()> {
        let Some(shift) = self.config.shift_channel_hz else {
            return self.stream(target);
        };

        let base = self.link.frequency_hz();
        self.link.set_frequency_hz(base + shift)?;
        debug!("data channel shifted to {} Hz", base + shift);

        let result = self.stream(target);

        let restored = self.link.set_frequency_hz(base);
        debug!("data channel restored to {base} Hz");
        result?;
        restored
    }

    /// Repeat the control request until the target acknowledges.
    fn handshake(&mut self, target: u16, eof: bool) -> Result<Vec<u8>> {
        let request: &[u8] = if eof {
            frame::HANDSHAKE_EOF
        } else {
            frame::HANDSHAKE
        };

        let started = Instant::now();
        while started.elapsed() < self.config.timeout {
            if crate::is_interrupt_requested() {
                return Err(Error::Interrupted);
            }
            if let Some(ack) = self.link.send_with_retry(
                target,
                request,
                self.config.retries,
                self.config.ack_timeout,
            )? {
                if frame::is_handshake_ack(&ack.payload) {
                    return Ok(ack.payload);
                }
                trace!("unrecognized handshake response");
            }
        }
        Err(Error::Timeout(format!(
            "handshake with node {target} unanswered"
        )))
    }

    /// Read host lines and forward records until EOF or timeout.
    fn stream(&mut self, target: u16) -> Result<()> {
        let mut seq: u16 = 0;
        let mut last_good = Instant::now();
        let mut line = String::new();

        loop {
            if crate::is_interrupt_requested() {
                return Err(Error::Interrupted);
            }

            line.clear();
            let n = self.host.read_line(&mut line, self.config.line_timeout)?;
            if n > 0 {
                let trimmed = line.trim_end().to_owned();
                match self.handle_line(&trimmed, target, &mut seq, &mut last_good)? {
                    LineOutcome::Continue => {},
                    LineOutcome::Eof => return Ok(()),
                }
            }

            if last_good.elapsed() > self.config.timeout {
                return Err(Error::Timeout("no valid line from host".into()));
            }
        }
    }

    /// Process one host line. `Eof` ends the stream successfully.
    fn handle_line(
        &mut self,
        line: &str,
        target: u16,
        seq: &mut u16,
        last_good: &mut Instant,
    ) -> Result<LineOutcome> {
        let bytes = line.as_bytes();

        if bytes == frame::HANDSHAKE_EOF {
            *last_good = Instant::now();
            let ack = self.handshake(target, true)?;
            if let Some(reason) = frame::handshake_nok_reason(&ack) {
                self.host.write_line(&String::from_utf8_lossy(&ack))?;
                return Err(Error::Transfer(format!("EOF rejected: {reason}")));
            }
            return Ok(LineOutcome::Eof);
        }

        let Some((line_seq, body_at)) = frame::parse_data_header(bytes) else {
            debug!("ignoring non-record line from host");
            return Ok(LineOutcome::Continue);
        };
        *last_good = Instant::now();

        let record = &bytes[body_at..];
        if let Err(e) = hex::validate(record) {
            self.host.write_line(&format!("FLX:INV:{}", e.code()))?;
            return Ok(LineOutcome::Continue);
        }

        // lockstep rule: the host stream and the radio sequence advance
        // together; lines out of position are not resequenced
        if line_seq != *seq {
            debug!("line for sequence {line_seq} ignored, cursor at {seq}");
            return Ok(LineOutcome::Continue);
        }

        let packet = hex::repack(record, *seq);
        if !self.send_data_packet(target, &packet, *seq)? {
            return Err(Error::Transfer(format!("no matching ACK for packet {seq}")));
        }
        self.host.write_line(&format!("FLX:{seq}:OK"))?;
        *seq += 1;
        Ok(LineOutcome::Continue)
    }

    /// Push one data packet until its ACK sequence matches.
    fn send_data_packet(&mut self, target: u16, packet: &[u8], seq: u16) -> Result<bool> {
        let started = Instant::now();
        loop {
            if crate::is_interrupt_requested() {
                return Err(Error::Interrupted);
            }
            if let Some(ack) = self.link.send_with_retry(
                target,
                packet,
                self.config.retries,
                self.config.ack_timeout,
            )? {
                if let Some(ack_seq) = frame::parse_data_ack(&ack.payload) {
                    // a well-formed ACK for the wrong sequence means the
                    // two ends disagree about the stream position
                    return Ok(ack_seq == seq);
                }
                trace!("unrecognized data ACK");
            }
            if started.elapsed() > self.config.timeout {
                return Ok(false);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::Inbound;
    use std::collections::VecDeque;

    const TARGET: u16 = 9;

    /// Host double replaying scripted lines and recording echoes.
    struct ScriptHost {
        lines: VecDeque<&'static str>,
        echoed: Vec<String>,
    }

    impl ScriptHost {
        fn new(lines: &[&'static str]) -> Self {
            Self {
                lines: lines.iter().copied().collect(),
                echoed: Vec::new(),
            }
        }
    }

    impl HostLine for ScriptHost {
        fn read_line(&mut self, buf: &mut String, _timeout: Duration) -> Result<usize> {
            match self.lines.pop_front() {
                Some(l) => {
                    buf.push_str(l);
                    Ok(buf.len())
                },
                None => Ok(0),
            }
        }
        fn write_line(&mut self, line: &str) -> Result<()> {
            self.echoed.push(line.to_owned());
            Ok(())
        }
    }

    /// Link double that answers each send with the next scripted ACK.
    struct AckLink {
        acks: VecDeque<Option<&'static [u8]>>,
        sent: Vec<Vec<u8>>,
        pending: Option<Inbound>,
        freq: u32,
    }

    impl AckLink {
        fn new(acks: &[Option<&'static [u8]>]) -> Self {
            Self {
                acks: acks.iter().copied().collect(),
                sent: Vec::new(),
                pending: None,
                freq: 915_000_000,
            }
        }
    }

    impl RadioLink for AckLink {
        fn node_id(&self) -> u16 {
            2
        }
        fn send(&mut self, to: u16, payload: &[u8]) -> Result<()> {
            self.sent.push(payload.to_vec());
            if let Some(Some(ack)) = self.acks.pop_front() {
                self.pending = Some(Inbound {
                    sender: to,
                    payload: ack.to_vec(),
                    ack: true,
                });
            }
            Ok(())
        }
        fn send_ack(&mut self, _to: u16, _payload: &[u8]) -> Result<()> {
            unreachable!("sender never issues reply ACKs");
        }
        fn receive(&mut self) -> Result<Option<Inbound>> {
            Ok(self.pending.take())
        }
        fn frequency_hz(&self) -> u32 {
            self.freq
        }
        fn set_frequency_hz(&mut self, hz: u32) -> Result<()> {
            self.freq = hz;
            Ok(())
        }
    }

    fn quick_config() -> SenderConfig {
        SenderConfig {
            timeout: Duration::from_millis(60),
            ack_timeout: Duration::from_millis(5),
            line_timeout: Duration::from_millis(1),
            ..SenderConfig::default()
        }
    }

    // two-byte records with valid checksums, plus one corrupted copy
    const LINE_0: &str = "FLX:0:020000000102FB";
    const LINE_1: &str = "FLX:1:020002000304F5";
    const REC_BAD: &str = "FLX:0:020000000102FF";

    #[test]
    fn test_non_request_line_is_not_for_us() {
        let mut host = ScriptHost::new(&[]);
        let mut link = AckLink::new(&[]);
        let mut sender = Sender::with_config(&mut link, &mut host, quick_config());
        assert!(!sender.check_for_serial_hex("hello", TARGET).unwrap());
        assert!(link.sent.is_empty());
    }

    #[test]
    fn test_full_session() {
        let mut host = ScriptHost::new(&[LINE_0, "FLX?EOF"]);
        let mut link = AckLink::new(&[
            Some(b"FLX?OK"),   // handshake
            Some(b"FLX:0:OK"), // data packet 0
            Some(b"FLX?OK"),   // EOF handshake
        ]);
        let mut sender = Sender::with_config(&mut link, &mut host, quick_config());

        assert!(sender.check_for_serial_hex("FLX?", TARGET).unwrap());
        assert_eq!(
            host.echoed,
            vec!["FLX?OK", "FLX:0:OK", "FLX?OK"]
        );
        assert_eq!(link.sent.len(), 3);
        assert_eq!(link.sent[0], b"FLX?");
        assert_eq!(link.sent[1], {
            let mut pkt = b"FLX:0:".to_vec();
            pkt.extend_from_slice(&[0x01, 0x02]);
            pkt
        });
        assert_eq!(link.sent[2], b"FLX?EOF");
        // control channel restored after the data phase
        assert_eq!(link.freq, 915_000_000);
    }

    #[test]
    fn test_handshake_refusal_relayed() {
        let mut host = ScriptHost::new(&[]);
        let mut link = AckLink::new(&[Some(b"FLX?NOK:NOFLASH")]);
        let mut sender = Sender::with_config(&mut link, &mut host, quick_config());

        let err = sender.check_for_serial_hex("FLX?", TARGET).unwrap_err();
        assert!(matches!(err, Error::HandshakeFailed(ref r) if r == "NOFLASH"));
        assert_eq!(host.echoed, vec!["FLX?NOK:NOFLASH"]);
    }

    #[test]
    fn test_handshake_timeout_reports_nok() {
        let mut host = ScriptHost::new(&[]);
        let mut link = AckLink::new(&[]);
        let mut sender = Sender::with_config(&mut link, &mut host, quick_config());

        let err = sender.check_for_serial_hex("FLX?", TARGET).unwrap_err();
        assert!(matches!(err, Error::Timeout(_)));
        assert_eq!(host.echoed, vec!["FLX?NOK"]);
        // the request went out more than once before giving up
        assert!(link.sent.len() > 1);
    }

    #[test]
    fn test_invalid_record_echoes_code_and_holds_cursor() {
        let mut host = ScriptHost::new(&[REC_BAD, LINE_0, "FLX?EOF"]);
        let mut link = AckLink::new(&[
            Some(b"FLX?OK"),
            Some(b"FLX:0:OK"),
            Some(b"FLX?OK"),
        ]);
        let mut sender = Sender::with_config(&mut link, &mut host, quick_config());

        assert!(sender.check_for_serial_hex("FLX?", TARGET).unwrap());
        // checksum error code, then the good record under the same cursor
        assert_eq!(
            host.echoed,
            vec!["FLX?OK", "FLX:INV:254", "FLX:0:OK", "FLX?OK"]
        );
    }

    #[test]
    fn test_out_of_position_line_ignored() {
        let mut host = ScriptHost::new(&[LINE_1, LINE_0, "FLX?EOF"]);
        let mut link = AckLink::new(&[
            Some(b"FLX?OK"),
            Some(b"FLX:0:OK"),
            Some(b"FLX?OK"),
        ]);
        let mut sender = Sender::with_config(&mut link, &mut host, quick_config());

        assert!(sender.check_for_serial_hex("FLX?", TARGET).unwrap());
        // the out-of-position line produced neither an echo nor a packet
        assert_eq!(host.echoed, vec!["FLX?OK", "FLX:0:OK", "FLX?OK"]);
        assert_eq!(link.sent.len(), 3);
    }

    #[test]
    fn test_unacked_packet_aborts() {
        let mut host = ScriptHost::new(&[LINE_0]);
        let mut link = AckLink::new(&[Some(b"FLX?OK")]); // nothing for data
        let mut sender = Sender::with_config(&mut link, &mut host, quick_config());

        let err = sender.check_for_serial_hex("FLX?", TARGET).unwrap_err();
        assert!(matches!(err, Error::Transfer(_)));
        // handshake succeeded before the stream died
        assert_eq!(host.echoed, vec!["FLX?OK"]);
    }

    #[test]
    fn test_eof_capacity_refusal() {
        let mut host = ScriptHost::new(&[LINE_0, "FLX?EOF"]);
        let mut link = AckLink::new(&[
            Some(b"FLX?OK"),
            Some(b"FLX:0:OK"),
            Some(b"FLX?NOK:HEX>31k"),
        ]);
        let mut sender = Sender::with_config(&mut link, &mut host, quick_config());

        let err = sender.check_for_serial_hex("FLX?", TARGET).unwrap_err();
        assert!(matches!(err, Error::Transfer(_)));
        assert_eq!(
            host.echoed,
            vec!["FLX?OK", "FLX:0:OK", "FLX?NOK:HEX>31k"]
        );
    }

    #[test]
    fn test_mismatched_ack_sequence_aborts() {
        let mut host = ScriptHost::new(&[LINE_0]);
        let mut link = AckLink::new(&[
            Some(b"FLX?OK"),
            Some(b"FLX:3:OK"), // target is somewhere else entirely
        ]);
        let mut sender = Sender::with_config(&mut link, &mut host, quick_config());

        let err = sender.check_for_serial_hex("FLX?", TARGET).unwrap_err();
        assert!(matches!(err, Error::Transfer(_)));
    }
}
