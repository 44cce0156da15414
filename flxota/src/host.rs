//! Host-side driver of the programmer line protocol.
//!
//! This is the PC end of the transfer: it feeds Intel HEX records to the
//! programmer node over a serial port and interprets the `FLX` lines the
//! node echoes back.
//!
//! ## Protocol Overview
//!
//! ```text
//! host -> programmer          programmer -> host
//! ------------------          ------------------
//! FLX?                        FLX?OK  |  FLX?NOK[:reason]
//! FLX:<seq>:<record>          FLX:<seq>:OK  |  FLX:INV:<code>
//! FLX?EOF                     FLX?OK  |  FLX?NOK:<reason>
//! ```
//!
//! One record line is outstanding at a time; the driver only advances on
//! the matching `FLX:<seq>:OK`.

use std::io::{Read, Write};
use std::time::{Duration, Instant};

use log::{debug, trace};

use crate::error::{Error, Result};
use crate::protocol::frame;

/// Sequence numbers are capped at four digits, so an image may not carry
/// more records than this.
pub const MAX_RECORDS: usize = frame::MAX_SEQ as usize + 1;

/// Host driver configuration.
#[derive(Debug, Clone)]
pub struct HostConfig {
    /// How long to wait for the handshake and EOF acknowledgments. The
    /// programmer retries over the radio within this window.
    pub handshake_timeout: Duration,
    /// How long to wait for the response to one record line.
    pub response_timeout: Duration,
    /// Granularity of the internal read polls.
    pub char_timeout: Duration,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            handshake_timeout: Duration::from_secs(20),
            response_timeout: Duration::from_secs(10),
            char_timeout: Duration::from_millis(100),
        }
    }
}

/// Host-side transfer handler.
pub struct HostTransfer<'a, P: Read + Write> {
    port: &'a mut P,
    config: HostConfig,
    pending: Vec<u8>,
}

impl<'a, P: Read + Write> HostTransfer<'a, P> {
    /// Create a transfer handler with default configuration.
    pub fn new(port: &'a mut P) -> Self {
        Self {
            port,
            config: HostConfig::default(),
            pending: Vec::new(),
        }
    }

    /// Create a transfer handler with custom configuration.
    pub fn with_config(port: &'a mut P, config: HostConfig) -> Self {
        Self {
            port,
            config,
            pending: Vec::new(),
        }
    }

    /// Drive a whole image transfer.
    ///
    /// `records` are bare hex records (leading `:` stripped), already
    /// validated by the caller. `progress` receives `(sent, total)` after
    /// each acknowledged record.
    pub fn transfer<F>(&mut self, records: &[String], mut progress: F) -> Result<()>
    where
        F: FnMut(usize, usize),
    {
        if records.len() > MAX_RECORDS {
            return Err(Error::Config(format!(
                "image has {} records, the protocol carries at most {MAX_RECORDS}",
                records.len()
            )));
        }

        debug!("starting transfer of {} records", records.len());
        self.handshake(frame::HANDSHAKE, "handshake")?;

        let total = records.len();
        for (i, record) in records.iter().enumerate() {
            let seq = i as u16;
            self.send_record(seq, record)?;
            progress(i + 1, total);
        }

        self.handshake(frame::HANDSHAKE_EOF, "EOF")?;
        debug!("transfer complete");
        Ok(())
    }

    /// Send a control line and wait for its acknowledgment.
    fn handshake(&mut self, request: &[u8], phase: &str) -> Result<()> {
        self.write_line(request)?;

        let deadline = Instant::now() + self.config.handshake_timeout;
        while let Some(line) = self.read_line_until(deadline)? {
            if line == frame::HANDSHAKE_OK {
                return Ok(());
            }
            if let Some(reason) = frame::handshake_nok_reason(&line) {
                return Err(Error::HandshakeFailed(format!("{phase}: {reason}")));
            }
            // anything else is debug chatter from the node
            trace!("ignoring line during {phase}: {}", String::from_utf8_lossy(&line));
        }
        Err(Error::Timeout(format!("{phase} unanswered")))
    }

    /// Send one record line and wait for its matching ACK.
    fn send_record(&mut self, seq: u16, record: &str) -> Result<()> {
        let mut line = format!("FLX:{seq}:").into_bytes();
        line.extend_from_slice(record.as_bytes());
        self.write_line(&line)?;

        let expected = frame::data_ack(seq);
        let deadline = Instant::now() + self.config.response_timeout;
        while let Some(response) = self.read_line_until(deadline)? {
            if response == expected {
                return Ok(());
            }
            if let Some(code) = response.strip_prefix(b"FLX:INV:") {
                return Err(Error::Protocol(format!(
                    "record {seq} rejected with code {}",
                    String::from_utf8_lossy(code)
                )));
            }
            if frame::handshake_nok_reason(&response).is_some() {
                return Err(Error::Transfer(format!(
                    "record {seq}: {}",
                    String::from_utf8_lossy(&response)
                )));
            }
            trace!(
                "ignoring line awaiting ACK {seq}: {}",
                String::from_utf8_lossy(&response)
            );
        }
        Err(Error::Timeout(format!("no response to record {seq}")))
    }

    fn write_line(&mut self, line: &[u8]) -> Result<()> {
        self.port.write_all(line)?;
        self.port.write_all(b"\n")?;
        self.port.flush()?;
        Ok(())
    }

    /// Read the next non-empty line, or `None` once the deadline passes.
    fn read_line_until(&mut self, deadline: Instant) -> Result<Option<Vec<u8>>> {
        loop {
            if let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
                let mut line: Vec<u8> = self.pending.drain(..=pos).collect();
                line.pop();
                if line.last() == Some(&b'\r') {
                    line.pop();
                }
                if line.is_empty() {
                    continue;
                }
                return Ok(Some(line));
            }

            if Instant::now() >= deadline {
                return Ok(None);
            }

            let mut chunk = [0u8; 64];
            match self.port.read(&mut chunk) {
                // some ports report a timed-out read as zero bytes rather
                // than an error; pace the poll instead of spinning
                Ok(0) => std::thread::sleep(self.config.char_timeout),
                Ok(n) => self.pending.extend_from_slice(&chunk[..n]),
                Err(e) if e.kind() == std::io::ErrorKind::TimedOut => {},
                Err(e) => return Err(e.into()),
            }
        }
    }
}
