//! Host serial line interface.
//!
//! The sender's intake is a stream of newline-terminated ASCII lines from
//! whatever is driving the programmer node. [`HostLine`] is the narrow
//! contract the state machine needs; [`IoHostLine`] adapts any
//! `Read + Write` transport whose reads time out, such as a serial port.

use std::io::{Read, Write};
use std::time::{Duration, Instant};

use crate::error::Result;

/// Longest accepted host line, in bytes.
///
/// The longest well-formed record line is `FLX:9999:` plus a 16-data-byte
/// record (42 characters); the bound leaves generous headroom.
pub const MAX_LINE: usize = 114;

/// Line-oriented host transport as seen by the sender.
pub trait HostLine {
    /// Read one `\n`-terminated line into `buf`, waiting at most
    /// `timeout`. Returns the number of bytes read, `0` when the timeout
    /// passed with no complete line. The terminator is not included and
    /// lines are capped at [`MAX_LINE`] bytes.
    fn read_line(&mut self, buf: &mut String, timeout: Duration) -> Result<usize>;

    /// Write one line back to the host, appending the terminator.
    fn write_line(&mut self, line: &str) -> Result<()>;
}

/// [`HostLine`] over any `Read + Write` whose reads time out.
pub struct IoHostLine<P: Read + Write> {
    port: P,
    pending: Vec<u8>,
}

impl<P: Read + Write> IoHostLine<P> {
    /// Wrap a transport.
    pub fn new(port: P) -> Self {
        Self {
            port,
            pending: Vec::new(),
        }
    }

    /// Unwrap the transport.
    pub fn into_inner(self) -> P {
        self.port
    }
}

impl<P: Read + Write> HostLine for IoHostLine<P> {
    fn read_line(&mut self, buf: &mut String, timeout: Duration) -> Result<usize> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
                let mut line: Vec<u8> = self.pending.drain(..=pos).collect();
                line.pop(); // terminator
                if line.last() == Some(&b'\r') {
                    line.pop();
                }
                line.truncate(MAX_LINE);
                buf.push_str(&String::from_utf8_lossy(&line));
                return Ok(buf.len());
            }

            if Instant::now() >= deadline {
                return Ok(0);
            }

            let mut chunk = [0u8; 64];
            match self.port.read(&mut chunk) {
                // some ports report a timed-out read as zero bytes rather
                // than an error; pace the poll instead of spinning
                Ok(0) => std::thread::sleep(Duration::from_millis(2)),
                Ok(n) => self.pending.extend_from_slice(&chunk[..n]),
                Err(e) if e.kind() == std::io::ErrorKind::TimedOut => {},
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn write_line(&mut self, line: &str) -> Result<()> {
        self.port.write_all(line.as_bytes())?;
        self.port.write_all(b"\n")?;
        self.port.flush()?;
        Ok(())
    }
}
