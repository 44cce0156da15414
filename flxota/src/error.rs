//! Error types for flxota.

use std::io;
use thiserror::Error;

/// Result type for flxota operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for flxota operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (serial line, host port).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Intel HEX record validation failure.
    #[error("HEX record error: {0}")]
    Hex(#[from] HexError),

    /// No forward progress within the configured window.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// External flash chip absent or unresponsive.
    #[error("Flash chip not found or not responding")]
    FlashAbsent,

    /// Received image exceeds the target's flash capacity.
    #[error("Image too large: {written} payload bytes, limit {max}")]
    ImageTooLarge {
        /// Payload bytes written before EOF.
        written: u32,
        /// Maximum payload size for the target class.
        max: u32,
    },

    /// Handshake with the peer failed.
    #[error("Handshake failed: {0}")]
    HandshakeFailed(String),

    /// Protocol error.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Transfer aborted mid-stream.
    #[error("Transfer failed: {0}")]
    Transfer(String),

    /// Operation interrupted by the embedding application.
    #[error("Interrupted")]
    Interrupted,

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Intel HEX record validation errors.
///
/// Each kind maps to the single-byte diagnostic code echoed to the host as
/// `FLX:INV:<code>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum HexError {
    /// A character outside the `[0-9A-F]` alphabet.
    #[error("invalid hex character")]
    Digit,

    /// The trailing checksum byte does not match the record contents.
    #[error("checksum mismatch")]
    Checksum,

    /// The record length disagrees with the declared data length field
    /// (also covers records shorter than the 12-character minimum or of
    /// odd length).
    #[error("length mismatch")]
    Length,
}

impl HexError {
    /// Wire diagnostic code for this error kind.
    pub fn code(self) -> u8 {
        match self {
            Self::Digit => 255,
            Self::Checksum => 254,
            Self::Length => 253,
        }
    }
}
