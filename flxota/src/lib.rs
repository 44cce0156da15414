//! # flxota
//!
//! Over-the-air firmware programming for packet-radio nodes.
//!
//! This crate implements the transfer protocol that moves an Intel HEX
//! firmware image from a serial-attached "programmer" node to a remote
//! "target" node over a narrow-payload, lossy, half-duplex packet radio
//! link, reconstructing it exactly - ordered and duplicate-free - in the
//! target's external flash:
//!
//! - Wire framing and handshake (`FLX` packet grammar)
//! - Intel HEX record validation and repacking
//! - Target-side receiver state machine (flash image storage + finalize)
//! - Programmer-side sender state machine (serial intake + radio retry)
//! - Host-side driver for the PC feeding the programmer
//!
//! Radio, flash and platform hardware are reached through the
//! [`RadioLink`], [`FlashStore`] and [`NodePlatform`] capability traits,
//! so the protocol logic runs unchanged against the bundled in-memory
//! implementations in tests and simulations.
//!
//! ## Example
//!
//! ```rust,no_run
//! use flxota::{MemoryFlash, NullPlatform, Receiver, ReceiverConfig, TargetClass};
//!
//! fn serve<L: flxota::RadioLink>(link: &mut L) -> flxota::Result<()> {
//!     let mut flash = MemoryFlash::new(512 * 1024, 0xEF30);
//!     let mut platform = NullPlatform;
//!     let config = ReceiverConfig {
//!         class: TargetClass::Standard,
//!         ..ReceiverConfig::default()
//!     };
//!
//!     // hand every received packet to the receiver; a transfer request
//!     // blocks here until the session resolves
//!     while let Some(pkt) = link.receive()? {
//!         let mut receiver = Receiver::with_config(link, &mut flash, &mut platform, config.clone());
//!         if let Some(len) = receiver.check_inbound(&pkt)? {
//!             println!("stored {len} byte image");
//!         }
//!     }
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

use std::sync::{Arc, OnceLock};

pub mod error;
pub mod flash;
pub mod host;
pub mod image;
pub mod line;
pub mod link;
pub mod platform;
pub mod protocol;
pub mod target;

static INTERRUPT_CHECKER: OnceLock<Arc<dyn Fn() -> bool + Send + Sync>> = OnceLock::new();

/// Register a global interruption checker used by the blocking transfer
/// loops.
///
/// The checker should return `true` when the current operation should stop
/// (for example after receiving Ctrl-C in CLI applications).
pub fn set_interrupt_checker<F>(checker: F)
where
    F: Fn() -> bool + Send + Sync + 'static,
{
    let _ = INTERRUPT_CHECKER.set(Arc::new(checker));
}

/// Returns whether interruption was requested by the embedding application.
#[must_use]
pub fn is_interrupt_requested() -> bool {
    INTERRUPT_CHECKER
        .get()
        .is_some_and(|checker| checker())
}

// Re-exports for convenience
pub use {
    error::{Error, HexError, Result},
    flash::{BLOCK_SIZE, FlashStore, mem::MemoryFlash},
    host::{HostConfig, HostTransfer, MAX_RECORDS},
    line::{HostLine, IoHostLine, MAX_LINE},
    link::{Inbound, RadioLink, SHIFT_CHANNEL_HZ, mem::ChannelLink},
    platform::{NodePlatform, NullPlatform},
    protocol::{
        DEFAULT_TIMEOUT, PacketView, Receiver, ReceiverConfig, Sender, SenderConfig, frame, hex,
    },
    target::{ImageLayout, TargetClass},
};
