//! Protocol implementations.

use std::time::Duration;

/// Inactivity window after which a session in either role aborts.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(3);

pub mod frame;
pub mod hex;
pub mod receiver;
pub mod sender;

// Re-export common types
pub use frame::PacketView;
pub use receiver::{Receiver, ReceiverConfig};
pub use sender::{Sender, SenderConfig};
