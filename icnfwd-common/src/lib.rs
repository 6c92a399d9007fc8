//! Common vocabulary for the icnfwd forwarder.
//!
//! This crate holds everything the table engine and the daemon share:
//! names, parsed messages, the default wire codec, the tick timebase with
//! its compressed expiry tags, the control-command grammar, the error
//! taxonomy, and the metrics registry.

pub mod codec;
pub mod control;
pub mod error;
pub mod message;
pub mod metrics;
pub mod name;
pub mod ticks;
pub mod tlv;

pub use error::Error;
pub use message::{Message, MessageKind};
pub use name::{Name, NameSegment};
pub use ticks::{ExpiryTag, Ticks, Timebase, TimerClass, TimerSnapshot};

/// Dense identifier for a connection, issued by the connection table.
pub type ConnectionId = u32;

/// Default packet port (TCP and UDP listeners).
pub const DEFAULT_PORT: u16 = 9695;

/// Default control-plane port.
pub const DEFAULT_CONTROL_PORT: u16 = 2001;

/// Default content-store capacity in objects.
pub const DEFAULT_CS_CAPACITY: usize = 100_000;

/// Upper bound applied to Interest lifetimes when creating PIT state.
pub const MAX_INTEREST_LIFETIME_MS: u64 = 16_000;
