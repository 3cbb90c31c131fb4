//! Protocol module - Defines the wire protocol shared by server and client
//!
//! Two formats live here:
//! - Discovery offers, sent unframed as a single UDP datagram:
//!   4 bytes magic (big-endian) + 2 bytes TCP port (big-endian)
//! - Session frames on the TCP stream:
//!   1 byte message type + 4 bytes payload length (big-endian) + payload
//!
//! Nothing in this module touches sockets or runtime state.

mod message;
mod codec;
mod offer;

pub use message::*;
pub use codec::*;
pub use offer::*;

/// Well-known UDP port that servers broadcast offers to
pub const DISCOVERY_PORT: u16 = 13122;

/// Magic marker at the start of every offer datagram
pub const OFFER_MAGIC: u32 = 0xabcd_dcba;

/// Default TCP port for game sessions (0 lets the OS choose; the offer carries the real one)
pub const DEFAULT_GAME_PORT: u16 = 0;

/// Longest player name the server accepts, in bytes
pub const MAX_NAME_LEN: usize = 32;
