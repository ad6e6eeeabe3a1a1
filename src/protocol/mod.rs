//! Protocol module - Defines the wire protocol for NetShell communication
//!
//! Stream transport framing:
//! - Text: 2 bytes length (big-endian) followed by UTF-8 bytes
//! - File: 1 byte compressed flag, file name as text, 8 bytes length
//!   (big-endian), then exactly that many raw bytes
//!
//! Datagram transport carries raw UTF-8 text, at most one buffer per datagram.

mod codec;
mod command;
mod message;

pub use codec::*;
pub use command::*;
pub use message::*;

/// Default port for NetShell communication
pub const DEFAULT_PORT: u16 = 8386;

/// Application buffer size used before any negotiation
pub const DEFAULT_BUFFER_SIZE: usize = 2048;

/// Size of a rendezvous control datagram
pub const CONTROL_DATAGRAM_SIZE: usize = 8;
