//! Protocol message definitions
//!
//! Fixed tokens and replies exchanged between NetShell peers. Every reply is
//! plain text on the same channel as normal command output.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Token a datagram client sends to the well-known port to open a session
pub const LOCATE: &str = "locate";

/// Challenge sent by a server that has a shared secret configured
pub const AUTH_CHALLENGE: &str = "auth";

/// Acknowledgment of a successful (or unnecessary) authentication
pub const AUTHENTICATED: &str = "authenticated";

/// Reply to a rejected credential; the server closes the session afterwards
pub const INVALID_CREDENTIAL: &str = "Invalid credential";

/// Readiness reply that precedes a download envelope
pub const READY: &str = "ok";

/// Reply to a command name that is not in the handler table
pub const INVALID_COMMAND: &str = "Invalid command.";

/// Command that ends a session
pub const DISCONNECT: &str = "dc";

/// Transport kind a session runs over
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum SocketMode {
    /// Connection-oriented stream transport
    Tcp,
    /// Connectionless datagram transport with rendezvous
    Udp,
}

impl SocketMode {
    /// Whether file transfer is available over this transport
    pub fn supports_file_transfer(&self) -> bool {
        matches!(self, SocketMode::Tcp)
    }
}

impl Default for SocketMode {
    fn default() -> Self {
        SocketMode::Tcp
    }
}

impl fmt::Display for SocketMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SocketMode::Tcp => f.write_str("TCP"),
            SocketMode::Udp => f.write_str("UDP"),
        }
    }
}

/// Reply sent when a file command reaches a transport that cannot carry files
pub fn unsupported_file_operation(mode: SocketMode) -> String {
    format!("Current mode {} does not support file operations.", mode)
}
