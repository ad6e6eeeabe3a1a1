//! Network module - Handles TCP/UDP communication between peers
//!
//! Provides:
//! - Transport sockets for both transport kinds
//! - Transceiver for framed text and file transfer
//! - Datagram rendezvous for per-client UDP sessions
//! - Server for accepting peers and running sessions
//! - Client for connecting to servers

mod client;
mod rendezvous;
mod server;
mod socket;
mod transceiver;

pub use client::*;
pub use rendezvous::*;
pub use server::*;
pub use socket::*;
pub use transceiver::*;

use std::net::SocketAddr;

use crate::protocol::{SocketMode, DEFAULT_BUFFER_SIZE, DEFAULT_PORT};

/// Configuration for network operations
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// Transport kind
    pub mode: SocketMode,
    /// Port to listen on or connect to
    pub port: u16,
    /// Interface to bind to (server only)
    pub bind_address: String,
    /// Application buffer size before negotiation
    pub buffer_size: usize,
    /// Connection timeout in milliseconds (client only)
    pub connect_timeout_ms: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            mode: SocketMode::Tcp,
            port: DEFAULT_PORT,
            bind_address: "0.0.0.0".to_string(),
            buffer_size: DEFAULT_BUFFER_SIZE,
            connect_timeout_ms: 5000,
        }
    }
}

impl NetworkConfig {
    pub fn new(mode: SocketMode, port: u16) -> Self {
        Self {
            mode,
            port,
            ..Default::default()
        }
    }

    pub fn with_bind_address(mut self, bind_address: impl Into<String>) -> Self {
        self.bind_address = bind_address.into();
        self
    }

    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size;
        self
    }
}

/// Resolve a hostname to a socket address
pub async fn resolve_host(host: &str, port: u16) -> std::io::Result<SocketAddr> {
    use tokio::net::lookup_host;

    let mut addrs = lookup_host((host, port)).await?;

    addrs.next().ok_or_else(|| {
        std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("Could not resolve host: {}", host),
        )
    })
}
