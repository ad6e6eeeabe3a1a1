//! Datagram rendezvous
//!
//! Manufactures a per-client session out of a connectionless transport:
//!
//! ```text
//! client (ephemeral)              server (well-known port)
//!        | ---- "locate" -----------> |
//!        | <--- buffer size --------- |
//!        |                            |  bind dedicated socket
//!        | <--- dedicated port ------ |
//!        | ==== session traffic ====> |  (dedicated port only)
//! ```
//!
//! Control datagrams are always [`CONTROL_DATAGRAM_SIZE`] bytes of
//! zero-padded ASCII.

use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use tokio::net::UdpSocket;

use super::socket::DatagramSocket;
use super::transceiver::{TransportError, TransportResult};
use crate::protocol::{CONTROL_DATAGRAM_SIZE, LOCATE};

/// Encode a control token into a fixed-size datagram
pub fn encode_control(token: &str) -> TransportResult<[u8; CONTROL_DATAGRAM_SIZE]> {
    let bytes = token.as_bytes();
    if bytes.len() > CONTROL_DATAGRAM_SIZE {
        return Err(TransportError::Rendezvous(format!(
            "control token {:?} exceeds {} bytes",
            token, CONTROL_DATAGRAM_SIZE
        )));
    }

    let mut datagram = [0u8; CONTROL_DATAGRAM_SIZE];
    datagram[..bytes.len()].copy_from_slice(bytes);
    Ok(datagram)
}

/// Decode a received control datagram, stripping padding
pub fn decode_control(datagram: &[u8]) -> String {
    String::from_utf8_lossy(datagram)
        .trim_matches(|c: char| c == '\0' || c.is_whitespace())
        .to_string()
}

fn parse_control<T: std::str::FromStr>(datagram: &[u8], what: &str) -> TransportResult<T> {
    let text = decode_control(datagram);
    text.parse()
        .map_err(|_| TransportError::Rendezvous(format!("invalid {}: {:?}", what, text)))
}

/// Server side of the rendezvous, bound to the well-known port
#[derive(Debug)]
pub struct RendezvousListener {
    socket: UdpSocket,
    buffer_size: usize,
}

impl RendezvousListener {
    /// Bind the well-known port
    pub async fn bind(addr: SocketAddr, buffer_size: usize) -> io::Result<Self> {
        Ok(Self {
            socket: UdpSocket::bind(addr).await?,
            buffer_size,
        })
    }

    /// Get the bound address
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Wait for the next `locate` and negotiate a dedicated socket for it
    ///
    /// Anything other than `locate` is dropped and the wait continues.
    pub async fn accept(&self) -> TransportResult<DatagramSocket> {
        let mut datagram = [0u8; CONTROL_DATAGRAM_SIZE];

        let peer = loop {
            let (n, peer) = self.socket.recv_from(&mut datagram).await?;
            let token = decode_control(&datagram[..n]);
            if token.eq_ignore_ascii_case(LOCATE) {
                break peer;
            }
            tracing::debug!("Dropped unexpected datagram from {}: {:?}", peer, token);
        };

        self.socket
            .send_to(&encode_control(&self.buffer_size.to_string())?, peer)
            .await?;

        // Bound before the port is announced so the first session datagram
        // cannot arrive at a closed port.
        let listen_ip = self.local_addr()?.ip();
        let dedicated = UdpSocket::bind(SocketAddr::new(listen_ip, 0)).await?;
        let port = dedicated.local_addr()?.port();

        self.socket
            .send_to(&encode_control(&port.to_string())?, peer)
            .await?;

        tracing::info!("Negotiated session for {} on port {}", peer, port);
        Ok(DatagramSocket::new(dedicated, peer, self.buffer_size).await?)
    }
}

/// Client side of the rendezvous
///
/// Returns a socket connected to the server's dedicated port. The buffer
/// size is taken from the server when it differs from `requested_buffer`.
pub async fn locate(server: SocketAddr, requested_buffer: usize) -> TransportResult<DatagramSocket> {
    let unspecified = if server.is_ipv4() {
        IpAddr::V4(Ipv4Addr::UNSPECIFIED)
    } else {
        IpAddr::V6(Ipv6Addr::UNSPECIFIED)
    };
    let socket = UdpSocket::bind(SocketAddr::new(unspecified, 0)).await?;
    socket.connect(server).await?;
    socket.send(&encode_control(LOCATE)?).await?;

    let mut datagram = [0u8; CONTROL_DATAGRAM_SIZE];
    let n = socket.recv(&mut datagram).await?;
    let server_buffer: usize = parse_control(&datagram[..n], "buffer size")?;

    let buffer_size = if server_buffer != requested_buffer {
        tracing::warn!(
            "Server is operating with buffer size {} instead of {}. Readjusting...",
            server_buffer,
            requested_buffer
        );
        server_buffer
    } else {
        requested_buffer
    };

    let mut datagram = [0u8; CONTROL_DATAGRAM_SIZE];
    let n = socket.recv(&mut datagram).await?;
    let port: u16 = parse_control(&datagram[..n], "port")?;

    tracing::info!("Negotiated on port {}", port);
    Ok(DatagramSocket::new(socket, SocketAddr::new(server.ip(), port), buffer_size).await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::socket::NetSocket;
    use std::time::Duration;

    async fn loopback_listener(buffer_size: usize) -> (RendezvousListener, SocketAddr) {
        let listener = RendezvousListener::bind("127.0.0.1:0".parse().unwrap(), buffer_size)
            .await
            .unwrap();
        let addr = listener.local_addr().unwrap();
        (listener, addr)
    }

    #[test]
    fn test_control_padding() {
        let datagram = encode_control("locate").unwrap();
        assert_eq!(&datagram, b"locate\0\0");
        assert_eq!(decode_control(&datagram), "locate");
    }

    #[test]
    fn test_control_too_long() {
        assert!(encode_control("123456789").is_err());
    }

    #[test]
    fn test_parse_control_rejects_garbage() {
        assert!(parse_control::<u16>(b"port\0\0\0\0", "port").is_err());
        assert_eq!(parse_control::<u16>(b"40123\0\0\0", "port").unwrap(), 40123);
    }

    #[tokio::test]
    async fn test_negotiates_buffer_and_port() {
        let (listener, addr) = loopback_listener(4096).await;

        let (server_side, client_side) = tokio::join!(listener.accept(), locate(addr, 2048));
        let server_side = server_side.unwrap();
        let client_side = client_side.unwrap();

        assert_eq!(client_side.buffer_size(), 4096);
        assert_eq!(server_side.buffer_size(), 4096);
        assert_ne!(server_side.local_port(), addr.port());
        assert_eq!(client_side.peer_port(), server_side.local_port());
        assert_eq!(server_side.peer_port(), client_side.local_port());
    }

    #[tokio::test]
    async fn test_garbage_is_dropped() {
        let (listener, addr) = loopback_listener(2048).await;

        let noise = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        noise.send_to(b"garbage!", addr).await.unwrap();
        noise.send_to(b"\xff\xfe", addr).await.unwrap();

        let (server_side, client_side) = tokio::join!(listener.accept(), locate(addr, 2048));
        let client_side = client_side.unwrap();
        assert_eq!(server_side.unwrap().peer_addr().port(), client_side.local_port());

        // The noise source never got an answer.
        let mut buf = [0u8; 8];
        let waited = tokio::time::timeout(Duration::from_millis(100), noise.recv_from(&mut buf)).await;
        assert!(waited.is_err());
    }

    #[tokio::test]
    async fn test_session_traffic_reaches_only_dedicated_port() {
        let (listener, addr) = loopback_listener(2048).await;

        let (server_side, client_side) = tokio::join!(listener.accept(), locate(addr, 2048));
        let server_side = server_side.unwrap();
        let client_side = client_side.unwrap();

        client_side.socket().send(b"ls").await.unwrap();

        let mut buf = [0u8; 64];
        let n = server_side.socket().recv(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"ls");

        let waited = tokio::time::timeout(
            Duration::from_millis(100),
            listener.socket.recv_from(&mut buf),
        )
        .await;
        assert!(waited.is_err());
    }

    #[tokio::test]
    async fn test_concurrent_negotiations_are_independent() {
        let (listener, addr) = loopback_listener(2048).await;

        let server = async {
            let a = listener.accept().await.unwrap();
            let b = listener.accept().await.unwrap();
            (a, b)
        };
        let clients = async { tokio::join!(locate(addr, 2048), locate(addr, 2048)) };
        let ((a, b), (x, y)) = tokio::join!(server, clients);
        let (x, y) = (x.unwrap(), y.unwrap());

        assert_ne!(a.local_port(), b.local_port());
        assert_ne!(x.peer_port(), y.peer_port());
    }
}
