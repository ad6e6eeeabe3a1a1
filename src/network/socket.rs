//! Transport sockets
//!
//! Connection metadata for the two transport kinds. No framing happens
//! here; the [`Transceiver`](super::Transceiver) owns all message I/O.

use std::io;
use std::net::SocketAddr;

use tokio::net::{TcpStream, UdpSocket};

use crate::protocol::SocketMode;

/// Capabilities shared by every transport socket
pub trait NetSocket {
    /// Transport kind
    fn mode(&self) -> SocketMode;

    /// Address of the remote peer
    fn peer_addr(&self) -> SocketAddr;

    /// Locally bound address
    fn local_addr(&self) -> SocketAddr;

    /// Negotiated application buffer size
    fn buffer_size(&self) -> usize;

    /// Whether the socket has been closed locally or by the peer
    fn is_closed(&self) -> bool;

    /// Port of the remote peer
    fn peer_port(&self) -> u16 {
        self.peer_addr().port()
    }

    /// Locally bound port
    fn local_port(&self) -> u16 {
        self.local_addr().port()
    }
}

fn check_buffer_size(buffer_size: usize) -> io::Result<usize> {
    if buffer_size == 0 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "Buffer size must be greater than 0",
        ));
    }
    Ok(buffer_size)
}

/// An established stream connection
#[derive(Debug)]
pub struct StreamSocket {
    stream: TcpStream,
    peer_addr: SocketAddr,
    local_addr: SocketAddr,
    buffer_size: usize,
    closed: bool,
}

impl StreamSocket {
    /// Wrap an accepted or connected stream
    pub fn new(stream: TcpStream, buffer_size: usize) -> io::Result<Self> {
        Ok(Self {
            peer_addr: stream.peer_addr()?,
            local_addr: stream.local_addr()?,
            stream,
            buffer_size: check_buffer_size(buffer_size)?,
            closed: false,
        })
    }

    /// Access the underlying stream
    pub fn stream_mut(&mut self) -> &mut TcpStream {
        &mut self.stream
    }

    pub(crate) fn set_buffer_size(&mut self, buffer_size: usize) -> io::Result<()> {
        self.buffer_size = check_buffer_size(buffer_size)?;
        Ok(())
    }

    pub(crate) fn mark_closed(&mut self) {
        self.closed = true;
    }
}

impl NetSocket for StreamSocket {
    fn mode(&self) -> SocketMode {
        SocketMode::Tcp
    }

    fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    fn is_closed(&self) -> bool {
        self.closed
    }
}

/// A datagram socket dedicated to a single peer
///
/// The socket is connected to the peer, so it neither sends to nor receives
/// from anyone else.
#[derive(Debug)]
pub struct DatagramSocket {
    socket: UdpSocket,
    peer_addr: SocketAddr,
    local_addr: SocketAddr,
    buffer_size: usize,
    closed: bool,
}

impl DatagramSocket {
    /// Bind `socket` to `peer_addr` for the lifetime of a session
    pub async fn new(socket: UdpSocket, peer_addr: SocketAddr, buffer_size: usize) -> io::Result<Self> {
        let buffer_size = check_buffer_size(buffer_size)?;
        socket.connect(peer_addr).await?;
        Ok(Self {
            local_addr: socket.local_addr()?,
            socket,
            peer_addr,
            buffer_size,
            closed: false,
        })
    }

    /// Access the underlying socket
    pub fn socket(&self) -> &UdpSocket {
        &self.socket
    }

    pub(crate) fn set_buffer_size(&mut self, buffer_size: usize) -> io::Result<()> {
        self.buffer_size = check_buffer_size(buffer_size)?;
        Ok(())
    }

    pub(crate) fn mark_closed(&mut self) {
        self.closed = true;
    }
}

impl NetSocket for DatagramSocket {
    fn mode(&self) -> SocketMode {
        SocketMode::Udp
    }

    fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    fn is_closed(&self) -> bool {
        self.closed
    }
}

/// Either transport kind
#[derive(Debug)]
pub enum Transport {
    Stream(StreamSocket),
    Datagram(DatagramSocket),
}

impl Transport {
    fn inner(&self) -> &dyn NetSocket {
        match self {
            Transport::Stream(s) => s,
            Transport::Datagram(s) => s,
        }
    }

    pub(crate) fn set_buffer_size(&mut self, buffer_size: usize) -> io::Result<()> {
        match self {
            Transport::Stream(s) => s.set_buffer_size(buffer_size),
            Transport::Datagram(s) => s.set_buffer_size(buffer_size),
        }
    }

    pub(crate) fn mark_closed(&mut self) {
        match self {
            Transport::Stream(s) => s.mark_closed(),
            Transport::Datagram(s) => s.mark_closed(),
        }
    }
}

impl From<StreamSocket> for Transport {
    fn from(socket: StreamSocket) -> Self {
        Transport::Stream(socket)
    }
}

impl From<DatagramSocket> for Transport {
    fn from(socket: DatagramSocket) -> Self {
        Transport::Datagram(socket)
    }
}

impl NetSocket for Transport {
    fn mode(&self) -> SocketMode {
        self.inner().mode()
    }

    fn peer_addr(&self) -> SocketAddr {
        self.inner().peer_addr()
    }

    fn local_addr(&self) -> SocketAddr {
        self.inner().local_addr()
    }

    fn buffer_size(&self) -> usize {
        self.inner().buffer_size()
    }

    fn is_closed(&self) -> bool {
        self.inner().is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_stream_metadata() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).await.unwrap();
        let (accepted, _) = listener.accept().await.unwrap();

        let socket = StreamSocket::new(accepted, 4096).unwrap();
        assert_eq!(socket.mode(), SocketMode::Tcp);
        assert_eq!(socket.local_port(), addr.port());
        assert_eq!(socket.peer_addr(), client.local_addr().unwrap());
        assert_eq!(socket.buffer_size(), 4096);
        assert!(!socket.is_closed());
    }

    #[tokio::test]
    async fn test_zero_buffer_rejected() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let _client = TcpStream::connect(listener.local_addr().unwrap()).await.unwrap();
        let (accepted, _) = listener.accept().await.unwrap();

        assert!(StreamSocket::new(accepted, 0).is_err());
    }

    #[tokio::test]
    async fn test_datagram_metadata_through_transport() {
        let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let local = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let local_addr = local.local_addr().unwrap();

        let socket = DatagramSocket::new(local, peer.local_addr().unwrap(), 512)
            .await
            .unwrap();
        let mut transport = Transport::from(socket);

        assert_eq!(transport.mode(), SocketMode::Udp);
        assert_eq!(transport.peer_port(), peer.local_addr().unwrap().port());
        assert_eq!(transport.local_addr(), local_addr);

        transport.set_buffer_size(1024).unwrap();
        assert_eq!(transport.buffer_size(), 1024);
        transport.mark_closed();
        assert!(transport.is_closed());
    }
}
