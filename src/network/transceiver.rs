//! Transceiver for NetShell sessions
//!
//! Symmetric send/receive of text messages and file envelopes over either
//! transport kind:
//! - Stream: length-prefixed text frames and chunked file envelopes
//! - Datagram: one text message per datagram, file transfer unsupported
//!
//! A datagram text longer than the negotiated buffer size is truncated to
//! that size. Buffer-size negotiation is expected to make this rare; it is
//! kept because the peers on the wire rely on it.

use bytes::BytesMut;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufWriter};

use super::socket::{NetSocket, Transport};
use crate::archive::{self, ArchiveError};
use crate::protocol::{CodecError, Decoder, Encoder, EnvelopeHeader, SocketMode};

/// Transport errors
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Protocol error: {0}")]
    Codec(#[from] CodecError),

    #[error("Archive error: {0}")]
    Archive(#[from] ArchiveError),

    #[error("Connection closed")]
    Closed,

    #[error("Current mode {0} does not support file transfer")]
    Unsupported(SocketMode),

    #[error("Invalid file name: {0:?}")]
    InvalidFileName(String),

    #[error("Rendezvous failed: {0}")]
    Rendezvous(String),
}

pub type TransportResult<T> = Result<T, TransportError>;

/// Per-chunk transfer callback: (bytes moved so far, total bytes)
pub type ProgressFn<'a> = dyn Fn(u64, u64) + Send + Sync + 'a;

/// Suffix of a file still being received
const PARTIAL_SUFFIX: &str = "part";

/// Transfer statistics
#[derive(Debug, Default, Clone)]
pub struct TransferStats {
    /// Text messages sent
    pub messages_sent: u64,
    /// Text messages received
    pub messages_received: u64,
    /// Bytes sent, framing included
    pub bytes_sent: u64,
    /// Bytes received, framing included
    pub bytes_received: u64,
    /// Files sent
    pub files_sent: u64,
    /// Files received
    pub files_received: u64,
}

/// Message and file I/O over a transport
#[derive(Debug)]
pub struct Transceiver {
    transport: Transport,
    encoder: Encoder,
    decoder: Decoder,
    read_buf: BytesMut,
    write_buf: BytesMut,
    stats: TransferStats,
}

impl Transceiver {
    /// Create a transceiver over an established transport
    pub fn new(transport: impl Into<Transport>) -> Self {
        Self {
            transport: transport.into(),
            encoder: Encoder::new(),
            decoder: Decoder::new(),
            read_buf: BytesMut::with_capacity(4096),
            write_buf: BytesMut::with_capacity(4096),
            stats: TransferStats::default(),
        }
    }

    /// Get the transport kind
    pub fn mode(&self) -> SocketMode {
        self.transport.mode()
    }

    /// Get the underlying transport
    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    /// Get the negotiated buffer size
    pub fn buffer_size(&self) -> usize {
        self.transport.buffer_size()
    }

    /// Change the buffer size after negotiation
    pub fn set_buffer_size(&mut self, buffer_size: usize) -> TransportResult<()> {
        self.transport.set_buffer_size(buffer_size)?;
        Ok(())
    }

    /// Check whether the transport is closed
    pub fn is_closed(&self) -> bool {
        self.transport.is_closed()
    }

    /// Get transfer statistics
    pub fn stats(&self) -> &TransferStats {
        &self.stats
    }

    /// Send a text message
    pub async fn send(&mut self, text: &str) -> TransportResult<()> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }

        match &mut self.transport {
            Transport::Stream(socket) => {
                self.write_buf.clear();
                self.encoder.encode_text(text, &mut self.write_buf)?;

                let stream = socket.stream_mut();
                stream.write_all(&self.write_buf).await?;
                stream.flush().await?;
                self.stats.bytes_sent += self.write_buf.len() as u64;
            }
            Transport::Datagram(socket) => {
                let bytes = text.as_bytes();
                let limit = bytes.len().min(socket.buffer_size());
                if limit < bytes.len() {
                    tracing::debug!(
                        "Truncating {}-byte message to buffer size {}",
                        bytes.len(),
                        limit
                    );
                }

                let sent = socket.socket().send(&bytes[..limit]).await?;
                self.stats.bytes_sent += sent as u64;
            }
        }

        self.stats.messages_sent += 1;
        Ok(())
    }

    /// Receive a text message, waiting until a complete one arrives
    pub async fn recv(&mut self) -> TransportResult<String> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }

        let text = match &mut self.transport {
            Transport::Stream(socket) => loop {
                if let Some(text) = self.decoder.decode_text(&mut self.read_buf)? {
                    break text;
                }

                let n = socket.stream_mut().read_buf(&mut self.read_buf).await?;
                if n == 0 {
                    socket.mark_closed();
                    return Err(TransportError::Closed);
                }
                self.stats.bytes_received += n as u64;
            },
            Transport::Datagram(socket) => {
                let mut buf = vec![0u8; socket.buffer_size()];
                let n = socket.socket().recv(&mut buf).await?;
                self.stats.bytes_received += n as u64;

                String::from_utf8_lossy(&buf[..n])
                    .trim_end_matches(|c: char| c == '\0' || c.is_whitespace())
                    .to_string()
            }
        };

        self.stats.messages_received += 1;
        Ok(text)
    }

    /// Send a text message and wait for the reply
    pub async fn request(&mut self, text: &str) -> TransportResult<String> {
        self.send(text).await?;
        self.recv().await
    }

    /// Stream a file as a transfer envelope
    pub async fn send_file(
        &mut self,
        path: &Path,
        compressed: bool,
        progress: Option<&ProgressFn<'_>>,
    ) -> TransportResult<()> {
        let mode = self.mode();
        let Transport::Stream(socket) = &mut self.transport else {
            return Err(TransportError::Unsupported(mode));
        };

        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .ok_or_else(|| TransportError::InvalidFileName(path.display().to_string()))?;
        let file = tokio::fs::File::open(path).await?;
        let length = file.metadata().await?.len();

        self.write_buf.clear();
        self.encoder
            .encode_header(&EnvelopeHeader::new(compressed, file_name, length), &mut self.write_buf)?;
        let stream = socket.stream_mut();
        stream.write_all(&self.write_buf).await?;
        self.stats.bytes_sent += self.write_buf.len() as u64;

        let mut reader = file.take(length);
        let mut chunk = vec![0u8; socket.buffer_size()];
        let mut written = 0u64;
        while written < length {
            let n = reader.read(&mut chunk).await?;
            if n == 0 {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    format!("{} shrank during transfer", path.display()),
                )
                .into());
            }
            socket.stream_mut().write_all(&chunk[..n]).await?;
            written += n as u64;
            if let Some(progress) = progress {
                progress(written, length);
            }
        }
        socket.stream_mut().flush().await?;

        self.stats.bytes_sent += written;
        self.stats.files_sent += 1;
        Ok(())
    }

    /// Receive a transfer envelope into `dest_dir`
    ///
    /// Returns the written file, or `dest_dir` itself when the payload was an
    /// archive that has been extracted and removed.
    pub async fn recv_file(
        &mut self,
        dest_dir: &Path,
        progress: Option<&ProgressFn<'_>>,
    ) -> TransportResult<PathBuf> {
        let mode = self.mode();
        let Transport::Stream(socket) = &mut self.transport else {
            return Err(TransportError::Unsupported(mode));
        };

        let header = loop {
            if let Some(header) = self.decoder.decode_header(&mut self.read_buf)? {
                break header;
            }
            let n = socket.stream_mut().read_buf(&mut self.read_buf).await?;
            if n == 0 {
                socket.mark_closed();
                return Err(TransportError::Closed);
            }
            self.stats.bytes_received += n as u64;
        };

        let file_name = Path::new(&header.file_name)
            .file_name()
            .ok_or_else(|| TransportError::InvalidFileName(header.file_name.clone()))?
            .to_owned();
        tokio::fs::create_dir_all(dest_dir).await?;

        // Nothing appears under the real name until every byte has arrived.
        let part_path = dest_dir.join(format!(".{}.{}", uuid::Uuid::new_v4(), PARTIAL_SUFFIX));
        let finished = match self.recv_payload(&part_path, header.length, progress).await {
            Ok(()) if header.compressed => {
                archive::extract_async(part_path.clone(), dest_dir.to_path_buf())
                    .await
                    .map(|()| dest_dir.to_path_buf())
                    .map_err(TransportError::from)
            }
            Ok(()) => {
                let out_path = dest_dir.join(file_name);
                tokio::fs::rename(&part_path, &out_path)
                    .await
                    .map(|()| out_path)
                    .map_err(TransportError::from)
            }
            Err(e) => Err(e),
        };

        if header.compressed || finished.is_err() {
            discard(&part_path).await;
        }
        if finished.is_ok() {
            self.stats.files_received += 1;
        }
        finished
    }

    /// Write the next `length` payload bytes to `path`
    async fn recv_payload(
        &mut self,
        path: &Path,
        length: u64,
        progress: Option<&ProgressFn<'_>>,
    ) -> TransportResult<()> {
        let mode = self.mode();
        let Transport::Stream(socket) = &mut self.transport else {
            return Err(TransportError::Unsupported(mode));
        };

        let mut writer = BufWriter::new(tokio::fs::File::create(path).await?);
        let mut received = 0u64;

        // Bytes that arrived together with the header, already counted.
        let buffered = (self.read_buf.len() as u64).min(length) as usize;
        if buffered > 0 {
            writer.write_all(&self.read_buf.split_to(buffered)).await?;
            received += buffered as u64;
            if let Some(progress) = progress {
                progress(received, length);
            }
        }

        let mut chunk = vec![0u8; socket.buffer_size()];
        while received < length {
            let want = (length - received).min(chunk.len() as u64) as usize;
            let n = socket.stream_mut().read(&mut chunk[..want]).await?;
            if n == 0 {
                socket.mark_closed();
                return Err(TransportError::Closed);
            }
            writer.write_all(&chunk[..n]).await?;
            received += n as u64;
            self.stats.bytes_received += n as u64;
            if let Some(progress) = progress {
                progress(received, length);
            }
        }
        writer.flush().await?;
        Ok(())
    }

    /// Close the transport
    pub async fn close(&mut self) {
        if let Transport::Stream(socket) = &mut self.transport {
            let _ = socket.stream_mut().shutdown().await;
        }
        self.transport.mark_closed();
    }
}

async fn discard(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!("Failed to remove {}: {}", path.display(), e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::socket::{DatagramSocket, StreamSocket};
    use std::sync::atomic::{AtomicU64, Ordering};
    use tokio::net::{TcpListener, TcpStream, UdpSocket};
    use tokio_test::{assert_err, assert_ok};

    async fn stream_pair(buffer_size: usize) -> (Transceiver, Transceiver) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap()).await.unwrap();
        let (server, _) = listener.accept().await.unwrap();
        (
            Transceiver::new(StreamSocket::new(server, buffer_size).unwrap()),
            Transceiver::new(StreamSocket::new(client, buffer_size).unwrap()),
        )
    }

    async fn datagram_pair(a_size: usize, b_size: usize) -> (Transceiver, Transceiver) {
        let a = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let b = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let (a_addr, b_addr) = (a.local_addr().unwrap(), b.local_addr().unwrap());
        (
            Transceiver::new(DatagramSocket::new(a, b_addr, a_size).await.unwrap()),
            Transceiver::new(DatagramSocket::new(b, a_addr, b_size).await.unwrap()),
        )
    }

    #[tokio::test]
    async fn test_stream_text_exchange() {
        let (mut server, mut client) = stream_pair(2048).await;

        client.send("ls").await.unwrap();
        client.send("cd \"my docs\"").await.unwrap();

        assert_eq!(server.recv().await.unwrap(), "ls");
        assert_eq!(server.recv().await.unwrap(), "cd \"my docs\"");
        assert_eq!(server.stats().messages_received, 2);
    }

    #[tokio::test]
    async fn test_stream_peer_close() {
        let (mut server, mut client) = stream_pair(2048).await;

        client.close().await;
        assert!(client.is_closed());
        assert!(matches!(server.recv().await, Err(TransportError::Closed)));
        assert!(server.is_closed());
    }

    #[tokio::test]
    async fn test_datagram_truncates_to_buffer_size() {
        let (mut a, mut b) = datagram_pair(16, 64).await;

        a.send("0123456789abcdefTAIL").await.unwrap();
        assert_eq!(b.recv().await.unwrap(), "0123456789abcdef");
    }

    #[tokio::test]
    async fn test_datagram_trims_padding() {
        let (mut a, mut b) = datagram_pair(64, 64).await;

        a.send("8192\0\0\0").await.unwrap();
        assert_eq!(b.recv().await.unwrap(), "8192");
    }

    #[tokio::test]
    async fn test_datagram_rejects_file_transfer() {
        let (mut a, _b) = datagram_pair(64, 64).await;
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("f.txt");
        std::fs::write(&file, b"data").unwrap();

        assert!(matches!(
            a.send_file(&file, false, None).await,
            Err(TransportError::Unsupported(SocketMode::Udp))
        ));
        assert!(matches!(
            a.recv_file(dir.path(), None).await,
            Err(TransportError::Unsupported(SocketMode::Udp))
        ));
    }

    #[tokio::test]
    async fn test_file_transfer_with_small_chunks() {
        let (mut server, mut client) = stream_pair(7).await;
        let src = tempfile::tempdir().unwrap();
        let dst = tempfile::tempdir().unwrap();
        let payload: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
        let path = src.path().join("blob.bin");
        std::fs::write(&path, &payload).unwrap();

        let sent = AtomicU64::new(0);
        let on_progress = |done: u64, total: u64| {
            assert!(done <= total);
            sent.store(done, Ordering::SeqCst);
        };
        let upload = client.send_file(&path, false, Some(&on_progress));
        let download = server.recv_file(dst.path(), None);
        let (up, down) = tokio::join!(upload, download);

        assert_ok!(up);
        let out = down.unwrap();
        assert_eq!(out, dst.path().join("blob.bin"));
        assert_eq!(std::fs::read(out).unwrap(), payload);
        assert_eq!(sent.load(Ordering::SeqCst), payload.len() as u64);
    }

    #[tokio::test]
    async fn test_text_after_file_stays_framed() {
        let (mut server, mut client) = stream_pair(4096).await;
        let src = tempfile::tempdir().unwrap();
        let dst = tempfile::tempdir().unwrap();
        let path = src.path().join("small.txt");
        std::fs::write(&path, b"tiny").unwrap();

        client.send_file(&path, false, None).await.unwrap();
        client.send("ls").await.unwrap();

        server.recv_file(dst.path(), None).await.unwrap();
        assert_eq!(server.recv().await.unwrap(), "ls");
        assert_eq!(std::fs::read(dst.path().join("small.txt")).unwrap(), b"tiny");
    }

    #[tokio::test]
    async fn test_compressed_transfer_extracts() {
        let (mut server, mut client) = stream_pair(1024).await;
        let src = tempfile::tempdir().unwrap();
        let cache = tempfile::tempdir().unwrap();
        let dst = tempfile::tempdir().unwrap();
        std::fs::create_dir(src.path().join("dir")).unwrap();
        std::fs::write(src.path().join("dir/inner.txt"), b"inner").unwrap();
        std::fs::write(src.path().join("top.txt"), b"top").unwrap();

        let archive_path = archive::archive(
            &[src.path().join("dir"), src.path().join("top.txt")],
            cache.path(),
        )
        .unwrap();

        let upload = client.send_file(&archive_path, true, None);
        let download = server.recv_file(dst.path(), None);
        let (up, down) = tokio::join!(upload, download);

        assert_ok!(up);
        assert_eq!(down.unwrap(), dst.path());
        assert_eq!(std::fs::read(dst.path().join("dir/inner.txt")).unwrap(), b"inner");
        assert_eq!(std::fs::read(dst.path().join("top.txt")).unwrap(), b"top");
        let leftovers: Vec<_> = std::fs::read_dir(dst.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.path().extension().is_some_and(|ext| ext == "tar"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn test_truncated_transfer_is_an_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let mut raw = TcpStream::connect(listener.local_addr().unwrap()).await.unwrap();
        let (server, _) = listener.accept().await.unwrap();
        let mut server = Transceiver::new(StreamSocket::new(server, 64).unwrap());
        let dst = tempfile::tempdir().unwrap();

        let mut frame = BytesMut::new();
        Encoder::new()
            .encode_header(&EnvelopeHeader::new(false, "cut.bin", 100), &mut frame)
            .unwrap();
        frame.extend_from_slice(&[1u8; 10]);
        raw.write_all(&frame).await.unwrap();
        raw.shutdown().await.unwrap();

        assert_err!(server.recv_file(dst.path(), None).await);
        assert_eq!(std::fs::read_dir(dst.path()).unwrap().count(), 0);
        assert_eq!(server.stats().files_received, 0);
    }

    #[tokio::test]
    async fn test_envelope_name_cannot_escape() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let mut raw = TcpStream::connect(listener.local_addr().unwrap()).await.unwrap();
        let (server, _) = listener.accept().await.unwrap();
        let mut server = Transceiver::new(StreamSocket::new(server, 64).unwrap());
        let dst = tempfile::tempdir().unwrap();

        let mut frame = BytesMut::new();
        Encoder::new()
            .encode_header(&EnvelopeHeader::new(false, "../../escape.txt", 3), &mut frame)
            .unwrap();
        frame.extend_from_slice(b"bad");
        raw.write_all(&frame).await.unwrap();

        let out = server.recv_file(dst.path(), None).await.unwrap();
        assert_eq!(out, dst.path().join("escape.txt"));
        assert_eq!(server.stats().bytes_received, frame.len() as u64);
        assert_eq!(std::fs::read_dir(dst.path()).unwrap().count(), 1);
    }
}
