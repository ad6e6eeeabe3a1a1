//! NetShell Client
//!
//! Connects to a NetShell server, runs the authentication handshake and
//! drives commands, including the file transfer flows around `up` and `cp`.

use std::future::Future;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpStream;

use super::rendezvous;
use super::socket::{NetSocket, StreamSocket, Transport};
use super::transceiver::{ProgressFn, Transceiver, TransportError};
use super::NetworkConfig;
use crate::archive::{self, ArchiveError};
use crate::auth::{self, AuthError};
use crate::session::Builtin;
use crate::protocol::{
    unsupported_file_operation, Command, CommandError, SocketMode, AUTHENTICATED, AUTH_CHALLENGE,
    DISCONNECT, READY,
};

/// Client errors
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Authentication error: {0}")]
    Auth(#[from] AuthError),

    #[error("Archive error: {0}")]
    Archive(#[from] ArchiveError),

    #[error("{0}")]
    Command(#[from] CommandError),

    #[error("Unknown host: {0}")]
    UnknownHost(String),

    #[error("Connection timeout")]
    Timeout,

    #[error("Invalid credential")]
    InvalidCredential,

    #[error("Unexpected reply: {0}")]
    UnexpectedReply(String),
}

pub type ClientResult<T> = Result<T, ClientError>;

/// Local directories used by file transfers
#[derive(Debug, Clone)]
pub struct TransferDirs {
    /// Where downloads are saved
    pub receive_dir: PathBuf,
    /// Where outgoing archives are built
    pub cache_dir: PathBuf,
}

impl Default for TransferDirs {
    fn default() -> Self {
        Self {
            receive_dir: PathBuf::from("received"),
            cache_dir: PathBuf::from("cache"),
        }
    }
}

/// Outcome of one command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Text answer from the server
    Text(String),
    /// A download was saved here
    Saved(PathBuf),
    /// The command was refused, locally or by the server
    Rejected(String),
    /// The session was closed with `dc`
    Disconnected,
}

/// NetShell Client
pub struct Client {
    transceiver: Transceiver,
    dirs: TransferDirs,
}

impl Client {
    /// Connect to `host` with the transport named in `config`
    pub async fn connect(config: &NetworkConfig, host: &str, dirs: TransferDirs) -> ClientResult<Self> {
        let server_addr = super::resolve_host(host, config.port)
            .await
            .map_err(|_| ClientError::UnknownHost(host.to_string()))?;
        let transport = open_transport(config, server_addr).await?;

        tracing::info!("Connected to {} over {}", server_addr, config.mode);
        Ok(Self {
            transceiver: Transceiver::new(transport),
            dirs,
        })
    }

    pub fn mode(&self) -> SocketMode {
        self.transceiver.mode()
    }

    pub fn server_addr(&self) -> SocketAddr {
        self.transceiver.transport().peer_addr()
    }

    pub fn buffer_size(&self) -> usize {
        self.transceiver.buffer_size()
    }

    pub fn is_closed(&self) -> bool {
        self.transceiver.is_closed()
    }

    /// Authenticate and adopt the server's buffer size
    ///
    /// `credential` is only called if the server asks for a password.
    /// Datagram sessions have no handshake.
    pub async fn handshake<F, Fut>(&mut self, credential: F) -> ClientResult<()>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = ClientResult<String>>,
    {
        if self.mode() != SocketMode::Tcp {
            return Ok(());
        }

        let mut reply = self.transceiver.recv().await?;
        if reply.eq_ignore_ascii_case(AUTH_CHALLENGE) {
            let password = credential().await?;
            let hash = tokio::task::spawn_blocking(move || auth::hash_credential(&password))
                .await
                .map_err(AuthError::from)??;
            reply = self.transceiver.request(&hash).await?;
        }

        if !reply.eq_ignore_ascii_case(AUTHENTICATED) {
            self.transceiver.close().await;
            return Err(ClientError::InvalidCredential);
        }

        let advertised = self.transceiver.recv().await?;
        let buffer_size: usize = advertised
            .trim()
            .parse()
            .map_err(|_| ClientError::UnexpectedReply(advertised.clone()))?;
        if buffer_size != self.buffer_size() {
            tracing::debug!("Adopting server buffer size {}", buffer_size);
        }
        self.transceiver.set_buffer_size(buffer_size)?;
        Ok(())
    }

    /// Run one command line
    pub async fn execute(&mut self, line: &str, progress: Option<&ProgressFn<'_>>) -> ClientResult<Reply> {
        let line = line.trim();
        let command = Command::parse(line)?;

        if command.is(DISCONNECT) {
            self.disconnect().await?;
            return Ok(Reply::Disconnected);
        }

        let file_operation = Builtin::from_name(command.name()).is_some_and(|b| b.file_operation());
        if file_operation && !self.mode().supports_file_transfer() {
            return Ok(Reply::Rejected(unsupported_file_operation(self.mode())));
        }

        if command.is("up") {
            let paths: Vec<PathBuf> = command.args().iter().map(PathBuf::from).collect();
            return self.upload(&paths, progress).await;
        }
        if command.is("cp") {
            return self.download(line, progress).await;
        }

        Ok(Reply::Text(self.transceiver.request(line).await?))
    }

    /// Send local paths to the server's working directory
    pub async fn upload(&mut self, paths: &[PathBuf], progress: Option<&ProgressFn<'_>>) -> ClientResult<Reply> {
        if paths.is_empty() {
            return Ok(Reply::Rejected("Usage: up <path> [...]".to_string()));
        }
        if paths.iter().any(|path| !path.exists()) {
            return Ok(Reply::Rejected("Some files do not exist.".to_string()));
        }

        if let [single] = paths {
            if !single.is_dir() {
                self.transceiver.send("up").await?;
                self.transceiver.send_file(single, false, progress).await?;
                return Ok(Reply::Text(self.transceiver.recv().await?));
            }
        }

        tracing::info!("Directory or multiple files detected. Compressing...");
        let archive_path = archive::archive_async(paths.to_vec(), self.dirs.cache_dir.clone()).await?;
        let sent = self.send_archive(&archive_path, progress).await;
        if let Err(e) = tokio::fs::remove_file(&archive_path).await {
            tracing::warn!("Failed to remove archive {}: {}", archive_path.display(), e);
        }
        sent?;

        Ok(Reply::Text(self.transceiver.recv().await?))
    }

    async fn send_archive(&mut self, archive_path: &Path, progress: Option<&ProgressFn<'_>>) -> ClientResult<()> {
        self.transceiver.send("up").await?;
        self.transceiver.send_file(archive_path, true, progress).await?;
        Ok(())
    }

    /// Request files from the server and save them in the receive directory
    pub async fn download(&mut self, line: &str, progress: Option<&ProgressFn<'_>>) -> ClientResult<Reply> {
        let readiness = self.transceiver.request(line).await?;
        if !readiness.eq_ignore_ascii_case(READY) {
            return Ok(Reply::Rejected(readiness));
        }

        let receive_dir = self.dirs.receive_dir.clone();
        let saved = self.transceiver.recv_file(&receive_dir, progress).await?;
        Ok(Reply::Saved(saved))
    }

    /// End the session
    pub async fn disconnect(&mut self) -> ClientResult<()> {
        if !self.transceiver.is_closed() {
            self.transceiver.send(DISCONNECT).await?;
            self.transceiver.close().await;
        }
        Ok(())
    }
}

async fn open_transport(config: &NetworkConfig, server_addr: SocketAddr) -> ClientResult<Transport> {
    let timeout = Duration::from_millis(config.connect_timeout_ms);

    let transport = match config.mode {
        SocketMode::Tcp => {
            let stream = tokio::time::timeout(timeout, TcpStream::connect(server_addr))
                .await
                .map_err(|_| ClientError::Timeout)??;
            StreamSocket::new(stream, config.buffer_size)?.into()
        }
        SocketMode::Udp => tokio::time::timeout(timeout, rendezvous::locate(server_addr, config.buffer_size))
            .await
            .map_err(|_| ClientError::Timeout)??
            .into(),
    };

    Ok(transport)
}
