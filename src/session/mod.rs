//! Session module - Server side of one peer conversation
//!
//! A session owns its transceiver and its sandboxed working directory and
//! moves through `Connecting -> Authenticating -> Active -> Closed`:
//! - Authenticating: optional shared-secret challenge, then the buffer size
//!   advertisement on stream transports
//! - Active: receive one line, dispatch it through the handler table, repeat
//!
//! Protocol and filesystem errors are answered as text and the session goes
//! on. Transport errors end it.

mod builtin;
mod handler;
mod sandbox;

pub use handler::*;
pub use sandbox::*;

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

use crate::auth::{self, AuthError};
use crate::network::{NetSocket, Transceiver, TransportError};
use crate::protocol::{
    unsupported_file_operation, Command, SocketMode, AUTHENTICATED, AUTH_CHALLENGE,
    INVALID_COMMAND, INVALID_CREDENTIAL,
};

/// Session errors
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Authentication error: {0}")]
    Auth(#[from] AuthError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type SessionResult<T> = Result<T, SessionError>;

/// Settings shared read-only by every session of a server
#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// Sandbox root
    pub root_dir: PathBuf,
    /// Where outgoing archives are built
    pub cache_dir: PathBuf,
    /// Shared secret; `None` disables authentication
    pub secret: Option<String>,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            root_dir: PathBuf::from("share"),
            cache_dir: PathBuf::from("cache"),
            secret: None,
        }
    }
}

/// Lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Authenticating,
    Active,
    Closed,
}

/// Why a session ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// The peer sent `dc`
    Disconnected,
    /// The peer closed the transport
    PeerClosed,
    /// The credential did not verify
    AuthenticationFailed,
    /// A transport or I/O failure
    Failed(String),
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::Disconnected => f.write_str("disconnected"),
            CloseReason::PeerClosed => f.write_str("connection closed"),
            CloseReason::AuthenticationFailed => f.write_str("invalid credential"),
            CloseReason::Failed(e) => write!(f, "error: {}", e),
        }
    }
}

impl From<SessionError> for CloseReason {
    fn from(e: SessionError) -> Self {
        match e {
            SessionError::Transport(TransportError::Closed) => CloseReason::PeerClosed,
            e => CloseReason::Failed(e.to_string()),
        }
    }
}

/// Server-side state for one peer
pub struct Session {
    transceiver: Transceiver,
    sandbox: Sandbox,
    settings: Arc<SessionSettings>,
    handlers: Arc<HandlerTable>,
    state: SessionState,
    authenticated: bool,
}

impl Session {
    /// Create a session over an established transport
    pub fn new(
        transceiver: Transceiver,
        settings: Arc<SessionSettings>,
        handlers: Arc<HandlerTable>,
    ) -> SessionResult<Self> {
        let sandbox = Sandbox::new(&settings.root_dir)?;
        Ok(Self {
            transceiver,
            sandbox,
            settings,
            handlers,
            state: SessionState::Connecting,
            authenticated: false,
        })
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    pub fn mode(&self) -> SocketMode {
        self.transceiver.mode()
    }

    pub fn sandbox(&self) -> &Sandbox {
        &self.sandbox
    }

    /// Drive the session until it closes
    pub async fn run(mut self) -> CloseReason {
        let peer = self.transceiver.transport().peer_addr();

        self.state = SessionState::Authenticating;
        match self.authenticate().await {
            Ok(true) => {}
            Ok(false) => {
                tracing::warn!("({}) Rejected credential", peer);
                self.close().await;
                return CloseReason::AuthenticationFailed;
            }
            Err(e) => {
                self.close().await;
                return e.into();
            }
        }

        self.state = SessionState::Active;
        tracing::info!(
            "({}) Connected over {}{}",
            peer,
            self.mode(),
            if self.is_authenticated() { ", authenticated" } else { "" }
        );

        let reason: CloseReason = loop {
            let line = match self.transceiver.recv().await {
                Ok(line) => line,
                Err(e) => break SessionError::from(e).into(),
            };
            tracing::debug!("({}) > {}", peer, line);

            if let Err(e) = self.dispatch(&line).await {
                break e.into();
            }
            if self.state == SessionState::Closed {
                break CloseReason::Disconnected;
            }
        };

        self.close().await;
        reason
    }

    /// Run the authentication handshake
    ///
    /// Returns `false` if the peer's credential was rejected.
    pub async fn authenticate(&mut self) -> SessionResult<bool> {
        let mode = self.mode();

        if let (SocketMode::Tcp, Some(secret)) = (mode, self.settings.secret.clone()) {
            self.transceiver.send(AUTH_CHALLENGE).await?;
            let received = self.transceiver.recv().await?;
            if !auth::verify_credential_async(secret, received).await? {
                self.transceiver.send(INVALID_CREDENTIAL).await?;
                return Ok(false);
            }
        }

        if mode == SocketMode::Tcp {
            self.transceiver.send(AUTHENTICATED).await?;
            let buffer_size = self.transceiver.buffer_size().to_string();
            self.transceiver.send(&buffer_size).await?;
        }

        self.authenticated = true;
        Ok(true)
    }

    /// Parse one line and run the matching handler
    pub async fn dispatch(&mut self, line: &str) -> SessionResult<()> {
        let command = match Command::parse(line) {
            Ok(command) => command,
            Err(e) => return self.reply(&e.to_string()).await,
        };

        let handlers = Arc::clone(&self.handlers);
        let Some(entry) = handlers.lookup(command.name()) else {
            return self.reply(INVALID_COMMAND).await;
        };

        if entry.file_operation() && !self.mode().supports_file_transfer() {
            return self.reply(&unsupported_file_operation(self.mode())).await;
        }
        if !entry.arity().accepts(command.args().len()) {
            return self.reply(&format!("Usage: {}", entry.usage())).await;
        }

        match entry.action() {
            Action::Builtin(builtin) => builtin.run(self, command.args()).await,
            Action::Extension(handler) => handler.handle(self, command.args()).await,
        }
    }

    /// Send a text reply to the peer
    pub async fn reply(&mut self, text: &str) -> SessionResult<()> {
        self.transceiver.send(text).await?;
        Ok(())
    }

    /// Close the transport
    pub async fn close(&mut self) {
        self.transceiver.close().await;
        self.state = SessionState::Closed;
    }
}
