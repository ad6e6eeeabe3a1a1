//! NetShell Server
//!
//! Accepts peers on one transport kind and runs a [`Session`] for each of
//! them on its own task. The listen loop never waits on a session.

use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, RwLock};

use super::rendezvous::RendezvousListener;
use super::socket::{NetSocket, StreamSocket, Transport};
use super::transceiver::Transceiver;
use super::NetworkConfig;
use crate::protocol::SocketMode;
use crate::session::{HandlerTable, Session, SessionSettings};

/// Server errors
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Server already running")]
    AlreadyRunning,

    #[error("Server not running")]
    NotRunning,

    #[error("Bind failed: {0}")]
    BindFailed(String),
}

pub type ServerResult<T> = Result<T, ServerError>;

/// Events emitted by the server
#[derive(Debug, Clone)]
pub enum ServerEvent {
    /// Server started
    Started {
        bind_addr: SocketAddr,
        mode: SocketMode,
    },
    /// A session has been opened for a peer
    SessionOpened {
        addr: SocketAddr,
    },
    /// A session has ended
    SessionClosed {
        addr: SocketAddr,
        reason: String,
    },
    /// Server stopped
    Stopped,
    /// Error occurred
    Error {
        message: String,
    },
}

/// NetShell Server
pub struct Server {
    /// Network configuration
    config: NetworkConfig,
    /// Settings handed to every session
    settings: Arc<SessionSettings>,
    /// Commands served by every session
    handlers: Arc<HandlerTable>,
    /// Event sender
    event_tx: mpsc::Sender<ServerEvent>,
    /// Event receiver (for consumers)
    event_rx: Option<mpsc::Receiver<ServerEvent>>,
    /// Shutdown signal
    shutdown_tx: Option<mpsc::Sender<()>>,
    /// Whether the server is running
    running: Arc<RwLock<bool>>,
}

impl Server {
    /// Create a new server
    pub fn new(config: NetworkConfig, mut settings: SessionSettings, handlers: HandlerTable) -> Self {
        if config.mode == SocketMode::Udp && settings.secret.take().is_some() {
            tracing::warn!("Password protection only supports TCP. Password ignored");
        }

        tracing::debug!("{} commands registered", handlers.len());

        let (event_tx, event_rx) = mpsc::channel(256);

        Self {
            config,
            settings: Arc::new(settings),
            handlers: Arc::new(handlers),
            event_tx,
            event_rx: Some(event_rx),
            shutdown_tx: None,
            running: Arc::new(RwLock::new(false)),
        }
    }

    /// Take the event receiver (can only be called once)
    pub fn take_event_receiver(&mut self) -> Option<mpsc::Receiver<ServerEvent>> {
        self.event_rx.take()
    }

    /// Transport kind this server listens on
    pub fn mode(&self) -> SocketMode {
        self.config.mode
    }

    /// Whether peers must authenticate
    pub fn requires_password(&self) -> bool {
        self.settings.secret.is_some()
    }

    /// Start the server, returning the bound address
    pub async fn start(&mut self) -> ServerResult<SocketAddr> {
        {
            let running = self.running.read().await;
            if *running {
                return Err(ServerError::AlreadyRunning);
            }
        }

        let bind_addr = format!("{}:{}", self.config.bind_address, self.config.port);
        let bind_err =
            |e: std::io::Error| ServerError::BindFailed(format!("Failed to bind to {}: {}", bind_addr, e));

        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>(1);

        let local_addr = match self.config.mode {
            SocketMode::Tcp => {
                let listener = TcpListener::bind(&bind_addr).await.map_err(bind_err)?;
                let local_addr = listener.local_addr()?;
                tokio::spawn(listen_tcp(
                    listener,
                    self.config.buffer_size,
                    self.context(),
                    shutdown_rx,
                ));
                local_addr
            }
            SocketMode::Udp => {
                let addr = super::resolve_host(&self.config.bind_address, self.config.port)
                    .await
                    .map_err(bind_err)?;
                let listener = RendezvousListener::bind(addr, self.config.buffer_size)
                    .await
                    .map_err(bind_err)?;
                let local_addr = listener.local_addr()?;
                tokio::spawn(listen_udp(listener, self.context(), shutdown_rx));
                local_addr
            }
        };

        tracing::info!("[{}] Listening on {}", self.config.mode, local_addr);
        self.shutdown_tx = Some(shutdown_tx);

        {
            let mut running = self.running.write().await;
            *running = true;
        }

        let _ = self.event_tx.try_send(ServerEvent::Started {
            bind_addr: local_addr,
            mode: self.config.mode,
        });

        Ok(local_addr)
    }

    /// Stop accepting peers
    ///
    /// Sessions already running continue until their peers leave.
    pub async fn stop(&mut self) -> ServerResult<()> {
        {
            let running = self.running.read().await;
            if !*running {
                return Err(ServerError::NotRunning);
            }
        }

        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(()).await;
        }

        Ok(())
    }

    /// Check if the server is running
    pub async fn is_running(&self) -> bool {
        *self.running.read().await
    }

    fn context(&self) -> ListenContext {
        ListenContext {
            settings: self.settings.clone(),
            handlers: self.handlers.clone(),
            event_tx: self.event_tx.clone(),
            running: self.running.clone(),
        }
    }
}

/// State shared by a listen loop and the sessions it spawns
#[derive(Clone)]
struct ListenContext {
    settings: Arc<SessionSettings>,
    handlers: Arc<HandlerTable>,
    event_tx: mpsc::Sender<ServerEvent>,
    running: Arc<RwLock<bool>>,
}

impl ListenContext {
    fn emit(&self, event: ServerEvent) {
        // A consumer that stopped reading must not stall the sessions.
        let _ = self.event_tx.try_send(event);
    }

    fn spawn_session(&self, transport: Transport) {
        let ctx = self.clone();
        tokio::spawn(async move {
            let addr = transport.peer_addr();
            let session = match Session::new(
                Transceiver::new(transport),
                ctx.settings.clone(),
                ctx.handlers.clone(),
            ) {
                Ok(session) => session,
                Err(e) => {
                    tracing::error!("({}) Failed to open session: {}", addr, e);
                    ctx.emit(ServerEvent::Error {
                        message: e.to_string(),
                    });
                    return;
                }
            };

            ctx.emit(ServerEvent::SessionOpened { addr });
            let reason = session.run().await;
            tracing::info!("({}) Disconnected: {}", addr, reason);
            ctx.emit(ServerEvent::SessionClosed {
                addr,
                reason: reason.to_string(),
            });
        });
    }

    async fn finish(&self) {
        let mut running = self.running.write().await;
        *running = false;
        self.emit(ServerEvent::Stopped);
    }
}

async fn listen_tcp(
    listener: TcpListener,
    buffer_size: usize,
    ctx: ListenContext,
    mut shutdown_rx: mpsc::Receiver<()>,
) {
    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, addr)) => {
                        tracing::debug!("New connection from {}", addr);
                        match StreamSocket::new(stream, buffer_size) {
                            Ok(socket) => ctx.spawn_session(socket.into()),
                            Err(e) => tracing::error!("({}) Socket setup failed: {}", addr, e),
                        }
                    }
                    Err(e) => {
                        tracing::error!("Accept error: {}", e);
                    }
                }
            }
            _ = shutdown_rx.recv() => {
                tracing::info!("Server shutdown requested");
                break;
            }
        }
    }

    ctx.finish().await;
}

async fn listen_udp(
    listener: RendezvousListener,
    ctx: ListenContext,
    mut shutdown_rx: mpsc::Receiver<()>,
) {
    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok(socket) => ctx.spawn_session(socket.into()),
                    Err(e) => {
                        tracing::error!("Rendezvous error: {}", e);
                    }
                }
            }
            _ = shutdown_rx.recv() => {
                tracing::info!("Server shutdown requested");
                break;
            }
        }
    }

    ctx.finish().await;
}
