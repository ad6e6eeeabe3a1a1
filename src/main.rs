//! NetShell - Remote shell and file exchange over TCP or UDP
//!
//! A small command protocol for browsing, fetching, uploading and deleting
//! files in a sandboxed directory on a remote host.

mod archive;
mod auth;
mod config;
mod network;
mod protocol;
mod session;
mod terminal;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use config::Config;
use network::{Server, ServerEvent};
use protocol::SocketMode;
use session::HandlerTable;
use terminal::{printer, ClientTerminal};

/// NetShell - Remote shell and file exchange
#[derive(Parser)]
#[command(name = "netshell")]
#[command(author = "NetShell Contributors")]
#[command(version = "0.1.0")]
#[command(about = "Browse and exchange files with a remote host over TCP or UDP", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve a directory to remote clients
    Server {
        /// Port to listen on
        #[arg(short, long)]
        port: Option<u16>,

        /// Transport kind
        #[arg(short, long, value_enum)]
        mode: Option<SocketMode>,

        /// Require clients to authenticate (TCP only)
        #[arg(long)]
        password: Option<String>,

        /// Directory to share
        #[arg(short, long)]
        root: Option<PathBuf>,

        /// Buffer size advertised to clients
        #[arg(short, long)]
        buffer_size: Option<usize>,
    },

    /// Open an interactive session with a server
    Client {
        /// Transport kind
        #[arg(short, long, value_enum)]
        mode: Option<SocketMode>,

        /// Server host name or address
        #[arg(long)]
        host: Option<String>,

        /// Server port
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Show current configuration
    Config {
        /// Generate sample configuration
        #[arg(long)]
        generate: bool,

        /// Output path for generated config
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = if let Some(config_path) = &cli.config {
        Config::load(config_path)?
    } else {
        Config::load_default().unwrap_or_default()
    };

    // Initialize logging
    let filter = if cli.verbose || config.general.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    match cli.command {
        Commands::Server {
            port,
            mode,
            password,
            root,
            buffer_size,
        } => {
            let mut server_config = config.server;
            if let Some(port) = port {
                server_config.port = port;
            }
            if let Some(mode) = mode {
                server_config.mode = mode;
            }
            if password.is_some() {
                server_config.password = password;
            }
            if let Some(root) = root {
                server_config.root_dir = root;
            }
            if let Some(buffer_size) = buffer_size {
                server_config.buffer_size = buffer_size;
            }
            run_server(server_config).await?;
        }
        Commands::Client { mode, host, port } => {
            let mut client_config = config.client;
            if let Some(mode) = mode {
                client_config.mode = mode;
            }
            let host = host.or_else(|| client_config.host.clone());
            // A configured host also fixes the port; otherwise both are prompted.
            let port = port.or(host.as_ref().map(|_| client_config.port));
            run_client(client_config, host, port).await?;
        }
        Commands::Config { generate, output } => {
            if generate {
                let sample = config::generate_sample_config()?;
                if let Some(path) = output {
                    std::fs::write(&path, &sample)?;
                    println!("Configuration written to: {}", path.display());
                } else {
                    println!("{}", sample);
                }
            } else {
                println!("{}", toml::to_string_pretty(&config)?);
            }
        }
    }

    Ok(())
}

/// Run the server until Ctrl+C
async fn run_server(server_config: config::ServerConfig) -> anyhow::Result<()> {
    if server_config.buffer_size == 0 {
        anyhow::bail!("Buffer size must be greater than 0");
    }
    std::fs::create_dir_all(&server_config.cache_dir)?;

    let mut server = Server::new(
        server_config.network(),
        server_config.session(),
        HandlerTable::builtin(),
    );
    let mut event_rx = server
        .take_event_receiver()
        .ok_or_else(|| anyhow::anyhow!("Server event receiver already taken"))?;

    let bind_addr = server.start().await?;

    printer::success(&format!(
        "[SYSTEM/{}] Listening on {}",
        server.mode(),
        bind_addr
    ));
    printer::info(&format!("Sharing {}", server_config.root_dir.display()));
    if server.requires_password() {
        printer::info("Clients must authenticate");
    }
    println!("Press Ctrl+C to stop.\n");

    loop {
        tokio::select! {
            Some(event) = event_rx.recv() => {
                match event {
                    ServerEvent::SessionOpened { addr } => {
                        printer::info(&format!("[SYSTEM/{}] ({}) Connected", server.mode(), addr));
                    }
                    ServerEvent::SessionClosed { addr, reason } => {
                        printer::info(&format!(
                            "[SYSTEM/{}] ({}) Disconnected: {}",
                            server.mode(),
                            addr,
                            reason
                        ));
                    }
                    ServerEvent::Error { message } => {
                        tracing::error!("Server error: {}", message);
                    }
                    _ => {}
                }
            }
            _ = tokio::signal::ctrl_c() => {
                println!("\nShutting down...");
                break;
            }
        }
    }

    server.stop().await?;
    tracing::info!("Server stopped");

    Ok(())
}

/// Run the interactive client terminal
async fn run_client(
    client_config: config::ClientConfig,
    host: Option<String>,
    port: Option<u16>,
) -> anyhow::Result<()> {
    tracing::debug!(
        "Client mode {}, receiving into {}",
        client_config.mode,
        client_config.receive_dir.display()
    );

    let mut terminal = ClientTerminal::new(client_config, host, port);
    terminal.run().await?;
    Ok(())
}
