//! Interactive client terminal
//!
//! Prompts for an endpoint, authenticates, then reads command lines until
//! the user disconnects, at which point it prompts for the next endpoint.
//! End of input leaves the terminal.

pub mod printer;

use std::io::{self, BufRead, Write};

use console::Term;

use crate::config::ClientConfig;
use crate::network::{Client, ClientError, ClientResult, Reply};
use crate::protocol::Command;

/// How a command loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Exit {
    /// The session ended, offer a new connection
    Disconnected,
    /// Input is exhausted
    EndOfInput,
}

/// Read-eval-print loop around a [`Client`]
pub struct ClientTerminal {
    config: ClientConfig,
    host: Option<String>,
    port: Option<u16>,
}

impl ClientTerminal {
    /// Create a terminal; `host` and `port` skip the first prompts
    pub fn new(config: ClientConfig, host: Option<String>, port: Option<u16>) -> Self {
        Self { config, host, port }
    }

    /// Run until input is exhausted
    pub async fn run(&mut self) -> ClientResult<()> {
        loop {
            let Some(mut client) = self.connect().await? else {
                return Ok(());
            };
            printer::success(&format!("Connected to {}", client.server_addr()));

            if self.repl(&mut client).await? == Exit::EndOfInput {
                return Ok(());
            }
        }
    }

    async fn connect(&mut self) -> ClientResult<Option<Client>> {
        loop {
            let endpoint = match self.host.take() {
                Some(host) => host,
                None => match read_line("Endpoint: ").await? {
                    Some(line) => line.trim().to_string(),
                    None => return Ok(None),
                },
            };

            let port = match self.port.take() {
                Some(port) => port,
                None => match read_line("Port: ").await? {
                    Some(line) => match line.trim().parse::<u16>() {
                        Ok(port) => port,
                        Err(_) => {
                            printer::error("Invalid port number");
                            continue;
                        }
                    },
                    None => return Ok(None),
                },
            };

            let network = self.config.network(port);
            let mut client = match Client::connect(&network, &endpoint, self.config.transfer_dirs()).await {
                Ok(client) => client,
                Err(ClientError::UnknownHost(host)) => {
                    printer::error(&format!("Unknown host: {}", host));
                    continue;
                }
                Err(e) => {
                    printer::error(&format!("Connection failed: {}", e));
                    continue;
                }
            };

            match client.handshake(read_password).await {
                Ok(()) => return Ok(Some(client)),
                Err(ClientError::InvalidCredential) => {
                    println!("Invalid credential");
                }
                Err(e) => {
                    printer::error(&format!("Handshake failed: {}", e));
                }
            }
        }
    }

    async fn repl(&mut self, client: &mut Client) -> ClientResult<Exit> {
        loop {
            let Some(line) = read_line("> ").await? else {
                client.disconnect().await?;
                return Ok(Exit::EndOfInput);
            };
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let transfer = Command::parse(line)
                .map(|command| command.is("up") || command.is("cp"))
                .unwrap_or(false);
            let bar = transfer.then(printer::transfer_bar);
            let progress = bar.clone().map(|bar| {
                move |done: u64, total: u64| {
                    bar.set_length(total);
                    bar.set_position(done);
                }
            });

            let result = match &progress {
                Some(progress) => client.execute(line, Some(progress)).await,
                None => client.execute(line, None).await,
            };
            if let Some(bar) = bar {
                bar.finish_and_clear();
            }

            match result {
                Ok(Reply::Text(text)) => {
                    if !text.is_empty() {
                        println!("{}", text);
                    }
                }
                Ok(Reply::Saved(path)) => {
                    let shown = path.canonicalize().unwrap_or(path);
                    printer::success(&format!("File saved to {}", shown.display()));
                }
                Ok(Reply::Rejected(reason)) => printer::error(&reason),
                Ok(Reply::Disconnected) => return Ok(Exit::Disconnected),
                Err(ClientError::Command(e)) => printer::error(&e.to_string()),
                Err(e) => {
                    printer::error(&format!("Connection lost: {}", e));
                    return Ok(Exit::Disconnected);
                }
            }
        }
    }
}

/// Prompt and read one line from stdin, `None` at end of input
async fn read_line(prompt: &'static str) -> io::Result<Option<String>> {
    tokio::task::spawn_blocking(move || -> io::Result<Option<String>> {
        let mut stdout = io::stdout();
        write!(stdout, "{}", prompt)?;
        stdout.flush()?;

        let mut line = String::new();
        if io::stdin().lock().read_line(&mut line)? == 0 {
            return Ok(None);
        }
        Ok(Some(line.trim_end_matches(&['\r', '\n'][..]).to_string()))
    })
    .await
    .map_err(io::Error::other)?
}

/// Ask for the password without echoing it
async fn read_password() -> ClientResult<String> {
    printer::warning("This endpoint requires a password!");
    let password = tokio::task::spawn_blocking(|| {
        let term = Term::stdout();
        term.write_str("Password: ")?;
        term.read_secure_line()
    })
    .await
    .map_err(io::Error::other)??;
    Ok(password)
}
