//! Configuration module
//!
//! Handles loading and saving NetShell configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::network::{NetworkConfig, TransferDirs};
use crate::protocol::{SocketMode, DEFAULT_BUFFER_SIZE, DEFAULT_PORT};
use crate::session::SessionSettings;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Config file not found: {0}")]
    NotFound(PathBuf),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// General settings
    #[serde(default)]
    pub general: GeneralConfig,

    /// Server settings
    #[serde(default)]
    pub server: ServerConfig,

    /// Client settings
    #[serde(default)]
    pub client: ClientConfig,
}

/// General configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Enable verbose logging
    #[serde(default)]
    pub verbose: bool,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,
    /// Transport kind
    #[serde(default)]
    pub mode: SocketMode,
    /// Interface to bind to
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    /// Buffer size advertised to clients
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
    /// Shared secret (TCP only)
    pub password: Option<String>,
    /// Root of the shared directory tree
    #[serde(default = "default_root_dir")]
    pub root_dir: PathBuf,
    /// Directory for temporary archives
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,
}

/// Client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Transport kind
    #[serde(default)]
    pub mode: SocketMode,
    /// Default server host, prompted for if absent
    pub host: Option<String>,
    /// Default server port
    #[serde(default = "default_port")]
    pub port: u16,
    /// Buffer size requested before negotiation
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
    /// Where downloads are saved
    #[serde(default = "default_receive_dir")]
    pub receive_dir: PathBuf,
    /// Directory for temporary archives
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,
    /// Connection timeout in ms
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_buffer_size() -> usize {
    DEFAULT_BUFFER_SIZE
}

fn default_root_dir() -> PathBuf {
    PathBuf::from("share")
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from("cache")
}

fn default_receive_dir() -> PathBuf {
    PathBuf::from("received")
}

fn default_connect_timeout() -> u64 {
    5000
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            mode: SocketMode::default(),
            bind_address: default_bind_address(),
            buffer_size: default_buffer_size(),
            password: None,
            root_dir: default_root_dir(),
            cache_dir: default_cache_dir(),
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            mode: SocketMode::default(),
            host: None,
            port: default_port(),
            buffer_size: default_buffer_size(),
            receive_dir: default_receive_dir(),
            cache_dir: default_cache_dir(),
            connect_timeout_ms: default_connect_timeout(),
        }
    }
}

impl ServerConfig {
    /// Network settings for the listener
    pub fn network(&self) -> NetworkConfig {
        NetworkConfig::new(self.mode, self.port)
            .with_bind_address(self.bind_address.clone())
            .with_buffer_size(self.buffer_size)
    }

    /// Settings shared by every session
    pub fn session(&self) -> SessionSettings {
        SessionSettings {
            root_dir: self.root_dir.clone(),
            cache_dir: self.cache_dir.clone(),
            secret: self.password.clone().filter(|p| !p.trim().is_empty()),
        }
    }
}

impl ClientConfig {
    /// Network settings for connecting to `port`
    pub fn network(&self, port: u16) -> NetworkConfig {
        NetworkConfig {
            connect_timeout_ms: self.connect_timeout_ms,
            ..NetworkConfig::new(self.mode, port).with_buffer_size(self.buffer_size)
        }
    }

    /// Local transfer directories
    pub fn transfer_dirs(&self) -> TransferDirs {
        TransferDirs {
            receive_dir: self.receive_dir.clone(),
            cache_dir: self.cache_dir.clone(),
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> ConfigResult<Self> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }

        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration from the default location
    pub fn load_default() -> ConfigResult<Self> {
        let config_paths = [
            dirs::config_dir().map(|p| p.join("netshell/config.toml")),
            Some(PathBuf::from("./netshell.toml")),
            Some(PathBuf::from("./config.toml")),
        ];

        for path in config_paths.iter().flatten() {
            if path.exists() {
                return Self::load(path);
            }
        }

        // Return default config if no file found
        Ok(Self::default())
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> ConfigResult<()> {
        let contents = toml::to_string_pretty(self)?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        std::fs::write(path, contents)?;
        Ok(())
    }
}

/// Generate a sample configuration file
pub fn generate_sample_config() -> ConfigResult<String> {
    let config = Config {
        server: ServerConfig {
            password: Some("change-me".to_string()),
            ..Default::default()
        },
        client: ClientConfig {
            host: Some("127.0.0.1".to_string()),
            ..Default::default()
        },
        ..Default::default()
    };

    Ok(toml::to_string_pretty(&config)?)
}
