//! Process configuration, loaded from TOML.
//!
//! Every field has a default, so an empty file (or no file) is a valid
//! configuration:
//!
//! ```toml
//! log_filter = "info"
//!
//! [client]
//! user = "alice"
//! key_path = "./priv.pem"
//! server = "127.0.0.1:8080"
//! request_timeout_secs = 30
//!
//! [server]
//! database_path = "lockbox.db"
//! port = 3000
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use lockbox_protocol::ClientSettings;

use crate::error::{Error, Result};

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub client: ClientConfig,
    pub server: ServerConfig,
    /// Default `tracing` filter; `RUST_LOG` takes precedence.
    pub log_filter: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            client: ClientConfig::default(),
            server: ServerConfig::default(),
            log_filter: "info".to_string(),
        }
    }
}

impl Config {
    /// Parse a configuration from TOML text.
    pub fn from_toml_str(s: &str) -> Result<Self> {
        Ok(toml::from_str(s)?)
    }

    /// Load a configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| Error::ConfigFile {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }
}

/// Client-side settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// The user this client acts as.
    pub user: String,
    /// Where the PEM-encoded private key lives; created on first use.
    pub key_path: PathBuf,
    /// Server address, `host:port`.
    pub server: String,
    /// Upper bound on each request, in seconds.
    pub request_timeout_secs: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            user: "test".to_string(),
            key_path: PathBuf::from("./priv.pem"),
            server: "127.0.0.1:8080".to_string(),
            request_timeout_secs: 30,
        }
    }
}

impl ClientConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// The protocol settings this configuration implies.
    pub fn protocol(&self) -> ClientSettings {
        ClientSettings {
            request_timeout: self.request_timeout(),
        }
    }
}

/// Server-side settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// SQLite database file.
    pub database_path: PathBuf,
    /// Listening port.
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("lockbox.db"),
            port: 3000,
        }
    }
}
