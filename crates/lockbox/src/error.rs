//! Error types for the Lockbox facade.

use std::path::PathBuf;

use lockbox_core::CoreError;
use lockbox_protocol::ProtocolError;
use lockbox_store::StoreError;
use thiserror::Error;

/// Errors that can occur when wiring up a client or server.
#[derive(Debug, Error)]
pub enum Error {
    /// Protocol error (share, revoke, download, ...).
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Storage error.
    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    /// Key or encryption error.
    #[error("core error: {0}")]
    Core(#[from] CoreError),

    /// The configuration file is not valid TOML for [`crate::Config`].
    #[error("invalid configuration: {0}")]
    Config(#[from] toml::de::Error),

    /// The configuration file could not be read.
    #[error("cannot read configuration {path}: {source}")]
    ConfigFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The logging subscriber could not be installed.
    #[error("logging setup failed: {0}")]
    Logging(String),
}

/// Result type for facade operations.
pub type Result<T> = std::result::Result<T, Error>;
