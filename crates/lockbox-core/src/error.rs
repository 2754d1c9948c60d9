//! Error types for Lockbox Core.

use std::path::PathBuf;

use thiserror::Error;

/// Core errors that can occur during key handling and encryption.
///
/// `Decryption` deliberately carries no detail: unwrap and open failures
/// must look identical to the caller whatever the underlying cause.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("encryption failed")]
    Encryption,

    #[error("decryption failed")]
    Decryption,

    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("invalid name: {0}")]
    InvalidName(String),

    #[error("key file {path}: {source}")]
    KeyFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("PKCS#8 error: {0}")]
    Pkcs8(String),

    #[error("encoding error: {0}")]
    Encoding(String),
}

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
