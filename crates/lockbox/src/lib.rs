//! # Lockbox
//!
//! Encrypted file sharing on an untrusted server.
//!
//! ## Overview
//!
//! The server stores only ciphertexts and wrapped keys. Owners decide who
//! can read a file by wrapping its content key for each grantee, and revoke
//! access by rotating that key:
//!
//! - **Upload**: seal the file under a content key; wrap the key for yourself
//! - **Share**: wrap the same content key for another user
//! - **Revoke**: rotate the content key, re-seal, and re-wrap for everyone left
//! - **Download**: unwrap your grant and open the file
//!
//! Every mutation is signed by the owner and verified by the server against
//! the owner's registered public key before anything is written.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use lockbox::{Config, FileName, LocalTransport, UserId};
//!
//! async fn example() -> anyhow::Result<()> {
//!     let config = Config::load("config.toml")?;
//!     lockbox::logging::init(&config.log_filter)?;
//!
//!     let server = lockbox::open_server(&config.server)?;
//!     let alice = lockbox::open_client(&config.client, LocalTransport::new(server))?;
//!     alice.register().await?;
//!
//!     let name = FileName::new("notes.txt")?;
//!     alice.upload(&name, b"meeting at noon").await?;
//!     alice.share(&name, &UserId::new("bob")?).await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Re-exports
//!
//! - `lockbox::core` - Identities, hybrid encryption, request signing
//! - `lockbox::store` - Record store trait, SQLite and in-memory stores
//! - `lockbox::protocol` - Client and server flows, wire format

pub mod config;
pub mod error;
pub mod logging;
pub mod setup;

// Re-export component crates
pub use lockbox_core as core;
pub use lockbox_protocol as protocol;
pub use lockbox_store as store;

// Re-export main types for convenience
pub use config::{ClientConfig, Config, ServerConfig};
pub use error::{Error, Result};
pub use setup::{open_client, open_server};

pub use lockbox_core::{AccessGrant, EncryptedFile, FileName, Keypair, PublicIdentity, UserId};
pub use lockbox_protocol::{
    ClientContext, ClientSettings, LocalTransport, ProtocolError, RevokeOutcome, ServerContext,
    Transport,
};
pub use lockbox_store::{MemoryStore, RecordStore, SqliteStore};
