//! # Lockbox Core
//!
//! Pure primitives for Lockbox: identities, hybrid encryption and request
//! signing.
//!
//! Apart from reading and writing the key file in
//! [`Keypair::load_or_create`], this crate does no I/O. The server stores
//! only what this crate produces, and can read none of it.
//!
//! ## Key Types
//!
//! - [`Keypair`] / [`PublicIdentity`] - a user's long-term identity
//! - [`ContentKey`] / [`WrappedKey`] - per-file key, and its per-recipient form
//! - [`EncryptedFile`] / [`AccessGrant`] - the records held by the server
//! - [`SignedEnvelope`] - a signed mutation on the wire

pub mod auth;
pub mod crypto;
pub mod encoding;
pub mod error;
pub mod hybrid;
pub mod identity;
pub mod records;
pub mod types;

pub use auth::SignedEnvelope;
pub use crypto::{Ed25519PublicKey, Ed25519Signature, X25519PublicKey};
pub use error::{CoreError, Result};
pub use hybrid::{new_content_key, open, seal, unwrap, wrap, ContentKey, WrappedKey};
pub use identity::{Keypair, PublicIdentity};
pub use records::{AccessGrant, EncryptedFile, FileRef, INITIAL_KEY_EPOCH};
pub use types::{FileName, UserId};
