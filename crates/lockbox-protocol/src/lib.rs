//! # Lockbox Protocol
//!
//! The capability-based sharing protocol: signed mutations, the server's
//! authorization gate, and the client flows that upload, share, revoke and
//! download files.
//!
//! ## Overview
//!
//! - Clients encrypt everything. A file is sealed under a per-file content
//!   key; the content key is wrapped for each grantee.
//! - Every mutation is signed by the owner over its exact CBOR bytes. The
//!   server decodes, looks up the owner, verifies, and only then writes.
//! - Revocation rotates the content key. Each key carries an epoch, and the
//!   store compare-and-swaps on it, so a grant can never be written for a
//!   key that is no longer current.
//!
//! ## Key Types
//!
//! - [`ClientContext`] - A user's key pair plus a transport
//! - [`ServerContext`] - The gate in front of a [`lockbox_store::RecordStore`]
//! - [`Transport`] / [`LocalTransport`] - Request/reply delivery
//! - [`Request`] / [`Reply`] - The JSON wire format
//! - [`ProtocolError`] / [`ErrorKind`] - Errors and their redacted wire form

pub mod client;
pub mod error;
pub mod locks;
pub mod messages;
pub mod payload;
pub mod server;
pub mod transport;

pub use client::{ClientContext, ClientSettings, RevokeOutcome};
pub use error::{ErrorKind, ErrorReply, ProtocolError, Result};
pub use locks::FileLocks;
pub use messages::{Reply, Request, Response};
pub use payload::{
    Mutation, MutationKind, RegisterPayload, RevokePayload, SharePayload, UploadPayload,
};
pub use server::ServerContext;
pub use transport::{LocalTransport, Transport};
