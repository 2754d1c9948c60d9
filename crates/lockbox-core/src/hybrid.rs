//! Hybrid encryption: per-file content keys, wrapped per recipient.
//!
//! A file body is sealed with XChaCha20-Poly1305 under a random 256-bit
//! [`ContentKey`]. The content key is wrapped for each recipient with an
//! ECIES construction: an ephemeral X25519 key agreement, a Blake3-derived
//! key-encryption key, and ChaCha20-Poly1305 over the 32 key bytes.
//!
//! Wrapped key layout (always [`WRAPPED_KEY_LEN`] bytes):
//!
//! ```text
//! ephemeral_public (32) || nonce (12) || encrypted_key (32) || tag (16)
//! ```
//!
//! Sealed body layout:
//!
//! ```text
//! nonce (24) || ciphertext || tag (16)
//! ```

use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Nonce, XChaCha20Poly1305, XNonce,
};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;
use x25519_dalek::{EphemeralSecret, PublicKey};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::crypto::X25519PublicKey;
use crate::error::{CoreError, Result};
use crate::identity::Keypair;

/// Length of a content key in bytes.
pub const CONTENT_KEY_LEN: usize = 32;

/// Length of the nonce prepended to a sealed body.
pub const SEAL_NONCE_LEN: usize = 24;

/// Length of a Poly1305 authentication tag.
pub const TAG_LEN: usize = 16;

const WRAP_NONCE_LEN: usize = 12;

/// Length of every wrapped content key.
pub const WRAPPED_KEY_LEN: usize = 32 + WRAP_NONCE_LEN + CONTENT_KEY_LEN + TAG_LEN;

/// Blake3 derive-key context for key-encryption keys.
const WRAP_KEY_CONTEXT: &str = "lockbox-v1 content key wrap";

/// A 256-bit symmetric key bound to one (owner, file) pair.
///
/// Zeroed on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct ContentKey([u8; CONTENT_KEY_LEN]);

impl ContentKey {
    /// Generate a new random key.
    pub fn generate() -> Self {
        let mut bytes = [0u8; CONTENT_KEY_LEN];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Create from raw bytes.
    pub const fn from_bytes(bytes: [u8; CONTENT_KEY_LEN]) -> Self {
        Self(bytes)
    }

    /// Get the raw bytes.
    pub fn as_bytes(&self) -> &[u8; CONTENT_KEY_LEN] {
        &self.0
    }
}

impl fmt::Debug for ContentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ContentKey(..)")
    }
}

/// Mint a fresh content key (first upload and every revoke).
pub fn new_content_key() -> ContentKey {
    ContentKey::generate()
}

/// A content key encrypted to one recipient's X25519 public key.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WrappedKey(#[serde(with = "crate::encoding::hex_bytes")] Vec<u8>);

impl WrappedKey {
    /// Create from raw bytes (not validated until unwrapped).
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    /// Get the raw bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Get the length in bytes.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the wrapped key is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for WrappedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prefix = hex::encode(&self.0[..self.0.len().min(8)]);
        write!(f, "WrappedKey({}.., {} bytes)", prefix, self.0.len())
    }
}

fn derive_wrap_key(
    shared: &[u8; 32],
    ephemeral: &X25519PublicKey,
    recipient: &X25519PublicKey,
) -> Zeroizing<[u8; 32]> {
    let mut hasher = blake3::Hasher::new_derive_key(WRAP_KEY_CONTEXT);
    hasher.update(shared);
    hasher.update(ephemeral.as_bytes());
    hasher.update(recipient.as_bytes());
    Zeroizing::new(*hasher.finalize().as_bytes())
}

/// Wrap a content key for a recipient.
pub fn wrap(recipient: &X25519PublicKey, content_key: &ContentKey) -> Result<WrappedKey> {
    let ephemeral = EphemeralSecret::random_from_rng(rand::thread_rng());
    let ephemeral_public = X25519PublicKey::from(PublicKey::from(&ephemeral));

    let shared = ephemeral.diffie_hellman(&recipient.to_dalek());
    // Low-order recipient keys give an all-zero secret.
    if !shared.was_contributory() {
        return Err(CoreError::Encryption);
    }
    let kek = derive_wrap_key(shared.as_bytes(), &ephemeral_public, recipient);

    let mut nonce = [0u8; WRAP_NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut nonce);

    let cipher =
        ChaCha20Poly1305::new_from_slice(kek.as_slice()).map_err(|_| CoreError::Encryption)?;
    let encrypted = cipher
        .encrypt(Nonce::from_slice(&nonce), content_key.as_bytes().as_slice())
        .map_err(|_| CoreError::Encryption)?;

    let mut out = Vec::with_capacity(WRAPPED_KEY_LEN);
    out.extend_from_slice(ephemeral_public.as_bytes());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&encrypted);
    debug_assert_eq!(out.len(), WRAPPED_KEY_LEN);

    Ok(WrappedKey(out))
}

/// Unwrap a content key with the recipient's private key pair.
///
/// Every failure is reported as the same [`CoreError::Decryption`].
pub fn unwrap(keypair: &Keypair, wrapped: &WrappedKey) -> Result<ContentKey> {
    let bytes = wrapped.as_bytes();
    if bytes.len() != WRAPPED_KEY_LEN {
        return Err(CoreError::Decryption);
    }

    let (ephemeral, rest) = bytes.split_at(32);
    let (nonce, encrypted) = rest.split_at(WRAP_NONCE_LEN);

    let ephemeral_public =
        X25519PublicKey(ephemeral.try_into().map_err(|_| CoreError::Decryption)?);
    let shared = keypair.diffie_hellman(&ephemeral_public);
    if !shared.was_contributory() {
        return Err(CoreError::Decryption);
    }
    let kek = derive_wrap_key(
        shared.as_bytes(),
        &ephemeral_public,
        &keypair.encryption_public(),
    );

    let cipher =
        ChaCha20Poly1305::new_from_slice(kek.as_slice()).map_err(|_| CoreError::Decryption)?;
    let plaintext = Zeroizing::new(
        cipher
            .decrypt(Nonce::from_slice(nonce), encrypted)
            .map_err(|_| CoreError::Decryption)?,
    );

    let key: [u8; CONTENT_KEY_LEN] = plaintext
        .as_slice()
        .try_into()
        .map_err(|_| CoreError::Decryption)?;
    Ok(ContentKey::from_bytes(key))
}

/// Encrypt a file body under a content key with a fresh random nonce.
pub fn seal(content_key: &ContentKey, plaintext: &[u8]) -> Result<Vec<u8>> {
    let cipher = XChaCha20Poly1305::new_from_slice(content_key.as_bytes())
        .map_err(|_| CoreError::Encryption)?;

    let mut nonce = [0u8; SEAL_NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut nonce);

    let ciphertext = cipher
        .encrypt(XNonce::from_slice(&nonce), plaintext)
        .map_err(|_| CoreError::Encryption)?;

    let mut out = Vec::with_capacity(SEAL_NONCE_LEN + ciphertext.len());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Decrypt a body produced by [`seal`].
pub fn open(content_key: &ContentKey, sealed: &[u8]) -> Result<Vec<u8>> {
    if sealed.len() < SEAL_NONCE_LEN + TAG_LEN {
        return Err(CoreError::Decryption);
    }

    let cipher = XChaCha20Poly1305::new_from_slice(content_key.as_bytes())
        .map_err(|_| CoreError::Decryption)?;

    let (nonce, ciphertext) = sealed.split_at(SEAL_NONCE_LEN);
    cipher
        .decrypt(XNonce::from_slice(nonce), ciphertext)
        .map_err(|_| CoreError::Decryption)
}

/// The nonce a sealed body was encrypted with, if it is long enough.
pub fn sealed_nonce(sealed: &[u8]) -> Option<&[u8]> {
    sealed.get(..SEAL_NONCE_LEN)
}
