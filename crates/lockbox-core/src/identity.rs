//! Long-term user identities.
//!
//! An identity is a single 32-byte Ed25519 seed. The signing key is the
//! Ed25519 key itself; the X25519 key used to unwrap content keys is derived
//! from the same seed, so one persisted secret yields the whole identity.
//! The seed is stored on disk as a PKCS#8 PEM document.

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::Path;

use ed25519_dalek::pkcs8::spki::der::pem::LineEnding;
use ed25519_dalek::pkcs8::{DecodePrivateKey, EncodePrivateKey};
use ed25519_dalek::{Signer, SigningKey};
use serde::{Deserialize, Serialize};
use std::fmt;
use x25519_dalek::{PublicKey, SharedSecret, StaticSecret};
use zeroize::Zeroizing;

use crate::crypto::{Ed25519PublicKey, Ed25519Signature, X25519PublicKey};
use crate::error::{CoreError, Result};
use crate::types::UserId;

/// Blake3 derive-key context for the X25519 half of an identity.
const ENCRYPTION_KEY_CONTEXT: &str = "lockbox-v1 identity x25519 encryption key";

/// The public half of an identity, as published to the record store.
///
/// Immutable once registered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicIdentity {
    /// The subject this identity belongs to.
    pub user: UserId,
    /// Verifies the subject's signed mutations.
    pub signing_key: Ed25519PublicKey,
    /// Content keys are wrapped to this key.
    pub encryption_key: X25519PublicKey,
}

/// A user's private key pair. Never leaves the client.
#[derive(Clone)]
pub struct Keypair {
    signing_key: SigningKey,
    encryption_secret: StaticSecret,
}

impl Keypair {
    /// Generate a new random identity.
    pub fn generate() -> Self {
        let signing_key = SigningKey::generate(&mut rand::thread_rng());
        Self::from_seed(&signing_key.to_bytes())
    }

    /// Create from a 32-byte seed.
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        let signing_key = SigningKey::from_bytes(seed);
        let derived = blake3::derive_key(ENCRYPTION_KEY_CONTEXT, seed);
        Self {
            signing_key,
            encryption_secret: StaticSecret::from(derived),
        }
    }

    /// Get the raw seed bytes (secret key material).
    pub fn seed(&self) -> [u8; 32] {
        self.signing_key.to_bytes()
    }

    /// The Ed25519 verifying key.
    pub fn signing_public(&self) -> Ed25519PublicKey {
        Ed25519PublicKey(self.signing_key.verifying_key().to_bytes())
    }

    /// The X25519 public key content keys are wrapped to.
    pub fn encryption_public(&self) -> X25519PublicKey {
        X25519PublicKey::from(PublicKey::from(&self.encryption_secret))
    }

    /// The public identity for `user`.
    pub fn public_identity(&self, user: UserId) -> PublicIdentity {
        PublicIdentity {
            user,
            signing_key: self.signing_public(),
            encryption_key: self.encryption_public(),
        }
    }

    /// Sign a message.
    pub fn sign(&self, message: &[u8]) -> Ed25519Signature {
        Ed25519Signature(self.signing_key.sign(message).to_bytes())
    }

    /// Key agreement with a peer's X25519 public key.
    pub(crate) fn diffie_hellman(&self, peer: &X25519PublicKey) -> SharedSecret {
        self.encryption_secret.diffie_hellman(&peer.to_dalek())
    }

    /// Encode the seed as a PKCS#8 PEM document.
    pub fn to_pem(&self) -> Result<Zeroizing<String>> {
        self.signing_key
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(|e| CoreError::Pkcs8(e.to_string()))
    }

    /// Decode a PKCS#8 PEM document produced by [`Keypair::to_pem`].
    pub fn from_pem(pem: &str) -> Result<Self> {
        let signing_key =
            SigningKey::from_pkcs8_pem(pem).map_err(|e| CoreError::Pkcs8(e.to_string()))?;
        Ok(Self::from_seed(&signing_key.to_bytes()))
    }

    /// Load the key pair at `path`, generating and persisting one if absent.
    ///
    /// Repeated calls with the same path return the same identity. The file
    /// is created with owner-only permissions on Unix.
    pub fn load_or_create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let key_file_err = |source: std::io::Error| CoreError::KeyFile {
            path: path.to_path_buf(),
            source,
        };

        match fs::read_to_string(path) {
            Ok(pem) => return Self::from_pem(&pem),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(key_file_err(e)),
        }

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(key_file_err)?;
        }

        let keypair = Self::generate();
        let pem = keypair.to_pem()?;

        let mut options = fs::OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }

        match options.open(path) {
            Ok(mut file) => {
                file.write_all(pem.as_bytes()).map_err(key_file_err)?;
                file.sync_all().map_err(key_file_err)?;
                tracing::info!(path = %path.display(), "generated new identity key");
                Ok(keypair)
            }
            // Another process won the race; use its key.
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                let pem = fs::read_to_string(path).map_err(key_file_err)?;
                Self::from_pem(&pem)
            }
            Err(e) => Err(key_file_err(e)),
        }
    }
}

impl fmt::Debug for Keypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Keypair({:?})", self.signing_public())
    }
}
