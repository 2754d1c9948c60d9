//! Records the server stores on behalf of owners.
//!
//! Neither record contains anything the server can read: file bodies are
//! sealed under a content key, and content keys are only present wrapped to
//! a grantee's public key.

use serde::{Deserialize, Serialize};

use crate::hybrid::{self, WrappedKey};
use crate::types::{FileName, UserId};

/// Epoch of the first content key minted for a file.
pub const INITIAL_KEY_EPOCH: u64 = 1;

/// Identifies a file: (owner, name).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FileRef {
    pub owner: UserId,
    pub name: FileName,
}

impl FileRef {
    pub fn new(owner: UserId, name: FileName) -> Self {
        Self { owner, name }
    }
}

impl std::fmt::Display for FileRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

/// A sealed file body, keyed by (owner, name).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedFile {
    pub owner: UserId,
    pub name: FileName,

    /// `nonce || ciphertext || tag`, as produced by [`hybrid::seal`].
    #[serde(with = "crate::encoding::hex_bytes")]
    pub ciphertext: Vec<u8>,

    /// Version of the content key the body is sealed under. Bumped on every
    /// key rotation.
    pub key_epoch: u64,
}

impl EncryptedFile {
    /// The (owner, name) this file is stored under.
    pub fn file_ref(&self) -> FileRef {
        FileRef::new(self.owner.clone(), self.name.clone())
    }

    /// The seal nonce, carried at the front of the ciphertext.
    pub fn nonce(&self) -> Option<&[u8]> {
        hybrid::sealed_nonce(&self.ciphertext)
    }
}

/// A content key wrapped for one grantee, keyed by (owner, name, grantee).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessGrant {
    pub owner: UserId,
    pub name: FileName,
    pub grantee: UserId,
    pub wrapped_key: WrappedKey,

    /// Epoch of the content key inside `wrapped_key`.
    pub key_epoch: u64,
}

impl AccessGrant {
    /// The (owner, name) this grant applies to.
    pub fn file_ref(&self) -> FileRef {
        FileRef::new(self.owner.clone(), self.name.clone())
    }

    /// Whether this is the owner's own grant.
    pub fn is_self_grant(&self) -> bool {
        self.owner == self.grantee
    }
}
