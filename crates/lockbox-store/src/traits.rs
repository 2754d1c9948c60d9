//! RecordStore trait: the abstract interface for identity, file and grant
//! persistence.
//!
//! The store is a dumb keyed table. It never interprets ciphertexts or
//! wrapped keys; authorization is enforced by the server in front of it.
//! Implementations include SQLite (primary) and in-memory (for tests).

use std::collections::BTreeSet;

use async_trait::async_trait;
use lockbox_core::{AccessGrant, EncryptedFile, FileName, PublicIdentity, UserId};

use crate::error::{Result, StoreError};

/// Result of registering an identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertResult {
    /// Identity was inserted.
    Inserted,
    /// A subject with this name is already registered; nothing was written.
    AlreadyExists,
}

/// Result of a compare-and-swap write on a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteResult {
    /// The file (and any accompanying grant) was written.
    Written,
    /// The file's current epoch did not match the expected one; nothing was
    /// written.
    Conflict {
        /// Epoch currently stored, `None` if the file does not exist.
        current: Option<u64>,
    },
}

/// Check the epoch step of a file write against the expected epoch.
///
/// A new file starts at [`lockbox_core::INITIAL_KEY_EPOCH`]; an existing
/// file keeps its epoch (re-upload under the same key) or advances it by one
/// (rekey).
pub fn check_epoch_step(expected: Option<u64>, new_epoch: u64) -> Result<()> {
    let ok = match expected {
        None => new_epoch == lockbox_core::INITIAL_KEY_EPOCH,
        Some(e) => new_epoch == e || Some(new_epoch) == e.checked_add(1),
    };
    if ok {
        Ok(())
    } else {
        Err(StoreError::InvalidData(format!(
            "epoch {new_epoch} cannot follow {expected:?}"
        )))
    }
}

/// The RecordStore trait: async interface for record persistence.
///
/// All methods are async to support both sync (SQLite) and async backends.
/// For SQLite, `spawn_blocking` keeps queries off the runtime threads.
///
/// # Design Notes
///
/// - **Immutable identities**: registering a subject twice returns `AlreadyExists`.
/// - **Compare-and-swap files**: `put_file` writes only when the stored epoch
///   equals `expected_epoch`.
/// - **Upserted grants**: at most one grant per (owner, name, grantee).
/// - **Idempotent deletes**: deleting a missing grant is not an error.
#[async_trait]
pub trait RecordStore: Send + Sync {
    // ─────────────────────────────────────────────────────────────────────────
    // Identity Directory
    // ─────────────────────────────────────────────────────────────────────────

    /// Register a public identity.
    async fn put_identity(&self, identity: &PublicIdentity) -> Result<InsertResult>;

    /// Look up a public identity by subject.
    async fn get_identity(&self, user: &UserId) -> Result<Option<PublicIdentity>>;

    // ─────────────────────────────────────────────────────────────────────────
    // Files
    // ─────────────────────────────────────────────────────────────────────────

    /// Write a file if its current epoch equals `expected_epoch`.
    ///
    /// `None` means the file must not exist yet.
    async fn put_file(&self, file: &EncryptedFile, expected_epoch: Option<u64>)
        -> Result<WriteResult>;

    /// Write a file and a grant in one step, under the same compare-and-swap
    /// as [`RecordStore::put_file`]. Neither is written on conflict.
    async fn put_file_with_grant(
        &self,
        file: &EncryptedFile,
        expected_epoch: Option<u64>,
        grant: &AccessGrant,
    ) -> Result<WriteResult>;

    /// Get a file by (owner, name).
    async fn get_file(&self, owner: &UserId, name: &FileName) -> Result<Option<EncryptedFile>>;

    // ─────────────────────────────────────────────────────────────────────────
    // Grants
    // ─────────────────────────────────────────────────────────────────────────

    /// Insert or replace the grant for (owner, name, grantee).
    async fn put_grant(&self, grant: &AccessGrant) -> Result<()>;

    /// Get the grant for (owner, name, grantee).
    async fn get_grant(
        &self,
        owner: &UserId,
        name: &FileName,
        grantee: &UserId,
    ) -> Result<Option<AccessGrant>>;

    /// Delete the grant for (owner, name, grantee).
    ///
    /// Returns whether a grant was removed.
    async fn delete_grant(&self, owner: &UserId, name: &FileName, grantee: &UserId)
        -> Result<bool>;

    /// List every grantee of (owner, name), the owner included.
    async fn list_grantees(&self, owner: &UserId, name: &FileName) -> Result<BTreeSet<UserId>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_epoch_steps() {
        assert!(check_epoch_step(None, 1).is_ok());
        assert!(check_epoch_step(None, 2).is_err());
        assert!(check_epoch_step(Some(3), 3).is_ok());
        assert!(check_epoch_step(Some(3), 4).is_ok());
        assert!(check_epoch_step(Some(3), 5).is_err());
        assert!(check_epoch_step(Some(3), 2).is_err());
        assert!(check_epoch_step(Some(u64::MAX), u64::MAX).is_ok());
    }
}
