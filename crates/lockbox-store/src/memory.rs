//! In-memory implementation of the RecordStore trait.
//!
//! This is primarily for testing. It has the same semantics as SQLite
//! but keeps everything in memory with no persistence.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;

use lockbox_core::{AccessGrant, EncryptedFile, FileName, FileRef, PublicIdentity, UserId};

use crate::error::{Result, StoreError};
use crate::traits::{check_epoch_step, InsertResult, RecordStore, WriteResult};

/// In-memory store implementation.
///
/// All data is lost when the store is dropped. Thread-safe via RwLock.
pub struct MemoryStore {
    inner: RwLock<MemoryStoreInner>,
}

#[derive(Default)]
struct MemoryStoreInner {
    /// Registered identities by subject.
    identities: HashMap<UserId, PublicIdentity>,

    /// Files by (owner, name).
    files: HashMap<FileRef, EncryptedFile>,

    /// Grants by (owner, name), then grantee.
    grants: HashMap<FileRef, BTreeMap<UserId, AccessGrant>>,
}

impl MemoryStoreInner {
    fn cas_file(
        &mut self,
        file: &EncryptedFile,
        expected_epoch: Option<u64>,
    ) -> Result<WriteResult> {
        let key = file.file_ref();
        let current = self.files.get(&key).map(|f| f.key_epoch);
        if current != expected_epoch {
            return Ok(WriteResult::Conflict { current });
        }
        check_epoch_step(expected_epoch, file.key_epoch)?;
        self.files.insert(key, file.clone());
        Ok(WriteResult::Written)
    }

    fn upsert_grant(&mut self, grant: &AccessGrant) {
        self.grants
            .entry(grant.file_ref())
            .or_default()
            .insert(grant.grantee.clone(), grant.clone());
    }
}

impl MemoryStore {
    /// Create a new empty in-memory store.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(MemoryStoreInner::default()),
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, MemoryStoreInner>> {
        self.inner.read().map_err(|_| StoreError::LockPoisoned)
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, MemoryStoreInner>> {
        self.inner.write().map_err(|_| StoreError::LockPoisoned)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn put_identity(&self, identity: &PublicIdentity) -> Result<InsertResult> {
        let mut inner = self.write()?;
        if inner.identities.contains_key(&identity.user) {
            return Ok(InsertResult::AlreadyExists);
        }
        inner
            .identities
            .insert(identity.user.clone(), identity.clone());
        Ok(InsertResult::Inserted)
    }

    async fn get_identity(&self, user: &UserId) -> Result<Option<PublicIdentity>> {
        Ok(self.read()?.identities.get(user).cloned())
    }

    async fn put_file(
        &self,
        file: &EncryptedFile,
        expected_epoch: Option<u64>,
    ) -> Result<WriteResult> {
        self.write()?.cas_file(file, expected_epoch)
    }

    async fn put_file_with_grant(
        &self,
        file: &EncryptedFile,
        expected_epoch: Option<u64>,
        grant: &AccessGrant,
    ) -> Result<WriteResult> {
        if grant.file_ref() != file.file_ref() {
            return Err(StoreError::InvalidData(format!(
                "grant for {} written with file {}",
                grant.file_ref(),
                file.file_ref()
            )));
        }

        let mut inner = self.write()?;
        let result = inner.cas_file(file, expected_epoch)?;
        if result == WriteResult::Written {
            inner.upsert_grant(grant);
        }
        Ok(result)
    }

    async fn get_file(&self, owner: &UserId, name: &FileName) -> Result<Option<EncryptedFile>> {
        let key = FileRef::new(owner.clone(), name.clone());
        Ok(self.read()?.files.get(&key).cloned())
    }

    async fn put_grant(&self, grant: &AccessGrant) -> Result<()> {
        self.write()?.upsert_grant(grant);
        Ok(())
    }

    async fn get_grant(
        &self,
        owner: &UserId,
        name: &FileName,
        grantee: &UserId,
    ) -> Result<Option<AccessGrant>> {
        let key = FileRef::new(owner.clone(), name.clone());
        let inner = self.read()?;
        Ok(inner
            .grants
            .get(&key)
            .and_then(|grants| grants.get(grantee))
            .cloned())
    }

    async fn delete_grant(
        &self,
        owner: &UserId,
        name: &FileName,
        grantee: &UserId,
    ) -> Result<bool> {
        let key = FileRef::new(owner.clone(), name.clone());
        let mut inner = self.write()?;

        let Some(grants) = inner.grants.get_mut(&key) else {
            return Ok(false);
        };
        let removed = grants.remove(grantee).is_some();
        if grants.is_empty() {
            inner.grants.remove(&key);
        }
        Ok(removed)
    }

    async fn list_grantees(&self, owner: &UserId, name: &FileName) -> Result<BTreeSet<UserId>> {
        let key = FileRef::new(owner.clone(), name.clone());
        let inner = self.read()?;
        Ok(inner
            .grants
            .get(&key)
            .map(|grants| grants.keys().cloned().collect())
            .unwrap_or_default())
    }
}
