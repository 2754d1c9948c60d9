//! SQLite implementation of the RecordStore trait.
//!
//! This is the primary storage backend for the Lockbox server. It uses
//! rusqlite with bundled SQLite, wrapped in async via tokio::spawn_blocking.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};

use lockbox_core::{
    AccessGrant, Ed25519PublicKey, EncryptedFile, FileName, PublicIdentity, UserId, WrappedKey,
    X25519PublicKey,
};

use crate::error::{Result, StoreError};
use crate::migration::{self, now_millis};
use crate::traits::{check_epoch_step, InsertResult, RecordStore, WriteResult};

/// SQLite-based store implementation.
///
/// Thread-safe via internal Mutex. All operations use spawn_blocking
/// to avoid blocking the async runtime.
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open a SQLite database at the given path.
    ///
    /// Creates the file and runs migrations if it doesn't exist.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let mut conn = Connection::open(path)?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory SQLite database.
    ///
    /// Useful for testing.
    pub fn open_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory()?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run a closure against the connection on the blocking pool.
    async fn run<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = conn.lock().map_err(|_| StoreError::LockPoisoned)?;
            f(&mut conn)
        })
        .await
        .map_err(|e| StoreError::Task(e.to_string()))?
    }
}

fn epoch_to_sql(epoch: u64) -> Result<i64> {
    i64::try_from(epoch)
        .map_err(|_| StoreError::InvalidData(format!("key epoch {} out of range", epoch)))
}

fn epoch_from_sql(epoch: i64) -> Result<u64> {
    u64::try_from(epoch)
        .map_err(|_| StoreError::InvalidData(format!("negative key epoch {}", epoch)))
}

fn key_bytes(bytes: Vec<u8>, column: &str) -> Result<[u8; 32]> {
    bytes
        .try_into()
        .map_err(|_| StoreError::InvalidData(format!("{} is not 32 bytes", column)))
}

/// Read the current epoch of a file and, if it matches, write the new one.
fn cas_file(
    conn: &Connection,
    file: &EncryptedFile,
    expected_epoch: Option<u64>,
) -> Result<WriteResult> {
    let current: Option<i64> = conn
        .query_row(
            "SELECT key_epoch FROM files WHERE owner = ?1 AND name = ?2",
            params![file.owner.as_str(), file.name.as_str()],
            |row| row.get(0),
        )
        .optional()?;
    let current = current.map(epoch_from_sql).transpose()?;

    if current != expected_epoch {
        return Ok(WriteResult::Conflict { current });
    }
    check_epoch_step(expected_epoch, file.key_epoch)?;

    conn.execute(
        "INSERT INTO files (owner, name, ciphertext, key_epoch, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(owner, name) DO UPDATE SET
            ciphertext = excluded.ciphertext,
            key_epoch = excluded.key_epoch,
            updated_at = excluded.updated_at",
        params![
            file.owner.as_str(),
            file.name.as_str(),
            file.ciphertext,
            epoch_to_sql(file.key_epoch)?,
            now_millis(),
        ],
    )?;

    Ok(WriteResult::Written)
}

fn upsert_grant(conn: &Connection, grant: &AccessGrant) -> Result<()> {
    conn.execute(
        "INSERT INTO grants (owner, name, grantee, wrapped_key, key_epoch, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT(owner, name, grantee) DO UPDATE SET
            wrapped_key = excluded.wrapped_key,
            key_epoch = excluded.key_epoch,
            updated_at = excluded.updated_at",
        params![
            grant.owner.as_str(),
            grant.name.as_str(),
            grant.grantee.as_str(),
            grant.wrapped_key.as_bytes(),
            epoch_to_sql(grant.key_epoch)?,
            now_millis(),
        ],
    )?;
    Ok(())
}

#[async_trait]
impl RecordStore for SqliteStore {
    async fn put_identity(&self, identity: &PublicIdentity) -> Result<InsertResult> {
        let identity = identity.clone();

        self.run(move |conn| {
            let inserted = conn.execute(
                "INSERT OR IGNORE INTO identities
                    (subject, signing_key, encryption_key, registered_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    identity.user.as_str(),
                    identity.signing_key.as_bytes().as_slice(),
                    identity.encryption_key.as_bytes().as_slice(),
                    now_millis(),
                ],
            )?;

            Ok(if inserted == 1 {
                InsertResult::Inserted
            } else {
                InsertResult::AlreadyExists
            })
        })
        .await
    }

    async fn get_identity(&self, user: &UserId) -> Result<Option<PublicIdentity>> {
        let user = user.clone();

        self.run(move |conn| {
            let row: Option<(Vec<u8>, Vec<u8>)> = conn
                .query_row(
                    "SELECT signing_key, encryption_key FROM identities WHERE subject = ?1",
                    params![user.as_str()],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;

            row.map(|(signing, encryption)| -> Result<PublicIdentity> {
                Ok(PublicIdentity {
                    user,
                    signing_key: Ed25519PublicKey::from_bytes(key_bytes(signing, "signing_key")?),
                    encryption_key: X25519PublicKey::from_bytes(key_bytes(
                        encryption,
                        "encryption_key",
                    )?),
                })
            })
            .transpose()
        })
        .await
    }

    async fn put_file(
        &self,
        file: &EncryptedFile,
        expected_epoch: Option<u64>,
    ) -> Result<WriteResult> {
        let file = file.clone();

        self.run(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let result = cas_file(&tx, &file, expected_epoch)?;
            tx.commit()?;
            Ok(result)
        })
        .await
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
        let file = file.clone();
        let grant = grant.clone();

        self.run(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let result = cas_file(&tx, &file, expected_epoch)?;
            if result == WriteResult::Written {
                upsert_grant(&tx, &grant)?;
                tx.commit()?;
            }
            Ok(result)
        })
        .await
    }

    async fn get_file(&self, owner: &UserId, name: &FileName) -> Result<Option<EncryptedFile>> {
        let owner = owner.clone();
        let name = name.clone();

        self.run(move |conn| {
            let row: Option<(Vec<u8>, i64)> = conn
                .query_row(
                    "SELECT ciphertext, key_epoch FROM files WHERE owner = ?1 AND name = ?2",
                    params![owner.as_str(), name.as_str()],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;

            row.map(|(ciphertext, epoch)| -> Result<EncryptedFile> {
                Ok(EncryptedFile {
                    owner,
                    name,
                    ciphertext,
                    key_epoch: epoch_from_sql(epoch)?,
                })
            })
            .transpose()
        })
        .await
    }

    async fn put_grant(&self, grant: &AccessGrant) -> Result<()> {
        let grant = grant.clone();
        self.run(move |conn| upsert_grant(conn, &grant)).await
    }

    async fn get_grant(
        &self,
        owner: &UserId,
        name: &FileName,
        grantee: &UserId,
    ) -> Result<Option<AccessGrant>> {
        let owner = owner.clone();
        let name = name.clone();
        let grantee = grantee.clone();

        self.run(move |conn| {
            let row: Option<(Vec<u8>, i64)> = conn
                .query_row(
                    "SELECT wrapped_key, key_epoch FROM grants
                     WHERE owner = ?1 AND name = ?2 AND grantee = ?3",
                    params![owner.as_str(), name.as_str(), grantee.as_str()],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;

            row.map(|(wrapped_key, epoch)| -> Result<AccessGrant> {
                Ok(AccessGrant {
                    owner,
                    name,
                    grantee,
                    wrapped_key: WrappedKey::from_bytes(wrapped_key),
                    key_epoch: epoch_from_sql(epoch)?,
                })
            })
            .transpose()
        })
        .await
    }

    async fn delete_grant(
        &self,
        owner: &UserId,
        name: &FileName,
        grantee: &UserId,
    ) -> Result<bool> {
        let owner = owner.clone();
        let name = name.clone();
        let grantee = grantee.clone();

        self.run(move |conn| {
            let deleted = conn.execute(
                "DELETE FROM grants WHERE owner = ?1 AND name = ?2 AND grantee = ?3",
                params![owner.as_str(), name.as_str(), grantee.as_str()],
            )?;
            Ok(deleted > 0)
        })
        .await
    }

    async fn list_grantees(&self, owner: &UserId, name: &FileName) -> Result<BTreeSet<UserId>> {
        let owner = owner.clone();
        let name = name.clone();

        self.run(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT grantee FROM grants WHERE owner = ?1 AND name = ?2 ORDER BY grantee",
            )?;
            let names = stmt
                .query_map(params![owner.as_str(), name.as_str()], |row| {
                    row.get::<_, String>(0)
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            names
                .into_iter()
                .map(|n| UserId::new(n).map_err(StoreError::from))
                .collect::<Result<BTreeSet<_>>>()
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lockbox_core::{Keypair, INITIAL_KEY_EPOCH};

    fn user(name: &str) -> UserId {
        UserId::new(name).unwrap()
    }

    fn file(epoch: u64, body: &[u8]) -> EncryptedFile {
        EncryptedFile {
            owner: user("alice"),
            name: FileName::new("report.pdf").unwrap(),
            ciphertext: body.to_vec(),
            key_epoch: epoch,
        }
    }

    fn grant(grantee: &str, epoch: u64) -> AccessGrant {
        AccessGrant {
            owner: user("alice"),
            name: FileName::new("report.pdf").unwrap(),
            grantee: user(grantee),
            wrapped_key: WrappedKey::from_bytes(vec![epoch as u8; 92]),
            key_epoch: epoch,
        }
    }

    #[tokio::test]
    async fn test_identity_roundtrip() {
        let store = SqliteStore::open_memory().unwrap();
        let identity = Keypair::generate().public_identity(user("alice"));

        assert_eq!(
            store.put_identity(&identity).await.unwrap(),
            InsertResult::Inserted
        );
        let other = Keypair::generate().public_identity(user("alice"));
        assert_eq!(
            store.put_identity(&other).await.unwrap(),
            InsertResult::AlreadyExists
        );

        let stored = store.get_identity(&user("alice")).await.unwrap().unwrap();
        assert_eq!(stored, identity);
    }

    #[tokio::test]
    async fn test_file_compare_and_swap() {
        let store = SqliteStore::open_memory().unwrap();

        assert_eq!(
            store.put_file(&file(INITIAL_KEY_EPOCH, b"v1"), None).await.unwrap(),
            WriteResult::Written
        );
        assert_eq!(
            store.put_file(&file(1, b"again"), None).await.unwrap(),
            WriteResult::Conflict { current: Some(1) }
        );
        assert_eq!(
            store.put_file(&file(2, b"v2"), Some(1)).await.unwrap(),
            WriteResult::Written
        );
        assert_eq!(
            store.put_file(&file(3, b"late"), Some(1)).await.unwrap(),
            WriteResult::Conflict { current: Some(2) }
        );

        let stored = store
            .get_file(&user("alice"), &FileName::new("report.pdf").unwrap())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.ciphertext, b"v2");
        assert_eq!(stored.key_epoch, 2);
    }

    #[tokio::test]
    async fn test_file_with_grant_rolls_back_on_conflict() {
        let store = SqliteStore::open_memory().unwrap();
        let owner = user("alice");
        let name = FileName::new("report.pdf").unwrap();

        store
            .put_file_with_grant(&file(1, b"v1"), None, &grant("alice", 1))
            .await
            .unwrap();

        let result = store
            .put_file_with_grant(&file(2, b"v2"), Some(7), &grant("alice", 2))
            .await
            .unwrap();
        assert_eq!(result, WriteResult::Conflict { current: Some(1) });

        let owner_grant = store.get_grant(&owner, &name, &owner).await.unwrap().unwrap();
        assert_eq!(owner_grant.key_epoch, 1);
    }

    #[tokio::test]
    async fn test_grants() {
        let store = SqliteStore::open_memory().unwrap();
        let owner = user("alice");
        let name = FileName::new("report.pdf").unwrap();

        store.put_grant(&grant("alice", 1)).await.unwrap();
        store.put_grant(&grant("bob", 1)).await.unwrap();
        store.put_grant(&grant("bob", 2)).await.unwrap();
        store.put_grant(&grant("carol", 1)).await.unwrap();

        let grantees = store.list_grantees(&owner, &name).await.unwrap();
        assert_eq!(
            grantees,
            BTreeSet::from([user("alice"), user("bob"), user("carol")])
        );

        let bob = store.get_grant(&owner, &name, &user("bob")).await.unwrap().unwrap();
        assert_eq!(bob.key_epoch, 2);
        assert_eq!(bob.wrapped_key.as_bytes(), &[2u8; 92][..]);

        assert!(store.delete_grant(&owner, &name, &user("carol")).await.unwrap());
        assert!(!store.delete_grant(&owner, &name, &user("carol")).await.unwrap());
        assert!(store
            .get_grant(&owner, &name, &user("carol"))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_persistence_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lockbox.db");

        {
            let store = SqliteStore::open(&path).unwrap();
            store
                .put_file_with_grant(&file(1, b"kept"), None, &grant("alice", 1))
                .await
                .unwrap();
        }

        let store = SqliteStore::open(&path).unwrap();
        let stored = store
            .get_file(&user("alice"), &FileName::new("report.pdf").unwrap())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.ciphertext, b"kept");
    }
}
