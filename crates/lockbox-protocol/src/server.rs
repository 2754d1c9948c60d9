//! Server side: the authorization gate in front of the record store.
//!
//! Every mutation goes through the same four steps, in this order:
//! decode the payload, look up the claimed owner's public key, verify the
//! signature over the received bytes, and only then act on the store.
//! A mutation that fails any step leaves the store untouched.

use std::collections::BTreeSet;

use tracing::{debug, error, info, warn};

use lockbox_core::hybrid::{SEAL_NONCE_LEN, TAG_LEN, WRAPPED_KEY_LEN};
use lockbox_core::{
    AccessGrant, EncryptedFile, FileName, FileRef, PublicIdentity, SignedEnvelope, UserId,
    WrappedKey,
};
use lockbox_store::{check_epoch_step, InsertResult, RecordStore, WriteResult};

use crate::error::{ProtocolError, Result};
use crate::locks::FileLocks;
use crate::messages::{Reply, Request, Response};
use crate::payload::{Mutation, RegisterPayload, RevokePayload, SharePayload, UploadPayload};

/// Server state: the store plus per-file write locks.
///
/// Holds no per-client session state.
pub struct ServerContext<S: RecordStore> {
    store: S,
    locks: FileLocks,
}

impl<S: RecordStore> ServerContext<S> {
    /// Create a server over a store.
    pub fn new(store: S) -> Self {
        Self {
            store,
            locks: FileLocks::new(),
        }
    }

    /// Get the underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Handle one JSON request and produce one JSON reply.
    pub async fn handle_json(&self, body: &str) -> String {
        let reply = match Request::from_json(body) {
            Ok(request) => self.handle(request).await,
            Err(e) => {
                debug!(error = %e, "malformed request");
                Reply::from_result(Err(e))
            }
        };

        reply.to_json().unwrap_or_else(|e| {
            error!(error = %e, "failed to encode reply");
            r#"{"status":"err","data":{"kind":"encoding"}}"#.to_string()
        })
    }

    /// Handle one request.
    pub async fn handle(&self, request: Request) -> Reply<Response> {
        let name = request.name();
        let result = self.dispatch(request).await;

        if let Err(e) = &result {
            match e {
                ProtocolError::Store(inner) => {
                    error!(request = name, error = %inner, "store failure")
                }
                other => debug!(request = name, error = %other, "request rejected"),
            }
        }

        Reply::from_result(result)
    }

    async fn dispatch(&self, request: Request) -> Result<Response> {
        match request {
            Request::Register(envelope) => self.register(&envelope).await,
            Request::Upload(envelope) => {
                let payload = self.authenticate::<UploadPayload>(&envelope).await?;
                self.upload(payload).await
            }
            Request::Share(envelope) => {
                let payload = self.authenticate::<SharePayload>(&envelope).await?;
                self.share(payload).await
            }
            Request::Revoke(envelope) => {
                let payload = self.authenticate::<RevokePayload>(&envelope).await?;
                self.revoke(payload).await
            }
            Request::GetUser { user } => self.get_user(&user).await.map(Response::User),
            Request::GetFile {
                owner,
                name,
                caller,
            } => {
                self.authorize_read(&owner, &name, &caller).await?;
                self.get_file(&owner, &name).await.map(Response::File)
            }
            Request::GetGrant {
                owner,
                name,
                grantee,
            } => self
                .store
                .get_grant(&owner, &name, &grantee)
                .await?
                .map(Response::Grant)
                .ok_or_else(|| {
                    ProtocolError::NotFound(format!("no grant for {grantee} on {owner}/{name}"))
                }),
            Request::ListGrantees {
                owner,
                name,
                caller,
            } => {
                self.authorize_read(&owner, &name, &caller).await?;
                let grantees = self.store.list_grantees(&owner, &name).await?;
                Ok(Response::Grantees { grantees })
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Gate
    // ─────────────────────────────────────────────────────────────────────────

    /// Decode, look up the claimed owner, verify. Nothing is written here.
    async fn authenticate<P: Mutation>(&self, envelope: &SignedEnvelope) -> Result<P> {
        let payload = P::from_cbor(&envelope.payload_bytes)?;
        let kind = P::KIND;

        let Some(identity) = self.store.get_identity(payload.owner()).await? else {
            warn!(owner = %payload.owner(), ?kind, "mutation from unknown owner");
            return Err(ProtocolError::Signature);
        };

        if !envelope.verify(&identity.signing_key) {
            warn!(
                owner = %payload.owner(),
                ?kind,
                "rejected mutation with invalid signature"
            );
            return Err(ProtocolError::Signature);
        }

        Ok(payload)
    }

    /// Registration is verified against the key being registered.
    async fn register(&self, envelope: &SignedEnvelope) -> Result<Response> {
        let payload = RegisterPayload::from_cbor(&envelope.payload_bytes)?;
        let identity = payload.identity;

        if !envelope.verify(&identity.signing_key) {
            warn!(owner = %identity.user, "rejected registration with invalid signature");
            return Err(ProtocolError::Signature);
        }

        match self.store.put_identity(&identity).await? {
            InsertResult::Inserted => {
                info!(user = %identity.user, "registered identity");
                Ok(Response::Registered)
            }
            InsertResult::AlreadyExists => {
                Err(ProtocolError::Policy("user already registered".into()))
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Mutations (already authenticated)
    // ─────────────────────────────────────────────────────────────────────────

    async fn upload(&self, payload: UploadPayload) -> Result<Response> {
        let file_ref = payload.file_ref();

        check_epoch_step(payload.expected_epoch, payload.key_epoch)
            .map_err(|e| ProtocolError::Policy(e.to_string()))?;
        if payload.ciphertext.len() < SEAL_NONCE_LEN + TAG_LEN {
            return Err(ProtocolError::Policy("ciphertext too short".into()));
        }
        check_wrapped_key(&payload.owner_wrapped_key)?;

        let file = EncryptedFile {
            owner: payload.owner.clone(),
            name: payload.name.clone(),
            ciphertext: payload.ciphertext,
            key_epoch: payload.key_epoch,
        };
        let owner_grant = AccessGrant {
            owner: payload.owner.clone(),
            name: payload.name,
            grantee: payload.owner,
            wrapped_key: payload.owner_wrapped_key,
            key_epoch: payload.key_epoch,
        };

        let _guard = self.locks.lock(&file_ref).await;
        match self
            .store
            .put_file_with_grant(&file, payload.expected_epoch, &owner_grant)
            .await?
        {
            WriteResult::Written => {
                info!(file = %file_ref, key_epoch = file.key_epoch, "stored file");
                Ok(Response::Uploaded {
                    key_epoch: file.key_epoch,
                })
            }
            WriteResult::Conflict { current } => Err(ProtocolError::Conflict(describe_conflict(
                payload.expected_epoch,
                current,
            ))),
        }
    }

    async fn share(&self, payload: SharePayload) -> Result<Response> {
        let file_ref = payload.file_ref();
        check_wrapped_key(&payload.wrapped_key)?;

        let _guard = self.locks.lock(&file_ref).await;

        let file = self.get_file(&payload.owner, &payload.name).await?;
        if payload.key_epoch != file.key_epoch {
            return Err(ProtocolError::Conflict("stale key epoch".into()));
        }
        self.get_user(&payload.grantee).await?;

        let grant = AccessGrant {
            owner: payload.owner,
            name: payload.name,
            grantee: payload.grantee.clone(),
            wrapped_key: payload.wrapped_key,
            key_epoch: payload.key_epoch,
        };
        self.store.put_grant(&grant).await?;

        info!(
            file = %file_ref,
            grantee = %payload.grantee,
            key_epoch = payload.key_epoch,
            "granted access"
        );
        Ok(Response::Shared {
            grantee: payload.grantee,
            key_epoch: payload.key_epoch,
        })
    }

    async fn revoke(&self, payload: RevokePayload) -> Result<Response> {
        let file_ref = payload.file_ref();
        if payload.grantees.contains(&payload.owner) {
            return Err(ProtocolError::Policy("cannot revoke own access".into()));
        }

        let _guard = self.locks.lock(&file_ref).await;

        let file = self.get_file(&payload.owner, &payload.name).await?;
        if payload.key_epoch != file.key_epoch {
            return Err(ProtocolError::Conflict("stale key epoch".into()));
        }

        let mut removed = Vec::new();
        for grantee in &payload.grantees {
            if self
                .store
                .delete_grant(&payload.owner, &payload.name, grantee)
                .await?
            {
                removed.push(grantee.clone());
            }
        }

        info!(file = %file_ref, removed = removed.len(), "revoked access");
        Ok(Response::Revoked { removed })
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Reads
    // ─────────────────────────────────────────────────────────────────────────

    async fn get_user(&self, user: &UserId) -> Result<PublicIdentity> {
        self.store
            .get_identity(user)
            .await?
            .ok_or_else(|| ProtocolError::NotFound(format!("user {user}")))
    }

    async fn get_file(&self, owner: &UserId, name: &FileName) -> Result<EncryptedFile> {
        self.store
            .get_file(owner, name)
            .await?
            .ok_or_else(|| ProtocolError::NotFound(format!("file {owner}/{name}")))
    }

    /// Only the owner and current grantees may read a file or its grantee
    /// list. Anyone else gets the same answer as for a missing file.
    async fn authorize_read(
        &self,
        owner: &UserId,
        name: &FileName,
        caller: &UserId,
    ) -> Result<()> {
        if caller == owner || self.store.get_grant(owner, name, caller).await?.is_some() {
            return Ok(());
        }
        Err(ProtocolError::NotFound(format!(
            "file {}",
            FileRef::new(owner.clone(), name.clone())
        )))
    }

    /// The grantees of a file, read straight from the store.
    pub async fn grantees(&self, owner: &UserId, name: &FileName) -> Result<BTreeSet<UserId>> {
        Ok(self.store.list_grantees(owner, name).await?)
    }
}

fn check_wrapped_key(wrapped: &WrappedKey) -> Result<()> {
    if wrapped.len() != WRAPPED_KEY_LEN {
        return Err(ProtocolError::Policy(format!(
            "wrapped key must be {} bytes, got {}",
            WRAPPED_KEY_LEN,
            wrapped.len()
        )));
    }
    Ok(())
}

fn describe_conflict(expected: Option<u64>, current: Option<u64>) -> String {
    match (expected, current) {
        (None, Some(cur)) => format!("file already exists at key epoch {cur}"),
        (Some(exp), None) => format!("expected key epoch {exp}, but file does not exist"),
        (Some(exp), Some(cur)) => format!("expected key epoch {exp}, found {cur}"),
        (None, None) => "concurrent write".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::MutationKind;
    use lockbox_core::{hybrid, Keypair};
    use lockbox_store::MemoryStore;

    struct User {
        id: UserId,
        keys: Keypair,
    }

    fn user(name: &str) -> User {
        User {
            id: UserId::new(name).unwrap(),
            keys: Keypair::generate(),
        }
    }

    async fn registered(server: &ServerContext<MemoryStore>, name: &str) -> User {
        let u = user(name);
        let envelope = RegisterPayload::new(u.keys.public_identity(u.id.clone()))
            .sign(&u.keys)
            .unwrap();
        assert!(matches!(
            server.handle(Request::Register(envelope)).await,
            Reply::Ok(Response::Registered)
        ));
        u
    }

    fn upload_payload(owner: &User, name: &str) -> UploadPayload {
        let key = hybrid::new_content_key();
        UploadPayload {
            kind: MutationKind::Upload,
            owner: owner.id.clone(),
            name: FileName::new(name).unwrap(),
            ciphertext: hybrid::seal(&key, b"contents").unwrap(),
            key_epoch: 1,
            expected_epoch: None,
            owner_wrapped_key: hybrid::wrap(&owner.keys.encryption_public(), &key).unwrap(),
        }
    }

    #[tokio::test]
    async fn test_register_duplicate_rejected() {
        let server = ServerContext::new(MemoryStore::new());
        let alice = registered(&server, "alice").await;

        let impostor = Keypair::generate();
        let envelope = RegisterPayload::new(impostor.public_identity(alice.id.clone()))
            .sign(&impostor)
            .unwrap();
        let reply = server.handle(Request::Register(envelope)).await.into_result();
        assert!(matches!(reply, Err(ProtocolError::Policy(d)) if d == "user already registered"));

        let stored = server.store().get_identity(&alice.id).await.unwrap().unwrap();
        assert_eq!(stored.signing_key, alice.keys.signing_public());
    }

    #[tokio::test]
    async fn test_register_requires_proof_of_possession() {
        let server = ServerContext::new(MemoryStore::new());
        let victim = Keypair::generate();
        let attacker = Keypair::generate();

        let envelope = RegisterPayload::new(victim.public_identity(UserId::new("eve").unwrap()))
            .sign(&attacker)
            .unwrap();
        let reply = server.handle(Request::Register(envelope)).await.into_result();
        assert!(matches!(reply, Err(ProtocolError::Signature)));
    }

    #[tokio::test]
    async fn test_forged_upload_leaves_store_unchanged() {
        let server = ServerContext::new(MemoryStore::new());
        let alice = registered(&server, "alice").await;
        let mallory = registered(&server, "mallory").await;

        // Mallory signs a payload claiming to be Alice.
        let envelope = upload_payload(&alice, "a.txt").sign(&mallory.keys).unwrap();
        let reply = server.handle(Request::Upload(envelope)).await.into_result();
        assert!(matches!(reply, Err(ProtocolError::Signature)));

        let name = FileName::new("a.txt").unwrap();
        assert!(server.store().get_file(&alice.id, &name).await.unwrap().is_none());
        assert!(server.grantees(&alice.id, &name).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_tampered_payload_rejected() {
        let server = ServerContext::new(MemoryStore::new());
        let alice = registered(&server, "alice").await;

        let mut envelope = upload_payload(&alice, "a.txt").sign(&alice.keys).unwrap();
        let last = envelope.payload_bytes.len() - 1;
        envelope.payload_bytes[last] ^= 0x01;

        let reply = server.handle(Request::Upload(envelope)).await.into_result();
        assert!(reply.is_err());
        let name = FileName::new("a.txt").unwrap();
        assert!(server.store().get_file(&alice.id, &name).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unknown_owner_is_signature_failure() {
        let server = ServerContext::new(MemoryStore::new());
        let ghost = user("ghost");
        let envelope = upload_payload(&ghost, "a.txt").sign(&ghost.keys).unwrap();

        let reply = server.handle(Request::Upload(envelope)).await.into_result();
        assert!(matches!(reply, Err(ProtocolError::Signature)));
    }

    #[tokio::test]
    async fn test_kind_replay_rejected() {
        let server = ServerContext::new(MemoryStore::new());
        let alice = registered(&server, "alice").await;

        let envelope = upload_payload(&alice, "a.txt").sign(&alice.keys).unwrap();
        let reply = server.handle(Request::Revoke(envelope)).await.into_result();
        assert!(matches!(reply, Err(ProtocolError::Encoding(_))));
    }

    #[tokio::test]
    async fn test_upload_conflict_and_stale_share() {
        let server = ServerContext::new(MemoryStore::new());
        let alice = registered(&server, "alice").await;
        let bob = registered(&server, "bob").await;

        let first = upload_payload(&alice, "a.txt").sign(&alice.keys).unwrap();
        assert!(matches!(
            server.handle(Request::Upload(first)).await,
            Reply::Ok(Response::Uploaded { key_epoch: 1 })
        ));

        // A second create of the same file loses the compare-and-swap.
        let second = upload_payload(&alice, "a.txt").sign(&alice.keys).unwrap();
        let reply = server.handle(Request::Upload(second)).await.into_result();
        assert!(matches!(reply, Err(ProtocolError::Conflict(_))));

        let stale = SharePayload {
            kind: MutationKind::Share,
            owner: alice.id.clone(),
            name: FileName::new("a.txt").unwrap(),
            grantee: bob.id.clone(),
            wrapped_key: WrappedKey::from_bytes(vec![0u8; WRAPPED_KEY_LEN]),
            key_epoch: 2,
        }
        .sign(&alice.keys)
        .unwrap();
        let reply = server.handle(Request::Share(stale)).await.into_result();
        assert!(matches!(reply, Err(ProtocolError::Conflict(d)) if d == "stale key epoch"));
    }

    #[tokio::test]
    async fn test_server_rejects_self_revocation() {
        let server = ServerContext::new(MemoryStore::new());
        let alice = registered(&server, "alice").await;
        let upload = upload_payload(&alice, "a.txt").sign(&alice.keys).unwrap();
        server.handle(Request::Upload(upload)).await.into_result().unwrap();

        let revoke = RevokePayload {
            kind: MutationKind::Revoke,
            owner: alice.id.clone(),
            name: FileName::new("a.txt").unwrap(),
            grantees: vec![alice.id.clone()],
            key_epoch: 1,
        }
        .sign(&alice.keys)
        .unwrap();
        let reply = server.handle(Request::Revoke(revoke)).await.into_result();
        assert!(matches!(reply, Err(ProtocolError::Policy(d)) if d == "cannot revoke own access"));

        let name = FileName::new("a.txt").unwrap();
        assert!(server
            .store()
            .get_grant(&alice.id, &name, &alice.id)
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_non_grantee_read_is_not_found() {
        let server = ServerContext::new(MemoryStore::new());
        let alice = registered(&server, "alice").await;
        let upload = upload_payload(&alice, "a.txt").sign(&alice.keys).unwrap();
        server.handle(Request::Upload(upload)).await.into_result().unwrap();

        let reply = server
            .handle(Request::GetFile {
                owner: alice.id.clone(),
                name: FileName::new("a.txt").unwrap(),
                caller: UserId::new("eve").unwrap(),
            })
            .await
            .into_result();
        assert!(matches!(reply, Err(ProtocolError::NotFound(_))));

        let reply = server
            .handle(Request::GetFile {
                owner: alice.id.clone(),
                name: FileName::new("a.txt").unwrap(),
                caller: alice.id.clone(),
            })
            .await;
        assert!(matches!(reply, Reply::Ok(Response::File(_))));
    }

    #[tokio::test]
    async fn test_handle_json_malformed() {
        let server = ServerContext::new(MemoryStore::new());
        let reply = server.handle_json("{").await;
        let parsed = Reply::<Response>::from_json(&reply).unwrap();
        assert!(matches!(
            parsed.into_result(),
            Err(ProtocolError::Remote {
                kind: crate::error::ErrorKind::Encoding,
                ..
            })
        ));
    }
}
