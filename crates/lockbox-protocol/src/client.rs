//! Client side: the upload, share, revoke and download flows.
//!
//! All cryptography happens here. The client seals, wraps and signs; the
//! server only ever sees ciphertexts, wrapped keys and signatures.

use std::collections::BTreeSet;
use std::time::Duration;

use tracing::{debug, info};

use lockbox_core::{
    hybrid, AccessGrant, ContentKey, EncryptedFile, FileName, Keypair, PublicIdentity, UserId,
    INITIAL_KEY_EPOCH,
};

use crate::error::{ProtocolError, Result};
use crate::messages::{Request, Response};
use crate::payload::{
    Mutation, MutationKind, RegisterPayload, RevokePayload, SharePayload, UploadPayload,
};
use crate::transport::Transport;

/// Client behavior that does not come from the key pair.
#[derive(Debug, Clone)]
pub struct ClientSettings {
    /// Upper bound on every transport call. There is no retry.
    pub request_timeout: Duration,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Result of a revoke.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevokeOutcome {
    /// Epoch of the freshly minted content key.
    pub key_epoch: u64,
    /// Grantees whose grant existed and was deleted.
    pub removed: Vec<UserId>,
    /// Remaining grantees that received the new key.
    pub reshared: Vec<UserId>,
}

/// A user's view of the system: their key pair and a way to reach the
/// server.
pub struct ClientContext<T: Transport> {
    user: UserId,
    keypair: Keypair,
    transport: T,
    settings: ClientSettings,
}

impl<T: Transport> ClientContext<T> {
    /// Create a client for `user`.
    pub fn new(user: UserId, keypair: Keypair, transport: T, settings: ClientSettings) -> Self {
        Self {
            user,
            keypair,
            transport,
            settings,
        }
    }

    pub fn user(&self) -> &UserId {
        &self.user
    }

    pub fn keypair(&self) -> &Keypair {
        &self.keypair
    }

    pub fn settings(&self) -> &ClientSettings {
        &self.settings
    }

    async fn call(&self, request: Request) -> Result<Response> {
        let timeout = self.settings.request_timeout;
        let reply = tokio::time::timeout(timeout, self.transport.call(request))
            .await
            .map_err(|_| ProtocolError::Timeout(timeout))??;
        reply.into_result()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Identity
    // ─────────────────────────────────────────────────────────────────────────

    /// Publish this client's public identity.
    pub async fn register(&self) -> Result<()> {
        let payload = RegisterPayload::new(self.keypair.public_identity(self.user.clone()));
        match self.call(Request::Register(payload.sign(&self.keypair)?)).await? {
            Response::Registered => {
                info!(user = %self.user, "registered");
                Ok(())
            }
            other => Err(unexpected(&other)),
        }
    }

    /// Fetch another user's public identity.
    pub async fn lookup_user(&self, user: &UserId) -> Result<PublicIdentity> {
        match self.call(Request::GetUser { user: user.clone() }).await? {
            Response::User(identity) if &identity.user == user => Ok(identity),
            other => Err(unexpected(&other)),
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Reads
    // ─────────────────────────────────────────────────────────────────────────

    /// Fetch a sealed file as this user.
    pub async fn fetch_file(&self, owner: &UserId, name: &FileName) -> Result<EncryptedFile> {
        let request = Request::GetFile {
            owner: owner.clone(),
            name: name.clone(),
            caller: self.user.clone(),
        };
        match self.call(request).await? {
            Response::File(file) => Ok(file),
            other => Err(unexpected(&other)),
        }
    }

    /// Fetch one grantee's grant.
    pub async fn fetch_grant(
        &self,
        owner: &UserId,
        name: &FileName,
        grantee: &UserId,
    ) -> Result<AccessGrant> {
        let request = Request::GetGrant {
            owner: owner.clone(),
            name: name.clone(),
            grantee: grantee.clone(),
        };
        match self.call(request).await? {
            Response::Grant(grant) => Ok(grant),
            other => Err(unexpected(&other)),
        }
    }

    /// List a file's grantees, the owner included.
    pub async fn list_grantees(&self, owner: &UserId, name: &FileName) -> Result<BTreeSet<UserId>> {
        let request = Request::ListGrantees {
            owner: owner.clone(),
            name: name.clone(),
            caller: self.user.clone(),
        };
        match self.call(request).await? {
            Response::Grantees { grantees } => Ok(grantees),
            other => Err(unexpected(&other)),
        }
    }

    /// Download and decrypt a file this user was granted.
    ///
    /// A grant from before the latest key rotation is reported as a
    /// conflict; the owner must re-share.
    pub async fn download(&self, owner: &UserId, name: &FileName) -> Result<Vec<u8>> {
        let grant = self.fetch_grant(owner, name, &self.user).await?;
        let file = self.fetch_file(owner, name).await?;

        if grant.key_epoch != file.key_epoch {
            debug!(
                file = %file.file_ref(),
                grant_epoch = grant.key_epoch,
                file_epoch = file.key_epoch,
                "stale grant"
            );
            return Err(ProtocolError::Conflict(
                "grant is stale; owner must re-share".into(),
            ));
        }

        let key = hybrid::unwrap(&self.keypair, &grant.wrapped_key)?;
        Ok(hybrid::open(&key, &file.ciphertext)?)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Owner flows
    // ─────────────────────────────────────────────────────────────────────────

    /// Encrypt and store a file, reusing the file's current content key if
    /// there is one. Returns the key epoch the body was sealed under.
    pub async fn upload(&self, name: &FileName, plaintext: &[u8]) -> Result<u64> {
        let file = match self.fetch_file(&self.user, name).await {
            Ok(file) => Some(file),
            Err(ProtocolError::NotFound(_)) => None,
            Err(e) => return Err(e),
        };

        let Some(file) = file else {
            let key = hybrid::new_content_key();
            self.publish(name, &key, plaintext, INITIAL_KEY_EPOCH, None)
                .await?;
            return Ok(INITIAL_KEY_EPOCH);
        };

        match self.own_key(name, &file).await {
            Ok(key) => {
                self.publish(name, &key, plaintext, file.key_epoch, Some(file.key_epoch))
                    .await?;
                Ok(file.key_epoch)
            }
            // The owner's grant is missing or stale: rotate and re-share.
            Err(ProtocolError::NotFound(_) | ProtocolError::Conflict(_)) => {
                let key = hybrid::new_content_key();
                let epoch = next_epoch(file.key_epoch)?;
                self.publish(name, &key, plaintext, epoch, Some(file.key_epoch))
                    .await?;
                self.share_key(name, &key, epoch, &[]).await?;
                Ok(epoch)
            }
            Err(e) => Err(e),
        }
    }

    /// Give `grantee` access to a file by wrapping its current key for them.
    ///
    /// Sharing twice with the same user replaces the earlier grant.
    pub async fn share(&self, name: &FileName, grantee: &UserId) -> Result<()> {
        let (file, key) = self.current_key(name).await?;
        let identity = self.lookup_user(grantee).await?;
        self.send_grant(name, &identity, &key, file.key_epoch).await
    }

    /// Revoke the listed users by rotating the file's content key.
    ///
    /// The current body is fetched and decrypted before anything is
    /// written. Then the body is re-sealed under a new key together with the
    /// owner's grant, the revoked grants are deleted, and the new key is
    /// wrapped for every remaining grantee.
    ///
    /// An interrupted revoke is finished by calling again with the same
    /// list. An empty list is only safe once the revoked grants are gone
    /// (the failure was while re-wrapping): any grant still present is
    /// treated as a remaining grantee and receives the new key.
    pub async fn revoke(&self, name: &FileName, grantees: &[UserId]) -> Result<RevokeOutcome> {
        if grantees.contains(&self.user) {
            return Err(ProtocolError::Policy("cannot revoke own access".into()));
        }

        let (file, old_key) = self.current_key(name).await?;
        let plaintext = hybrid::open(&old_key, &file.ciphertext)?;

        let key = hybrid::new_content_key();
        let key_epoch = next_epoch(file.key_epoch)?;
        self.publish(name, &key, &plaintext, key_epoch, Some(file.key_epoch))
            .await?;

        let payload = RevokePayload {
            kind: MutationKind::Revoke,
            owner: self.user.clone(),
            name: name.clone(),
            grantees: grantees.to_vec(),
            key_epoch,
        };
        let removed = match self.call(Request::Revoke(payload.sign(&self.keypair)?)).await? {
            Response::Revoked { removed } => removed,
            other => return Err(unexpected(&other)),
        };

        let reshared = self.share_key(name, &key, key_epoch, grantees).await?;

        info!(
            owner = %self.user,
            file = %name,
            key_epoch,
            removed = removed.len(),
            reshared = reshared.len(),
            "rotated content key"
        );
        Ok(RevokeOutcome {
            key_epoch,
            removed,
            reshared,
        })
    }

    /// Re-wrap the current content key for every grantee without rotating.
    ///
    /// Repairs grants left stale by a revoke that failed after its
    /// deletion step. Every grant still on the server is re-wrapped, so a
    /// revoke that stopped before deleting must be re-run with its own list
    /// instead.
    pub async fn reshare(&self, name: &FileName) -> Result<Vec<UserId>> {
        let (file, key) = self.current_key(name).await?;
        self.share_key(name, &key, file.key_epoch, &[]).await
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Helpers
    // ─────────────────────────────────────────────────────────────────────────

    /// The owner's current file and the content key it is sealed under.
    async fn current_key(&self, name: &FileName) -> Result<(EncryptedFile, ContentKey)> {
        let file = self.fetch_file(&self.user, name).await?;
        let key = self.own_key(name, &file).await?;
        Ok((file, key))
    }

    /// Unwrap the owner's own grant for `file`.
    async fn own_key(&self, name: &FileName, file: &EncryptedFile) -> Result<ContentKey> {
        let grant = self.fetch_grant(&self.user, name, &self.user).await?;
        if grant.key_epoch != file.key_epoch {
            return Err(ProtocolError::Conflict(format!(
                "owner grant is at key epoch {}, file at {}",
                grant.key_epoch, file.key_epoch
            )));
        }
        Ok(hybrid::unwrap(&self.keypair, &grant.wrapped_key)?)
    }

    /// Seal `plaintext` and store it with the owner's grant in one request.
    async fn publish(
        &self,
        name: &FileName,
        key: &ContentKey,
        plaintext: &[u8],
        key_epoch: u64,
        expected_epoch: Option<u64>,
    ) -> Result<()> {
        let payload = UploadPayload {
            kind: MutationKind::Upload,
            owner: self.user.clone(),
            name: name.clone(),
            ciphertext: hybrid::seal(key, plaintext)?,
            key_epoch,
            expected_epoch,
            owner_wrapped_key: hybrid::wrap(&self.keypair.encryption_public(), key)?,
        };

        match self.call(Request::Upload(payload.sign(&self.keypair)?)).await? {
            Response::Uploaded { .. } => {
                debug!(owner = %self.user, file = %name, key_epoch, "uploaded");
                Ok(())
            }
            other => Err(unexpected(&other)),
        }
    }

    /// Wrap `key` for every grantee except the owner and `excluded`.
    async fn share_key(
        &self,
        name: &FileName,
        key: &ContentKey,
        key_epoch: u64,
        excluded: &[UserId],
    ) -> Result<Vec<UserId>> {
        let grantees = self.list_grantees(&self.user, name).await?;

        let mut shared = Vec::new();
        for grantee in grantees {
            if grantee == self.user || excluded.contains(&grantee) {
                continue;
            }
            let identity = self.lookup_user(&grantee).await?;
            self.send_grant(name, &identity, key, key_epoch).await?;
            shared.push(grantee);
        }
        Ok(shared)
    }

    async fn send_grant(
        &self,
        name: &FileName,
        grantee: &PublicIdentity,
        key: &ContentKey,
        key_epoch: u64,
    ) -> Result<()> {
        let payload = SharePayload {
            kind: MutationKind::Share,
            owner: self.user.clone(),
            name: name.clone(),
            grantee: grantee.user.clone(),
            wrapped_key: hybrid::wrap(&grantee.encryption_key, key)?,
            key_epoch,
        };

        match self.call(Request::Share(payload.sign(&self.keypair)?)).await? {
            Response::Shared { .. } => {
                debug!(owner = %self.user, file = %name, grantee = %grantee.user, "shared");
                Ok(())
            }
            other => Err(unexpected(&other)),
        }
    }
}

fn next_epoch(epoch: u64) -> Result<u64> {
    epoch
        .checked_add(1)
        .ok_or_else(|| ProtocolError::Policy("key epoch exhausted".into()))
}

fn unexpected(response: &Response) -> ProtocolError {
    ProtocolError::Encoding(format!("unexpected response: {response:?}"))
}
