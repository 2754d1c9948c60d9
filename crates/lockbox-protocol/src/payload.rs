//! Signed mutation payloads.
//!
//! A client encodes a payload to CBOR once, signs those exact bytes and
//! ships them inside a [`SignedEnvelope`]. The server decodes the same bytes
//! it verified; nothing is re-serialized in between.
//!
//! Every payload carries its [`MutationKind`], so a signed share can never
//! be replayed as a revoke.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use lockbox_core::{FileName, FileRef, Keypair, PublicIdentity, SignedEnvelope, UserId, WrappedKey};

use crate::error::{ProtocolError, Result};

/// Discriminator for mutation payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationKind {
    Register,
    Upload,
    Share,
    Revoke,
}

/// A payload that is signed by its owner.
pub trait Mutation: Serialize + DeserializeOwned {
    /// The kind every payload of this type must carry.
    const KIND: MutationKind;

    /// The kind recorded in the payload.
    fn kind(&self) -> MutationKind;

    /// The user whose key must have signed the payload.
    fn owner(&self) -> &UserId;

    /// Serialize to CBOR bytes.
    fn to_cbor(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::into_writer(self, &mut buf)
            .map_err(|e| ProtocolError::Encoding(e.to_string()))?;
        Ok(buf)
    }

    /// Deserialize from CBOR bytes, rejecting a payload of another kind.
    fn from_cbor(bytes: &[u8]) -> Result<Self> {
        let payload: Self =
            ciborium::from_reader(bytes).map_err(|e| ProtocolError::Encoding(e.to_string()))?;
        if payload.kind() != Self::KIND {
            return Err(ProtocolError::Encoding(format!(
                "expected {:?} payload, got {:?}",
                Self::KIND,
                payload.kind()
            )));
        }
        Ok(payload)
    }

    /// Encode and sign with the owner's key pair.
    fn sign(&self, keypair: &Keypair) -> Result<SignedEnvelope> {
        Ok(SignedEnvelope::sign(keypair, self.to_cbor()?))
    }
}

macro_rules! impl_mutation {
    ($ty:ty, $kind:expr, |$p:ident| $owner:expr) => {
        impl Mutation for $ty {
            const KIND: MutationKind = $kind;

            fn kind(&self) -> MutationKind {
                self.kind
            }

            fn owner(&self) -> &UserId {
                let $p = self;
                $owner
            }
        }
    };
}

/// Publish a public identity. Self-signed by the identity's own key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterPayload {
    pub kind: MutationKind,
    pub identity: PublicIdentity,
}

impl RegisterPayload {
    pub fn new(identity: PublicIdentity) -> Self {
        Self {
            kind: MutationKind::Register,
            identity,
        }
    }
}

impl_mutation!(RegisterPayload, MutationKind::Register, |p| &p.identity.user);

/// Store a sealed body together with the owner's self-grant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadPayload {
    pub kind: MutationKind,
    pub owner: UserId,
    pub name: FileName,
    #[serde(with = "lockbox_core::encoding::hex_bytes")]
    pub ciphertext: Vec<u8>,
    /// Epoch of the content key the body is sealed under.
    pub key_epoch: u64,
    /// Epoch the writer saw; `None` when creating the file.
    pub expected_epoch: Option<u64>,
    /// The content key wrapped for the owner.
    pub owner_wrapped_key: WrappedKey,
}

impl UploadPayload {
    pub fn file_ref(&self) -> FileRef {
        FileRef::new(self.owner.clone(), self.name.clone())
    }
}

impl_mutation!(UploadPayload, MutationKind::Upload, |p| &p.owner);

/// Grant one user access by giving them the wrapped content key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SharePayload {
    pub kind: MutationKind,
    pub owner: UserId,
    pub name: FileName,
    pub grantee: UserId,
    pub wrapped_key: WrappedKey,
    /// Epoch of the content key inside `wrapped_key`.
    pub key_epoch: u64,
}

impl SharePayload {
    pub fn file_ref(&self) -> FileRef {
        FileRef::new(self.owner.clone(), self.name.clone())
    }
}

impl_mutation!(SharePayload, MutationKind::Share, |p| &p.owner);

/// Delete the grants of the listed users.
///
/// Sent after the content key has been rotated to `key_epoch`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevokePayload {
    pub kind: MutationKind,
    pub owner: UserId,
    pub name: FileName,
    pub grantees: Vec<UserId>,
    pub key_epoch: u64,
}

impl RevokePayload {
    pub fn file_ref(&self) -> FileRef {
        FileRef::new(self.owner.clone(), self.name.clone())
    }
}

impl_mutation!(RevokePayload, MutationKind::Revoke, |p| &p.owner);

#[cfg(test)]
mod tests {
    use super::*;
    use lockbox_core::hybrid::WRAPPED_KEY_LEN;
    use proptest::prelude::*;

    fn user(name: &str) -> UserId {
        UserId::new(name).unwrap()
    }

    fn share_payload() -> SharePayload {
        SharePayload {
            kind: MutationKind::Share,
            owner: user("alice"),
            name: FileName::new("plan.md").unwrap(),
            grantee: user("bob"),
            wrapped_key: WrappedKey::from_bytes(vec![7u8; WRAPPED_KEY_LEN]),
            key_epoch: 1,
        }
    }

    #[test]
    fn test_cbor_roundtrip() {
        let payload = share_payload();
        let bytes = payload.to_cbor().unwrap();
        assert_eq!(SharePayload::from_cbor(&bytes).unwrap(), payload);
    }

    #[test]
    fn test_kind_mismatch_rejected() {
        let mut payload = share_payload();
        payload.kind = MutationKind::Revoke;
        let bytes = payload.to_cbor().unwrap();
        assert!(matches!(
            SharePayload::from_cbor(&bytes),
            Err(ProtocolError::Encoding(_))
        ));
    }

    #[test]
    fn test_share_cannot_decode_as_revoke() {
        let bytes = share_payload().to_cbor().unwrap();
        assert!(RevokePayload::from_cbor(&bytes).is_err());
    }

    #[test]
    fn test_garbage_rejected() {
        assert!(UploadPayload::from_cbor(&[0xff, 0x00, 0x13]).is_err());
        assert!(UploadPayload::from_cbor(&[]).is_err());
    }

    #[test]
    fn test_signed_payload_verifies() {
        let alice = Keypair::generate();
        let envelope = share_payload().sign(&alice).unwrap();
        assert!(envelope.verify(&alice.signing_public()));
        assert_eq!(
            SharePayload::from_cbor(&envelope.payload_bytes).unwrap().owner(),
            &user("alice")
        );
    }

    fn arb_user() -> impl Strategy<Value = UserId> {
        "[a-z][a-z0-9_.-]{0,15}".prop_map(|s| UserId::new(s).unwrap())
    }

    fn arb_file_name() -> impl Strategy<Value = FileName> {
        "[a-zA-Z0-9 ._\u{e9}-]{1,32}".prop_map(|s| FileName::new(s).unwrap())
    }

    proptest! {
        #[test]
        fn upload_survives_cbor_and_json(
            owner in arb_user(),
            name in arb_file_name(),
            ciphertext in prop::collection::vec(any::<u8>(), 0..512),
            key_epoch in 1u64..=u64::MAX,
            expected_epoch in any::<Option<u64>>(),
            wrapped in prop::collection::vec(any::<u8>(), WRAPPED_KEY_LEN),
        ) {
            let payload = UploadPayload {
                kind: MutationKind::Upload,
                owner,
                name,
                ciphertext,
                key_epoch,
                expected_epoch,
                owner_wrapped_key: WrappedKey::from_bytes(wrapped),
            };
            let bytes = payload.to_cbor().unwrap();
            prop_assert_eq!(&UploadPayload::from_cbor(&bytes).unwrap(), &payload);

            // The signed bytes cross the JSON hop unchanged.
            let envelope = SignedEnvelope {
                payload_bytes: bytes.clone(),
                signature: vec![0u8; 64],
            };
            let json = serde_json::to_string(&envelope).unwrap();
            let back: SignedEnvelope = serde_json::from_str(&json).unwrap();
            prop_assert_eq!(back.payload_bytes, bytes);
        }

        #[test]
        fn revoke_grantee_order_is_preserved(
            owner in arb_user(),
            grantees in prop::collection::vec(arb_user(), 0..8),
            key_epoch in 1u64..1000,
        ) {
            let payload = RevokePayload {
                kind: MutationKind::Revoke,
                owner,
                name: FileName::new("shared.txt").unwrap(),
                grantees,
                key_epoch,
            };
            let decoded = RevokePayload::from_cbor(&payload.to_cbor().unwrap()).unwrap();
            prop_assert_eq!(decoded.grantees, payload.grantees);
        }
    }

    #[test]
    fn test_register_owner_is_subject() {
        let kp = Keypair::generate();
        let payload = RegisterPayload::new(kp.public_identity(user("dave")));
        assert_eq!(payload.owner(), &user("dave"));
        assert_eq!(payload.kind(), RegisterPayload::KIND);
    }
}
