//! Wire requests and tagged replies.
//!
//! One request or reply is one JSON object. Mutations travel as
//! [`SignedEnvelope`]s whose bytes are hex-encoded, so the signed payload
//! arrives byte-for-byte intact. Reads are unsigned.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use lockbox_core::{AccessGrant, EncryptedFile, FileName, PublicIdentity, SignedEnvelope, UserId};

use crate::error::{ErrorReply, ProtocolError, Result};

/// A request to the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    /// Publish a new identity (signed [`crate::RegisterPayload`]).
    Register(SignedEnvelope),
    /// Store a file and the owner's grant (signed [`crate::UploadPayload`]).
    Upload(SignedEnvelope),
    /// Add or replace one grant (signed [`crate::SharePayload`]).
    Share(SignedEnvelope),
    /// Delete grants (signed [`crate::RevokePayload`]).
    Revoke(SignedEnvelope),

    /// Fetch a public identity.
    GetUser { user: UserId },
    /// Fetch a sealed file, as `caller`.
    GetFile {
        owner: UserId,
        name: FileName,
        caller: UserId,
    },
    /// Fetch one grantee's wrapped key.
    GetGrant {
        owner: UserId,
        name: FileName,
        grantee: UserId,
    },
    /// List a file's grantees, as `caller`.
    ListGrantees {
        owner: UserId,
        name: FileName,
        caller: UserId,
    },
}

impl Request {
    /// Short name for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Request::Register(_) => "register",
            Request::Upload(_) => "upload",
            Request::Share(_) => "share",
            Request::Revoke(_) => "revoke",
            Request::GetUser { .. } => "get_user",
            Request::GetFile { .. } => "get_file",
            Request::GetGrant { .. } => "get_grant",
            Request::ListGrantees { .. } => "list_grantees",
        }
    }

    /// Serialize to a JSON string.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| ProtocolError::Encoding(e.to_string()))
    }

    /// Parse from a JSON string.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| ProtocolError::Encoding(e.to_string()))
    }
}

/// The body of a successful reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    Registered,
    Uploaded {
        key_epoch: u64,
    },
    Shared {
        grantee: UserId,
        key_epoch: u64,
    },
    Revoked {
        /// Grantees whose grant existed and was deleted.
        removed: Vec<UserId>,
    },
    User(PublicIdentity),
    File(EncryptedFile),
    Grant(AccessGrant),
    Grantees {
        grantees: BTreeSet<UserId>,
    },
}

/// A tagged reply: either a value or a redacted error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "data", rename_all = "snake_case")]
pub enum Reply<T> {
    Ok(T),
    Err(ErrorReply),
}

impl<T> Reply<T> {
    /// Build the reply for a handler result.
    pub fn from_result(result: Result<T>) -> Self {
        match result {
            Ok(value) => Reply::Ok(value),
            Err(e) => Reply::Err(e.to_reply()),
        }
    }

    /// Convert back into a local result.
    pub fn into_result(self) -> Result<T> {
        match self {
            Reply::Ok(value) => Ok(value),
            Reply::Err(e) => Err(ProtocolError::from_reply(e)),
        }
    }
}

impl<T: Serialize> Reply<T> {
    /// Serialize to a JSON string.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| ProtocolError::Encoding(e.to_string()))
    }
}

impl<T: serde::de::DeserializeOwned> Reply<T> {
    /// Parse from a JSON string.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| ProtocolError::Encoding(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use lockbox_core::Keypair;

    #[test]
    fn test_request_json_shape() {
        let req = Request::GetFile {
            owner: UserId::new("alice").unwrap(),
            name: FileName::new("a.txt").unwrap(),
            caller: UserId::new("bob").unwrap(),
        };
        let json = req.to_json().unwrap();
        assert_eq!(
            json,
            r#"{"type":"get_file","owner":"alice","name":"a.txt","caller":"bob"}"#
        );
        assert_eq!(Request::from_json(&json).unwrap(), req);
    }

    #[test]
    fn test_envelope_request_json() {
        let kp = Keypair::generate();
        let req = Request::Share(SignedEnvelope::sign(&kp, vec![1, 2, 3]));
        let json = req.to_json().unwrap();

        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["type"], "share");
        assert_eq!(value["payload_bytes"], "010203");
        assert_eq!(value["signature"].as_str().unwrap().len(), 128);

        assert_eq!(Request::from_json(&json).unwrap(), req);
    }

    #[test]
    fn test_reply_tagging() {
        let ok: Reply<Response> = Reply::Ok(Response::Uploaded { key_epoch: 2 });
        assert_eq!(
            ok.to_json().unwrap(),
            r#"{"status":"ok","data":{"type":"uploaded","key_epoch":2}}"#
        );

        let err: Reply<Response> = Reply::from_result(Err(ProtocolError::Signature));
        let json = err.to_json().unwrap();
        assert_eq!(json, r#"{"status":"err","data":{"kind":"signature"}}"#);

        let back = Reply::<Response>::from_json(&json).unwrap();
        assert!(matches!(back.into_result(), Err(ProtocolError::Signature)));
    }

    #[test]
    fn test_reply_error_kind_preserved() {
        let reply: Reply<Response> =
            Reply::from_result(Err(ProtocolError::Conflict("stale key epoch".into())));
        match reply {
            Reply::Err(e) => assert_eq!(e.kind, ErrorKind::Conflict),
            Reply::Ok(_) => panic!("expected error"),
        }
    }

    #[test]
    fn test_malformed_request() {
        assert!(matches!(
            Request::from_json(r#"{"type":"get_user","user":""}"#),
            Err(ProtocolError::Encoding(_))
        ));
        assert!(Request::from_json("not json").is_err());
    }
}
