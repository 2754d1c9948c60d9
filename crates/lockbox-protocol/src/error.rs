//! Error types for the protocol module, and their wire form.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use lockbox_core::CoreError;
use lockbox_store::StoreError;

/// Errors that can occur in the share/revoke protocol.
///
/// `Crypto` and `Signature` render identically: a caller probing the server
/// learns only that access was denied.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// A wrap, unwrap, seal or open failed.
    #[error("access denied")]
    Crypto,

    /// A mutation's signature did not verify against the claimed owner.
    #[error("access denied")]
    Signature,

    /// The request is well-formed but not allowed.
    #[error("policy violation: {0}")]
    Policy(String),

    /// A record does not exist, or the caller may not read it.
    #[error("not found: {0}")]
    NotFound(String),

    /// A concurrent writer moved the file's key epoch.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Local store operation failed.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(String),

    /// No reply within the request timeout.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// A payload, request or reply could not be encoded or decoded.
    #[error("encoding error: {0}")]
    Encoding(String),

    /// The server failed with an error that has no local counterpart.
    #[error("server error ({kind:?}){}", detail_suffix(.detail))]
    Remote {
        kind: ErrorKind,
        detail: Option<String>,
    },
}

fn detail_suffix(detail: &Option<String>) -> String {
    detail.as_deref().map(|d| format!(": {d}")).unwrap_or_default()
}

impl From<CoreError> for ProtocolError {
    fn from(e: CoreError) -> Self {
        match e {
            CoreError::Encryption | CoreError::Decryption | CoreError::InvalidKey(_) => {
                ProtocolError::Crypto
            }
            CoreError::InvalidName(msg) => ProtocolError::Policy(msg),
            other => ProtocolError::Encoding(other.to_string()),
        }
    }
}

/// Error category carried across the transport boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Crypto,
    Signature,
    Policy,
    NotFound,
    Conflict,
    Store,
    Transport,
    Encoding,
}

/// The error half of a tagged reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorReply {
    pub kind: ErrorKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl ProtocolError {
    /// The category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ProtocolError::Crypto => ErrorKind::Crypto,
            ProtocolError::Signature => ErrorKind::Signature,
            ProtocolError::Policy(_) => ErrorKind::Policy,
            ProtocolError::NotFound(_) => ErrorKind::NotFound,
            ProtocolError::Conflict(_) => ErrorKind::Conflict,
            ProtocolError::Store(_) => ErrorKind::Store,
            ProtocolError::Transport(_) | ProtocolError::Timeout(_) => ErrorKind::Transport,
            ProtocolError::Encoding(_) => ErrorKind::Encoding,
            ProtocolError::Remote { kind, .. } => *kind,
        }
    }

    /// Whether a read that hit this error may succeed if retried after a
    /// concurrent revoke settles.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ProtocolError::NotFound(_) | ProtocolError::Conflict(_) | ProtocolError::Timeout(_)
        )
    }

    /// The redacted form sent to clients.
    ///
    /// Crypto, signature and store failures carry no detail.
    pub fn to_reply(&self) -> ErrorReply {
        let detail = match self {
            ProtocolError::Crypto | ProtocolError::Signature | ProtocolError::Store(_) => None,
            ProtocolError::Policy(d)
            | ProtocolError::NotFound(d)
            | ProtocolError::Conflict(d)
            | ProtocolError::Transport(d)
            | ProtocolError::Encoding(d) => Some(d.clone()),
            ProtocolError::Timeout(d) => Some(format!("timed out after {d:?}")),
            ProtocolError::Remote { detail, .. } => detail.clone(),
        };
        ErrorReply {
            kind: self.kind(),
            detail,
        }
    }

    /// Rebuild a local error from a server reply.
    pub fn from_reply(reply: ErrorReply) -> Self {
        let detail = reply.detail.unwrap_or_default();
        match reply.kind {
            ErrorKind::Crypto => ProtocolError::Crypto,
            ErrorKind::Signature => ProtocolError::Signature,
            ErrorKind::Policy => ProtocolError::Policy(detail),
            ErrorKind::NotFound => ProtocolError::NotFound(detail),
            ErrorKind::Conflict => ProtocolError::Conflict(detail),
            kind @ (ErrorKind::Store | ErrorKind::Transport | ErrorKind::Encoding) => {
                ProtocolError::Remote {
                    kind,
                    detail: (!detail.is_empty()).then_some(detail),
                }
            }
        }
    }
}

/// Result type for protocol operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crypto_and_signature_look_alike() {
        assert_eq!(ProtocolError::Crypto.to_string(), "access denied");
        assert_eq!(ProtocolError::Signature.to_string(), "access denied");
        assert_eq!(ProtocolError::Crypto.to_reply().detail, None);
        assert_eq!(ProtocolError::Signature.to_reply().detail, None);
    }

    #[test]
    fn test_store_detail_redacted() {
        let err = ProtocolError::Store(StoreError::InvalidData("row 7 in grants".into()));
        let reply = err.to_reply();
        assert_eq!(reply.kind, ErrorKind::Store);
        assert_eq!(reply.detail, None);

        let remote = ProtocolError::from_reply(reply);
        assert!(matches!(
            remote,
            ProtocolError::Remote {
                kind: ErrorKind::Store,
                detail: None
            }
        ));
    }

    #[test]
    fn test_policy_detail_kept() {
        let reply = ProtocolError::Policy("cannot revoke own access".into()).to_reply();
        let back = ProtocolError::from_reply(reply);
        assert!(matches!(back, ProtocolError::Policy(d) if d == "cannot revoke own access"));
    }

    #[test]
    fn test_core_error_mapping() {
        assert!(matches!(
            ProtocolError::from(CoreError::Decryption),
            ProtocolError::Crypto
        ));
        assert!(matches!(
            ProtocolError::from(CoreError::InvalidName("empty".into())),
            ProtocolError::Policy(_)
        ));
    }

    #[test]
    fn test_transient_errors() {
        assert!(ProtocolError::NotFound("file alice/a.txt".into()).is_transient());
        assert!(ProtocolError::Conflict("stale key epoch".into()).is_transient());
        assert!(ProtocolError::Timeout(Duration::from_secs(1)).is_transient());

        assert!(!ProtocolError::Crypto.is_transient());
        assert!(!ProtocolError::Signature.is_transient());
        assert!(!ProtocolError::Policy("cannot revoke own access".into()).is_transient());
    }

    #[test]
    fn test_error_reply_json() {
        let reply = ProtocolError::NotFound("file alice/a.txt".into()).to_reply();
        let json = serde_json::to_string(&reply).unwrap();
        assert_eq!(json, r#"{"kind":"not_found","detail":"file alice/a.txt"}"#);

        let denied = serde_json::to_string(&ProtocolError::Crypto.to_reply()).unwrap();
        assert_eq!(denied, r#"{"kind":"crypto"}"#);
    }
}
