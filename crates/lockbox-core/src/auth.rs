//! Request authentication.
//!
//! Mutations are signed over their exact serialized bytes. The verifier
//! checks those same bytes; nothing is re-serialized between the two.

use serde::{Deserialize, Serialize};

use crate::crypto::{Ed25519PublicKey, Ed25519Signature};
use crate::identity::Keypair;

/// Sign the exact payload bytes.
pub fn sign(keypair: &Keypair, payload_bytes: &[u8]) -> Ed25519Signature {
    keypair.sign(payload_bytes)
}

/// Check a signature over the exact payload bytes.
///
/// Returns false for a malformed signature, the wrong key or a tampered
/// payload. Never panics.
pub fn verify(public_key: &Ed25519PublicKey, payload_bytes: &[u8], signature: &[u8]) -> bool {
    match Ed25519Signature::from_slice(signature) {
        Some(sig) => public_key.verify(payload_bytes, &sig).is_ok(),
        None => false,
    }
}

/// A signed mutation as it travels over the wire.
///
/// Verified then discarded; never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedEnvelope {
    #[serde(with = "crate::encoding::hex_bytes")]
    pub payload_bytes: Vec<u8>,
    #[serde(with = "crate::encoding::hex_bytes")]
    pub signature: Vec<u8>,
}

impl SignedEnvelope {
    /// Sign `payload_bytes` and wrap them in an envelope.
    pub fn sign(keypair: &Keypair, payload_bytes: Vec<u8>) -> Self {
        let signature = sign(keypair, &payload_bytes).as_bytes().to_vec();
        Self {
            payload_bytes,
            signature,
        }
    }

    /// Verify the envelope against a public key.
    pub fn verify(&self, public_key: &Ed25519PublicKey) -> bool {
        verify(public_key, &self.payload_bytes, &self.signature)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_verify() {
        let kp = Keypair::generate();
        let payload = b"upload notes.txt";
        let sig = sign(&kp, payload);
        assert!(verify(&kp.signing_public(), payload, sig.as_bytes()));
    }

    #[test]
    fn test_verify_wrong_identity() {
        let alice = Keypair::generate();
        let mallory = Keypair::generate();
        let payload = b"share notes.txt with mallory";
        let sig = sign(&mallory, payload);
        assert!(!verify(&alice.signing_public(), payload, sig.as_bytes()));
    }

    #[test]
    fn test_verify_flipped_byte() {
        let kp = Keypair::generate();
        let mut payload = b"revoke bob".to_vec();
        let sig = sign(&kp, &payload);

        payload[0] ^= 0x01;
        assert!(!verify(&kp.signing_public(), &payload, sig.as_bytes()));

        payload[0] ^= 0x01;
        let mut bad_sig = sig.as_bytes().to_vec();
        bad_sig[10] ^= 0x80;
        assert!(!verify(&kp.signing_public(), &payload, &bad_sig));
    }

    #[test]
    fn test_verify_signature_for_other_payload() {
        let kp = Keypair::generate();
        let sig = sign(&kp, b"payload one");
        assert!(!verify(&kp.signing_public(), b"payload two", sig.as_bytes()));
    }

    #[test]
    fn test_verify_malformed_inputs() {
        let kp = Keypair::generate();
        assert!(!verify(&kp.signing_public(), b"x", &[]));
        assert!(!verify(&kp.signing_public(), b"x", &[0u8; 63]));
        assert!(!verify(&kp.signing_public(), b"x", &[0u8; 64]));

        // Not a curve point.
        let bogus = Ed25519PublicKey::from_bytes([0xff; 32]);
        let sig = sign(&kp, b"x");
        assert!(!verify(&bogus, b"x", sig.as_bytes()));
    }

    #[test]
    fn test_envelope_json_preserves_bytes() {
        let kp = Keypair::generate();
        let env = SignedEnvelope::sign(&kp, vec![0xa2, 0x00, 0xff, 0x7f]);

        let json = serde_json::to_string(&env).unwrap();
        let decoded: SignedEnvelope = serde_json::from_str(&json).unwrap();

        assert_eq!(decoded, env);
        assert!(decoded.verify(&kp.signing_public()));
    }
}
