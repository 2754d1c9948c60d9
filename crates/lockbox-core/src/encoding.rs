//! Serde helpers for byte fields.

/// Serialize `Vec<u8>` fields as lowercase hex strings.
///
/// Used with `#[serde(with = "lockbox_core::encoding::hex_bytes")]` so that
/// signed bytes and ciphertexts survive a JSON hop unchanged.
pub mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        hex::decode(&s).map_err(serde::de::Error::custom)
    }
}
