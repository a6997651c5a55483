//! Base64 transport encoding for binary image payloads

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;

/// Encode raw bytes as standard padded base64
pub fn encode(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

/// Decode standard base64, tolerating surrounding whitespace
pub fn decode(text: &str) -> Result<Vec<u8>, base64::DecodeError> {
    STANDARD.decode(text.trim())
}

/// Length of the base64 encoding of `len` raw bytes
pub fn encoded_len(len: usize) -> usize {
    len.div_ceil(3) * 4
}

/// Serde adapter storing `Vec<u8>` fields as base64 strings
pub mod base64_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(deserializer)?;
        super::decode(&text).map_err(serde::de::Error::custom)
    }
}
