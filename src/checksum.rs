//! Checksum utilities for chunked asset integrity verification

use sha2::{Digest, Sha256};
use serde::{Deserialize, Serialize};
use std::fmt;

/// SHA256 checksum of an unsplit asset buffer, as lowercase hex
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Checksum(String);

impl Checksum {
    /// Compute checksum from raw bytes
    pub fn from_bytes(data: &[u8]) -> Self {
        let hash = Sha256::digest(data);
        Self(format!("{:x}", hash))
    }

    /// Wrap a declared hex digest, normalizing case
    pub fn from_hex(hex: &str) -> Self {
        Self(hex.trim().to_ascii_lowercase())
    }

    /// Get the hex string representation
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Verify that content matches this checksum
    pub fn verify(&self, data: &[u8]) -> bool {
        let computed = Self::from_bytes(data);
        self.0.eq_ignore_ascii_case(&computed.0)
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for Checksum {
    fn from(s: String) -> Self {
        Self::from_hex(&s)
    }
}

impl From<&str> for Checksum {
    fn from(s: &str) -> Self {
        Self::from_hex(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum_consistency() {
        let content = b"\x89PNG\r\n\x1a\n";
        let checksum1 = Checksum::from_bytes(content);
        let checksum2 = Checksum::from_bytes(content);
        assert_eq!(checksum1, checksum2);
        assert_eq!(checksum1.as_str().len(), 64);
    }

    #[test]
    fn test_checksum_different_content() {
        let checksum1 = Checksum::from_bytes(b"smile");
        let checksum2 = Checksum::from_bytes(b"frown");
        assert_ne!(checksum1, checksum2);
    }

    #[test]
    fn test_checksum_verification_ignores_case() {
        let checksum = Checksum::from_bytes(b"abc");
        let shouted = Checksum(checksum.as_str().to_ascii_uppercase());
        assert!(shouted.verify(b"abc"));
        assert!(!shouted.verify(b"abd"));
    }

    #[test]
    fn test_known_digest() {
        assert_eq!(
            Checksum::from_bytes(b"abc").as_str(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
