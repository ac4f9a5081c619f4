//! Source hashing

use sha2::{Digest, Sha256};
use std::fmt;

/// SHA-256 digest of a generated source text.
///
/// The hash is the only invalidation signal the cache uses: two sources with
/// identical bytes are the same artifact, whatever model produced them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SourceHash([u8; 32]);

impl SourceHash {
    /// Hash a source text
    pub fn of(source: &str) -> Self {
        Self::of_bytes(source.as_bytes())
    }

    /// Hash raw bytes
    pub fn of_bytes(bytes: &[u8]) -> Self {
        let digest = Sha256::digest(bytes);
        Self(digest.into())
    }

    /// Parse a hex-encoded hash as stored in artifact records
    pub fn from_hex(text: &str) -> Option<Self> {
        let bytes = hex::decode(text).ok()?;
        let array: [u8; 32] = bytes.try_into().ok()?;
        Some(Self(array))
    }

    /// Hex encoding (64 characters)
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Leading 16 hex characters, used in hash-qualified file names
    pub fn short(&self) -> String {
        hex::encode(&self.0[..8])
    }

    /// Raw digest bytes
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for SourceHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_is_stable() {
        let a = SourceHash::of("def predict_proba(x0):\n    return 0.5\n");
        let b = SourceHash::of("def predict_proba(x0):\n    return 0.5\n");
        assert_eq!(a, b);
    }

    #[test]
    fn test_hash_changes_with_source() {
        let a = SourceHash::of("return 0.1");
        let b = SourceHash::of("return 0.9");
        assert_ne!(a, b);
    }

    #[test]
    fn test_hex_roundtrip() {
        let hash = SourceHash::of("abc");
        assert_eq!(
            hash.to_hex(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_eq!(SourceHash::from_hex(&hash.to_hex()), Some(hash));
        assert_eq!(hash.short(), "ba7816bf8f01cfea");
    }

    #[test]
    fn test_from_hex_rejects_garbage() {
        assert_eq!(SourceHash::from_hex("zz"), None);
        assert_eq!(SourceHash::from_hex("abcd"), None);
    }
}
