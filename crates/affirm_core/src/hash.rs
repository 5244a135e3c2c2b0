//! Content hashes for attestation sealing.
//!
//! Uses SHA-256 over canonical bytes, rendered as `sha256:<hex>`.

use crate::canonical::canonical_bytes;
use crate::error::CoreResult;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

/// Prefix used in the textual form of a [`ContentHash`]
pub const SHA256_PREFIX: &str = "sha256:";

/// A SHA-256 content hash (256 bits / 32 bytes)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContentHash([u8; 32]);

impl ContentHash {
    /// The number of bytes in a hash
    pub const LEN: usize = 32;

    /// Compute SHA-256 of raw bytes
    #[must_use]
    pub fn compute(data: &[u8]) -> Self {
        Self(Sha256::digest(data).into())
    }

    /// Hash the canonical encoding of a value
    ///
    /// # Errors
    ///
    /// Returns error if the value cannot be canonically encoded
    pub fn of<T: Serialize + ?Sized>(value: &T) -> CoreResult<Self> {
        Ok(Self::compute(&canonical_bytes(value)?))
    }

    /// Create from bytes
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Get as bytes
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Convert to bare hex string
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse from `sha256:<hex>` or bare hex
    ///
    /// # Errors
    ///
    /// Returns error if the prefix is foreign, hex is invalid, or not 32 bytes
    pub fn parse(s: &str) -> Result<Self, HashError> {
        let hex_part = match s.split_once(':') {
            Some(("sha256", rest)) => rest,
            Some((scheme, _)) => return Err(HashError::UnsupportedAlgorithm(scheme.to_string())),
            None => s,
        };
        let bytes = hex::decode(hex_part).map_err(|_| HashError::InvalidHex)?;
        if bytes.len() != Self::LEN {
            return Err(HashError::InvalidLength(bytes.len()));
        }
        let mut arr = [0u8; 32];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }

    /// Check if hash matches data
    #[must_use]
    pub fn verify(&self, data: &[u8]) -> bool {
        Self::compute(data) == *self
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", SHA256_PREFIX, self.to_hex())
    }
}

impl FromStr for ContentHash {
    type Err = HashError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl AsRef<[u8]> for ContentHash {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<[u8; 32]> for ContentHash {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl Serialize for ContentHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ContentHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}

/// Hash-related errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HashError {
    /// Invalid hex encoding
    #[error("invalid hex encoding")]
    InvalidHex,
    /// Invalid length (not 32 bytes)
    #[error("invalid hash length: {0} (expected 32)")]
    InvalidLength(usize),
    /// Prefix names an algorithm other than sha256
    #[error("unsupported hash algorithm: {0}")]
    UnsupportedAlgorithm(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_hash_compute_known_vector() {
        let hash = ContentHash::compute(b"abc");
        assert_eq!(
            hash.to_hex(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_display_has_prefix() {
        let hash = ContentHash::compute(b"test");
        let s = hash.to_string();
        assert!(s.starts_with("sha256:"));
        assert_eq!(s.len(), 7 + 64);
    }

    #[test]
    fn test_parse_prefixed_and_bare() {
        let hash = ContentHash::compute(b"test");
        assert_eq!(ContentHash::parse(&hash.to_string()).unwrap(), hash);
        assert_eq!(ContentHash::parse(&hash.to_hex()).unwrap(), hash);
    }

    #[test]
    fn test_parse_rejects_foreign_prefix() {
        let hash = ContentHash::compute(b"test");
        let s = format!("blake3:{}", hash.to_hex());
        assert_eq!(
            ContentHash::parse(&s),
            Err(HashError::UnsupportedAlgorithm("blake3".to_string()))
        );
    }

    #[test]
    fn test_parse_rejects_bad_length_and_hex() {
        assert_eq!(ContentHash::parse("sha256:abcd"), Err(HashError::InvalidLength(2)));
        assert_eq!(ContentHash::parse("sha256:zz"), Err(HashError::InvalidHex));
    }

    #[test]
    fn test_of_matches_canonical_bytes() {
        let a = json!({"b": 2, "a": 1});
        let expected = ContentHash::compute(br#"{"a":1,"b":2}"#);
        assert_eq!(ContentHash::of(&a).unwrap(), expected);
    }

    #[test]
    fn test_serde_as_string() {
        let hash = ContentHash::compute(b"x");
        let json = serde_json::to_string(&hash).unwrap();
        assert_eq!(json, format!("\"{}\"", hash));
        let back: ContentHash = serde_json::from_str(&json).unwrap();
        assert_eq!(back, hash);
    }
}
