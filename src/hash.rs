// Copyright (c) 2025 Chetan Conikee <conikee@gmail.com>
// Licensed under the MIT License

//! BLAKE3 content digests.
//!
//! Used by the Store as a per-node integrity convenience (§4.2): each
//! on-disk node record carries a digest of its message's canonical JSON
//! encoding, recomputed and checked on every load. This is a corruption
//! smoke-check, not a replication or security mechanism, and it plays no
//! part in [`crate::ids`]'s sequence-based id allocation.

use blake3::Hash;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{ForestError, Result};

/// A BLAKE3 hash value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Blake3Hash([u8; 32]);

impl Blake3Hash {
    /// Creates a new `Blake3Hash` from a 32-byte array.
    #[must_use]
    pub fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Returns the hash as a byte array.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Returns the hash as a hexadecimal string.
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parses a hexadecimal string into a `Blake3Hash`.
    ///
    /// # Errors
    ///
    /// Returns an error if the string is not valid hexadecimal or not 64
    /// characters long.
    pub fn from_hex(hex_str: &str) -> Result<Self> {
        if hex_str.len() != 64 {
            return Err(ForestError::consistency(
                "digest",
                "hash hex string must be exactly 64 characters",
            ));
        }
        let bytes = hex::decode(hex_str)
            .map_err(|e| ForestError::consistency("digest", format!("invalid hex string: {e}")))?;
        let mut hash_bytes = [0u8; 32];
        hash_bytes.copy_from_slice(&bytes);
        Ok(Self::new(hash_bytes))
    }
}

impl fmt::Display for Blake3Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl From<Hash> for Blake3Hash {
    fn from(hash: Hash) -> Self {
        Self(*hash.as_bytes())
    }
}

/// Computes the digest of a serializable value's canonical JSON encoding.
///
/// # Errors
///
/// Returns an error if the value cannot be serialized.
pub fn digest_json<T: Serialize>(value: &T) -> Result<Blake3Hash> {
    let bytes = serde_json::to_vec(value).map_err(|e| ForestError::json("digest", e))?;
    Ok(blake3::hash(&bytes).into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blake3_hash_hex_round_trips() {
        let hash = Blake3Hash::new([7u8; 32]);
        let hex = hash.to_hex();
        assert_eq!(hex.len(), 64);
        assert_eq!(Blake3Hash::from_hex(&hex).unwrap(), hash);
    }

    #[test]
    fn blake3_hash_rejects_malformed_hex() {
        assert!(Blake3Hash::from_hex("not hex").is_err());
        assert!(Blake3Hash::from_hex("ab").is_err());
    }

    #[test]
    fn digest_json_is_deterministic_and_content_sensitive() {
        let a = serde_json::json!({"x": 1, "y": 2});
        let b = serde_json::json!({"x": 1, "y": 3});
        assert_eq!(digest_json(&a).unwrap(), digest_json(&a).unwrap());
        assert_ne!(digest_json(&a).unwrap(), digest_json(&b).unwrap());
    }
}
