//! Content hashing for replay responses and decision snapshots
//!
//! [`ContentHash`] is a 32-byte Blake3 digest. Snapshots are keyed by it and
//! the critical-path consistency check compares it byte for byte, so every
//! hashing entry point here must be a pure function of its input.

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

/// A 32-byte Blake3 content hash
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ContentHash([u8; 32]);

impl ContentHash {
    /// Wrap raw digest bytes
    #[inline]
    #[must_use]
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Raw digest bytes
    #[inline]
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Hash a single byte string
    #[inline]
    #[must_use]
    pub fn compute(data: &[u8]) -> Self {
        Self(*blake3::hash(data).as_bytes())
    }

    /// Hash several fields as one message
    ///
    /// Each part is length-prefixed so that `["ab", "c"]` and `["a", "bc"]`
    /// never produce the same digest.
    #[must_use]
    pub fn of_parts(parts: &[&[u8]]) -> Self {
        let mut hasher = blake3::Hasher::new();
        for part in parts {
            hasher.update(&(part.len() as u64).to_le_bytes());
            hasher.update(part);
        }
        Self(*hasher.finalize().as_bytes())
    }

    /// Hash the canonical JSON encoding of a value
    ///
    /// `serde_json` maps are ordered by key, so structurally equal payloads
    /// encode identically.
    ///
    /// # Errors
    /// Returns [`HashError::Serialization`] if the value cannot be encoded
    pub fn of_json<T>(value: &T) -> Result<Self, HashError>
    where
        T: serde::Serialize + ?Sized,
    {
        let json = serde_json::to_vec(value)?;
        Ok(Self::compute(&json))
    }

    /// First 8 bytes as hex, for log lines
    #[inline]
    #[must_use]
    pub fn short(&self) -> String {
        hex::encode(&self.0[..8])
    }
}

impl Display for ContentHash {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl FromStr for ContentHash {
    type Err = HashError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s)?;
        let arr: [u8; 32] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| HashError::InvalidLength {
                expected: 32,
                actual: bytes.len(),
            })?;
        Ok(Self(arr))
    }
}

impl serde::Serialize for ContentHash {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> serde::Deserialize<'de> for ContentHash {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Hashing errors
#[derive(Debug, thiserror::Error)]
pub enum HashError {
    /// Wrong number of digest bytes
    #[error("invalid hash length: expected {expected}, got {actual}")]
    InvalidLength {
        /// Expected byte count
        expected: usize,
        /// Actual byte count
        actual: usize,
    },

    /// Not valid hex
    #[error("invalid hex encoding: {0}")]
    Hex(#[from] hex::FromHexError),

    /// Value could not be encoded for hashing
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compute_is_stable() {
        assert_eq!(ContentHash::compute(b"abc"), ContentHash::compute(b"abc"));
        assert_ne!(ContentHash::compute(b"abc"), ContentHash::compute(b"abd"));
    }

    #[test]
    fn parts_are_length_prefixed() {
        let a = ContentHash::of_parts(&[b"ab", b"c"]);
        let b = ContentHash::of_parts(&[b"a", b"bc"]);
        assert_ne!(a, b);
    }

    #[test]
    fn json_hash_ignores_insertion_order() {
        let mut first = serde_json::Map::new();
        first.insert("b".into(), 2.into());
        first.insert("a".into(), 1.into());
        let mut second = serde_json::Map::new();
        second.insert("a".into(), 1.into());
        second.insert("b".into(), 2.into());

        assert_eq!(
            ContentHash::of_json(&first).unwrap(),
            ContentHash::of_json(&second).unwrap()
        );
    }

    #[test]
    fn hex_roundtrip_and_bad_length() {
        let hash = ContentHash::compute(b"snapshot");
        let parsed: ContentHash = hash.to_string().parse().unwrap();
        assert_eq!(hash, parsed);
        assert_eq!(hash.short().len(), 16);

        let err = "abcd".parse::<ContentHash>().unwrap_err();
        assert!(matches!(err, HashError::InvalidLength { actual: 2, .. }));
    }
}
