//! Content fingerprints for provisioning plans.
//!
//! Uses BLAKE3 over the canonical JSON encoding of a value.

use crate::error::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A BLAKE3 fingerprint (256 bits / 32 bytes), serialized as hex
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    /// The number of bytes in a fingerprint
    pub const LEN: usize = 32;

    /// Compute BLAKE3 hash of data
    #[must_use]
    pub fn compute(data: &[u8]) -> Self {
        Self(*blake3::hash(data).as_bytes())
    }

    /// Fingerprint the canonical JSON encoding of a value.
    ///
    /// Map-typed fields must have a deterministic iteration order
    /// (`IndexMap`, `BTreeMap`) for the result to be stable.
    ///
    /// # Errors
    ///
    /// Returns `Encoding` if the value cannot be serialized
    pub fn of_json<T: Serialize + ?Sized>(value: &T) -> CoreResult<Self> {
        let bytes = serde_json::to_vec(value)?;
        Ok(Self::compute(&bytes))
    }

    /// Get as bytes
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Convert to hex string
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Short prefix for log lines
    #[must_use]
    pub fn short(&self) -> String {
        hex::encode(&self.0[..6])
    }

    /// Parse from hex string
    ///
    /// # Errors
    ///
    /// Returns `Encoding` if hex is invalid or not 32 bytes
    pub fn from_hex(text: &str) -> CoreResult<Self> {
        let bytes = hex::decode(text).map_err(|e| CoreError::Encoding {
            message: format!("invalid fingerprint hex: {e}"),
        })?;
        let arr: [u8; 32] = bytes.try_into().map_err(|b: Vec<u8>| CoreError::Encoding {
            message: format!("invalid fingerprint length: {} (expected 32)", b.len()),
        })?;
        Ok(Self(arr))
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl From<Fingerprint> for String {
    fn from(fingerprint: Fingerprint) -> Self {
        fingerprint.to_hex()
    }
}

impl TryFrom<String> for Fingerprint {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::from_hex(&value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexmap::IndexMap;

    #[test]
    fn test_compute_is_deterministic() {
        assert_eq!(Fingerprint::compute(b"plan"), Fingerprint::compute(b"plan"));
        assert_ne!(Fingerprint::compute(b"plan"), Fingerprint::compute(b"plan2"));
    }

    #[test]
    fn test_of_json_follows_insertion_order() {
        let mut a = IndexMap::new();
        a.insert("net", 0);
        a.insert("db", 1);
        let mut b = IndexMap::new();
        b.insert("db", 1);
        b.insert("net", 0);
        assert_eq!(Fingerprint::of_json(&a).unwrap(), Fingerprint::of_json(&a).unwrap());
        assert_ne!(Fingerprint::of_json(&a).unwrap(), Fingerprint::of_json(&b).unwrap());
    }

    #[test]
    fn test_hex_roundtrip_and_errors() {
        let fp = Fingerprint::compute(b"x");
        assert_eq!(Fingerprint::from_hex(&fp.to_hex()).unwrap(), fp);
        assert_eq!(fp.short().len(), 12);
        assert!(Fingerprint::from_hex("zz").is_err());
        assert!(Fingerprint::from_hex("abcd").is_err());
    }

    #[test]
    fn test_serializes_as_hex() {
        let fp = Fingerprint::compute(b"x");
        let json = serde_json::to_string(&fp).unwrap();
        assert_eq!(json, format!("\"{}\"", fp.to_hex()));
        let back: Fingerprint = serde_json::from_str(&json).unwrap();
        assert_eq!(back, fp);
    }
}
