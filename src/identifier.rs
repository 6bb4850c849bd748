//! Info hash codec
//!
//! Converts the 20-byte content identifier between its binary form and the
//! lowercase hexadecimal form used as the registry key and on the wire.

use std::fmt;
use std::str::FromStr;

use data_encoding::BASE32;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// Length of a v1 info hash in bytes
pub const INFO_HASH_LEN: usize = 20;

/// Rejected identifier text
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid info hash: {0}")]
pub struct InvalidIdentifier(pub String);

/// 20-byte content identifier of a transfer
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InfoHash([u8; INFO_HASH_LEN]);

impl InfoHash {
    pub fn from_bytes(bytes: [u8; INFO_HASH_LEN]) -> Self {
        Self(bytes)
    }

    /// Decode a 40-character hex string (either case)
    pub fn from_hex(text: &str) -> Result<Self, InvalidIdentifier> {
        let mut bytes = [0u8; INFO_HASH_LEN];
        hex::decode_to_slice(text, &mut bytes)
            .map_err(|e| InvalidIdentifier(format!("{text:?} ({e})")))?;
        Ok(Self(bytes))
    }

    /// Decode the 32-character base32 form some magnet links carry
    pub fn from_base32(text: &str) -> Result<Self, InvalidIdentifier> {
        let decoded = BASE32
            .decode(text.to_ascii_uppercase().as_bytes())
            .map_err(|e| InvalidIdentifier(format!("{text:?} ({e})")))?;
        let bytes: [u8; INFO_HASH_LEN] = decoded
            .try_into()
            .map_err(|_| InvalidIdentifier(format!("{text:?} (not 20 bytes)")))?;
        Ok(Self(bytes))
    }

    /// Lowercase hex rendering, the exact inverse of [`InfoHash::from_hex`]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn as_bytes(&self) -> &[u8; INFO_HASH_LEN] {
        &self.0
    }
}

impl fmt::Display for InfoHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for InfoHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "InfoHash({})", self.to_hex())
    }
}

impl FromStr for InfoHash {
    type Err = InvalidIdentifier;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl Serialize for InfoHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for InfoHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        Self::from_hex(&text).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEX: &str = "c12fe1c06bba254a9dc9f519b335aa7c1367a88a";

    #[test]
    fn test_hex_round_trip() {
        let hash = InfoHash::from_hex(HEX).unwrap();
        assert_eq!(hash.to_hex(), HEX);
        assert_eq!(hash.to_string(), HEX);
    }

    #[test]
    fn test_uppercase_encodes_lowercase() {
        let hash = InfoHash::from_hex(&HEX.to_uppercase()).unwrap();
        assert_eq!(hash.to_hex(), HEX);
    }

    #[test]
    fn test_rejects_bad_input() {
        for bad in [
            "",
            "c12f",
            "c12fe1c06bba254a9dc9f519b335aa7c1367a88",
            "c12fe1c06bba254a9dc9f519b335aa7c1367a88a00",
            "z12fe1c06bba254a9dc9f519b335aa7c1367a88a",
            " c12fe1c06bba254a9dc9f519b335aa7c1367a88",
        ] {
            assert!(InfoHash::from_hex(bad).is_err(), "accepted {bad:?}");
        }
    }

    #[test]
    fn test_base32_matches_hex() {
        // Same 20 bytes, base32 encoded
        let hash = InfoHash::from_base32("YEX6DQDLXISUVHOJ6UM3GNNKPQJWPKEK").unwrap();
        assert_eq!(hash.to_hex(), HEX);
        let lower = InfoHash::from_base32("yex6dqdlxisuvhoj6um3gnnkpqjwpkek").unwrap();
        assert_eq!(lower, hash);
        assert!(InfoHash::from_base32("YEX6DQDL").is_err());
        assert!(InfoHash::from_base32("YEX6DQDLXISUVHOJ6UM3GNNKPQJWPKE1").is_err());
    }

    #[test]
    fn test_serde_as_hex_string() {
        let hash = InfoHash::from_hex(HEX).unwrap();
        let json = serde_json::to_string(&hash).unwrap();
        assert_eq!(json, format!("\"{HEX}\""));
        let back: InfoHash = serde_json::from_str(&json).unwrap();
        assert_eq!(back, hash);
    }
}
