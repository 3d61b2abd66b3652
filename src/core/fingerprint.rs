//! Perceptual fingerprints
//!
//! A [`Fingerprint`] keeps two views of the same bit vector: packed `u64`
//! words used for XOR/popcount comparison, and the canonical lowercase hex
//! string that identifies it in caches and duplicate evidence.

use crate::core::error::{Result, ScanError};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Distance reported between fingerprints of different widths.
pub const INCOMPATIBLE_DISTANCE: u32 = u32::MAX;

/// Fixed-width perceptual fingerprint of a single image
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint {
    words: Vec<u64>,
    bits: u32,
    hex: String,
}

impl Fingerprint {
    /// Build a fingerprint from the raw hash bytes, most significant first
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let words = bytes
            .chunks(8)
            .map(|chunk| {
                let mut buf = [0u8; 8];
                buf[..chunk.len()].copy_from_slice(chunk);
                u64::from_be_bytes(buf)
            })
            .collect();

        Self {
            words,
            bits: (bytes.len() * 8) as u32,
            hex: bytes.iter().map(|b| format!("{:02x}", b)).collect(),
        }
    }

    /// Parse a canonical hex string
    pub fn from_hex(hex: &str) -> Result<Self> {
        if hex.is_empty() || hex.len() % 2 != 0 {
            return Err(ScanError::FingerprintError(format!(
                "Invalid fingerprint length: '{}'",
                hex
            )));
        }

        // digits only: no signs, no whitespace
        if !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(ScanError::FingerprintError(format!(
                "Invalid hex in fingerprint: '{}'",
                hex
            )));
        }

        let bytes = hex
            .as_bytes()
            .chunks(2)
            .map(|pair| (hex_value(pair[0]) << 4) | hex_value(pair[1]))
            .collect::<Vec<u8>>();

        Ok(Self::from_bytes(&bytes))
    }

    /// Packed words, zero-padded in the final word
    pub fn words(&self) -> &[u64] {
        &self.words
    }

    /// Width in bits
    pub fn bits(&self) -> u32 {
        self.bits
    }

    /// Canonical lowercase hex representation
    pub fn hex(&self) -> &str {
        &self.hex
    }

    /// Hamming distance to another fingerprint.
    ///
    /// Fingerprints of different widths never compare as similar and
    /// report [`INCOMPATIBLE_DISTANCE`].
    pub fn distance(&self, other: &Fingerprint) -> u32 {
        if self.bits != other.bits {
            return INCOMPATIBLE_DISTANCE;
        }
        hamming_words(&self.words, &other.words)
    }

    /// Whether the distance to `other` is within `threshold`
    pub fn is_similar(&self, other: &Fingerprint, threshold: u32) -> bool {
        self.distance(other) <= threshold
    }
}

fn hex_value(digit: u8) -> u8 {
    match digit {
        b'0'..=b'9' => digit - b'0',
        b'a'..=b'f' => digit - b'a' + 10,
        _ => digit - b'A' + 10,
    }
}

/// popcount(a XOR b) over two equally sized word slices
#[inline]
pub fn hamming_words(a: &[u64], b: &[u64]) -> u32 {
    a.iter().zip(b).map(|(x, y)| (x ^ y).count_ones()).sum()
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", self.hex)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.hex)
    }
}

impl Serialize for Fingerprint {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.hex)
    }
}

impl<'de> Deserialize<'de> for Fingerprint {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Fingerprint::from_hex(&s).map_err(serde::de::Error::custom)
    }
}
