//! Fingerprint collaborator
//!
//! The engine only needs `bytes -> Fingerprint` plus a stable algorithm
//! identity for cache keys. [`ImageHashFingerprinter`] provides that on top
//! of `image_hasher`; tests substitute their own [`Fingerprinter`].

use crate::core::error::{Result, ScanError};
use crate::core::fingerprint::Fingerprint;
use image_hasher::{HashAlg, Hasher, HasherConfig};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Turns raw image bytes into a fingerprint
pub trait Fingerprinter: Send + Sync {
    /// Identity of the algorithm and its parameters, used in cache keys
    fn algorithm(&self) -> String;

    /// Decode and fingerprint one image buffer
    fn fingerprint(&self, bytes: &[u8]) -> Result<Fingerprint>;
}

/// Supported perceptual hash algorithms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum HashAlgorithm {
    /// Mean (aHash)
    Average,
    /// Mean over DCT-preprocessed pixels (pHash)
    #[default]
    Perceptual,
    /// Horizontal gradient (dHash)
    Difference,
    /// Horizontal and vertical gradients
    DoubleGradient,
    /// Blockhash.io
    Block,
}

impl HashAlgorithm {
    /// Every supported algorithm
    pub const ALL: [HashAlgorithm; 5] = [
        HashAlgorithm::Average,
        HashAlgorithm::Perceptual,
        HashAlgorithm::Difference,
        HashAlgorithm::DoubleGradient,
        HashAlgorithm::Block,
    ];

    /// Look an algorithm up by its short name
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|a| a.name() == name)
    }

    fn hash_alg(self) -> HashAlg {
        match self {
            HashAlgorithm::Average | HashAlgorithm::Perceptual => HashAlg::Mean,
            HashAlgorithm::Difference => HashAlg::Gradient,
            HashAlgorithm::DoubleGradient => HashAlg::DoubleGradient,
            HashAlgorithm::Block => HashAlg::Blockhash,
        }
    }

    /// Short name used in logs and cache keys
    pub fn name(self) -> &'static str {
        match self {
            HashAlgorithm::Average => "average",
            HashAlgorithm::Perceptual => "perceptual",
            HashAlgorithm::Difference => "difference",
            HashAlgorithm::DoubleGradient => "double_gradient",
            HashAlgorithm::Block => "block",
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// `image_hasher` backed fingerprinter
pub struct ImageHashFingerprinter {
    algorithm: HashAlgorithm,
    hash_size: u32,
    hasher: Hasher,
}

impl ImageHashFingerprinter {
    /// Create a fingerprinter producing `hash_size x hash_size` hashes
    pub fn new(algorithm: HashAlgorithm, hash_size: u32) -> Self {
        let mut config = HasherConfig::new()
            .hash_alg(algorithm.hash_alg())
            .hash_size(hash_size, hash_size);

        if algorithm == HashAlgorithm::Perceptual {
            config = config.preproc_dct();
        }

        Self {
            algorithm,
            hash_size,
            hasher: config.to_hasher(),
        }
    }
}

impl Fingerprinter for ImageHashFingerprinter {
    fn algorithm(&self) -> String {
        format!("{}-{}x{}", self.algorithm, self.hash_size, self.hash_size)
    }

    fn fingerprint(&self, bytes: &[u8]) -> Result<Fingerprint> {
        let image = image::load_from_memory(bytes)
            .map_err(|e| ScanError::ImageError(format!("Failed to decode image: {}", e)))?;

        let hash = self.hasher.hash_image(&image);
        Ok(Fingerprint::from_bytes(hash.as_bytes()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, ImageFormat, Rgb};
    use std::io::Cursor;

    fn gradient_png(width: u32, height: u32, invert: bool) -> Vec<u8> {
        let img = ImageBuffer::from_fn(width, height, |x, _y| {
            let v = ((x * 255) / width.max(1)) as u8;
            let v = if invert { 255 - v } else { v };
            Rgb([v, v, v])
        });
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, ImageFormat::Png).unwrap();
        out.into_inner()
    }

    #[test]
    fn test_algorithm_identity_includes_size() {
        let hasher = ImageHashFingerprinter::new(HashAlgorithm::Perceptual, 8);
        assert_eq!(hasher.algorithm(), "perceptual-8x8");
    }

    #[test]
    fn test_algorithm_names_round_trip() {
        for algorithm in HashAlgorithm::ALL {
            assert_eq!(HashAlgorithm::from_name(algorithm.name()), Some(algorithm));
        }
        assert_eq!(HashAlgorithm::from_name("wavelet"), None);
    }

    #[test]
    fn test_same_image_same_fingerprint() {
        let hasher = ImageHashFingerprinter::new(HashAlgorithm::Average, 8);
        let png = gradient_png(64, 64, false);
        let a = hasher.fingerprint(&png).unwrap();
        let b = hasher.fingerprint(&png).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.bits(), 64);
    }

    #[test]
    fn test_resized_image_is_close() {
        let hasher = ImageHashFingerprinter::new(HashAlgorithm::Average, 8);
        let small = hasher.fingerprint(&gradient_png(64, 64, false)).unwrap();
        let large = hasher.fingerprint(&gradient_png(256, 256, false)).unwrap();
        let inverted = hasher.fingerprint(&gradient_png(64, 64, true)).unwrap();
        assert!(small.distance(&large) <= 10);
        assert!(small.distance(&inverted) > small.distance(&large));
    }

    #[test]
    fn test_garbage_is_an_error() {
        let hasher = ImageHashFingerprinter::new(HashAlgorithm::Difference, 8);
        assert!(matches!(
            hasher.fingerprint(b"not an image"),
            Err(ScanError::ImageError(_))
        ));
    }

    #[test]
    fn test_algorithm_serde_names() {
        let alg: HashAlgorithm = serde_json::from_str("\"double_gradient\"").unwrap();
        assert_eq!(alg, HashAlgorithm::DoubleGradient);
        assert_eq!(HashAlgorithm::default(), HashAlgorithm::Perceptual);
    }
}
