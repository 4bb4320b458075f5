use std::fmt;
use std::str::FromStr;

use sha2::{Digest as _, Sha256};
use thiserror::Error;

const SHA256_HEX_LEN: usize = 64;

/// A content address: an algorithm paired with the hex-encoded hash it
/// produced. `sha256` is the only algorithm the registry accepts.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Digest {
    algorithm: String,
    hex: String,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DigestError {
    #[error("digest must be of the form algorithm:hex")]
    MissingSeparator,
    #[error("unsupported digest algorithm {0:?}")]
    UnsupportedAlgorithm(String),
    #[error("sha256 digest hex must be {SHA256_HEX_LEN} characters, got {0}")]
    BadLength(usize),
    #[error("digest hex contains non-hex characters")]
    BadHex,
}

impl Digest {
    /// Digest of `data` under sha256.
    pub fn of_bytes(data: &[u8]) -> Self {
        Digest {
            algorithm: "sha256".to_string(),
            hex: sha256_hex(data),
        }
    }

    /// Wraps hex that was already produced by a sha256 hasher.
    pub(crate) fn sha256(hex: String) -> Self {
        Digest {
            algorithm: "sha256".to_string(),
            hex,
        }
    }

    pub fn algorithm(&self) -> &str {
        &self.algorithm
    }

    pub fn hex(&self) -> &str {
        &self.hex
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm, self.hex)
    }
}

impl FromStr for Digest {
    type Err = DigestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (algorithm, hex) = s.split_once(':').ok_or(DigestError::MissingSeparator)?;
        if algorithm != "sha256" {
            return Err(DigestError::UnsupportedAlgorithm(algorithm.to_string()));
        }
        if hex.len() != SHA256_HEX_LEN {
            return Err(DigestError::BadLength(hex.len()));
        }
        if !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(DigestError::BadHex);
        }
        Ok(Digest {
            algorithm: algorithm.to_string(),
            hex: hex.to_ascii_lowercase(),
        })
    }
}

pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

/// Manifest references are digests when they carry the algorithm prefix;
/// everything else is a tag.
pub fn is_digest_reference(target: &str) -> bool {
    target.starts_with("sha256:")
}

#[cfg(test)]
mod tests {
    use super::*;

    const FOO_SHA256: &str = "2c26b46b68ffc68ff99b453c1d30413413422d706483bfa0f98a5e886266e7ae";

    #[test]
    fn digest_of_bytes_matches_known_hash() {
        let digest = Digest::of_bytes(b"foo");
        assert_eq!(digest.algorithm(), "sha256");
        assert_eq!(digest.hex(), FOO_SHA256);
        assert_eq!(digest.to_string(), format!("sha256:{FOO_SHA256}"));
    }

    #[test]
    fn parse_round_trips() {
        let s = format!("sha256:{FOO_SHA256}");
        let digest: Digest = s.parse().unwrap();
        assert_eq!(digest.to_string(), s);
    }

    #[test]
    fn parse_normalizes_hex_case() {
        let digest: Digest = format!("sha256:{}", FOO_SHA256.to_ascii_uppercase())
            .parse()
            .unwrap();
        assert_eq!(digest.hex(), FOO_SHA256);
    }

    #[test]
    fn parse_rejects_missing_separator() {
        assert_eq!(
            FOO_SHA256.parse::<Digest>().unwrap_err(),
            DigestError::MissingSeparator
        );
    }

    #[test]
    fn parse_rejects_unknown_algorithm() {
        let err = format!("md5:{FOO_SHA256}").parse::<Digest>().unwrap_err();
        assert!(matches!(err, DigestError::UnsupportedAlgorithm(_)));
    }

    #[test]
    fn parse_rejects_short_hex() {
        assert_eq!(
            "sha256:abc123".parse::<Digest>().unwrap_err(),
            DigestError::BadLength(6)
        );
    }

    #[test]
    fn parse_rejects_non_hex() {
        let bad = format!("sha256:{}zz", &FOO_SHA256[..62]);
        assert_eq!(bad.parse::<Digest>().unwrap_err(), DigestError::BadHex);
    }

    #[test]
    fn digest_reference_detection() {
        assert!(is_digest_reference(&format!("sha256:{FOO_SHA256}")));
        assert!(!is_digest_reference("latest"));
        assert!(!is_digest_reference("v1.2.3"));
    }
}
