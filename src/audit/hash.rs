//! Hash Algorithm - Recognized digest algorithms for sealing evidence
//!
//! Both the audit trail and the check run validate algorithm names
//! through this type, so the accepted set lives in exactly one place.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256, Sha512};

/// Digest algorithm used to seal an audit trail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum HashAlgorithm {
    Sha256,
    Sha512,
}

impl HashAlgorithm {
    /// Every recognized algorithm
    pub fn all() -> &'static [HashAlgorithm] {
        &[HashAlgorithm::Sha256, HashAlgorithm::Sha512]
    }

    /// Canonical lowercase name
    pub fn as_str(&self) -> &'static str {
        match self {
            HashAlgorithm::Sha256 => "sha256",
            HashAlgorithm::Sha512 => "sha512",
        }
    }

    /// Digest `bytes` and return the lowercase hex encoding.
    pub fn digest(&self, bytes: &[u8]) -> String {
        match self {
            HashAlgorithm::Sha256 => {
                let mut hasher = Sha256::new();
                hasher.update(bytes);
                format!("{:x}", hasher.finalize())
            }
            HashAlgorithm::Sha512 => {
                let mut hasher = Sha512::new();
                hasher.update(bytes);
                format!("{:x}", hasher.finalize())
            }
        }
    }

    /// Length of the hex digest in characters
    pub fn hex_len(&self) -> usize {
        match self {
            HashAlgorithm::Sha256 => 64,
            HashAlgorithm::Sha512 => 128,
        }
    }
}

impl Default for HashAlgorithm {
    fn default() -> Self {
        HashAlgorithm::Sha256
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for HashAlgorithm {
    type Err = HashAlgorithmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sha256" | "sha-256" => Ok(HashAlgorithm::Sha256),
            "sha512" | "sha-512" => Ok(HashAlgorithm::Sha512),
            _ => Err(HashAlgorithmError::Unsupported(s.to_string())),
        }
    }
}

impl TryFrom<String> for HashAlgorithm {
    type Error = HashAlgorithmError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<HashAlgorithm> for String {
    fn from(algorithm: HashAlgorithm) -> Self {
        algorithm.as_str().to_string()
    }
}

/// Rejected algorithm name
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HashAlgorithmError {
    #[error("unsupported hash algorithm '{0}' (expected sha256 or sha512)")]
    Unsupported(String),
}
