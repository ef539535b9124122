//! Audit Trail - Append-only, sealable evidence log
//!
//! A trail collects the [`AuditEntry`] rows of one engagement. Once all
//! entries are known the trail is sealed with a digest of its persisted
//! bytes, after which it can no longer change. A sealed trail may then
//! be signed (and re-signed) without affecting its hash.
//!
//! The trail never hashes anything itself: computing the digest over
//! stored bytes belongs to the persistence layer (see
//! [`crate::store::AuditRepository`]).

pub mod entry;
pub mod hash;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use entry::AuditEntry;
pub use hash::{HashAlgorithm, HashAlgorithmError};

/// Integrity state of a trail
///
/// A signature can only exist alongside a seal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SealState {
    Unsealed,
    Sealed {
        hash: String,
        algorithm: HashAlgorithm,
    },
    Signed {
        hash: String,
        algorithm: HashAlgorithm,
        signature: String,
    },
}

/// Evidence log for a single engagement
#[derive(Debug, Clone, PartialEq)]
pub struct AuditTrail {
    engagement_id: String,
    entries: Vec<AuditEntry>,
    seal: SealState,
    created_at: DateTime<Utc>,
}

impl AuditTrail {
    /// Create an empty, unsealed trail
    pub fn new(engagement_id: impl Into<String>) -> Result<Self, AuditError> {
        let engagement_id = engagement_id.into();
        if engagement_id.trim().is_empty() {
            return Err(AuditError::EmptyEngagementId);
        }

        Ok(Self {
            engagement_id,
            entries: Vec::new(),
            seal: SealState::Unsealed,
            created_at: Utc::now(),
        })
    }

    /// Rehydrate a trail from persisted fields without re-validating history
    pub fn reconstruct(record: AuditTrailRecord) -> Self {
        let seal = match (record.sealed, record.hash, record.hash_algorithm) {
            (true, Some(hash), Some(algorithm)) => match record.signature {
                Some(signature) => SealState::Signed {
                    hash,
                    algorithm,
                    signature,
                },
                None => SealState::Sealed { hash, algorithm },
            },
            _ => SealState::Unsealed,
        };

        Self {
            engagement_id: record.engagement_id,
            entries: record.entries,
            seal,
            created_at: record.created_at,
        }
    }

    /// Flatten into the persisted representation
    pub fn to_record(&self) -> AuditTrailRecord {
        AuditTrailRecord {
            engagement_id: self.engagement_id.clone(),
            entries: self.entries.clone(),
            hash: self.hash().map(str::to_string),
            hash_algorithm: self.algorithm(),
            signature: self.signature().map(str::to_string),
            created_at: self.created_at,
            sealed: self.is_sealed(),
        }
    }

    /// Append an entry while the trail is still open
    pub fn append_entry(&mut self, entry: AuditEntry) -> Result<(), AuditError> {
        if self.is_sealed() {
            return Err(AuditError::Sealed);
        }
        if entry.engagement_id != self.engagement_id {
            return Err(AuditError::EngagementMismatch {
                expected: self.engagement_id.clone(),
                found: entry.engagement_id,
            });
        }

        self.entries.push(entry);
        Ok(())
    }

    /// Freeze the trail and bind it to `hash`. There is no way back.
    pub fn seal(&mut self, hash: impl Into<String>, algorithm: &str) -> Result<(), AuditError> {
        if self.is_sealed() {
            return Err(AuditError::AlreadySealed);
        }
        let hash = hash.into();
        if hash.trim().is_empty() {
            return Err(AuditError::EmptyHash);
        }
        let algorithm: HashAlgorithm = algorithm.parse()?;

        self.seal = SealState::Sealed { hash, algorithm };
        Ok(())
    }

    /// Attach a signature to a sealed trail, replacing any previous one
    pub fn sign(&mut self, signature: impl Into<String>) -> Result<(), AuditError> {
        let signature = signature.into();
        if signature.trim().is_empty() {
            return Err(AuditError::EmptySignature);
        }

        let (hash, algorithm) = match &self.seal {
            SealState::Unsealed => return Err(AuditError::NotSealed),
            SealState::Sealed { hash, algorithm } | SealState::Signed { hash, algorithm, .. } => {
                (hash.clone(), *algorithm)
            }
        };

        self.seal = SealState::Signed {
            hash,
            algorithm,
            signature,
        };
        Ok(())
    }

    /// Whether `computed_hash` equals the sealed hash
    ///
    /// Always `false` for an unsealed trail.
    pub fn verify_integrity(&self, computed_hash: &str) -> bool {
        self.hash().is_some_and(|hash| hash == computed_hash)
    }

    pub fn engagement_id(&self) -> &str {
        &self.engagement_id
    }

    pub fn entries(&self) -> &[AuditEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn seal_state(&self) -> &SealState {
        &self.seal
    }

    pub fn hash(&self) -> Option<&str> {
        match &self.seal {
            SealState::Unsealed => None,
            SealState::Sealed { hash, .. } | SealState::Signed { hash, .. } => Some(hash),
        }
    }

    pub fn algorithm(&self) -> Option<HashAlgorithm> {
        match &self.seal {
            SealState::Unsealed => None,
            SealState::Sealed { algorithm, .. } | SealState::Signed { algorithm, .. } => {
                Some(*algorithm)
            }
        }
    }

    pub fn signature(&self) -> Option<&str> {
        match &self.seal {
            SealState::Signed { signature, .. } => Some(signature),
            _ => None,
        }
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn is_sealed(&self) -> bool {
        !matches!(self.seal, SealState::Unsealed)
    }

    pub fn is_signed(&self) -> bool {
        matches!(self.seal, SealState::Signed { .. })
    }
}

/// Persisted shape of an [`AuditTrail`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditTrailRecord {
    pub engagement_id: String,
    #[serde(default)]
    pub entries: Vec<AuditEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash_algorithm: Option<HashAlgorithm>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub sealed: bool,
}

/// Rejected audit trail mutation
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuditError {
    #[error("engagement id must not be empty")]
    EmptyEngagementId,

    #[error("audit trail is sealed; entries can no longer be appended")]
    Sealed,

    #[error("entry belongs to engagement '{found}', trail belongs to '{expected}'")]
    EngagementMismatch { expected: String, found: String },

    #[error("audit trail is already sealed")]
    AlreadySealed,

    #[error("seal hash must not be empty")]
    EmptyHash,

    #[error(transparent)]
    Algorithm(#[from] HashAlgorithmError),

    #[error("audit trail must be sealed before it can be signed")]
    NotSealed,

    #[error("signature must not be empty")]
    EmptySignature,
}
