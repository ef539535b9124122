//! Persistence for audit trails and check runs
//!
//! The domain types never touch storage directly; they are loaded and
//! saved through the repository traits defined here.
//!
//! - `filesystem` - JSON files under a root directory
//! - `memory` - In-process maps (tests, dry runs)
//!
//! # Canonical evidence bytes
//!
//! A trail's hash is computed over its entries rendered as JSON Lines:
//! one compact JSON object per entry, in trail order, each terminated by
//! `\n`. Both backends hash exactly these bytes.

pub mod filesystem;
pub mod memory;

use anyhow::Result;
use async_trait::async_trait;

use crate::audit::{AuditEntry, AuditTrail, AuditTrailRecord, HashAlgorithm};
use crate::run::CheckRun;

pub use filesystem::{FileAuditRepository, FileCheckRunRepository};
pub use memory::{MemoryAuditRepository, MemoryCheckRunRepository};

/// Durable storage for audit trails, keyed by engagement id
#[async_trait]
pub trait AuditRepository: Send + Sync {
    /// Store the trail, replacing any previous version
    async fn save(&self, trail: &AuditTrail) -> Result<()>;

    /// Load the trail of an engagement
    async fn find_by_engagement_id(&self, engagement_id: &str) -> Result<Option<AuditTrail>>;

    /// Load a trail's seal state and metadata without decoding its entries
    ///
    /// The returned record always has an empty `entries` list.
    async fn find_record(&self, engagement_id: &str) -> Result<Option<AuditTrailRecord>>;

    /// Append one entry to a stored, unsealed trail
    async fn append_entry(&self, engagement_id: &str, entry: &AuditEntry) -> Result<()>;

    /// Digest the stored evidence bytes of an engagement
    async fn compute_hash(&self, engagement_id: &str, algorithm: HashAlgorithm) -> Result<String>;

    /// Recompute the hash with the sealed algorithm and compare
    ///
    /// Only the raw evidence bytes are digested, so evidence that no
    /// longer decodes is still a plain mismatch. `Ok(false)` means the
    /// content does not match (or the trail was never sealed); `Err`
    /// means the stored artifact could not be read.
    async fn verify_integrity(&self, engagement_id: &str) -> Result<bool> {
        let record = self
            .find_record(engagement_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("No audit trail for engagement '{}'", engagement_id))?;
        let seal = AuditTrail::reconstruct(record);

        let Some(algorithm) = seal.algorithm() else {
            return Ok(false);
        };
        let computed = self.compute_hash(engagement_id, algorithm).await?;
        Ok(seal.verify_integrity(&computed))
    }
}

/// Durable storage for check runs
#[async_trait]
pub trait CheckRunRepository: Send + Sync {
    /// Store the run, replacing any previous version
    async fn save(&self, run: &CheckRun) -> Result<()>;

    async fn find_by_id(&self, id: &str) -> Result<Option<CheckRun>>;

    /// Runs of one engagement, oldest first
    async fn find_by_engagement_id(&self, engagement_id: &str) -> Result<Vec<CheckRun>>;

    /// Every stored run, oldest first
    async fn find_all(&self) -> Result<Vec<CheckRun>>;

    /// Remove a run; returns whether it existed
    async fn delete(&self, id: &str) -> Result<bool>;
}

/// Render entries as canonical evidence bytes
pub fn encode_entries(entries: &[AuditEntry]) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    for entry in entries {
        serde_json::to_writer(&mut bytes, entry)?;
        bytes.push(b'\n');
    }
    Ok(bytes)
}

/// Parse canonical evidence bytes back into entries
pub fn decode_entries(bytes: &[u8]) -> Result<Vec<AuditEntry>> {
    let text = std::str::from_utf8(bytes)?;
    text.lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| serde_json::from_str(line).map_err(Into::into))
        .collect()
}

/// Short identifier for a signature: the first 16 hex chars of its sha256
pub fn signature_fingerprint(signature: &str) -> String {
    let digest = HashAlgorithm::Sha256.digest(signature.as_bytes());
    digest[..16].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checker::CheckResult;

    fn entries() -> Vec<AuditEntry> {
        ["a", "b"]
            .iter()
            .map(|t| AuditEntry::from_result("eng", "op", "probe", *t, &CheckResult::ok(*t), 0.1))
            .collect()
    }

    #[test]
    fn encoding_is_one_line_per_entry() {
        let bytes = encode_entries(&entries()).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert_eq!(text.lines().count(), 2);
        assert!(text.ends_with('\n'));
        assert!(text.lines().all(|line| line.starts_with('{')));
    }

    #[test]
    fn decode_round_trips() {
        let original = entries();
        let decoded = decode_entries(&encode_entries(&original).unwrap()).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn empty_trail_encodes_to_nothing() {
        assert!(encode_entries(&[]).unwrap().is_empty());
    }

    #[test]
    fn fingerprint_is_stable_prefix() {
        let fp = signature_fingerprint("signature-bytes");
        assert_eq!(fp.len(), 16);
        assert_eq!(fp, signature_fingerprint("signature-bytes"));
        assert_ne!(fp, signature_fingerprint("other"));
    }
}
