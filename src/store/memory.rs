//! Memory Store - In-process repositories
//!
//! Mirrors the filesystem layout semantics (evidence kept as canonical
//! bytes per engagement) without touching disk.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{bail, Result};
use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{decode_entries, encode_entries, AuditRepository, CheckRunRepository};
use crate::audit::{AuditEntry, AuditTrail, AuditTrailRecord, HashAlgorithm};
use crate::run::CheckRun;

#[derive(Debug, Clone)]
struct StoredTrail {
    /// Record without entries
    record: AuditTrailRecord,
    evidence: Vec<u8>,
}

/// In-memory audit trail repository
#[derive(Debug, Clone, Default)]
pub struct MemoryAuditRepository {
    trails: Arc<RwLock<HashMap<String, StoredTrail>>>,
}

impl MemoryAuditRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite the stored evidence bytes of an engagement
    pub async fn replace_evidence(&self, engagement_id: &str, evidence: Vec<u8>) -> Result<()> {
        let mut trails = self.trails.write().await;
        match trails.get_mut(engagement_id) {
            Some(stored) => {
                stored.evidence = evidence;
                Ok(())
            }
            None => bail!("No audit trail for engagement '{}'", engagement_id),
        }
    }
}

#[async_trait]
impl AuditRepository for MemoryAuditRepository {
    async fn save(&self, trail: &AuditTrail) -> Result<()> {
        let evidence = encode_entries(trail.entries())?;
        let mut record = trail.to_record();
        record.entries.clear();

        self.trails
            .write()
            .await
            .insert(trail.engagement_id().to_string(), StoredTrail { record, evidence });
        Ok(())
    }

    async fn find_by_engagement_id(&self, engagement_id: &str) -> Result<Option<AuditTrail>> {
        let trails = self.trails.read().await;
        let Some(stored) = trails.get(engagement_id) else {
            return Ok(None);
        };

        let mut record = stored.record.clone();
        record.entries = decode_entries(&stored.evidence)?;
        Ok(Some(AuditTrail::reconstruct(record)))
    }

    async fn find_record(&self, engagement_id: &str) -> Result<Option<AuditTrailRecord>> {
        Ok(self
            .trails
            .read()
            .await
            .get(engagement_id)
            .map(|stored| stored.record.clone()))
    }

    async fn append_entry(&self, engagement_id: &str, entry: &AuditEntry) -> Result<()> {
        let mut trails = self.trails.write().await;
        let Some(stored) = trails.get_mut(engagement_id) else {
            bail!("No audit trail for engagement '{}'", engagement_id);
        };
        if stored.record.sealed {
            bail!("Audit trail for '{}' is sealed", engagement_id);
        }
        if entry.engagement_id != engagement_id {
            bail!(
                "Entry belongs to engagement '{}', not '{}'",
                entry.engagement_id,
                engagement_id
            );
        }

        stored
            .evidence
            .extend(encode_entries(std::slice::from_ref(entry))?);
        Ok(())
    }

    async fn compute_hash(&self, engagement_id: &str, algorithm: HashAlgorithm) -> Result<String> {
        let trails = self.trails.read().await;
        match trails.get(engagement_id) {
            Some(stored) => Ok(algorithm.digest(&stored.evidence)),
            None => bail!("No audit trail for engagement '{}'", engagement_id),
        }
    }
}

/// In-memory check run repository
#[derive(Debug, Clone, Default)]
pub struct MemoryCheckRunRepository {
    runs: Arc<RwLock<HashMap<String, CheckRun>>>,
}

impl MemoryCheckRunRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CheckRunRepository for MemoryCheckRunRepository {
    async fn save(&self, run: &CheckRun) -> Result<()> {
        self.runs
            .write()
            .await
            .insert(run.id().to_string(), run.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<CheckRun>> {
        Ok(self.runs.read().await.get(id).cloned())
    }

    async fn find_by_engagement_id(&self, engagement_id: &str) -> Result<Vec<CheckRun>> {
        let mut runs: Vec<CheckRun> = self
            .runs
            .read()
            .await
            .values()
            .filter(|run| run.engagement_id() == engagement_id)
            .cloned()
            .collect();
        runs.sort_by_key(|run| run.created_at());
        Ok(runs)
    }

    async fn find_all(&self) -> Result<Vec<CheckRun>> {
        let mut runs: Vec<CheckRun> = self.runs.read().await.values().cloned().collect();
        runs.sort_by_key(|run| run.created_at());
        Ok(runs)
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        Ok(self.runs.write().await.remove(id).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checker::CheckResult;

    fn entry(target: &str) -> AuditEntry {
        AuditEntry::from_result("eng-1", "alice", "probe", target, &CheckResult::ok(target), 0.2)
    }

    #[tokio::test]
    async fn audit_round_trip_and_verify() {
        let repo = MemoryAuditRepository::new();
        let mut trail = AuditTrail::new("eng-1").unwrap();
        trail.append_entry(entry("a")).unwrap();
        repo.save(&trail).await.unwrap();

        let hash = repo.compute_hash("eng-1", HashAlgorithm::Sha256).await.unwrap();
        trail.seal(hash, "sha256").unwrap();
        repo.save(&trail).await.unwrap();

        let loaded = repo.find_by_engagement_id("eng-1").await.unwrap().unwrap();
        assert_eq!(loaded, trail);
        assert!(repo.verify_integrity("eng-1").await.unwrap());

        repo.replace_evidence("eng-1", b"forged\n".to_vec()).await.unwrap();
        assert!(!repo.verify_integrity("eng-1").await.unwrap());
    }

    #[tokio::test]
    async fn append_respects_seal() {
        let repo = MemoryAuditRepository::new();
        let mut trail = AuditTrail::new("eng-1").unwrap();
        repo.save(&trail).await.unwrap();
        repo.append_entry("eng-1", &entry("a")).await.unwrap();

        trail.seal("abc", "sha256").unwrap();
        repo.save(&trail).await.unwrap();
        assert!(repo.append_entry("eng-1", &entry("b")).await.is_err());
    }

    #[tokio::test]
    async fn run_queries_are_ordered() {
        let repo = MemoryCheckRunRepository::new();
        let first = CheckRun::new("eng-1", "Acme", "alice").unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        let second = CheckRun::new("eng-1", "Acme", "alice").unwrap();
        let other = CheckRun::new("eng-2", "Other", "bob").unwrap();

        repo.save(&second).await.unwrap();
        repo.save(&other).await.unwrap();
        repo.save(&first).await.unwrap();

        let eng1 = repo.find_by_engagement_id("eng-1").await.unwrap();
        assert_eq!(eng1.len(), 2);
        assert_eq!(eng1[0].id(), first.id());
        assert_eq!(eng1[1].id(), second.id());
        assert_eq!(repo.find_all().await.unwrap().len(), 3);

        assert!(repo.delete(other.id()).await.unwrap());
        assert!(repo.find_by_id(other.id()).await.unwrap().is_none());
    }
}
