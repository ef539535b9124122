//! Filesystem Store - JSON files under a root directory
//!
//! Layout:
//!
//! ```text
//! <root>/audit/<engagement>/entries.jsonl   canonical evidence bytes
//! <root>/audit/<engagement>/trail.json      seal state and metadata
//! <root>/runs/<run-id>.json                 one check run per file
//! ```
//!
//! Entries are stored only in `entries.jsonl`, so the hashed bytes are
//! the single source of evidence.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use super::{decode_entries, encode_entries, AuditRepository, CheckRunRepository};
use crate::audit::{AuditEntry, AuditTrail, AuditTrailRecord, HashAlgorithm};
use crate::run::CheckRun;

const ENTRIES_FILE: &str = "entries.jsonl";
const TRAIL_FILE: &str = "trail.json";

/// Turn an identifier into a single safe path component
fn path_component(id: &str) -> String {
    let cleaned: String = id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();

    if cleaned.is_empty() || cleaned.chars().all(|c| c == '.') {
        format!("_{}", cleaned)
    } else {
        cleaned
    }
}

/// Write a file and flush it to disk
async fn write_file(path: &Path, contents: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }

    let mut file = fs::File::create(path)
        .await
        .with_context(|| format!("Failed to create {}", path.display()))?;
    file.write_all(contents).await?;
    file.sync_all().await?;
    Ok(())
}

/// Read a file, mapping "not found" to `None`
async fn read_optional(path: &Path) -> Result<Option<Vec<u8>>> {
    match fs::read(path).await {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e).with_context(|| format!("Failed to read {}", path.display())),
    }
}

/// Audit trails stored as JSON files
#[derive(Debug, Clone)]
pub struct FileAuditRepository {
    base_path: PathBuf,
}

impl FileAuditRepository {
    /// Open (and create) the audit store under `root`
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let base_path = root.into().join("audit");
        fs::create_dir_all(&base_path)
            .await
            .context("Failed to create audit directory")?;
        Ok(Self { base_path })
    }

    /// Directory holding one engagement's files
    pub fn engagement_dir(&self, engagement_id: &str) -> PathBuf {
        self.base_path.join(path_component(engagement_id))
    }

    /// Path of the canonical evidence file of an engagement
    pub fn entries_path(&self, engagement_id: &str) -> PathBuf {
        self.engagement_dir(engagement_id).join(ENTRIES_FILE)
    }

    fn trail_path(&self, engagement_id: &str) -> PathBuf {
        self.engagement_dir(engagement_id).join(TRAIL_FILE)
    }

    async fn load_record(&self, engagement_id: &str) -> Result<Option<AuditTrailRecord>> {
        let path = self.trail_path(engagement_id);
        let Some(bytes) = read_optional(&path).await? else {
            return Ok(None);
        };

        let record: AuditTrailRecord = serde_json::from_slice(&bytes)
            .with_context(|| format!("Failed to parse {}", path.display()))?;

        // Sanitized directory names can collide; the record is authoritative.
        if record.engagement_id != engagement_id {
            return Ok(None);
        }
        Ok(Some(record))
    }

    async fn read_evidence(&self, engagement_id: &str) -> Result<Vec<u8>> {
        Ok(read_optional(&self.entries_path(engagement_id))
            .await?
            .unwrap_or_default())
    }
}

#[async_trait]
impl AuditRepository for FileAuditRepository {
    async fn save(&self, trail: &AuditTrail) -> Result<()> {
        let engagement_id = trail.engagement_id();

        let evidence = encode_entries(trail.entries())?;
        write_file(&self.entries_path(engagement_id), &evidence).await?;

        let mut record = trail.to_record();
        record.entries.clear();
        let metadata = serde_json::to_vec_pretty(&record)?;
        write_file(&self.trail_path(engagement_id), &metadata).await?;

        debug!(
            "Saved audit trail for {} ({} entries, sealed: {})",
            engagement_id,
            trail.len(),
            trail.is_sealed()
        );
        Ok(())
    }

    async fn find_by_engagement_id(&self, engagement_id: &str) -> Result<Option<AuditTrail>> {
        let Some(mut record) = self.load_record(engagement_id).await? else {
            return Ok(None);
        };

        let evidence = self.read_evidence(engagement_id).await?;
        record.entries = decode_entries(&evidence).with_context(|| {
            format!(
                "Failed to parse {}",
                self.entries_path(engagement_id).display()
            )
        })?;

        Ok(Some(AuditTrail::reconstruct(record)))
    }

    async fn find_record(&self, engagement_id: &str) -> Result<Option<AuditTrailRecord>> {
        self.load_record(engagement_id).await
    }

    async fn append_entry(&self, engagement_id: &str, entry: &AuditEntry) -> Result<()> {
        let Some(record) = self.load_record(engagement_id).await? else {
            bail!("No audit trail for engagement '{}'", engagement_id);
        };
        if record.sealed {
            bail!("Audit trail for '{}' is sealed", engagement_id);
        }
        if entry.engagement_id != engagement_id {
            bail!(
                "Entry belongs to engagement '{}', not '{}'",
                entry.engagement_id,
                engagement_id
            );
        }

        let line = encode_entries(std::slice::from_ref(entry))?;
        let path = self.entries_path(engagement_id);
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .with_context(|| format!("Failed to open {}", path.display()))?;
        file.write_all(&line).await?;
        file.sync_all().await?;
        Ok(())
    }

    async fn compute_hash(&self, engagement_id: &str, algorithm: HashAlgorithm) -> Result<String> {
        if self.load_record(engagement_id).await?.is_none() {
            bail!("No audit trail for engagement '{}'", engagement_id);
        }
        let evidence = self.read_evidence(engagement_id).await?;
        Ok(algorithm.digest(&evidence))
    }
}

/// Check runs stored as one JSON file each
#[derive(Debug, Clone)]
pub struct FileCheckRunRepository {
    base_path: PathBuf,
}

impl FileCheckRunRepository {
    /// Open (and create) the run store under `root`
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let base_path = root.into().join("runs");
        fs::create_dir_all(&base_path)
            .await
            .context("Failed to create runs directory")?;
        Ok(Self { base_path })
    }

    fn run_path(&self, id: &str) -> PathBuf {
        self.base_path.join(format!("{}.json", path_component(id)))
    }

    async fn list_run_files(&self) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        let mut entries = match fs::read_dir(&self.base_path).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(files),
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().map(|e| e == "json").unwrap_or(false) {
                files.push(path);
            }
        }
        Ok(files)
    }
}

#[async_trait]
impl CheckRunRepository for FileCheckRunRepository {
    async fn save(&self, run: &CheckRun) -> Result<()> {
        let contents = serde_json::to_vec_pretty(run)?;
        write_file(&self.run_path(run.id()), &contents).await?;
        debug!("Saved check run {} ({})", run.id(), run.status());
        Ok(())
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<CheckRun>> {
        let path = self.run_path(id);
        let Some(bytes) = read_optional(&path).await? else {
            return Ok(None);
        };
        let run: CheckRun = serde_json::from_slice(&bytes)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        Ok(Some(run).filter(|run| run.id() == id))
    }

    async fn find_by_engagement_id(&self, engagement_id: &str) -> Result<Vec<CheckRun>> {
        let runs = self.find_all().await?;
        Ok(runs
            .into_iter()
            .filter(|run| run.engagement_id() == engagement_id)
            .collect())
    }

    async fn find_all(&self) -> Result<Vec<CheckRun>> {
        let mut runs = Vec::new();
        for path in self.list_run_files().await? {
            let bytes = fs::read(&path).await?;
            match serde_json::from_slice::<CheckRun>(&bytes) {
                Ok(run) => runs.push(run),
                Err(e) => warn!("Skipping unreadable run file {}: {}", path.display(), e),
            }
        }
        runs.sort_by_key(|run| run.created_at());
        Ok(runs)
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let path = self.run_path(id);
        match fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e).with_context(|| format!("Failed to delete {}", path.display())),
        }
    }
}
