//! Verify command - Recompute an engagement's evidence hash and compare

use std::path::Path;

use anyhow::{bail, Result};
use serde_json::json;

use hostaudit::store::{AuditRepository, FileAuditRepository};
use hostaudit::AuditTrail;

use super::printer_for;
use crate::cli::OutputFormat;
use crate::errors::HostAuditError;

/// Verify the sealed audit trail of `engagement_id`
///
/// Returns `HostAuditError::IntegrityMismatch` when the stored evidence
/// no longer matches the seal, including evidence that no longer parses.
pub async fn run(engagement_id: &str, store: &Path, format: OutputFormat) -> Result<()> {
    let repo = FileAuditRepository::open(store).await?;
    let Some(record) = repo.find_record(engagement_id).await? else {
        return Err(HostAuditError::trail_not_found(engagement_id).into());
    };
    let trail = AuditTrail::reconstruct(record);
    let Some(algorithm) = trail.algorithm() else {
        bail!("Audit trail for '{}' has not been sealed", engagement_id);
    };

    let verified = repo.verify_integrity(engagement_id).await?;

    // Entries are only decoded once the bytes are known to be the sealed ones.
    let entries = if verified {
        repo.find_by_engagement_id(engagement_id)
            .await?
            .map(|trail| trail.len())
    } else {
        None
    };

    if format.is_json() {
        let report = json!({
            "engagement_id": engagement_id,
            "entries": entries,
            "algorithm": algorithm,
            "hash": trail.hash(),
            "signed": trail.is_signed(),
            "verified": verified,
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        let printer = printer_for(format);
        printer.header(&format!("Audit trail {}", engagement_id));
        if let Some(entries) = entries {
            printer.kv("Entries", &entries.to_string());
        }
        printer.kv("Hash", &format!("{}:{}", algorithm, trail.hash().unwrap_or_default()));
        printer.kv("Signed", if trail.is_signed() { "yes" } else { "no" });
        if verified {
            printer.success("Evidence matches the sealed hash");
        } else {
            printer.error("Evidence does not match the sealed hash");
        }
    }

    if !verified {
        return Err(HostAuditError::integrity_mismatch(engagement_id, algorithm.as_str()).into());
    }
    Ok(())
}
