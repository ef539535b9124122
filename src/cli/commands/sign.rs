//! Sign command - Attach a signature to a sealed audit trail

use std::path::Path;

use anyhow::Result;
use serde_json::json;

use hostaudit::store::{
    signature_fingerprint, AuditRepository, CheckRunRepository, FileAuditRepository,
    FileCheckRunRepository,
};

use super::printer_for;
use crate::cli::OutputFormat;
use crate::errors::HostAuditError;

/// Sign the trail of `engagement_id` and stamp its runs with the fingerprint
///
/// The trail must be sealed and still match its hash.
pub async fn run(
    engagement_id: &str,
    signature: &str,
    store: &Path,
    format: OutputFormat,
) -> Result<()> {
    let audit_repo = FileAuditRepository::open(store).await?;
    let run_repo = FileCheckRunRepository::open(store).await?;

    let Some(record) = audit_repo.find_record(engagement_id).await? else {
        return Err(HostAuditError::trail_not_found(engagement_id).into());
    };
    if let Some(algorithm) = record.hash_algorithm.filter(|_| record.sealed) {
        if !audit_repo.verify_integrity(engagement_id).await? {
            return Err(HostAuditError::integrity_mismatch(engagement_id, algorithm.as_str()).into());
        }
    }

    let Some(mut trail) = audit_repo.find_by_engagement_id(engagement_id).await? else {
        return Err(HostAuditError::trail_not_found(engagement_id).into());
    };
    trail.sign(signature)?;
    audit_repo.save(&trail).await?;

    let fingerprint = signature_fingerprint(signature);
    let mut runs = run_repo.find_by_engagement_id(engagement_id).await?;
    for run in &mut runs {
        run.set_signature_fingerprint(&fingerprint);
        run_repo.save(run).await?;
    }
    tracing::info!(
        "Signed audit trail for {} ({} runs updated)",
        engagement_id,
        runs.len()
    );

    if format.is_json() {
        let report = json!({
            "engagement_id": engagement_id,
            "signature_fingerprint": fingerprint,
            "runs_updated": runs.len(),
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        let printer = printer_for(format);
        printer.success(&format!("Signed audit trail for {}", engagement_id));
        printer.kv("Fingerprint", &fingerprint);
        printer.kv("Runs updated", &runs.len().to_string());
    }
    Ok(())
}
