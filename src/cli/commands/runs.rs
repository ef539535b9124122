//! Runs commands - List, show and delete stored check runs

use std::path::Path;

use anyhow::Result;
use serde_json::json;

use hostaudit::store::{CheckRunRepository, FileCheckRunRepository};
use hostaudit::CheckRun;

use super::printer_for;
use crate::cli::OutputFormat;
use crate::errors::HostAuditError;
use crate::ui::Printer;

/// List stored runs, optionally for one engagement
pub async fn list(engagement_id: Option<&str>, store: &Path, format: OutputFormat) -> Result<()> {
    let repo = FileCheckRunRepository::open(store).await?;
    let runs = match engagement_id {
        Some(id) => repo.find_by_engagement_id(id).await?,
        None => repo.find_all().await?,
    };

    if format.is_json() {
        println!("{}", serde_json::to_string_pretty(&runs)?);
        return Ok(());
    }

    let printer = printer_for(format);
    if runs.is_empty() {
        printer.warning("No runs stored");
        return Ok(());
    }

    printer.header(&format!("{} run(s)", runs.len()));
    printer.separator();
    for run in &runs {
        let summary = run.summary();
        printer.println(&format!(
            "{}  {:<10} {:<9} {:>4} checks {:>4} failed  {}",
            run.id(),
            run.engagement_id(),
            run.status().as_str(),
            summary.total,
            summary.errors,
            run.created_at().format("%Y-%m-%d %H:%M:%S")
        ));
    }
    Ok(())
}

/// Show one run with all of its results
pub async fn show(run_id: &str, store: &Path, format: OutputFormat) -> Result<()> {
    let repo = FileCheckRunRepository::open(store).await?;
    let Some(run) = repo.find_by_id(run_id).await? else {
        return Err(HostAuditError::run_not_found(run_id).into());
    };

    if format.is_json() {
        println!("{}", serde_json::to_string_pretty(&run)?);
    } else {
        print_run(&printer_for(format), &run);
    }
    Ok(())
}

/// Delete one run record
///
/// The engagement's audit trail is left untouched.
pub async fn delete(run_id: &str, store: &Path, format: OutputFormat) -> Result<()> {
    let repo = FileCheckRunRepository::open(store).await?;
    if !repo.delete(run_id).await? {
        return Err(HostAuditError::run_not_found(run_id).into());
    }

    if format.is_json() {
        println!("{}", json!({ "deleted": run_id }));
    } else {
        printer_for(format).success(&format!("Deleted run {}", run_id));
    }
    Ok(())
}

fn print_run(printer: &Printer, run: &CheckRun) {
    let metadata = run.metadata();
    let summary = run.summary();

    printer.header(&format!("Run {}", run.id()));
    printer.separator();
    printer.kv("Engagement", &format!("{} ({})", run.engagement_name(), run.engagement_id()));
    printer.kv("Operator", run.operator());
    printer.kv("Status", run.status().as_str());
    printer.kv("Created", &run.created_at().to_rfc3339());
    if let Some(started) = run.started_at() {
        printer.kv("Started", &started.to_rfc3339());
    }
    if let Some(completed) = run.completed_at() {
        printer.kv("Completed", &completed.to_rfc3339());
    }
    if let (Some(hash), Some(algorithm)) = (metadata.audit_hash.as_deref(), metadata.hash_algorithm) {
        printer.kv("Audit hash", &format!("{}:{}", algorithm, hash));
    }
    if let Some(fingerprint) = metadata.signature_fingerprint.as_deref() {
        printer.kv("Signature", fingerprint);
    }
    printer.kv(
        "Checks",
        &format!("{} total, {} ok, {} failed", summary.total, summary.ok, summary.errors),
    );

    if !run.results().is_empty() {
        printer.newline();
        for result in run.results() {
            let detail = result
                .error_message()
                .unwrap_or_else(|| result.notes());
            printer.check_row(result.target(), result.status(), detail);
        }
    }
}
