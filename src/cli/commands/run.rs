//! Run command - Check every target and seal the engagement's audit trail

use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use hostaudit::store::{
    AuditRepository, CheckRunRepository, FileAuditRepository, FileCheckRunRepository,
};
use hostaudit::{AuditEntry, AuditTrail, CheckResult, CheckRun, Checker, Runner};

use super::printer_for;
use crate::cli::config::{HostAuditConfig, RunArgs};
use crate::cli::OutputFormat;
use crate::ui::RunProgress;

/// Run checks against `targets` (plus any listed in `targets_file`)
pub async fn run(
    targets: Vec<String>,
    targets_file: Option<&Path>,
    args: RunArgs,
    config: &HostAuditConfig,
    store: &Path,
    format: OutputFormat,
) -> Result<()> {
    let plan = args.resolve(config)?;
    let targets = collect_targets(targets, targets_file).await?;
    if targets.is_empty() {
        bail!("No targets to check: pass targets as arguments or with --targets-file");
    }

    let audit_repo = FileAuditRepository::open(store).await?;
    let run_repo = FileCheckRunRepository::open(store).await?;

    let engagement_id = plan.engagement_id.clone();
    let mut trail = match audit_repo.find_by_engagement_id(&engagement_id).await? {
        Some(trail) if trail.is_sealed() => bail!(
            "Audit trail for '{}' is already sealed; start a new engagement id",
            engagement_id
        ),
        Some(trail) => {
            info!(
                "Resuming unsealed audit trail for {} ({} entries)",
                engagement_id,
                trail.len()
            );
            trail
        }
        None => AuditTrail::new(&engagement_id)?,
    };
    audit_repo.save(&trail).await?;

    let mut run = CheckRun::new(&engagement_id, &plan.engagement_name, &plan.operator)?;
    run.start()?;
    run_repo.save(&run).await?;

    let cancel = CancellationToken::new();
    let interrupt = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted, cancelling remaining checks");
                cancel.cancel();
            }
        })
    };

    let printer = printer_for(format);
    let mut progress = RunProgress::new(printer.mode(), targets.len());
    let checker: Arc<dyn Checker> = Arc::new(plan.checker.clone());
    let command = checker.name().to_string();
    let operator = plan.operator.clone();
    let runner = Runner::new(plan.runner.clone());
    let (persist, writer) = spawn_entry_writer(audit_repo.clone(), engagement_id.clone());

    runner
        .run_checks_with_audit(&cancel, &targets, checker, |target, result, duration_secs| {
            progress.record(target, result.is_ok());
            let entry = AuditEntry::from_result(
                &engagement_id,
                &operator,
                &command,
                target,
                result,
                duration_secs,
            );
            record_completion(&mut trail, &mut run, entry, result, &persist)
        })
        .await;

    interrupt.abort();
    progress.finish_and_clear();
    drop(persist);
    if let Err(e) = writer.await {
        warn!("Audit entry writer stopped early: {}", e);
    }

    let cancelled = cancel.is_cancelled();
    if cancelled {
        run.fail()?;
    } else {
        run.complete()?;
    }

    audit_repo.save(&trail).await?;
    let hash = audit_repo
        .compute_hash(&engagement_id, plan.algorithm)
        .await
        .context("Failed to hash audit trail")?;
    trail.seal(hash.clone(), plan.algorithm.as_str())?;
    audit_repo.save(&trail).await?;

    run.set_audit_hash(hash, plan.algorithm.as_str())?;
    run_repo.save(&run).await?;

    if format.is_json() {
        println!("{}", serde_json::to_string_pretty(&run)?);
    } else {
        print_summary(&printer, &run);
    }

    if cancelled {
        bail!("Run {} was cancelled before all checks finished", run.id());
    }
    Ok(())
}

/// Persist entries to the stored trail as checks finish
///
/// Entries are appended in the order they are sent. The task ends once
/// every sender is dropped.
fn spawn_entry_writer<R>(
    repo: R,
    engagement_id: String,
) -> (mpsc::UnboundedSender<AuditEntry>, JoinHandle<()>)
where
    R: AuditRepository + 'static,
{
    let (tx, mut rx) = mpsc::unbounded_channel::<AuditEntry>();
    let handle = tokio::spawn(async move {
        while let Some(entry) = rx.recv().await {
            if let Err(e) = repo.append_entry(&engagement_id, &entry).await {
                warn!("Failed to persist audit entry for {}: {:#}", entry.target, e);
            }
        }
    });
    (tx, handle)
}

/// Record one finished check in the run, the trail and the stored trail
///
/// The run aggregate is updated even when the trail rejects the entry,
/// so the run totals never fall behind the checks that actually ran.
fn record_completion(
    trail: &mut AuditTrail,
    run: &mut CheckRun,
    entry: AuditEntry,
    result: &CheckResult,
    persist: &mpsc::UnboundedSender<AuditEntry>,
) -> Result<()> {
    let recorded = run.add_result(result.clone());

    trail.append_entry(entry.clone())?;
    if persist.send(entry).is_err() {
        warn!("Audit entry writer is gone; entry kept in memory only");
    }

    recorded?;
    Ok(())
}

fn print_summary(printer: &crate::ui::Printer, run: &CheckRun) {
    let summary = run.summary();

    printer.newline();
    printer.header(&format!("Run {}", run.id()));
    printer.separator();
    printer.kv("Engagement", &format!("{} ({})", run.engagement_name(), run.engagement_id()));
    printer.kv("Operator", run.operator());
    printer.kv("Status", run.status().as_str());
    printer.kv(
        "Checks",
        &format!("{} total, {} ok, {} failed", summary.total, summary.ok, summary.errors),
    );
    if let Some(duration) = run.duration() {
        printer.kv("Duration", &format!("{:.2}s", duration.as_secs_f64()));
    }
    if let (Some(hash), Some(algorithm)) = (
        run.metadata().audit_hash.as_deref(),
        run.metadata().hash_algorithm,
    ) {
        printer.kv("Audit hash", &format!("{}:{}", algorithm, hash));
    }

    let failures: Vec<_> = run.results().iter().filter(|r| !r.is_ok()).collect();
    if !failures.is_empty() {
        printer.newline();
        for result in failures {
            printer.check_row(
                result.target(),
                result.status(),
                result.error_message().unwrap_or_default(),
            );
        }
    }
    printer.newline();

    if summary.errors == 0 {
        printer.success("All checks passed; audit trail sealed");
    } else {
        printer.warning(&format!(
            "{} of {} checks failed; audit trail sealed",
            summary.errors, summary.total
        ));
    }
}

/// Targets from the command line followed by those in `file`
///
/// The file holds one target per line; blank lines and `#` comments are
/// skipped.
pub async fn collect_targets(mut targets: Vec<String>, file: Option<&Path>) -> Result<Vec<String>> {
    if let Some(path) = file {
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read targets file: {}", path.display()))?;
        targets.extend(parse_targets(&content));
    }
    Ok(targets)
}

fn parse_targets(content: &str) -> impl Iterator<Item = String> + '_ {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use hostaudit::store::MemoryAuditRepository;

    #[test]
    fn targets_file_skips_comments_and_blanks() {
        let parsed: Vec<String> = parse_targets("# prod\nweb-1\n\n  db-1  \n#db-2\n").collect();
        assert_eq!(parsed, vec!["web-1".to_string(), "db-1".to_string()]);
    }

    #[tokio::test]
    async fn collect_appends_file_targets() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("targets.txt");
        tokio::fs::write(&path, "b\nc\n").await.unwrap();

        let targets = collect_targets(vec!["a".to_string()], Some(&path)).await.unwrap();
        assert_eq!(targets, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn missing_targets_file_errors() {
        let result = collect_targets(Vec::new(), Some(Path::new("/nonexistent/targets.txt"))).await;
        assert!(result.is_err());
    }

    fn entry_for(target: &str) -> AuditEntry {
        AuditEntry::from_result("eng-1", "alice", "check-host", target, &CheckResult::ok(target), 0.1)
    }

    #[tokio::test]
    async fn writer_persists_entries_before_the_final_save() {
        let repo = MemoryAuditRepository::new();
        repo.save(&AuditTrail::new("eng-1").unwrap()).await.unwrap();

        let (tx, handle) = spawn_entry_writer(repo.clone(), "eng-1".to_string());
        tx.send(entry_for("a")).unwrap();
        tx.send(entry_for("b")).unwrap();
        drop(tx);
        handle.await.unwrap();

        let stored = repo.find_by_engagement_id("eng-1").await.unwrap().unwrap();
        let targets: Vec<&str> = stored.entries().iter().map(|e| e.target.as_str()).collect();
        assert_eq!(targets, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn run_counts_result_when_trail_rejects_entry() {
        let mut trail = AuditTrail::new("eng-1").unwrap();
        trail.seal("abc123", "sha256").unwrap();
        let mut run = CheckRun::new("eng-1", "Acme", "alice").unwrap();
        run.start().unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let result = CheckResult::ok("a");
        let outcome = record_completion(&mut trail, &mut run, entry_for("a"), &result, &tx);

        assert!(outcome.is_err());
        assert_eq!(run.metadata().total_targets, 1);
        assert!(trail.is_empty());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn trail_keeps_entry_when_run_rejects_result() {
        let mut trail = AuditTrail::new("eng-1").unwrap();
        let mut run = CheckRun::new("eng-1", "Acme", "alice").unwrap();
        run.start().unwrap();
        run.complete().unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let result = CheckResult::ok("a");
        let outcome = record_completion(&mut trail, &mut run, entry_for("a"), &result, &tx);

        assert!(outcome.is_err());
        assert_eq!(trail.len(), 1);
        assert_eq!(rx.try_recv().unwrap().target, "a");
        assert_eq!(run.metadata().total_targets, 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn run_seals_trail_and_stores_run() {
        let dir = tempfile::tempdir().unwrap();
        let args = RunArgs {
            checker: Some("sh".to_string()),
            args: vec![
                "-c".to_string(),
                r#"printf '{"status":"ok","notes":"reachable %s"}' "$1""#.to_string(),
                "probe".to_string(),
            ],
            engagement: Some("eng-cli".to_string()),
            operator: Some("alice".to_string()),
            rate_limit: Some(0.0),
            ..Default::default()
        };
        let targets = vec!["web-1".to_string(), "web-2".to_string()];

        run(
            targets,
            None,
            args,
            &HostAuditConfig::default(),
            dir.path(),
            OutputFormat::Json,
        )
        .await
        .unwrap();

        let audit_repo = FileAuditRepository::open(dir.path()).await.unwrap();
        let trail = audit_repo
            .find_by_engagement_id("eng-cli")
            .await
            .unwrap()
            .unwrap();
        assert!(trail.is_sealed());
        assert_eq!(trail.len(), 2);
        assert!(audit_repo.verify_integrity("eng-cli").await.unwrap());

        let run_repo = FileCheckRunRepository::open(dir.path()).await.unwrap();
        let runs = run_repo.find_by_engagement_id("eng-cli").await.unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].status(), hostaudit::RunStatus::Completed);
        assert_eq!(runs[0].metadata().total_targets, 2);
        assert_eq!(runs[0].metadata().audit_hash.as_deref(), trail.hash());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn run_resumes_entries_left_by_interrupted_run() {
        let dir = tempfile::tempdir().unwrap();
        let audit_repo = FileAuditRepository::open(dir.path()).await.unwrap();
        audit_repo
            .save(&AuditTrail::new("eng-resume").unwrap())
            .await
            .unwrap();
        let earlier = AuditEntry::from_result(
            "eng-resume",
            "alice",
            "sh",
            "web-0",
            &CheckResult::ok("web-0"),
            0.1,
        );
        audit_repo.append_entry("eng-resume", &earlier).await.unwrap();

        let args = RunArgs {
            checker: Some("sh".to_string()),
            args: vec![
                "-c".to_string(),
                r#"printf '{"status":"ok"}'"#.to_string(),
                "check-host".to_string(),
            ],
            engagement: Some("eng-resume".to_string()),
            operator: Some("alice".to_string()),
            rate_limit: Some(0.0),
            ..Default::default()
        };
        run(
            vec!["web-1".to_string()],
            None,
            args,
            &HostAuditConfig::default(),
            dir.path(),
            OutputFormat::Json,
        )
        .await
        .unwrap();

        let trail = audit_repo
            .find_by_engagement_id("eng-resume")
            .await
            .unwrap()
            .unwrap();
        let targets: Vec<&str> = trail.entries().iter().map(|e| e.target.as_str()).collect();
        assert_eq!(targets, vec!["web-0", "web-1"]);
        assert!(audit_repo.verify_integrity("eng-resume").await.unwrap());
    }
}
