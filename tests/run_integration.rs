//! Integration tests for running checks with an audit trail
//!
//! Drives the runner end to end the way the CLI does:
//! - Results and audit entries are recorded from the callback
//! - The run state machine tracks every result
//! - The trail is sealed and verified through a repository

use std::sync::Arc;
use std::time::Duration;

use hostaudit::checker::MockChecker;
use hostaudit::run::RunStatus;
use hostaudit::store::{AuditRepository, CheckRunRepository, MemoryAuditRepository, MemoryCheckRunRepository};
use hostaudit::{AuditEntry, AuditTrail, CheckRun, Checker, HashAlgorithm, Runner, RunnerConfig};
use tokio_util::sync::CancellationToken;

fn targets(names: &[&str]) -> Vec<String> {
    names.iter().map(|n| n.to_string()).collect()
}

#[tokio::test(start_paused = true)]
async fn test_engagement_run_records_every_check() {
    let runner = Runner::new(
        RunnerConfig::default()
            .with_concurrency(2)
            .with_rate_limit(100.0)
            .with_timeout(Duration::from_secs(1)),
    );
    let mock = MockChecker::new("mock").with_delay(Duration::from_millis(10));
    let checker: Arc<dyn Checker> = Arc::new(mock.clone());
    let targets = targets(&["a", "b", "c", "d", "e"]);

    let mut trail = AuditTrail::new("eng-1").unwrap();
    let mut run = CheckRun::new("eng-1", "Engagement One", "alice").unwrap();
    run.start().unwrap();

    let mut callbacks = 0;
    let start = tokio::time::Instant::now();
    let results = runner
        .run_checks_with_audit(&CancellationToken::new(), &targets, checker, |target, result, secs| {
            callbacks += 1;
            trail.append_entry(AuditEntry::from_result("eng-1", "alice", "mock", target, result, secs))?;
            run.add_result(result.clone())?;
            Ok(())
        })
        .await;
    let elapsed = start.elapsed();

    assert_eq!(results.len(), 5);
    assert!(results.iter().all(|r| r.is_ok()));
    assert_eq!(callbacks, 5);
    assert!(elapsed < Duration::from_millis(50), "took {:?}", elapsed);
    assert!(mock.max_in_flight() <= 2);

    assert_eq!(trail.len(), 5);
    assert_eq!(run.results().len(), 5);
    assert_eq!(run.metadata().total_targets, 5);

    run.complete().unwrap();
    assert_eq!(run.status(), RunStatus::Completed);
}

#[tokio::test]
async fn test_failures_are_recorded_not_raised() {
    let runner = Runner::new(
        RunnerConfig::default()
            .with_concurrency(3)
            .with_rate_limit(0.0)
            .with_timeout(Duration::from_millis(200)),
    );
    let checker: Arc<dyn Checker> = Arc::new(
        MockChecker::new("mock")
            .with_failing_target("refused", "connection refused")
            .with_slow_target("hang", Duration::from_secs(30))
            .with_panicking_target("boom"),
    );
    let targets = targets(&["ok-1", "refused", "hang", "boom", "ok-2"]);

    let mut trail = AuditTrail::new("eng-2").unwrap();
    let results = runner
        .run_checks_with_audit(&CancellationToken::new(), &targets, checker, |target, result, secs| {
            trail.append_entry(AuditEntry::from_result("eng-2", "bob", "mock", target, result, secs))?;
            Ok(())
        })
        .await;

    assert_eq!(results.len(), 5);
    assert_eq!(trail.len(), 5);

    let failed: Vec<&str> = trail
        .entries()
        .iter()
        .filter(|e| e.error.is_some())
        .map(|e| e.target.as_str())
        .collect();
    assert_eq!(failed.len(), 3);
    for target in ["refused", "hang", "boom"] {
        assert!(failed.contains(&target), "{} should have failed", target);
    }
}

#[tokio::test]
async fn test_cancelled_run_still_accounts_for_every_target() {
    let runner = Runner::new(
        RunnerConfig::default()
            .with_concurrency(1)
            .with_rate_limit(0.0),
    );
    let mock = MockChecker::new("mock").with_delay(Duration::from_secs(10));
    let checker: Arc<dyn Checker> = Arc::new(mock.clone());
    let cancel = CancellationToken::new();

    let canceller = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            cancel.cancel();
        })
    };

    let mut run = CheckRun::new("eng-3", "Three", "carol").unwrap();
    run.start().unwrap();
    let results = runner
        .run_checks_with_audit(&cancel, &targets(&["a", "b", "c", "d"]), checker, |_, result, _| {
            run.add_result(result.clone())?;
            Ok(())
        })
        .await;
    canceller.await.unwrap();

    assert_eq!(results.len(), 4);
    assert!(results.iter().all(|r| !r.is_ok()));
    assert!(mock.calls() <= 1);

    run.fail().unwrap();
    assert_eq!(run.status(), RunStatus::Failed);
    assert_eq!(run.metadata().total_targets, 4);
}

#[tokio::test]
async fn test_sealed_run_round_trips_through_memory_repositories() {
    let audit_repo = MemoryAuditRepository::new();
    let run_repo = MemoryCheckRunRepository::new();
    let runner = Runner::new(RunnerConfig::default().with_rate_limit(0.0));
    let checker: Arc<dyn Checker> = Arc::new(MockChecker::new("mock"));

    let mut trail = AuditTrail::new("eng-4").unwrap();
    let mut run = CheckRun::new("eng-4", "Four", "dave").unwrap();
    run.start().unwrap();
    runner
        .run_checks_with_audit(&CancellationToken::new(), &targets(&["x", "y"]), checker, |target, result, secs| {
            trail.append_entry(AuditEntry::from_result("eng-4", "dave", "mock", target, result, secs))?;
            run.add_result(result.clone())?;
            Ok(())
        })
        .await;
    run.complete().unwrap();

    audit_repo.save(&trail).await.unwrap();
    let hash = audit_repo.compute_hash("eng-4", HashAlgorithm::Sha512).await.unwrap();
    assert_eq!(hash.len(), HashAlgorithm::Sha512.hex_len());
    trail.seal(hash.clone(), "sha512").unwrap();
    audit_repo.save(&trail).await.unwrap();
    run.set_audit_hash(hash.clone(), "sha512").unwrap();
    run_repo.save(&run).await.unwrap();

    assert!(audit_repo.verify_integrity("eng-4").await.unwrap());
    let stored = run_repo.find_by_id(run.id()).await.unwrap().unwrap();
    assert_eq!(stored.metadata().audit_hash.as_deref(), Some(hash.as_str()));
    assert_eq!(stored.metadata().hash_algorithm, Some(HashAlgorithm::Sha512));
    assert_eq!(stored.results().len(), 2);
}
