//! Check Run - Lifecycle of one execution across a target set
//!
//! A run moves `pending -> running -> completed`, or to `failed` from
//! any state other than `completed`. Results can only be added before
//! the run reaches a terminal state, and `metadata.total_targets` is
//! always recomputed from the result list rather than counted
//! separately.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::audit::{HashAlgorithm, HashAlgorithmError};
use crate::checker::CheckResult;

/// Lifecycle state of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Pending => "pending",
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
        }
    }

    /// Whether results may still be added
    pub fn accepts_results(&self) -> bool {
        matches!(self, RunStatus::Pending | RunStatus::Running)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Completed | RunStatus::Failed)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Integrity metadata attached to a run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audit_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash_algorithm: Option<HashAlgorithm>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature_fingerprint: Option<String>,
    /// Always equal to the number of results
    pub total_targets: usize,
}

/// Ok/error tally of a run's results
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub total: usize,
    pub ok: usize,
    pub errors: usize,
}

/// Aggregate tracking one execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckRun {
    id: String,
    engagement_id: String,
    engagement_name: String,
    operator: String,
    created_at: DateTime<Utc>,
    #[serde(default)]
    started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    completed_at: Option<DateTime<Utc>>,
    status: RunStatus,
    #[serde(default)]
    results: Vec<CheckResult>,
    #[serde(default)]
    metadata: RunMetadata,
}

impl CheckRun {
    /// Create a pending run with a fresh id
    pub fn new(
        engagement_id: impl Into<String>,
        engagement_name: impl Into<String>,
        operator: impl Into<String>,
    ) -> Result<Self, RunError> {
        let engagement_id = engagement_id.into();
        if engagement_id.trim().is_empty() {
            return Err(RunError::EmptyEngagementId);
        }

        Ok(Self {
            id: Uuid::new_v4().to_string(),
            engagement_id,
            engagement_name: engagement_name.into(),
            operator: operator.into(),
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            status: RunStatus::Pending,
            results: Vec::new(),
            metadata: RunMetadata::default(),
        })
    }

    /// pending -> running
    pub fn start(&mut self) -> Result<(), RunError> {
        if self.status != RunStatus::Pending {
            return Err(self.invalid_transition(RunStatus::Running));
        }
        self.status = RunStatus::Running;
        self.started_at = Some(Utc::now());
        Ok(())
    }

    /// running -> completed
    pub fn complete(&mut self) -> Result<(), RunError> {
        if self.status != RunStatus::Running {
            return Err(self.invalid_transition(RunStatus::Completed));
        }
        self.status = RunStatus::Completed;
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    /// pending | running | failed -> failed
    ///
    /// Failing an already failed run keeps its original completion time.
    pub fn fail(&mut self) -> Result<(), RunError> {
        if self.status == RunStatus::Completed {
            return Err(self.invalid_transition(RunStatus::Failed));
        }
        self.status = RunStatus::Failed;
        self.completed_at.get_or_insert_with(Utc::now);
        Ok(())
    }

    /// Record a result while the run is still open
    pub fn add_result(&mut self, result: CheckResult) -> Result<(), RunError> {
        if !self.status.accepts_results() {
            return Err(RunError::Closed {
                status: self.status,
            });
        }
        self.results.push(result);
        self.metadata.total_targets = self.results.len();
        Ok(())
    }

    /// Record the hash the audit trail was sealed with
    pub fn set_audit_hash(&mut self, hash: impl Into<String>, algorithm: &str) -> Result<(), RunError> {
        let hash = hash.into();
        if hash.trim().is_empty() {
            return Err(RunError::EmptyHash);
        }
        let algorithm: HashAlgorithm = algorithm.parse()?;

        self.metadata.audit_hash = Some(hash);
        self.metadata.hash_algorithm = Some(algorithm);
        Ok(())
    }

    pub fn set_signature_fingerprint(&mut self, fingerprint: impl Into<String>) {
        self.metadata.signature_fingerprint = Some(fingerprint.into());
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn engagement_id(&self) -> &str {
        &self.engagement_id
    }

    pub fn engagement_name(&self) -> &str {
        &self.engagement_name
    }

    pub fn operator(&self) -> &str {
        &self.operator
    }

    pub fn status(&self) -> RunStatus {
        self.status
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    /// Results in the order they were added
    pub fn results(&self) -> &[CheckResult] {
        &self.results
    }

    /// Owned copy of the results; O(n)
    pub fn results_snapshot(&self) -> Vec<CheckResult> {
        self.results.clone()
    }

    pub fn metadata(&self) -> &RunMetadata {
        &self.metadata
    }

    pub fn summary(&self) -> RunSummary {
        let ok = self.results.iter().filter(|r| r.is_ok()).count();
        RunSummary {
            total: self.results.len(),
            ok,
            errors: self.results.len() - ok,
        }
    }

    /// Time between start and completion, if both happened
    pub fn duration(&self) -> Option<Duration> {
        let started = self.started_at?;
        let completed = self.completed_at?;
        (completed - started).to_std().ok()
    }

    fn invalid_transition(&self, to: RunStatus) -> RunError {
        RunError::InvalidTransition {
            from: self.status,
            to,
        }
    }
}

/// Rejected run mutation
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RunError {
    #[error("engagement id must not be empty")]
    EmptyEngagementId,

    #[error("cannot move run from {from} to {to}")]
    InvalidTransition { from: RunStatus, to: RunStatus },

    #[error("run is {status}; results can no longer be added")]
    Closed { status: RunStatus },

    #[error("audit hash must not be empty")]
    EmptyHash,

    #[error(transparent)]
    Algorithm(#[from] HashAlgorithmError),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run() -> CheckRun {
        CheckRun::new("e1", "Name", "alice").unwrap()
    }

    #[test]
    fn new_run_is_pending() {
        let run = run();
        assert_eq!(run.status(), RunStatus::Pending);
        assert_eq!(run.engagement_id(), "e1");
        assert_eq!(run.engagement_name(), "Name");
        assert_eq!(run.operator(), "alice");
        assert!(run.started_at().is_none());
        assert!(run.results().is_empty());
        assert_eq!(run.metadata().total_targets, 0);
        assert!(Uuid::parse_str(run.id()).is_ok());
    }

    #[test]
    fn new_rejects_empty_engagement() {
        assert_eq!(CheckRun::new("", "Name", "alice"), Err(RunError::EmptyEngagementId));
    }

    #[test]
    fn ids_are_unique() {
        assert_ne!(run().id(), run().id());
    }

    #[test]
    fn full_lifecycle() {
        let mut run = run();
        let r1 = CheckResult::ok("a");
        run.start().unwrap();
        run.add_result(r1.clone()).unwrap();
        run.complete().unwrap();

        assert_eq!(run.results(), &[r1]);
        assert_eq!(run.status(), RunStatus::Completed);
        assert!(run.started_at().is_some());
        assert!(run.completed_at().is_some());
        assert!(run.duration().is_some());

        assert_eq!(
            run.add_result(CheckResult::ok("b")),
            Err(RunError::Closed {
                status: RunStatus::Completed
            })
        );
        assert_eq!(run.results().len(), 1);
    }

    #[test]
    fn complete_before_start_fails() {
        let mut run = run();
        assert_eq!(
            run.complete(),
            Err(RunError::InvalidTransition {
                from: RunStatus::Pending,
                to: RunStatus::Completed
            })
        );
    }

    #[test]
    fn start_twice_fails() {
        let mut run = run();
        run.start().unwrap();
        assert!(matches!(run.start(), Err(RunError::InvalidTransition { .. })));
    }

    #[test]
    fn fail_allowed_from_pending_and_running() {
        let mut pending = run();
        pending.fail().unwrap();
        assert_eq!(pending.status(), RunStatus::Failed);
        assert!(pending.completed_at().is_some());

        let mut running = run();
        running.start().unwrap();
        running.fail().unwrap();
        assert_eq!(running.status(), RunStatus::Failed);
    }

    #[test]
    fn failing_twice_succeeds() {
        let mut run = run();
        run.start().unwrap();
        run.fail().unwrap();
        let first_completed = run.completed_at();

        run.fail().unwrap();
        assert_eq!(run.status(), RunStatus::Failed);
        assert_eq!(run.completed_at(), first_completed);
    }

    #[test]
    fn fail_after_complete_is_rejected() {
        let mut run = run();
        run.start().unwrap();
        run.complete().unwrap();
        assert!(run.fail().is_err());
        assert_eq!(run.status(), RunStatus::Completed);
    }

    #[test]
    fn add_after_fail_is_rejected() {
        let mut run = run();
        run.start().unwrap();
        run.fail().unwrap();
        assert!(run.add_result(CheckResult::ok("a")).is_err());
    }

    #[test]
    fn results_accepted_while_pending() {
        let mut run = run();
        run.add_result(CheckResult::ok("a")).unwrap();
        assert_eq!(run.metadata().total_targets, 1);
    }

    #[test]
    fn total_targets_tracks_result_count() {
        let mut run = run();
        run.start().unwrap();
        for i in 0..7 {
            let result = if i % 2 == 0 {
                CheckResult::ok(format!("host-{}", i))
            } else {
                CheckResult::error(format!("host-{}", i), "refused")
            };
            run.add_result(result).unwrap();
            assert_eq!(run.metadata().total_targets, run.results().len());
        }

        let summary = run.summary();
        assert_eq!(summary.total, 7);
        assert_eq!(summary.ok, 4);
        assert_eq!(summary.errors, 3);
    }

    #[test]
    fn snapshot_is_independent() {
        let mut run = run();
        run.add_result(CheckResult::ok("a")).unwrap();
        let mut snapshot = run.results_snapshot();
        snapshot.push(CheckResult::ok("b"));
        assert_eq!(run.results().len(), 1);
    }

    #[test]
    fn set_audit_hash_validates_algorithm() {
        let mut run = run();
        assert!(matches!(run.set_audit_hash("abc", "md5"), Err(RunError::Algorithm(_))));
        assert_eq!(run.set_audit_hash(" ", "sha256"), Err(RunError::EmptyHash));

        run.set_audit_hash("abc", "sha-256").unwrap();
        assert_eq!(run.metadata().audit_hash.as_deref(), Some("abc"));
        assert_eq!(run.metadata().hash_algorithm, Some(HashAlgorithm::Sha256));
    }

    #[test]
    fn serde_round_trip() {
        let mut run = run();
        run.start().unwrap();
        run.add_result(CheckResult::ok("a")).unwrap();
        run.set_signature_fingerprint("0123456789abcdef");

        let json = serde_json::to_string(&run).unwrap();
        assert!(json.contains("\"status\":\"running\""));
        let restored: CheckRun = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, run);
    }

    #[test]
    fn status_display() {
        assert_eq!(RunStatus::Pending.to_string(), "pending");
        assert_eq!(RunStatus::Failed.to_string(), "failed");
    }
}
