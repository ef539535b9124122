//! Checker - Probe contract driven by the runner
//!
//! A checker evaluates a single target and always produces a
//! [`CheckResult`]. Failures are reported as results with
//! [`CheckStatus::Error`], never as `Err` values, so one bad target
//! cannot abort a batch.
//!
//! - `external` - Out-of-process checker that runs an executable per target
//! - `mock` - Scriptable in-process checker for tests and dry runs

pub mod external;
pub mod mock;

use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

pub use external::ExternalChecker;
pub use mock::MockChecker;

/// Outcome of a single check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    Ok,
    Error,
}

impl CheckStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckStatus::Ok => "ok",
            CheckStatus::Error => "error",
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, CheckStatus::Ok)
    }
}

impl std::fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Result of running one checker against one target
///
/// Values are immutable once built: fields are private and the
/// `with_*` builders consume `self`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckResult {
    target: String,
    timestamp: DateTime<Utc>,
    status: CheckStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    status_code: Option<u16>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    notes: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    findings: serde_json::Value,
}

impl CheckResult {
    /// Create a successful result stamped with the current time
    pub fn ok(target: impl Into<String>) -> Self {
        Self::new(target, CheckStatus::Ok, Utc::now())
    }

    /// Create a failed result stamped with the current time
    pub fn error(target: impl Into<String>, error: impl Into<String>) -> Self {
        Self::new(target, CheckStatus::Error, Utc::now()).with_error(error)
    }

    pub fn new(target: impl Into<String>, status: CheckStatus, timestamp: DateTime<Utc>) -> Self {
        Self {
            target: target.into(),
            timestamp,
            status,
            status_code: None,
            notes: String::new(),
            error: None,
            findings: serde_json::Value::Null,
        }
    }

    pub fn with_status_code(mut self, code: u16) -> Self {
        self.status_code = Some(code);
        self
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = notes.into();
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn with_findings(mut self, findings: serde_json::Value) -> Self {
        self.findings = findings;
        self
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn status(&self) -> CheckStatus {
        self.status
    }

    pub fn status_code(&self) -> Option<u16> {
        self.status_code
    }

    pub fn notes(&self) -> &str {
        &self.notes
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn findings(&self) -> &serde_json::Value {
        &self.findings
    }

    pub fn is_ok(&self) -> bool {
        self.status.is_ok()
    }
}

/// Per-invocation context handed to a checker
///
/// The token is a child of the run's top-level token and is cancelled
/// when the per-check deadline passes.
#[derive(Debug, Clone)]
pub struct CheckContext {
    cancellation: CancellationToken,
    deadline: Option<Instant>,
}

impl CheckContext {
    pub fn new(cancellation: CancellationToken, deadline: Option<Instant>) -> Self {
        Self {
            cancellation,
            deadline,
        }
    }

    /// Context that is never cancelled and has no deadline
    pub fn background() -> Self {
        Self::new(CancellationToken::new(), None)
    }

    /// Context bounded by `timeout` from now
    pub fn with_timeout(cancellation: CancellationToken, timeout: Duration) -> Self {
        Self::new(cancellation, Some(Instant::now() + timeout))
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Time left before the deadline, `None` when unbounded
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }
}

/// A unit of work that assesses one target
#[async_trait]
pub trait Checker: Send + Sync {
    /// Assess `target`. Implementations should observe `ctx` cancellation.
    async fn check(&self, ctx: &CheckContext, target: &str) -> CheckResult;

    /// Name recorded as the command in audit entries
    fn name(&self) -> &str;
}
