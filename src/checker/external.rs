//! External Checker - Runs a probe executable once per target
//!
//! The process is invoked as `<command> [args...] <target>` with the
//! current environment plus configured overrides, and must print a
//! single JSON result document on stdout. Every failure mode (spawn
//! error, non-zero exit, malformed output, timeout, cancellation) is
//! mapped to an error [`CheckResult`].

use std::collections::HashMap;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tokio::process::Command;
use tracing::{debug, warn};

use super::{CheckContext, CheckResult, CheckStatus, Checker};

/// Timeout applied when none (or a zero timeout) is configured
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Out-of-process checker adapter
#[derive(Debug, Clone)]
pub struct ExternalChecker {
    name: String,
    command: String,
    args: Vec<String>,
    env: HashMap<String, String>,
    timeout: Duration,
}

impl ExternalChecker {
    /// Create an adapter for `command`, named after the command itself
    pub fn new(command: impl Into<String>) -> Self {
        let command = command.into();
        Self {
            name: command.clone(),
            command,
            args: Vec::new(),
            env: HashMap::new(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Override the name recorded in audit entries
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Arguments placed before the target
    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    /// Environment overrides layered on top of the inherited environment
    pub fn with_env(mut self, env: HashMap<String, String>) -> Self {
        self.env = env;
        self
    }

    /// Per-invocation timeout; zero falls back to [`DEFAULT_TIMEOUT`]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = if timeout.is_zero() {
            DEFAULT_TIMEOUT
        } else {
            timeout
        };
        self
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    pub fn env(&self) -> &HashMap<String, String> {
        &self.env
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// The earlier of the adapter timeout and the context deadline
    fn effective_timeout(&self, ctx: &CheckContext) -> Duration {
        match ctx.remaining() {
            Some(remaining) => remaining.min(self.timeout),
            None => self.timeout,
        }
    }

    fn failure_message(&self, status: ExitStatus, stderr: &[u8]) -> String {
        let stderr = String::from_utf8_lossy(stderr);
        let stderr = stderr.trim();
        if stderr.is_empty() {
            format!("{} exited with {}", self.name, status)
        } else {
            stderr.to_string()
        }
    }
}

/// Result document as emitted by a probe; only `status` is mandatory
#[derive(Debug, Deserialize)]
struct ResultDocument {
    #[serde(default)]
    target: Option<String>,
    #[serde(default)]
    timestamp: Option<DateTime<Utc>>,
    status: CheckStatus,
    #[serde(default)]
    status_code: Option<u16>,
    #[serde(default)]
    notes: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    findings: serde_json::Value,
}

impl ResultDocument {
    /// Build a result, filling target and timestamp from the invocation
    fn into_result(self, target: &str, invoked_at: DateTime<Utc>) -> CheckResult {
        let target = self
            .target
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| target.to_string());
        let timestamp = self.timestamp.unwrap_or(invoked_at);

        let mut result = CheckResult::new(target, self.status, timestamp)
            .with_findings(self.findings);
        if let Some(code) = self.status_code {
            result = result.with_status_code(code);
        }
        if let Some(notes) = self.notes {
            result = result.with_notes(notes);
        }
        if let Some(error) = self.error {
            result = result.with_error(error);
        }
        result
    }
}

#[async_trait]
impl Checker for ExternalChecker {
    async fn check(&self, ctx: &CheckContext, target: &str) -> CheckResult {
        let invoked_at = Utc::now();
        let timeout = self.effective_timeout(ctx);

        let child = Command::new(&self.command)
            .args(&self.args)
            .arg(target)
            .envs(&self.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();

        let child = match child {
            Ok(child) => child,
            Err(e) => {
                warn!("Failed to spawn checker {}: {}", self.command, e);
                return CheckResult::error(
                    target,
                    format!("failed to start {}: {}", self.command, e),
                );
            }
        };

        // Dropping the wait future drops the child, which kills it.
        let output = tokio::select! {
            output = tokio::time::timeout(timeout, child.wait_with_output()) => output,
            _ = ctx.cancellation().cancelled() => {
                debug!("Checker {} cancelled for {}", self.name, target);
                return CheckResult::error(target, "check cancelled");
            }
        };

        let output = match output {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return CheckResult::error(target, format!("failed to run {}: {}", self.command, e));
            }
            Err(_) => {
                return CheckResult::error(
                    target,
                    format!("check timed out after {:.1}s", timeout.as_secs_f64()),
                );
            }
        };

        if !output.status.success() {
            let message = self.failure_message(output.status, &output.stderr);
            debug!("Checker {} failed for {}: {}", self.name, target, message);
            let result = CheckResult::error(target, message);
            return match output.status.code() {
                Some(code) => result.with_notes(format!("exit code {}", code)),
                None => result,
            };
        }

        match serde_json::from_slice::<ResultDocument>(&output.stdout) {
            Ok(document) => document.into_result(target, invoked_at),
            Err(e) => CheckResult::error(
                target,
                format!("failed to decode output of {}: {}", self.name, e),
            ),
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}
