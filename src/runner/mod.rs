//! Runner - Bounded, rate-limited fan-out of checks across targets
//!
//! Every target gets its own task. A task waits for a slot in the
//! bounded pool, then for a rate limiter token, then runs the checker
//! under a per-check deadline and reports its result on a completion
//! queue. A single collector drains that queue, invokes the audit
//! callback and accumulates results, so callers can mutate their
//! aggregates from the callback without any locking.
//!
//! # Example
//!
//! ```ignore
//! use hostaudit::runner::{Runner, RunnerConfig};
//!
//! let runner = Runner::new(RunnerConfig::default().with_concurrency(8));
//! let results = runner
//!     .run_checks_with_audit(&cancel, &targets, checker, |target, result, secs| {
//!         trail.append_entry(AuditEntry::from_result(&engagement, &operator, "tls", target, result, secs))?;
//!         Ok(())
//!     })
//!     .await;
//! ```

pub mod rate_limit;

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::checker::{CheckContext, CheckResult, Checker};

pub use rate_limit::{RateLimitError, RateLimiter};

/// Default maximum number of checks in flight
pub const DEFAULT_CONCURRENCY: usize = 10;
/// Default global rate limit (checks started per second)
pub const DEFAULT_RATE_LIMIT: f64 = 10.0;
/// Default deadline for a single check
pub const DEFAULT_CHECK_TIMEOUT: Duration = Duration::from_secs(30);

/// Error recorded for targets abandoned because the run was cancelled
pub const CANCELLED_BEFORE_START: &str = "cancelled before check started";

/// Runner configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Maximum checks executing at once (at least 1)
    pub concurrency: usize,
    /// Checks started per second; non-positive disables limiting
    pub rate_limit: f64,
    /// Deadline for each check
    pub check_timeout: Duration,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            rate_limit: DEFAULT_RATE_LIMIT,
            check_timeout: DEFAULT_CHECK_TIMEOUT,
        }
    }
}

impl RunnerConfig {
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_rate_limit(mut self, rate_limit: f64) -> Self {
        self.rate_limit = rate_limit;
        self
    }

    /// Set the per-check deadline; zero keeps the default
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.check_timeout = if timeout.is_zero() {
            DEFAULT_CHECK_TIMEOUT
        } else {
            timeout
        };
        self
    }
}

/// One finished check travelling from a worker task to the collector
struct Completion {
    target: String,
    result: CheckResult,
    duration: Duration,
}

/// Drives a checker across many targets
#[derive(Debug, Clone, Default)]
pub struct Runner {
    config: RunnerConfig,
}

impl Runner {
    pub fn new(config: RunnerConfig) -> Self {
        let config = RunnerConfig {
            concurrency: config.concurrency.max(1),
            ..config
        };
        Self { config }
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// Run `checker` against every target and return the results
    ///
    /// Results arrive in completion order. Exactly one result is
    /// returned per target.
    pub async fn run_checks(
        &self,
        cancel: &CancellationToken,
        targets: &[String],
        checker: Arc<dyn Checker>,
    ) -> Vec<CheckResult> {
        self.run_checks_with_audit(cancel, targets, checker, |_, _, _| Ok(()))
            .await
    }

    /// Run checks, invoking `on_complete(target, result, duration_secs)`
    /// once per finished target
    ///
    /// The callback runs on the caller's task, one completion at a time.
    /// Errors it returns are logged and otherwise ignored.
    pub async fn run_checks_with_audit<F>(
        &self,
        cancel: &CancellationToken,
        targets: &[String],
        checker: Arc<dyn Checker>,
        mut on_complete: F,
    ) -> Vec<CheckResult>
    where
        F: FnMut(&str, &CheckResult, f64) -> anyhow::Result<()>,
    {
        let start = Instant::now();
        info!(
            "Running {} against {} targets (concurrency {}, rate limit {}/s, timeout {:.1}s)",
            checker.name(),
            targets.len(),
            self.config.concurrency,
            self.config.rate_limit,
            self.config.check_timeout.as_secs_f64()
        );

        let limiter = RateLimiter::new(self.config.rate_limit);
        let semaphore = Arc::new(Semaphore::new(self.config.concurrency));
        let (tx, mut rx) = mpsc::unbounded_channel::<Completion>();

        for target in targets {
            let worker = Worker {
                target: target.clone(),
                checker: Arc::clone(&checker),
                semaphore: Arc::clone(&semaphore),
                limiter: limiter.clone(),
                cancel: cancel.clone(),
                timeout: self.config.check_timeout,
                tx: tx.clone(),
            };
            tokio::spawn(worker.run());
        }
        drop(tx);

        let mut results = Vec::with_capacity(targets.len());
        while let Some(completion) = rx.recv().await {
            let duration_secs = completion.duration.as_secs_f64();
            if let Err(e) = on_complete(&completion.target, &completion.result, duration_secs) {
                warn!("Audit callback failed for {}: {:#}", completion.target, e);
            }
            results.push(completion.result);
        }

        let failed = results.iter().filter(|r| !r.is_ok()).count();
        info!(
            "Completed {} checks ({} failed) in {:.2}s",
            results.len(),
            failed,
            start.elapsed().as_secs_f64()
        );

        results
    }
}

/// State moved into a per-target task
struct Worker {
    target: String,
    checker: Arc<dyn Checker>,
    semaphore: Arc<Semaphore>,
    limiter: RateLimiter,
    cancel: CancellationToken,
    timeout: Duration,
    tx: mpsc::UnboundedSender<Completion>,
}

impl Worker {
    async fn run(self) {
        let permit = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            permit = Arc::clone(&self.semaphore).acquire_owned() => permit.ok(),
        };
        let Some(_permit) = permit else {
            self.abandon();
            return;
        };

        if self.limiter.acquire_cancellable(&self.cancel).await.is_err() {
            self.abandon();
            return;
        }

        let deadline = self.cancel.child_token();
        let ctx = CheckContext::with_timeout(deadline.clone(), self.timeout);

        debug!("Starting {} for {}", self.checker.name(), self.target);
        let started = Instant::now();
        let outcome = tokio::time::timeout(
            self.timeout,
            AssertUnwindSafe(self.checker.check(&ctx, &self.target)).catch_unwind(),
        )
        .await;
        deadline.cancel();
        let duration = started.elapsed();

        let result = match outcome {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => {
                warn!("{} panicked while checking {}", self.checker.name(), self.target);
                CheckResult::error(&self.target, format!("{} panicked", self.checker.name()))
            }
            Err(_) => CheckResult::error(
                &self.target,
                format!("check timed out after {:.1}s", self.timeout.as_secs_f64()),
            ),
        };

        debug!(
            "Finished {} for {}: {} in {:.3}s",
            self.checker.name(),
            self.target,
            result.status(),
            duration.as_secs_f64()
        );

        // The permit is held until the result has been handed off.
        let _ = self.tx.send(Completion {
            target: self.target,
            result,
            duration,
        });
    }

    fn abandon(self) {
        debug!("Run cancelled before checking {}", self.target);
        let result = CheckResult::error(&self.target, CANCELLED_BEFORE_START);
        let _ = self.tx.send(Completion {
            target: self.target,
            result,
            duration: Duration::ZERO,
        });
    }
}
