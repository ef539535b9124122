//! Mock checker for testing
//!
//! Provides a scriptable in-process [`Checker`] that sleeps for a
//! configurable delay and records how it was driven, so runner
//! behaviour (concurrency, pacing, isolation) can be asserted without
//! touching the network.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use super::{CheckContext, CheckResult, Checker};

#[derive(Debug, Default)]
struct MockStats {
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    started: Mutex<Vec<Instant>>,
}

/// Decrements the in-flight counter even if the check panics
struct InFlightGuard<'a>(&'a AtomicUsize);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Scriptable checker
///
/// Clones share their statistics.
#[derive(Debug, Clone)]
pub struct MockChecker {
    name: String,
    delay: Duration,
    slow_targets: HashMap<String, Duration>,
    failing_targets: HashMap<String, String>,
    panicking_targets: HashSet<String>,
    stats: Arc<MockStats>,
}

impl MockChecker {
    /// Checker that succeeds immediately for every target
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            delay: Duration::ZERO,
            slow_targets: HashMap::new(),
            failing_targets: HashMap::new(),
            panicking_targets: HashSet::new(),
            stats: Arc::new(MockStats::default()),
        }
    }

    /// Sleep this long before answering
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Use a different delay for one target
    pub fn with_slow_target(mut self, target: impl Into<String>, delay: Duration) -> Self {
        self.slow_targets.insert(target.into(), delay);
        self
    }

    /// Report an error result for one target
    pub fn with_failing_target(mut self, target: impl Into<String>, error: impl Into<String>) -> Self {
        self.failing_targets.insert(target.into(), error.into());
        self
    }

    /// Panic while checking one target
    pub fn with_panicking_target(mut self, target: impl Into<String>) -> Self {
        self.panicking_targets.insert(target.into());
        self
    }

    /// Number of times `check` was entered
    pub fn calls(&self) -> usize {
        self.stats.calls.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneously running checks observed
    pub fn max_in_flight(&self) -> usize {
        self.stats.max_in_flight.load(Ordering::SeqCst)
    }

    /// Instants at which checks started, in call order
    ///
    /// Taken from the tokio clock, so they follow a paused test clock.
    pub fn start_times(&self) -> Vec<Instant> {
        self.stats
            .started
            .lock()
            .map(|started| started.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Checker for MockChecker {
    async fn check(&self, ctx: &CheckContext, target: &str) -> CheckResult {
        self.stats.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut started) = self.stats.started.lock() {
            started.push(Instant::now());
        }

        let now = self.stats.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.stats.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let _guard = InFlightGuard(&self.stats.in_flight);

        let delay = self.slow_targets.get(target).copied().unwrap_or(self.delay);
        if !delay.is_zero() {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = ctx.cancellation().cancelled() => {
                    return CheckResult::error(target, "check cancelled");
                }
            }
        }

        if self.panicking_targets.contains(target) {
            panic!("mock checker panicked on {}", target);
        }

        match self.failing_targets.get(target) {
            Some(error) => CheckResult::error(target, error.clone()),
            None => CheckResult::ok(target).with_notes(format!("checked by {}", self.name)),
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}
