//! HostAudit - Concurrent host checks with a tamper-evident audit trail
//!
//! Runs a pluggable checker against many targets under a bounded worker
//! pool, a global rate limit and per-check deadlines, and records every
//! outcome in an append-only audit trail that can be sealed with a
//! content hash and later signed.
//!
//! # Modules
//!
//! - `checker` - The `Checker` capability, out-of-process and mock checkers
//! - `runner` - Concurrent orchestration with rate limiting and timeouts
//! - `audit` - Audit entries, trails, sealing and hash algorithms
//! - `run` - Check run lifecycle state machine
//! - `store` - Filesystem and in-memory repositories
//!
//! # Example
//!
//! ```rust,ignore
//! use hostaudit::{ExternalChecker, Runner, RunnerConfig};
//!
//! let runner = Runner::new(RunnerConfig::default().with_concurrency(4));
//! let checker = Arc::new(ExternalChecker::new("./probe-tls"));
//! let results = runner.run_checks(&cancel, &targets, checker).await;
//! ```

pub mod audit;
pub mod checker;
pub mod run;
pub mod runner;
pub mod store;

// Re-export commonly used types
pub use audit::{AuditEntry, AuditTrail, HashAlgorithm};
pub use checker::{CheckContext, CheckResult, CheckStatus, Checker, ExternalChecker};
pub use run::{CheckRun, RunStatus};
pub use runner::{Runner, RunnerConfig};
