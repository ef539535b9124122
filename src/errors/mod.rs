//! User-facing diagnostics for the hostaudit CLI
//!
//! Library code reports `anyhow`/`thiserror` errors; commands convert the
//! failures an operator can act on into [`HostAuditError`] so `main` can
//! render them with miette.

use std::path::Path;

use miette::{Diagnostic, NamedSource, SourceSpan};
use thiserror::Error;

/// Main error type for the CLI with rich diagnostics
#[derive(Error, Debug, Diagnostic)]
pub enum HostAuditError {
    /// Explicit configuration file is missing
    #[error("Configuration file not found: {path}")]
    #[diagnostic(
        code(hostaudit::config::not_found),
        help("Check the --config path, or omit it to use ./hostaudit.toml or the user config directory")
    )]
    ConfigNotFound { path: String },

    /// Configuration file could not be parsed
    #[error("Invalid configuration: {advice}")]
    #[diagnostic(code(hostaudit::config::invalid))]
    InvalidConfig {
        #[source_code]
        src: NamedSource<String>,
        #[label("error here")]
        span: Option<SourceSpan>,
        advice: String,
    },

    /// No audit trail stored for an engagement
    #[error("No audit trail for engagement '{engagement_id}'")]
    #[diagnostic(
        code(hostaudit::trail::not_found),
        help("Run checks first with: hostaudit run --engagement {engagement_id} ...")
    )]
    TrailNotFound { engagement_id: String },

    /// No stored run with the given id
    #[error("Run not found: {run_id}")]
    #[diagnostic(
        code(hostaudit::run::not_found),
        help("List stored runs with: hostaudit runs")
    )]
    RunNotFound { run_id: String },

    /// Recomputed evidence hash differs from the sealed one
    #[error("Audit trail for '{engagement_id}' failed integrity verification")]
    #[diagnostic(
        code(hostaudit::integrity),
        severity(Error),
        help("The stored evidence no longer matches the sealed {algorithm} hash.\nTreat the trail as tampered and restore it from a trusted copy.")
    )]
    IntegrityMismatch {
        engagement_id: String,
        algorithm: String,
    },

    /// Malformed `--env` override
    #[error("Invalid environment override: '{value}'")]
    #[diagnostic(
        code(hostaudit::env::invalid),
        help("Use KEY=VALUE, for example: --env PROBE_PORT=8443")
    )]
    InvalidEnvOverride { value: String },
}

impl HostAuditError {
    pub fn config_not_found(path: &Path) -> Self {
        Self::ConfigNotFound {
            path: path.display().to_string(),
        }
    }

    /// Build a config diagnostic pointing into the file contents
    pub fn invalid_config(path: &Path, content: String, err: &toml::de::Error) -> Self {
        let span = err
            .span()
            .map(|range| SourceSpan::from((range.start, range.end - range.start)));
        Self::InvalidConfig {
            src: NamedSource::new(path.display().to_string(), content),
            span,
            advice: err.message().to_string(),
        }
    }

    pub fn trail_not_found(engagement_id: impl Into<String>) -> Self {
        Self::TrailNotFound {
            engagement_id: engagement_id.into(),
        }
    }

    pub fn run_not_found(run_id: impl Into<String>) -> Self {
        Self::RunNotFound {
            run_id: run_id.into(),
        }
    }

    pub fn integrity_mismatch(engagement_id: impl Into<String>, algorithm: impl Into<String>) -> Self {
        Self::IntegrityMismatch {
            engagement_id: engagement_id.into(),
            algorithm: algorithm.into(),
        }
    }

    pub fn invalid_env_override(value: impl Into<String>) -> Self {
        Self::InvalidEnvOverride {
            value: value.into(),
        }
    }
}
