//! CLI Configuration
//!
//! Loads `HostAuditConfig` from TOML and merges it with command-line
//! flags. Search order when no explicit path is given:
//!
//! 1. `./hostaudit.toml`
//! 2. `<config_dir>/hostaudit/config.toml`
//!
//! A missing file is not an error unless the path was passed explicitly.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

use hostaudit::runner::{DEFAULT_CHECK_TIMEOUT, DEFAULT_CONCURRENCY, DEFAULT_RATE_LIMIT};
use hostaudit::{ExternalChecker, HashAlgorithm, RunnerConfig};

use crate::errors::HostAuditError;

/// File-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostAuditConfig {
    pub runner: RunnerSection,
    pub engagement: EngagementSection,
    pub checker: CheckerSection,
    pub storage: StorageSection,
}

/// `[runner]`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerSection {
    pub concurrency: Option<usize>,
    pub rate_limit: Option<f64>,
    pub timeout_secs: Option<u64>,
}

/// `[engagement]`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngagementSection {
    pub id: Option<String>,
    pub name: Option<String>,
    pub operator: Option<String>,
}

/// `[checker]`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckerSection {
    pub command: Option<String>,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
    pub timeout_secs: Option<u64>,
}

/// `[storage]`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSection {
    pub path: Option<PathBuf>,
    pub algorithm: Option<HashAlgorithm>,
}

impl HostAuditConfig {
    pub fn parse(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Candidate config locations, in priority order
    pub fn search_paths() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from("hostaudit.toml")];
        if let Some(config_dir) = dirs::config_dir() {
            paths.push(config_dir.join("hostaudit").join("config.toml"));
        }
        paths
    }

    /// Load from `explicit`, or the first existing search path, or defaults
    pub fn load(explicit: Option<&Path>) -> Result<Self, HostAuditError> {
        if let Some(path) = explicit {
            if !path.exists() {
                return Err(HostAuditError::config_not_found(path));
            }
            return Self::load_from_path(path);
        }

        match Self::search_paths().into_iter().find(|p| p.is_file()) {
            Some(path) => Self::load_from_path(&path),
            None => {
                tracing::debug!("No config file found, using defaults");
                Ok(Self::default())
            }
        }
    }

    fn load_from_path(path: &Path) -> Result<Self, HostAuditError> {
        let content =
            std::fs::read_to_string(path).map_err(|_| HostAuditError::config_not_found(path))?;
        let config = Self::parse(&content)
            .map_err(|e| HostAuditError::invalid_config(path, content.clone(), &e))?;
        tracing::debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Storage root: flag, then config, then the user data directory
    pub fn store_path(&self, flag: Option<&Path>) -> PathBuf {
        if let Some(path) = flag {
            return path.to_path_buf();
        }
        if let Some(path) = &self.storage.path {
            return path.clone();
        }
        dirs::data_dir()
            .map(|dir| dir.join("hostaudit"))
            .unwrap_or_else(|| PathBuf::from(".hostaudit"))
    }
}

/// Flags of the `run` command before merging with the config file
#[derive(Debug, Clone, Default)]
pub struct RunArgs {
    pub checker: Option<String>,
    pub args: Vec<String>,
    pub env: Vec<String>,
    pub engagement: Option<String>,
    pub name: Option<String>,
    pub operator: Option<String>,
    pub concurrency: Option<usize>,
    pub rate_limit: Option<f64>,
    pub timeout: Option<u64>,
    pub algorithm: Option<HashAlgorithm>,
}

/// Fully resolved settings for one run
#[derive(Debug, Clone)]
pub struct RunPlan {
    pub engagement_id: String,
    pub engagement_name: String,
    pub operator: String,
    pub checker: ExternalChecker,
    pub runner: RunnerConfig,
    pub algorithm: HashAlgorithm,
}

impl RunArgs {
    /// Merge flags over the config file; flags win
    pub fn resolve(self, config: &HostAuditConfig) -> Result<RunPlan> {
        let Some(command) = self.checker.or_else(|| config.checker.command.clone()) else {
            bail!("No checker command: pass --checker or set [checker] command in the config");
        };
        let Some(engagement_id) = self.engagement.or_else(|| config.engagement.id.clone()) else {
            bail!("No engagement id: pass --engagement or set [engagement] id in the config");
        };

        let engagement_name = self
            .name
            .or_else(|| config.engagement.name.clone())
            .unwrap_or_else(|| engagement_id.clone());
        let operator = self
            .operator
            .or_else(|| config.engagement.operator.clone())
            .or_else(|| std::env::var("USER").ok())
            .unwrap_or_else(|| "unknown".to_string());

        let timeout = self
            .timeout
            .or(config.runner.timeout_secs)
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_CHECK_TIMEOUT);
        let runner = RunnerConfig::default()
            .with_concurrency(
                self.concurrency
                    .or(config.runner.concurrency)
                    .unwrap_or(DEFAULT_CONCURRENCY),
            )
            .with_rate_limit(
                self.rate_limit
                    .or(config.runner.rate_limit)
                    .unwrap_or(DEFAULT_RATE_LIMIT),
            )
            .with_timeout(timeout);

        let args = if self.args.is_empty() {
            config.checker.args.clone()
        } else {
            self.args
        };
        let mut env = config.checker.env.clone();
        for raw in &self.env {
            let (key, value) = parse_env_override(raw)?;
            env.insert(key, value);
        }
        let checker_timeout = config
            .checker
            .timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(runner.check_timeout);

        let checker = ExternalChecker::new(command)
            .with_args(args)
            .with_env(env)
            .with_timeout(checker_timeout);

        let algorithm = self
            .algorithm
            .or(config.storage.algorithm)
            .unwrap_or_default();

        Ok(RunPlan {
            engagement_id,
            engagement_name,
            operator,
            checker,
            runner,
            algorithm,
        })
    }
}

/// Split `KEY=VALUE`; the value may itself contain `=`
pub fn parse_env_override(raw: &str) -> Result<(String, String), HostAuditError> {
    match raw.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.to_string()))
        }
        _ => Err(HostAuditError::invalid_env_override(raw)),
    }
}
