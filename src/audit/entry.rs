//! Audit Entry - One evidence row per completed check

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::checker::{CheckResult, CheckStatus};

/// A single row of the audit log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    /// When the check completed
    pub timestamp: DateTime<Utc>,
    /// Engagement the check ran under
    pub engagement_id: String,
    /// Person or service account that launched the run
    pub operator: String,
    /// Checker name
    pub command: String,
    /// Target as submitted to the runner
    pub target: String,
    pub status: CheckStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    /// Expiry reported by the probe (certificates, tokens, ...)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry: Option<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub notes: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Wall-clock duration of the check in seconds
    pub duration_secs: f64,
}

impl AuditEntry {
    /// Build an entry from a finished check
    ///
    /// `expiry` is taken from a string `expiry` field in the result's
    /// findings when the probe reports one.
    pub fn from_result(
        engagement_id: impl Into<String>,
        operator: impl Into<String>,
        command: impl Into<String>,
        target: impl Into<String>,
        result: &CheckResult,
        duration_secs: f64,
    ) -> Self {
        let expiry = result
            .findings()
            .get("expiry")
            .and_then(|v| v.as_str())
            .map(str::to_string);

        Self {
            timestamp: Utc::now(),
            engagement_id: engagement_id.into(),
            operator: operator.into(),
            command: command.into(),
            target: target.into(),
            status: result.status(),
            status_code: result.status_code(),
            expiry,
            notes: result.notes().to_string(),
            error: result.error_message().map(str::to_string),
            duration_secs,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_result_copies_check_outcome() {
        let result = CheckResult::error("db.internal", "certificate expired")
            .with_status_code(495)
            .with_notes("tls")
            .with_findings(serde_json::json!({"expiry": "2023-12-31T00:00:00Z"}));

        let entry = AuditEntry::from_result("eng-1", "alice", "tls-probe", "db.internal", &result, 0.25);

        assert_eq!(entry.engagement_id, "eng-1");
        assert_eq!(entry.operator, "alice");
        assert_eq!(entry.command, "tls-probe");
        assert_eq!(entry.target, "db.internal");
        assert_eq!(entry.status, CheckStatus::Error);
        assert_eq!(entry.status_code, Some(495));
        assert_eq!(entry.expiry.as_deref(), Some("2023-12-31T00:00:00Z"));
        assert_eq!(entry.notes, "tls");
        assert_eq!(entry.error.as_deref(), Some("certificate expired"));
        assert_eq!(entry.duration_secs, 0.25);
    }

    #[test]
    fn non_string_expiry_is_ignored() {
        let result = CheckResult::ok("host").with_findings(serde_json::json!({"expiry": 42}));
        let entry = AuditEntry::from_result("eng", "op", "probe", "host", &result, 0.0);
        assert!(entry.expiry.is_none());
    }

    #[test]
    fn serializes_to_a_single_json_line() {
        let entry = AuditEntry::from_result("eng", "op", "probe", "host", &CheckResult::ok("host"), 1.5);
        let line = serde_json::to_string(&entry).unwrap();
        assert!(!line.contains('\n'));

        let parsed: AuditEntry = serde_json::from_str(&line).unwrap();
        assert_eq!(parsed, entry);
    }
}
