use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

pub use crate::entity::deployment::{DeploymentStatus, DeploymentType, HealthStatus, SslStatus};

/// Version label for the n-th deployment of a tool
pub fn format_version(sequence: i32) -> String {
    format!("1.0.{}", sequence)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Deployment {
    pub id: Uuid,
    pub tool_id: Uuid,
    pub version: String,
    pub sequence: i32,
    pub subdomain: String,
    pub deployment_type: DeploymentType,
    pub status: DeploymentStatus,
    pub ssl_status: SslStatus,
    pub health_status: HealthStatus,
    pub health_check_url: String,
    /// Snapshot of the proxy configuration that was applied
    pub proxy_config: Option<String>,
    pub deployment_log: Vec<DeploymentLogEntry>,
    pub rollback_version: Option<String>,
    pub error_message: Option<String>,
    pub last_health_check: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
    pub completed_at: Option<OffsetDateTime>,
    pub rolled_back_at: Option<OffsetDateTime>,
}

/// Fields for a new deployment row
#[derive(Debug, Clone)]
pub struct NewDeployment {
    pub tool_id: Uuid,
    pub sequence: i32,
    pub subdomain: String,
    pub deployment_type: DeploymentType,
    pub status: DeploymentStatus,
    pub ssl_status: SslStatus,
    pub health_check_url: String,
    pub proxy_config: Option<String>,
    pub deployment_log: Vec<DeploymentLogEntry>,
    pub error_message: Option<String>,
}

/// Partial update of a deployment row; `None` leaves a field untouched
#[derive(Debug, Clone, Default)]
pub struct DeploymentUpdate {
    pub status: Option<DeploymentStatus>,
    pub ssl_status: Option<SslStatus>,
    pub health_status: Option<HealthStatus>,
    pub proxy_config: Option<String>,
    pub rollback_version: Option<String>,
    pub error_message: Option<String>,
    pub deployment_log: Option<Vec<DeploymentLogEntry>>,
    pub completed: bool,
}

/// One event in a deployment's journal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentLogEntry {
    #[serde(with = "time::serde::rfc3339")]
    pub at: OffsetDateTime,
    pub phase: DeploymentStatus,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<serde_json::Value>,
}

/// Ordered phase journal accumulated while a deployment runs
#[derive(Debug, Clone, Default)]
pub struct DeploymentJournal {
    entries: Vec<DeploymentLogEntry>,
}

impl DeploymentJournal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(
        &mut self,
        phase: DeploymentStatus,
        message: impl Into<String>,
        detail: Option<serde_json::Value>,
    ) {
        self.entries.push(DeploymentLogEntry {
            at: OffsetDateTime::now_utc(),
            phase,
            message: message.into(),
            detail,
        });
    }

    pub fn entries(&self) -> &[DeploymentLogEntry] {
        &self.entries
    }

    pub fn into_entries(self) -> Vec<DeploymentLogEntry> {
        self.entries
    }
}

/// Result of a successful deploy
#[derive(Debug, Clone, Serialize)]
pub struct DeployOutcome {
    pub deployment_id: Uuid,
    pub url: String,
    pub version: String,
    pub subdomain: String,
}

/// Result of a successful rollback
#[derive(Debug, Clone, Serialize)]
pub struct RollbackOutcome {
    pub rolled_back_to: String,
    pub rolled_back_from: String,
    pub subdomain: String,
}

/// Outcome of a health probe. Never an error: failures are reported in `error`.
#[derive(Debug, Clone, Serialize)]
pub struct HealthCheckResult {
    pub healthy: bool,
    pub url: Option<String>,
    pub status: HealthStatus,
    pub status_code: Option<u16>,
    pub error: Option<String>,
}

impl HealthCheckResult {
    pub fn healthy(url: &str, status_code: u16) -> Self {
        Self {
            healthy: true,
            url: Some(url.to_string()),
            status: HealthStatus::Healthy,
            status_code: Some(status_code),
            error: None,
        }
    }

    pub fn failed(url: Option<&str>, status: HealthStatus, error: impl Into<String>) -> Self {
        Self {
            healthy: false,
            url: url.map(str::to_string),
            status,
            status_code: None,
            error: Some(error.into()),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RecentCounts {
    pub last_24h: u64,
    pub last_7d: u64,
    pub last_30d: u64,
}

/// Aggregate deployment counters
#[derive(Debug, Clone, Default, Serialize)]
pub struct DeploymentStats {
    pub total: u64,
    pub deployed_tools: u64,
    pub by_status: BTreeMap<String, u64>,
    pub by_health: BTreeMap<String, u64>,
    pub by_ssl: BTreeMap<String, u64>,
    pub by_type: BTreeMap<String, u64>,
    pub recent: RecentCounts,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_version() {
        assert_eq!(format_version(1), "1.0.1");
        assert_eq!(format_version(12), "1.0.12");
    }

    #[test]
    fn test_journal_serializes_phases() {
        let mut journal = DeploymentJournal::new();
        journal.record(DeploymentStatus::Initiated, "Deployment initiated", None);
        journal.record(
            DeploymentStatus::Error,
            "Proxy validation failed",
            Some(serde_json::json!({ "failed_phase": "files_written" })),
        );

        let value = serde_json::to_value(journal.entries()).unwrap();
        assert_eq!(value[0]["phase"], "initiated");
        assert!(value[0].get("detail").is_none());
        assert_eq!(value[1]["detail"]["failed_phase"], "files_written");

        let parsed: Vec<DeploymentLogEntry> = serde_json::from_value(value).unwrap();
        assert_eq!(parsed.len(), 2);
    }
}
