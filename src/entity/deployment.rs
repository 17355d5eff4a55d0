use std::fmt;
use std::str::FromStr;

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Where a deployment is published
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumIter, DeriveActiveEnum,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "snake_case")]
pub enum DeploymentType {
    #[sea_orm(string_value = "production")]
    Production,
    #[sea_orm(string_value = "staging")]
    Staging,
}

impl DeploymentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Production => "production",
            Self::Staging => "staging",
        }
    }

    pub fn requires_tls(&self) -> bool {
        matches!(self, Self::Production)
    }
}

impl FromStr for DeploymentType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "production" => Ok(Self::Production),
            "staging" => Ok(Self::Staging),
            other => Err(format!("unknown deployment type '{}'", other)),
        }
    }
}

/// Phase of the deployment state machine.
///
/// `Initiated -> FilesWritten -> ProxyConfigured -> (CertProvisioned) -> Active`,
/// with `Error` reachable from every non-terminal phase.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumIter, DeriveActiveEnum,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(32))")]
#[serde(rename_all = "snake_case")]
pub enum DeploymentStatus {
    #[sea_orm(string_value = "initiated")]
    Initiated,
    #[sea_orm(string_value = "files_written")]
    FilesWritten,
    #[sea_orm(string_value = "proxy_configured")]
    ProxyConfigured,
    #[sea_orm(string_value = "cert_provisioned")]
    CertProvisioned,
    #[sea_orm(string_value = "active")]
    Active,
    #[sea_orm(string_value = "error")]
    Error,
}

impl DeploymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initiated => "initiated",
            Self::FilesWritten => "files_written",
            Self::ProxyConfigured => "proxy_configured",
            Self::CertProvisioned => "cert_provisioned",
            Self::Active => "active",
            Self::Error => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Active | Self::Error)
    }

    /// Whether the state machine allows moving from `self` to `next`
    pub fn can_advance_to(&self, next: DeploymentStatus) -> bool {
        use DeploymentStatus::*;

        match (self, next) {
            (Active | Error, _) => false,
            (_, Error) => true,
            (Initiated, FilesWritten) => true,
            (FilesWritten, ProxyConfigured) => true,
            (ProxyConfigured, CertProvisioned) => true,
            (ProxyConfigured, Active) => true,
            (CertProvisioned, Active) => true,
            _ => false,
        }
    }
}

impl fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumIter, DeriveActiveEnum,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "snake_case")]
pub enum SslStatus {
    #[sea_orm(string_value = "pending")]
    Pending,
    #[sea_orm(string_value = "active")]
    Active,
    #[sea_orm(string_value = "error")]
    Error,
    #[sea_orm(string_value = "not_required")]
    NotRequired,
}

impl SslStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Active => "active",
            Self::Error => "error",
            Self::NotRequired => "not_required",
        }
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumIter, DeriveActiveEnum,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    #[sea_orm(string_value = "unknown")]
    Unknown,
    #[sea_orm(string_value = "healthy")]
    Healthy,
    #[sea_orm(string_value = "unhealthy")]
    Unhealthy,
    #[sea_orm(string_value = "error")]
    Error,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Healthy => "healthy",
            Self::Unhealthy => "unhealthy",
            Self::Error => "error",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "deployments")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub tool_id: Uuid,
    pub version: String,
    pub sequence: i32,
    pub subdomain: String,
    pub deployment_type: DeploymentType,
    pub status: DeploymentStatus,
    pub ssl_status: SslStatus,
    pub health_status: HealthStatus,
    #[sea_orm(column_type = "Text")]
    pub health_check_url: String,
    #[sea_orm(column_type = "Text", nullable)]
    pub proxy_config: Option<String>,
    pub deployment_log: Json,
    #[sea_orm(nullable)]
    pub rollback_version: Option<String>,
    #[sea_orm(column_type = "Text", nullable)]
    pub error_message: Option<String>,
    pub last_health_check: Option<TimeDateTimeWithTimeZone>,
    pub created_at: TimeDateTimeWithTimeZone,
    pub updated_at: TimeDateTimeWithTimeZone,
    pub completed_at: Option<TimeDateTimeWithTimeZone>,
    /// Set once a rollback replaced this deployment's content
    pub rolled_back_at: Option<TimeDateTimeWithTimeZone>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::tool::Entity",
        from = "Column::ToolId",
        to = "super::tool::Column::Id"
    )]
    Tool,
}

impl Related<super::tool::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Tool.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_transitions() {
        use DeploymentStatus::*;

        assert!(Initiated.can_advance_to(FilesWritten));
        assert!(FilesWritten.can_advance_to(ProxyConfigured));
        assert!(ProxyConfigured.can_advance_to(CertProvisioned));
        assert!(ProxyConfigured.can_advance_to(Active));
        assert!(CertProvisioned.can_advance_to(Active));
        assert!(FilesWritten.can_advance_to(Error));

        assert!(!Initiated.can_advance_to(Active));
        assert!(!Active.can_advance_to(Error));
        assert!(!Error.can_advance_to(Initiated));
    }

    #[test]
    fn test_deployment_type_parsing() {
        assert_eq!("Production".parse::<DeploymentType>(), Ok(DeploymentType::Production));
        assert_eq!(" staging ".parse::<DeploymentType>(), Ok(DeploymentType::Staging));
        assert!("canary".parse::<DeploymentType>().is_err());
    }
}
