use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

/// A tenant-owned tool that can be published under a subdomain
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tool {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    /// Opaque definition handed to the artifact generator
    pub definition: serde_json::Value,
    pub subdomain: Option<String>,
    pub deployed: bool,
    pub enabled: bool,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, Deserialize)]
pub struct CreateTool {
    pub name: String,
    pub description: Option<String>,
    #[serde(default)]
    pub definition: serde_json::Value,
}
