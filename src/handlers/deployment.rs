use std::collections::BTreeMap;

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::handlers::PaginationParams;
use crate::middlewares::AuthUser;
use crate::models::{
    DeployOutcome, Deployment, DeploymentStats, DeploymentType, HealthCheckResult,
    RollbackOutcome,
};
use crate::repositories::DeploymentRepository;
use crate::state::AppState;

// ============ Request/Response DTOs ============

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct DeployRequest {
    /// "production" (default) or "staging"
    #[serde(default)]
    pub deployment_type: Option<String>,
}

impl DeployRequest {
    fn deployment_type(&self) -> AppResult<DeploymentType> {
        match &self.deployment_type {
            None => Ok(DeploymentType::Production),
            Some(raw) => raw.parse().map_err(AppError::Validation),
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct DeployResponse {
    pub deployment_id: Uuid,
    pub url: String,
    pub version: String,
    pub subdomain: String,
}

impl From<DeployOutcome> for DeployResponse {
    fn from(o: DeployOutcome) -> Self {
        Self {
            deployment_id: o.deployment_id,
            url: o.url,
            version: o.version,
            subdomain: o.subdomain,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct DeploymentResponse {
    pub id: Uuid,
    pub tool_id: Uuid,
    pub version: String,
    pub subdomain: String,
    pub deployment_type: String,
    pub status: String,
    pub ssl_status: String,
    pub health_status: String,
    pub health_check_url: String,
    pub proxy_config: Option<String>,
    #[schema(value_type = Vec<Object>)]
    pub deployment_log: serde_json::Value,
    pub rollback_version: Option<String>,
    pub error_message: Option<String>,
    #[schema(value_type = Option<String>)]
    pub last_health_check: Option<time::OffsetDateTime>,
    #[schema(value_type = String)]
    pub created_at: time::OffsetDateTime,
    #[schema(value_type = String)]
    pub updated_at: time::OffsetDateTime,
    #[schema(value_type = Option<String>)]
    pub completed_at: Option<time::OffsetDateTime>,
    #[schema(value_type = Option<String>)]
    pub rolled_back_at: Option<time::OffsetDateTime>,
}

impl From<Deployment> for DeploymentResponse {
    fn from(d: Deployment) -> Self {
        Self {
            id: d.id,
            tool_id: d.tool_id,
            version: d.version,
            subdomain: d.subdomain,
            deployment_type: d.deployment_type.as_str().to_string(),
            status: d.status.as_str().to_string(),
            ssl_status: d.ssl_status.as_str().to_string(),
            health_status: d.health_status.as_str().to_string(),
            health_check_url: d.health_check_url,
            proxy_config: d.proxy_config,
            deployment_log: serde_json::to_value(&d.deployment_log)
                .unwrap_or(serde_json::Value::Array(Vec::new())),
            rollback_version: d.rollback_version,
            error_message: d.error_message,
            last_health_check: d.last_health_check,
            created_at: d.created_at,
            updated_at: d.updated_at,
            completed_at: d.completed_at,
            rolled_back_at: d.rolled_back_at,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct DeploymentListResponse {
    pub data: Vec<DeploymentResponse>,
    pub total: u64,
    pub limit: u64,
    pub offset: u64,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct RollbackResponse {
    pub rolled_back_to: String,
    pub rolled_back_from: String,
    pub subdomain: String,
}

impl From<RollbackOutcome> for RollbackResponse {
    fn from(o: RollbackOutcome) -> Self {
        Self {
            rolled_back_to: o.rolled_back_to,
            rolled_back_from: o.rolled_back_from,
            subdomain: o.subdomain,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct HealthCheckResponse {
    pub healthy: bool,
    pub url: Option<String>,
    pub status: String,
    pub status_code: Option<u16>,
    pub error: Option<String>,
}

impl From<HealthCheckResult> for HealthCheckResponse {
    fn from(r: HealthCheckResult) -> Self {
        Self {
            healthy: r.healthy,
            url: r.url,
            status: r.status.as_str().to_string(),
            status_code: r.status_code,
            error: r.error,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct RecentDeploymentsResponse {
    pub last_24h: u64,
    pub last_7d: u64,
    pub last_30d: u64,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct DeploymentStatsResponse {
    pub total: u64,
    pub deployed_tools: u64,
    pub by_status: BTreeMap<String, u64>,
    pub by_health: BTreeMap<String, u64>,
    pub by_ssl: BTreeMap<String, u64>,
    pub by_type: BTreeMap<String, u64>,
    pub recent: RecentDeploymentsResponse,
}

impl From<DeploymentStats> for DeploymentStatsResponse {
    fn from(s: DeploymentStats) -> Self {
        Self {
            total: s.total,
            deployed_tools: s.deployed_tools,
            by_status: s.by_status,
            by_health: s.by_health,
            by_ssl: s.by_ssl,
            by_type: s.by_type,
            recent: RecentDeploymentsResponse {
                last_24h: s.recent.last_24h,
                last_7d: s.recent.last_7d,
                last_30d: s.recent.last_30d,
            },
        }
    }
}

// ============ Handlers ============

/// Deploy the current definition of a tool
#[utoipa::path(
    post,
    path = "/api/tools/{tool_id}/deployments",
    params(
        ("tool_id" = Uuid, Path, description = "Tool ID")
    ),
    request_body = DeployRequest,
    responses(
        (status = 200, description = "Deployment is live", body = DeployResponse),
        (status = 400, description = "Validation error"),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Tool not found"),
        (status = 409, description = "Subdomain claimed by another tool"),
        (status = 502, description = "Proxy or certificate tooling failed"),
        (status = 504, description = "External tool timed out")
    ),
    security(
        ("bearer_auth" = [])
    ),
    tag = "Deployments"
)]
pub async fn deploy_tool(
    user: AuthUser,
    State(state): State<AppState>,
    Path(tool_id): Path<Uuid>,
    Json(payload): Json<DeployRequest>,
) -> AppResult<Json<DeployResponse>> {
    let deployment_type = payload.deployment_type()?;
    let outcome = state
        .deployments
        .deploy(tool_id, user.id, deployment_type)
        .await?;

    Ok(Json(outcome.into()))
}

/// Deployment history of a tool, newest first
#[utoipa::path(
    get,
    path = "/api/tools/{tool_id}/deployments",
    params(
        ("tool_id" = Uuid, Path, description = "Tool ID"),
        PaginationParams
    ),
    responses(
        (status = 200, description = "Deployment history", body = DeploymentListResponse),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Tool not found")
    ),
    security(
        ("bearer_auth" = [])
    ),
    tag = "Deployments"
)]
pub async fn list_deployments(
    user: AuthUser,
    State(state): State<AppState>,
    Path(tool_id): Path<Uuid>,
    Query(params): Query<PaginationParams>,
) -> AppResult<Json<DeploymentListResponse>> {
    let (limit, offset) = params.resolve();

    let deployments =
        DeploymentRepository::list_by_tool(&state.db, tool_id, user.id, limit, offset).await?;
    let total = DeploymentRepository::count_by_tool(&state.db, tool_id).await?;

    Ok(Json(DeploymentListResponse {
        data: deployments.into_iter().map(|d| d.into()).collect(),
        total,
        limit,
        offset,
    }))
}

/// Get a deployment by ID
#[utoipa::path(
    get,
    path = "/api/deployments/{id}",
    params(
        ("id" = Uuid, Path, description = "Deployment ID")
    ),
    responses(
        (status = 200, description = "Deployment details", body = DeploymentResponse),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Deployment not found")
    ),
    security(
        ("bearer_auth" = [])
    ),
    tag = "Deployments"
)]
pub async fn get_deployment(
    user: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<DeploymentResponse>> {
    let deployment = DeploymentRepository::find_by_id_and_user(&state.db, id, user.id).await?;
    Ok(Json(deployment.into()))
}

/// Restore the previous successful version as the live content
#[utoipa::path(
    post,
    path = "/api/deployments/{id}/rollback",
    params(
        ("id" = Uuid, Path, description = "Deployment to roll back from")
    ),
    responses(
        (status = 200, description = "Rolled back", body = RollbackResponse),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Deployment or previous version not found")
    ),
    security(
        ("bearer_auth" = [])
    ),
    tag = "Deployments"
)]
pub async fn rollback_deployment(
    user: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<RollbackResponse>> {
    // Verify ownership
    DeploymentRepository::find_by_id_and_user(&state.db, id, user.id).await?;

    let outcome = state.deployments.rollback(id).await?;
    Ok(Json(outcome.into()))
}

/// Probe a deployment's health endpoint
#[utoipa::path(
    post,
    path = "/api/deployments/{id}/health-check",
    params(
        ("id" = Uuid, Path, description = "Deployment ID")
    ),
    responses(
        (status = 200, description = "Probe result, healthy or not", body = HealthCheckResponse),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Deployment not found")
    ),
    security(
        ("bearer_auth" = [])
    ),
    tag = "Deployments"
)]
pub async fn check_deployment_health(
    user: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<HealthCheckResponse>> {
    // Verify ownership
    DeploymentRepository::find_by_id_and_user(&state.db, id, user.id).await?;

    let result = state.health.check(id).await;
    Ok(Json(result.into()))
}

/// Deployment counters across the caller's tools
#[utoipa::path(
    get,
    path = "/api/deployments/stats",
    responses(
        (status = 200, description = "Deployment statistics", body = DeploymentStatsResponse),
        (status = 401, description = "Unauthorized")
    ),
    security(
        ("bearer_auth" = [])
    ),
    tag = "Deployments"
)]
pub async fn deployment_stats(
    user: AuthUser,
    State(state): State<AppState>,
) -> AppResult<Json<DeploymentStatsResponse>> {
    let stats = state.deployments.stats(user.id).await?;
    Ok(Json(stats.into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deploy_request_type() {
        let default: DeployRequest = serde_json::from_str("{}").unwrap();
        assert_eq!(default.deployment_type().unwrap(), DeploymentType::Production);

        let staging: DeployRequest =
            serde_json::from_str(r#"{"deployment_type": "Staging"}"#).unwrap();
        assert_eq!(staging.deployment_type().unwrap(), DeploymentType::Staging);

        let bad: DeployRequest = serde_json::from_str(r#"{"deployment_type": "canary"}"#).unwrap();
        assert!(matches!(bad.deployment_type(), Err(AppError::Validation(_))));
    }
}
