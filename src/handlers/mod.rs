pub mod common;
pub mod deployment;

pub use common::PaginationParams;
pub use deployment::{
    check_deployment_health, deploy_tool, deployment_stats, get_deployment, list_deployments,
    rollback_deployment, DeployRequest, DeployResponse, DeploymentListResponse,
    DeploymentResponse, DeploymentStatsResponse, HealthCheckResponse, RecentDeploymentsResponse,
    RollbackResponse,
};
