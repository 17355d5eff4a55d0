// Library crate for toolhost
// Exports modules for use by the server, the health monitor and tests

pub mod config;
pub mod entity;
pub mod error;
pub mod handlers;
pub mod middlewares;
pub mod models;
pub mod repositories;
pub mod services;
pub mod state;
pub mod telemetry;

use axum::{
    middleware,
    routing::{get, post},
    Json, Router,
};
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::handlers::{
    check_deployment_health, deploy_tool, deployment_stats, get_deployment, list_deployments,
    rollback_deployment,
};
use crate::middlewares::auth_middleware;
use crate::state::AppState;

/// Build the application router with the given state
pub fn build_router(state: AppState) -> Router {
    // Protected routes (require authentication)
    let protected_routes = Router::new()
        // Deployments (nested under tools)
        .route(
            "/api/tools/{tool_id}/deployments",
            post(deploy_tool).get(list_deployments),
        )
        // Deployments (direct access)
        .route("/api/deployments/stats", get(deployment_stats))
        .route("/api/deployments/{id}", get(get_deployment))
        .route("/api/deployments/{id}/rollback", post(rollback_deployment))
        .route(
            "/api/deployments/{id}/health-check",
            post(check_deployment_health),
        )
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    Router::new()
        .route(
            "/health",
            get(|| async { Json(serde_json::json!({ "status": "ok" })) }),
        )
        .merge(protected_routes)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}
