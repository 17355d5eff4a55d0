use anyhow::Context;
use utoipa::{
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    Modify, OpenApi,
};
use utoipa_swagger_ui::SwaggerUi;

use toolhost::config::Config;
use toolhost::handlers::{
    DeployRequest, DeployResponse, DeploymentListResponse, DeploymentResponse,
    DeploymentStatsResponse, HealthCheckResponse, RecentDeploymentsResponse, RollbackResponse,
};
use toolhost::state::AppState;
use toolhost::telemetry::init_tracing;
use toolhost::{build_router, handlers};

/// Security scheme for Bearer token
struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::deployment::deploy_tool,
        handlers::deployment::list_deployments,
        handlers::deployment::get_deployment,
        handlers::deployment::rollback_deployment,
        handlers::deployment::check_deployment_health,
        handlers::deployment::deployment_stats,
    ),
    components(schemas(
        DeployRequest,
        DeployResponse,
        DeploymentResponse,
        DeploymentListResponse,
        RollbackResponse,
        HealthCheckResponse,
        DeploymentStatsResponse,
        RecentDeploymentsResponse,
    )),
    modifiers(&SecurityAddon),
    tags(
        (name = "Deployments", description = "Publish, roll back and monitor tools")
    )
)]
struct ApiDoc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env().context("Failed to load configuration")?;
    init_tracing(config.log_format);

    let addr = config.server_addr();

    tracing::info!("Connecting to database...");
    let state = AppState::new(config)
        .await
        .context("Failed to initialize application state")?;
    tracing::info!("Database connection established");

    let app = build_router(state)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()));

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    tracing::info!("Server started on http://{}", addr);
    tracing::info!("Swagger UI: http://{}/swagger-ui/", addr);
    axum::serve(listener, app)
        .await
        .context("Server error")?;

    Ok(())
}
