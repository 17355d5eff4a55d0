mod common;

use axum::http::StatusCode;
use serde_json::json;
use uuid::Uuid;

use common::{Factory, TestApp};

#[tokio::test]
async fn test_health_endpoint_is_public() {
    let app = TestApp::new().await;

    let response = app.server.get("/health").await;

    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_deploy_requires_token() {
    let app = TestApp::new().await;

    let response = app
        .server
        .post(&format!("/api/tools/{}/deployments", Uuid::new_v4()))
        .json(&json!({}))
        .await;
    response.assert_status(StatusCode::UNAUTHORIZED);

    let response = app
        .server
        .get("/api/deployments/stats")
        .add_header("Authorization", "Bearer not-a-jwt")
        .await;
    response.assert_status(StatusCode::UNAUTHORIZED);
    let body: serde_json::Value = response.json();
    assert_eq!(body["error"], "Invalid token");
}

#[tokio::test]
async fn test_deploy_and_inspect_over_http() {
    let app = TestApp::new().await;
    let factory = Factory::new(&app.state);
    let auth = factory.create_user();
    let tool = factory.create_tool(auth.user_id, "My Cool Tool").await;

    let response = app
        .server
        .post(&format!("/api/tools/{}/deployments", tool.id))
        .add_header("Authorization", auth.auth_header())
        .json(&json!({ "deployment_type": "production" }))
        .await;

    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["subdomain"], "my-cool-tool");
    assert_eq!(body["version"], "1.0.1");
    assert_eq!(body["url"], "https://my-cool-tool.tools.test");
    let deployment_id = body["deployment_id"].as_str().unwrap().to_string();

    // Single deployment
    let response = app
        .server
        .get(&format!("/api/deployments/{}", deployment_id))
        .add_header("Authorization", auth.auth_header())
        .await;
    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["status"], "active");
    assert_eq!(body["ssl_status"], "active");
    assert_eq!(body["deployment_type"], "production");
    assert_eq!(body["tool_id"], tool.id.to_string());
    assert!(body["deployment_log"].as_array().unwrap().len() >= 4);

    // History
    let response = app
        .server
        .get(&format!("/api/tools/{}/deployments", tool.id))
        .add_header("Authorization", auth.auth_header())
        .await;
    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["total"], 1);
    assert_eq!(body["data"][0]["version"], "1.0.1");
}

#[tokio::test]
async fn test_deploy_rejects_unknown_type() {
    let app = TestApp::new().await;
    let factory = Factory::new(&app.state);
    let auth = factory.create_user();
    let tool = factory.create_tool(auth.user_id, "Typed").await;

    let response = app
        .server
        .post(&format!("/api/tools/{}/deployments", tool.id))
        .add_header("Authorization", auth.auth_header())
        .json(&json!({ "deployment_type": "canary" }))
        .await;

    response.assert_status(StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_deploy_failure_maps_to_bad_gateway() {
    let app = TestApp::new().await;
    let factory = Factory::new(&app.state);
    let auth = factory.create_user();
    let tool = factory.create_tool(auth.user_id, "Rejected").await;
    app.fakes
        .proxy
        .reject
        .store(true, std::sync::atomic::Ordering::SeqCst);

    let response = app
        .server
        .post(&format!("/api/tools/{}/deployments", tool.id))
        .add_header("Authorization", auth.auth_header())
        .json(&json!({}))
        .await;

    response.assert_status(StatusCode::BAD_GATEWAY);
    let body: serde_json::Value = response.json();
    assert!(body["details"].as_str().unwrap().contains("proxy validation"));
}

#[tokio::test]
async fn test_other_users_deployment_is_hidden() {
    let app = TestApp::new().await;
    let factory = Factory::new(&app.state);
    let owner = factory.create_user();
    let stranger = factory.create_user();
    let tool = factory.create_tool(owner.user_id, "Mine").await;

    let outcome = app
        .state
        .deployments
        .deploy(tool.id, owner.user_id, toolhost::models::DeploymentType::Staging)
        .await
        .unwrap();

    for path in [
        format!("/api/deployments/{}", outcome.deployment_id),
        format!("/api/tools/{}/deployments", tool.id),
    ] {
        let response = app
            .server
            .get(&path)
            .add_header("Authorization", stranger.auth_header())
            .await;
        response.assert_status(StatusCode::NOT_FOUND);
    }

    let response = app
        .server
        .post(&format!("/api/deployments/{}/rollback", outcome.deployment_id))
        .add_header("Authorization", stranger.auth_header())
        .await;
    response.assert_status(StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_rollback_over_http() {
    let app = TestApp::new().await;
    let factory = Factory::new(&app.state);
    let auth = factory.create_user();
    let tool = factory.create_tool(auth.user_id, "Versioned").await;
    let path = format!("/api/tools/{}/deployments", tool.id);

    let first: serde_json::Value = app
        .server
        .post(&path)
        .add_header("Authorization", auth.auth_header())
        .json(&json!({ "deployment_type": "staging" }))
        .await
        .json();

    // Nothing to roll back to yet
    let response = app
        .server
        .post(&format!(
            "/api/deployments/{}/rollback",
            first["deployment_id"].as_str().unwrap()
        ))
        .add_header("Authorization", auth.auth_header())
        .await;
    response.assert_status(StatusCode::NOT_FOUND);
    let body: serde_json::Value = response.json();
    assert_eq!(body["details"], "Previous version not found");

    let second: serde_json::Value = app
        .server
        .post(&path)
        .add_header("Authorization", auth.auth_header())
        .json(&json!({ "deployment_type": "staging" }))
        .await
        .json();

    let response = app
        .server
        .post(&format!(
            "/api/deployments/{}/rollback",
            second["deployment_id"].as_str().unwrap()
        ))
        .add_header("Authorization", auth.auth_header())
        .await;
    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["rolled_back_to"], "1.0.1");
    assert_eq!(body["rolled_back_from"], "1.0.2");
}

#[tokio::test]
async fn test_health_check_endpoint_never_errors() {
    let app = TestApp::new().await;
    let factory = Factory::new(&app.state);
    let auth = factory.create_user();
    let tool = factory.create_tool(auth.user_id, "Offline").await;

    let outcome = app
        .state
        .deployments
        .deploy(tool.id, auth.user_id, toolhost::models::DeploymentType::Staging)
        .await
        .unwrap();
    // Nothing resolves *.tools.test, so the probe fails
    let response = app
        .server
        .post(&format!("/api/deployments/{}/health-check", outcome.deployment_id))
        .add_header("Authorization", auth.auth_header())
        .await;

    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["healthy"], false);
    assert!(!body["error"].as_str().unwrap().is_empty());
}

#[tokio::test]
async fn test_stats_endpoint() {
    let app = TestApp::new().await;
    let factory = Factory::new(&app.state);
    let auth = factory.create_user();
    let tool = factory.create_tool(auth.user_id, "Counted").await;

    app.state
        .deployments
        .deploy(tool.id, auth.user_id, toolhost::models::DeploymentType::Production)
        .await
        .unwrap();

    let response = app
        .server
        .get("/api/deployments/stats")
        .add_header("Authorization", auth.auth_header())
        .await;

    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["total"], 1);
    assert_eq!(body["deployed_tools"], 1);
    assert_eq!(body["by_status"]["active"], 1);
    assert_eq!(body["by_health"]["healthy"], 0);
    assert_eq!(body["by_type"]["production"], 1);
    assert_eq!(body["recent"]["last_7d"], 1);

    let stranger = factory.create_user();
    let body: serde_json::Value = app
        .server
        .get("/api/deployments/stats")
        .add_header("Authorization", stranger.auth_header())
        .await
        .json();
    assert_eq!(body["total"], 0);
    assert_eq!(body["deployed_tools"], 0);
}
