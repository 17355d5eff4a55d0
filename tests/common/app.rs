use std::path::{Path, PathBuf};

use axum_test::TestServer;
use sea_orm::{ConnectOptions, ConnectionTrait, Database, DatabaseConnection, DbBackend, Schema};
use tempfile::TempDir;

use toolhost::build_router;
use toolhost::config::{Config, LogFormat};
use toolhost::entity::{DeploymentEntity, ToolEntity};
use toolhost::state::AppState;

use super::fakes::Fakes;

/// Test configuration rooted in a temp directory
pub fn test_config(root: &Path) -> Config {
    Config {
        database_url: "sqlite::memory:".to_string(),
        jwt_secret: "test-jwt-secret-that-is-at-least-32-characters-long".to_string(),
        jwt_expiration_hours: 24,
        host: "127.0.0.1".to_string(),
        port: 0,
        log_format: LogFormat::Pretty,
        tools_domain: "tools.test".to_string(),
        deploy_root: root.join("www"),
        shared_assets_dir: root.join("shared"),
        backend_url: "http://127.0.0.1:3000".to_string(),
        api_base_url: "/api".to_string(),
        generator_url: "http://127.0.0.1:9/generate".to_string(),
        generator_timeout_secs: 5,
        proxy_available_dir: root.join("sites-available"),
        proxy_enabled_dir: root.join("sites-enabled"),
        proxy_log_dir: root.join("log"),
        proxy_binary: "nginx".to_string(),
        proxy_reload_command: "nginx -s reload".to_string(),
        proxy_timeout_secs: 5,
        acme_binary: "certbot".to_string(),
        acme_email: "ops@tools.test".to_string(),
        acme_webroot: root.join("acme"),
        cert_live_dir: root.join("letsencrypt").join("live"),
        acme_timeout_secs: 5,
        health_timeout_secs: 2,
        health_interval_secs: 60,
    }
}

/// Fresh in-memory database with the schema built from the entities
pub async fn test_db() -> DatabaseConnection {
    // One connection: every pooled connection would get its own memory database
    let mut opt = ConnectOptions::new("sqlite::memory:");
    opt.max_connections(1).min_connections(1).sqlx_logging(false);

    let db = Database::connect(opt)
        .await
        .expect("Failed to open in-memory database");

    let schema = Schema::new(DbBackend::Sqlite);
    let backend = db.get_database_backend();
    db.execute(backend.build(&schema.create_table_from_entity(ToolEntity)))
        .await
        .expect("Failed to create tools table");
    db.execute(backend.build(&schema.create_table_from_entity(DeploymentEntity)))
        .await
        .expect("Failed to create deployments table");

    db
}

/// Test application wrapper
pub struct TestApp {
    pub server: TestServer,
    pub state: AppState,
    pub fakes: Fakes,
    pub config: Config,
    _dir: TempDir,
}

impl TestApp {
    /// Create a new test application backed by fakes
    pub async fn new() -> Self {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let config = test_config(dir.path());
        std::fs::create_dir_all(&config.shared_assets_dir).unwrap();
        std::fs::write(config.shared_assets_dir.join("favicon.ico"), b"ICON").unwrap();

        let fakes = Fakes::new(&config.cert_live_dir);
        let db = test_db().await;

        let state = AppState::with_backends(config.clone(), db, fakes.backends())
            .expect("Failed to create test app state");

        let router = build_router(state.clone());
        let server = TestServer::new(router).expect("Failed to create test server");

        Self {
            server,
            state,
            fakes,
            config,
            _dir: dir,
        }
    }

    pub fn live_dir(&self, subdomain: &str) -> PathBuf {
        self.config.deploy_root.join(subdomain)
    }

    pub fn release_dir(&self, subdomain: &str, version: &str) -> PathBuf {
        self.config
            .deploy_root
            .join(".releases")
            .join(subdomain)
            .join(version)
    }

    pub fn available_config(&self, subdomain: &str) -> PathBuf {
        self.config
            .proxy_available_dir
            .join(format!("{}.conf", subdomain))
    }

    pub fn enabled_config(&self, subdomain: &str) -> PathBuf {
        self.config
            .proxy_enabled_dir
            .join(format!("{}.conf", subdomain))
    }
}
