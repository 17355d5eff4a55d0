use std::sync::Arc;

use sea_orm::{ConnectOptions, Database, DatabaseConnection};
use sqlx::postgres::PgPool;

use crate::config::Config;
use crate::error::AppError;
use crate::services::{
    ArtifactGenerator, ArtifactWriter, CertbotClient, CertificateClient, CertificateProvisioner,
    CommandSpec, DeploymentService, HealthMonitor, HttpArtifactGenerator, NginxController,
    ProcessRunner, ProxyConfigManager, ProxyController, SiteSettings, TokioProcessRunner,
};

/// External collaborators the deployment pipeline talks to
#[derive(Clone)]
pub struct Backends {
    pub generator: Arc<dyn ArtifactGenerator>,
    pub proxy: Arc<dyn ProxyController>,
    pub certificates: Arc<dyn CertificateClient>,
}

impl Backends {
    /// Real generator, nginx and certbot as configured
    pub fn from_config(config: &Config) -> Result<Self, AppStateError> {
        let runner: Arc<dyn ProcessRunner> = Arc::new(TokioProcessRunner);

        let reload = CommandSpec::parse(&config.proxy_reload_command)
            .map_err(|e| AppStateError::Backend(e.to_string()))?;

        let generator = HttpArtifactGenerator::new(&config.generator_url, config.generator_timeout())
            .map_err(|e| AppStateError::Backend(e.detail()))?;

        Ok(Self {
            generator: Arc::new(generator),
            proxy: Arc::new(NginxController::new(
                runner.clone(),
                &config.proxy_binary,
                reload,
                config.proxy_timeout(),
            )),
            certificates: Arc::new(CertbotClient::new(
                runner,
                &config.acme_binary,
                &config.acme_email,
                &config.acme_webroot,
                &config.cert_live_dir,
                config.acme_timeout(),
            )),
        })
    }
}

/// Application state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    /// SeaORM database connection
    pub db: DatabaseConnection,
    pub config: Config,
    pub deployments: Arc<DeploymentService>,
    pub health: Arc<HealthMonitor>,
}

impl AppState {
    /// Connect to PostgreSQL, run migrations and wire the real backends
    pub async fn new(config: Config) -> Result<Self, AppStateError> {
        // Connect to PostgreSQL with SQLx (for migrations)
        let pg_pool = PgPool::connect(&config.database_url)
            .await
            .map_err(|e| AppStateError::Postgres(e.to_string()))?;

        // Run migrations
        sqlx::migrate!("./migrations")
            .run(&pg_pool)
            .await
            .map_err(|e| AppStateError::Migration(e.to_string()))?;
        pg_pool.close().await;

        // Connect to PostgreSQL with SeaORM
        let mut opt = ConnectOptions::new(&config.database_url);
        opt.max_connections(20)
            .min_connections(2)
            .sqlx_logging(false);

        let db = Database::connect(opt)
            .await
            .map_err(|e| AppStateError::Postgres(e.to_string()))?;

        let backends = Backends::from_config(&config)?;
        Self::with_backends(config, db, backends)
    }

    /// Build state over an existing connection with injected backends (used by tests)
    pub fn with_backends(
        config: Config,
        db: DatabaseConnection,
        backends: Backends,
    ) -> Result<Self, AppStateError> {
        let writer = ArtifactWriter::new(
            &config.deploy_root,
            &config.shared_assets_dir,
            &config.api_base_url,
        );
        let proxy = Arc::new(ProxyConfigManager::new(
            &config.proxy_available_dir,
            &config.proxy_enabled_dir,
            backends.proxy,
        ));
        let certificates = CertificateProvisioner::new(
            backends.certificates,
            &config.tools_domain,
            &config.cert_live_dir,
        );
        let site = SiteSettings {
            tools_domain: config.tools_domain.clone(),
            backend_url: config.backend_url.clone(),
            proxy_log_dir: config.proxy_log_dir.clone(),
            acme_webroot: config.acme_webroot.clone(),
        };

        let deployments = Arc::new(DeploymentService::new(
            db.clone(),
            backends.generator,
            writer,
            proxy,
            certificates,
            site,
        ));
        let health = Arc::new(
            HealthMonitor::new(db.clone(), config.health_timeout())
                .map_err(|e: AppError| AppStateError::Backend(e.detail()))?,
        );

        Ok(Self {
            db,
            config,
            deployments,
            health,
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AppStateError {
    #[error("PostgreSQL connection error: {0}")]
    Postgres(String),

    #[error("Migration error: {0}")]
    Migration(String),

    #[error("Backend setup error: {0}")]
    Backend(String),
}
