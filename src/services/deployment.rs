use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex as StdMutex};

use sea_orm::{DatabaseConnection, DatabaseTransaction, TransactionTrait};
use serde_json::json;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::{
    format_version, DeployOutcome, Deployment, DeploymentJournal, DeploymentLogEntry,
    DeploymentStats, DeploymentStatus, DeploymentType, DeploymentUpdate, NewDeployment,
    RollbackOutcome, SslStatus, Tool,
};
use crate::repositories::{DeploymentRepository, Repository, ToolRepository};
use crate::services::artifact::{ArtifactGenerator, ArtifactWriter, GeneratedArtifact};
use crate::services::certificate::{CertificatePaths, CertificateProvisioner};
use crate::services::proxy::{render_site_config, ProxyConfigManager, SiteContext};
use crate::services::subdomain::{validate_subdomain, SubdomainAllocator};

/// Per-tool async locks serializing deploy and rollback of the same tool
#[derive(Default)]
pub struct ToolLocks {
    locks: StdMutex<HashMap<Uuid, Arc<Mutex<()>>>>,
}

impl ToolLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, tool_id: Uuid) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            // Drop entries nobody holds or waits on
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            locks.entry(tool_id).or_default().clone()
        };
        lock.lock_owned().await
    }
}

/// Static settings used to render every site
#[derive(Debug, Clone)]
pub struct SiteSettings {
    pub tools_domain: String,
    pub backend_url: String,
    pub proxy_log_dir: PathBuf,
    pub acme_webroot: PathBuf,
}

impl SiteSettings {
    pub fn host(&self, subdomain: &str) -> String {
        format!("{}.{}", subdomain, self.tools_domain)
    }

    pub fn public_url(&self, subdomain: &str, tls: bool) -> String {
        let scheme = if tls { "https" } else { "http" };
        format!("{}://{}", scheme, self.host(subdomain))
    }

    pub fn health_url(&self, subdomain: &str, tls: bool) -> String {
        format!("{}/health", self.public_url(subdomain, tls))
    }
}

/// Per-deploy facts threaded through the phases
struct DeployContext<'a> {
    tool: &'a Tool,
    deployment_id: Uuid,
    subdomain: &'a str,
    version: &'a str,
    deployment_type: DeploymentType,
    /// Certificate already on disk; the site keeps serving TLS with it
    existing_cert: Option<&'a CertificatePaths>,
}

impl DeployContext<'_> {
    fn serves_tls(&self) -> bool {
        self.deployment_type.requires_tls() || self.existing_cert.is_some()
    }
}

/// Phase reached and the error that stopped a deploy
struct PhaseFailure {
    phase: DeploymentStatus,
    ssl_status: Option<SslStatus>,
    error: AppError,
}

impl PhaseFailure {
    fn at(phase: DeploymentStatus) -> impl FnOnce(AppError) -> PhaseFailure {
        move |error| PhaseFailure {
            phase,
            ssl_status: None,
            error,
        }
    }
}

/// Coordinates allocation, artifact placement, proxy configuration and
/// certificates under one versioned deployment record
pub struct DeploymentService {
    db: DatabaseConnection,
    allocator: SubdomainAllocator,
    generator: Arc<dyn ArtifactGenerator>,
    writer: ArtifactWriter,
    proxy: Arc<ProxyConfigManager>,
    certificates: CertificateProvisioner,
    site: SiteSettings,
    locks: ToolLocks,
}

impl DeploymentService {
    pub fn new(
        db: DatabaseConnection,
        generator: Arc<dyn ArtifactGenerator>,
        writer: ArtifactWriter,
        proxy: Arc<ProxyConfigManager>,
        certificates: CertificateProvisioner,
        site: SiteSettings,
    ) -> Self {
        Self {
            db,
            allocator: SubdomainAllocator::new(),
            generator,
            writer,
            proxy,
            certificates,
            site,
            locks: ToolLocks::new(),
        }
    }

    pub fn allocator(&self) -> &SubdomainAllocator {
        &self.allocator
    }

    /// Publish the current definition of a tool as a new version
    pub async fn deploy(
        &self,
        tool_id: Uuid,
        user_id: Uuid,
        deployment_type: DeploymentType,
    ) -> AppResult<DeployOutcome> {
        let tool = ToolRepository::find_by_id_and_user(&self.db, tool_id, user_id).await?;
        let _tool_guard = self.locks.acquire(tool.id).await;

        let subdomain = match &tool.subdomain {
            Some(subdomain) => subdomain.clone(),
            None => self.allocator.assign(&self.db, &tool).await?,
        };
        validate_subdomain(&subdomain)?;

        let artifact = self.generator.generate(&tool).await?;

        let txn = self.db.begin().await?;
        let tool = ToolRepository::find_for_update(&txn, tool.id).await?;

        if let Some(claim) = DeploymentRepository::find_active_claim(&txn, &subdomain, tool.id).await? {
            tracing::warn!(
                tool_id = %tool.id,
                subdomain = %subdomain,
                owner = %claim.tool_id,
                "Subdomain claimed by another tool"
            );
            return Err(AppError::Conflict(format!("Subdomain '{}'", subdomain)));
        }

        let existing_cert = self.certificates.existing(&subdomain).await;
        let serves_tls = deployment_type.requires_tls() || existing_cert.is_some();

        let sequence = DeploymentRepository::next_sequence(&txn, tool.id).await?;
        let version = format_version(sequence);

        let mut journal = DeploymentJournal::new();
        journal.record(
            DeploymentStatus::Initiated,
            format!("Deployment {} initiated", version),
            Some(json!({ "deployment_type": deployment_type.as_str(), "subdomain": subdomain })),
        );

        let initial_ssl = if deployment_type.requires_tls() {
            SslStatus::Pending
        } else {
            SslStatus::NotRequired
        };
        let new = NewDeployment {
            tool_id: tool.id,
            sequence,
            subdomain: subdomain.clone(),
            deployment_type,
            status: DeploymentStatus::Initiated,
            ssl_status: initial_ssl,
            health_check_url: self.site.health_url(&subdomain, serves_tls),
            proxy_config: None,
            deployment_log: journal.entries().to_vec(),
            error_message: None,
        };
        let deployment = DeploymentRepository::create(&txn, &new).await?;

        tracing::info!(
            deployment_id = %deployment.id,
            tool_id = %tool.id,
            subdomain = %subdomain,
            version = %version,
            deployment_type = deployment_type.as_str(),
            "Deployment initiated"
        );

        let ctx = DeployContext {
            tool: &tool,
            deployment_id: deployment.id,
            subdomain: &subdomain,
            version: &version,
            deployment_type,
            existing_cert: existing_cert.as_ref(),
        };

        match self.run_phases(&txn, &ctx, &artifact, &mut journal).await {
            Ok(url) => {
                txn.commit().await?;
                tracing::info!(
                    deployment_id = %deployment.id,
                    tool_id = %tool.id,
                    version = %version,
                    url = %url,
                    "Deployment active"
                );
                Ok(DeployOutcome {
                    deployment_id: deployment.id,
                    url,
                    version,
                    subdomain,
                })
            }
            Err(failure) => {
                if let Err(e) = txn.rollback().await {
                    tracing::error!(error = %e, "Failed to roll back deployment transaction");
                }
                self.record_failure(new, journal, &failure).await;
                tracing::error!(
                    tool_id = %tool.id,
                    version = %version,
                    phase = %failure.phase,
                    error = %failure.error,
                    "Deployment failed"
                );
                Err(failure.error)
            }
        }
    }

    async fn run_phases(
        &self,
        txn: &DatabaseTransaction,
        ctx: &DeployContext<'_>,
        artifact: &GeneratedArtifact,
        journal: &mut DeploymentJournal,
    ) -> Result<String, PhaseFailure> {
        use DeploymentStatus::*;

        let mut phase = Initiated;

        // Artifact files
        let live = self
            .writer
            .write(ctx.tool, ctx.subdomain, ctx.version, artifact)
            .await
            .map_err(PhaseFailure::at(phase))?;
        journal.record(
            FilesWritten,
            "Artifact files written",
            Some(json!({ "path": live.display().to_string() })),
        );
        phase = self
            .advance(txn, ctx, phase, FilesWritten, journal, DeploymentUpdate::default())
            .await
            .map_err(PhaseFailure::at(phase))?;

        // Proxy configuration. A certificate on disk is always kept in use,
        // even for staging. Without one a production site starts HTTP-only
        // so the ACME challenge can be answered.
        let wants_tls = ctx.deployment_type.requires_tls();
        let config = self.render(ctx, &live, ctx.existing_cert);
        self.proxy
            .apply(ctx.subdomain, &config)
            .await
            .map_err(PhaseFailure::at(phase))?;
        journal.record(
            ProxyConfigured,
            if wants_tls && ctx.existing_cert.is_none() {
                "Proxy configured (HTTP bootstrap)"
            } else {
                "Proxy configured"
            },
            Some(json!({ "config": self.proxy.available_path(ctx.subdomain).display().to_string() })),
        );
        phase = self
            .advance(
                txn,
                ctx,
                phase,
                ProxyConfigured,
                journal,
                DeploymentUpdate {
                    proxy_config: Some(config),
                    ..Default::default()
                },
            )
            .await
            .map_err(PhaseFailure::at(phase))?;

        // Certificate
        if wants_tls {
            let (ssl_status, paths) = self
                .certificates
                .provision(ctx.subdomain, ctx.deployment_type)
                .await
                .map_err(|error| PhaseFailure {
                    phase,
                    ssl_status: Some(SslStatus::Error),
                    error,
                })?;

            let mut update = DeploymentUpdate {
                ssl_status: Some(ssl_status),
                ..Default::default()
            };
            if ctx.existing_cert.is_none() {
                if let Some(paths) = &paths {
                    let config = self.render(ctx, &live, Some(paths));
                    self.proxy
                        .apply(ctx.subdomain, &config)
                        .await
                        .map_err(|error| PhaseFailure {
                            phase,
                            ssl_status: Some(ssl_status),
                            error,
                        })?;
                    update.proxy_config = Some(config);
                }
            }

            journal.record(
                CertProvisioned,
                format!("Certificate active for {}", self.site.host(ctx.subdomain)),
                None,
            );
            phase = self
                .advance(txn, ctx, phase, CertProvisioned, journal, update)
                .await
                .map_err(PhaseFailure::at(phase))?;
        }

        // Finalize
        let url = self.site.public_url(ctx.subdomain, ctx.serves_tls());
        journal.record(
            Active,
            format!("Deployment live at {}", url),
            Some(json!({ "url": url, "version": ctx.version })),
        );
        self.advance(
            txn,
            ctx,
            phase,
            Active,
            journal,
            DeploymentUpdate {
                completed: true,
                ..Default::default()
            },
        )
        .await
        .map_err(PhaseFailure::at(phase))?;
        ToolRepository::mark_deployed(txn, ctx.tool.id)
            .await
            .map_err(PhaseFailure::at(phase))?;

        Ok(url)
    }

    /// Persist a state transition together with the journal so far
    async fn advance(
        &self,
        txn: &DatabaseTransaction,
        ctx: &DeployContext<'_>,
        from: DeploymentStatus,
        to: DeploymentStatus,
        journal: &DeploymentJournal,
        mut update: DeploymentUpdate,
    ) -> AppResult<DeploymentStatus> {
        if !from.can_advance_to(to) {
            return Err(AppError::Internal(format!(
                "Illegal deployment transition {} -> {}",
                from, to
            )));
        }

        update.status = Some(to);
        update.deployment_log = Some(journal.entries().to_vec());
        DeploymentRepository::update(txn, ctx.deployment_id, &update).await?;

        tracing::info!(
            deployment_id = %ctx.deployment_id,
            subdomain = %ctx.subdomain,
            version = %ctx.version,
            phase = %to,
            "Deployment phase complete"
        );
        Ok(to)
    }

    fn render(
        &self,
        ctx: &DeployContext<'_>,
        live: &std::path::Path,
        certificate: Option<&CertificatePaths>,
    ) -> String {
        render_site_config(&SiteContext {
            subdomain: ctx.subdomain,
            tools_domain: &self.site.tools_domain,
            document_root: live,
            backend_url: &self.site.backend_url,
            tool_id: ctx.tool.id,
            log_dir: &self.site.proxy_log_dir,
            acme_webroot: &self.site.acme_webroot,
            certificate,
        })
    }

    /// Write the terminal error row for a failed deploy in its own transaction
    async fn record_failure(
        &self,
        mut row: NewDeployment,
        mut journal: DeploymentJournal,
        failure: &PhaseFailure,
    ) {
        journal.record(
            DeploymentStatus::Error,
            format!("Deployment failed after phase {}", failure.phase),
            Some(json!({
                "failed_phase": failure.phase.as_str(),
                "error": failure.error.detail(),
            })),
        );

        row.status = DeploymentStatus::Error;
        if let Some(ssl_status) = failure.ssl_status {
            row.ssl_status = ssl_status;
        }
        row.error_message = Some(failure.error.detail());
        row.deployment_log = journal.into_entries();

        let result = async {
            let txn = self.db.begin().await?;
            DeploymentRepository::create(&txn, &row).await?;
            txn.commit().await?;
            Ok::<_, AppError>(())
        }
        .await;

        if let Err(e) = result {
            tracing::error!(
                tool_id = %row.tool_id,
                sequence = row.sequence,
                error = %e,
                "Failed to record failed deployment"
            );
        }
    }

    /// Make the previous successful version of a tool the live content again.
    ///
    /// Content is restored into the tool's current subdomain; routing,
    /// proxy config and certificates are left as they are.
    pub async fn rollback(&self, deployment_id: Uuid) -> AppResult<RollbackOutcome> {
        let current = <DeploymentRepository as Repository<Deployment>>::find_by_id(
            &self.db,
            deployment_id,
        )
        .await?;
        let _tool_guard = self.locks.acquire(current.tool_id).await;

        let txn = self.db.begin().await?;
        let tool = ToolRepository::find_for_update(&txn, current.tool_id).await?;

        let previous = DeploymentRepository::find_previous(&txn, tool.id, current.sequence)
            .await?
            .ok_or_else(|| AppError::NotFound("Previous version".to_string()))?;

        let live_subdomain = tool.subdomain.clone().unwrap_or_else(|| current.subdomain.clone());
        if previous.subdomain != live_subdomain {
            tracing::info!(
                tool_id = %tool.id,
                from = %previous.subdomain,
                to = %live_subdomain,
                "Restoring release under the current subdomain"
            );
        }

        self.writer
            .restore(&live_subdomain, &previous.subdomain, &previous.version)
            .await?;

        DeploymentRepository::update(
            &txn,
            previous.id,
            &DeploymentUpdate {
                rollback_version: Some(current.version.clone()),
                ..Default::default()
            },
        )
        .await?;
        let replaced = DeploymentRepository::mark_rolled_back(&txn, tool.id, previous.sequence).await?;
        DeploymentRepository::append_log(
            &txn,
            previous.id,
            DeploymentLogEntry {
                at: time::OffsetDateTime::now_utc(),
                phase: previous.status,
                message: format!("Rolled back to {} replacing {}", previous.version, current.version),
                detail: Some(json!({
                    "replaced_deployment_id": current.id,
                    "subdomain": live_subdomain,
                })),
            },
        )
        .await?;

        txn.commit().await?;

        tracing::info!(
            tool_id = %tool.id,
            rolled_back_to = %previous.version,
            rolled_back_from = %current.version,
            subdomain = %live_subdomain,
            replaced,
            "Rollback complete"
        );

        Ok(RollbackOutcome {
            rolled_back_to: previous.version,
            rolled_back_from: current.version,
            subdomain: live_subdomain,
        })
    }

    /// Counters over the deployments of one user's tools
    pub async fn stats(&self, user_id: Uuid) -> AppResult<DeploymentStats> {
        DeploymentRepository::stats(&self.db, user_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_tool_locks_serialize_same_tool() {
        let locks = Arc::new(ToolLocks::new());
        let tool_id = Uuid::new_v4();

        let guard = locks.acquire(tool_id).await;

        let other = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _guard = locks.acquire(tool_id).await;
            })
        };
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(!other.is_finished());

        // A different tool is not blocked
        let _unrelated = locks.acquire(Uuid::new_v4()).await;

        drop(guard);
        other.await.unwrap();
    }

    #[test]
    fn test_site_urls() {
        let site = SiteSettings {
            tools_domain: "tools.example.com".to_string(),
            backend_url: "http://127.0.0.1:3000".to_string(),
            proxy_log_dir: PathBuf::from("/var/log/nginx"),
            acme_webroot: PathBuf::from("/var/www/acme"),
        };

        assert_eq!(
            site.health_url("alpha", true),
            "https://alpha.tools.example.com/health"
        );
        assert_eq!(
            site.public_url("alpha", false),
            "http://alpha.tools.example.com"
        );
    }
}
