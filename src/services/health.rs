use std::time::Duration;

use futures::stream::{self, StreamExt};
use reqwest::Client;
use sea_orm::DatabaseConnection;
use serde::Serialize;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::{Deployment, HealthCheckResult, HealthStatus};
use crate::repositories::{DeploymentRepository, Repository};

/// Probes in flight at once during a sweep
const SWEEP_CONCURRENCY: usize = 8;

/// Totals of one sweep over all live deployments
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HealthSweep {
    pub checked: usize,
    pub healthy: usize,
    pub unhealthy: usize,
    pub errored: usize,
}

/// Probes deployed tools and records what it sees
pub struct HealthMonitor {
    db: DatabaseConnection,
    client: Client,
    timeout: Duration,
}

impl HealthMonitor {
    pub fn new(db: DatabaseConnection, timeout: Duration) -> AppResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { db, client, timeout })
    }

    /// Probe one deployment's health endpoint. Never fails; problems are in the result.
    pub async fn check(&self, deployment_id: Uuid) -> HealthCheckResult {
        let deployment =
            match <DeploymentRepository as Repository<Deployment>>::find_by_id(&self.db, deployment_id)
                .await
            {
                Ok(deployment) => deployment,
                Err(e) => return HealthCheckResult::failed(None, HealthStatus::Error, e.to_string()),
            };

        self.check_deployment(&deployment).await
    }

    async fn check_deployment(&self, deployment: &Deployment) -> HealthCheckResult {
        let result = self.probe(&deployment.health_check_url).await;

        if let Err(e) = DeploymentRepository::record_health(&self.db, deployment.id, result.status).await {
            tracing::warn!(
                deployment_id = %deployment.id,
                error = %e,
                "Failed to record health status"
            );
        }

        if result.healthy {
            tracing::debug!(deployment_id = %deployment.id, url = %deployment.health_check_url, "Healthy");
        } else {
            tracing::warn!(
                deployment_id = %deployment.id,
                url = %deployment.health_check_url,
                status = result.status.as_str(),
                error = result.error.as_deref().unwrap_or_default(),
                "Health check failed"
            );
        }

        result
    }

    /// Issue one bounded GET against `url`
    pub async fn probe(&self, url: &str) -> HealthCheckResult {
        match self.client.get(url).send().await {
            Ok(response) if response.status().is_success() => {
                HealthCheckResult::healthy(url, response.status().as_u16())
            }
            Ok(response) => {
                let code = response.status().as_u16();
                let mut result = HealthCheckResult::failed(
                    Some(url),
                    HealthStatus::Unhealthy,
                    format!("HTTP {}", code),
                );
                result.status_code = Some(code);
                result
            }
            Err(e) if e.is_timeout() => HealthCheckResult::failed(
                Some(url),
                HealthStatus::Error,
                format!("timed out after {}s", self.timeout.as_secs()),
            ),
            Err(e) => HealthCheckResult::failed(Some(url), HealthStatus::Error, e.to_string()),
        }
    }

    /// Check the current deployment of every tool
    pub async fn check_all(&self) -> AppResult<HealthSweep> {
        let deployments = DeploymentRepository::list_current(&self.db).await?;

        let results: Vec<HealthCheckResult> = stream::iter(&deployments)
            .map(|deployment| self.check_deployment(deployment))
            .buffer_unordered(SWEEP_CONCURRENCY)
            .collect()
            .await;

        let mut sweep = HealthSweep::default();
        for result in results {
            sweep.checked += 1;
            match result.status {
                HealthStatus::Healthy => sweep.healthy += 1,
                HealthStatus::Unhealthy => sweep.unhealthy += 1,
                HealthStatus::Error | HealthStatus::Unknown => sweep.errored += 1,
            }
        }

        Ok(sweep)
    }
}
