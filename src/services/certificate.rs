use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::fs;

use crate::error::{AppError, AppResult};
use crate::models::{DeploymentType, SslStatus};
use crate::services::process::{CommandSpec, ProcessRunner};

/// Location of an issued certificate and its key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificatePaths {
    pub certificate: PathBuf,
    pub private_key: PathBuf,
}

impl CertificatePaths {
    /// Standard layout of the ACME client's live directory
    pub fn for_domain(live_dir: &Path, domain: &str) -> Self {
        let dir = live_dir.join(domain);
        Self {
            certificate: dir.join("fullchain.pem"),
            private_key: dir.join("privkey.pem"),
        }
    }
}

/// External ACME client
#[async_trait]
pub trait CertificateClient: Send + Sync {
    async fn obtain_certificate(&self, domain: &str) -> AppResult<CertificatePaths>;
}

/// certbot in webroot mode. Re-requesting an unexpired certificate is a no-op.
pub struct CertbotClient {
    runner: Arc<dyn ProcessRunner>,
    binary: String,
    email: String,
    webroot: PathBuf,
    live_dir: PathBuf,
    timeout: Duration,
}

impl CertbotClient {
    pub fn new(
        runner: Arc<dyn ProcessRunner>,
        binary: impl Into<String>,
        email: impl Into<String>,
        webroot: impl Into<PathBuf>,
        live_dir: impl Into<PathBuf>,
        timeout: Duration,
    ) -> Self {
        Self {
            runner,
            binary: binary.into(),
            email: email.into(),
            webroot: webroot.into(),
            live_dir: live_dir.into(),
            timeout,
        }
    }

    fn command(&self, domain: &str) -> CommandSpec {
        let webroot = self.webroot.to_string_lossy();
        let args = [
            "certonly",
            "--webroot",
            "-w",
            webroot.as_ref(),
            "-d",
            domain,
            "--non-interactive",
            "--agree-tos",
            "--email",
            self.email.as_str(),
            "--keep-until-expiring",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();

        CommandSpec::new(self.binary.clone(), args)
    }
}

#[async_trait]
impl CertificateClient for CertbotClient {
    async fn obtain_certificate(&self, domain: &str) -> AppResult<CertificatePaths> {
        let command = self.command(domain);
        let output = self.runner.run(&command, self.timeout).await?;

        if !output.success() {
            return Err(AppError::external(
                format!("{} certonly", self.binary),
                output.diagnostics(),
            ));
        }

        Ok(CertificatePaths::for_domain(&self.live_dir, domain))
    }
}

/// Decides whether a deployment needs a certificate and obtains it
pub struct CertificateProvisioner {
    client: Arc<dyn CertificateClient>,
    tools_domain: String,
    live_dir: PathBuf,
}

impl CertificateProvisioner {
    pub fn new(
        client: Arc<dyn CertificateClient>,
        tools_domain: impl Into<String>,
        live_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            client,
            tools_domain: tools_domain.into(),
            live_dir: live_dir.into(),
        }
    }

    pub fn domain_for(&self, subdomain: &str) -> String {
        format!("{}.{}", subdomain, self.tools_domain)
    }

    /// Certificate already on disk for a subdomain, if any
    pub async fn existing(&self, subdomain: &str) -> Option<CertificatePaths> {
        let paths = CertificatePaths::for_domain(&self.live_dir, &self.domain_for(subdomain));
        let present = fs::try_exists(&paths.certificate).await.unwrap_or(false)
            && fs::try_exists(&paths.private_key).await.unwrap_or(false);
        present.then_some(paths)
    }

    /// Obtain or renew the certificate for a production deployment.
    ///
    /// Staging deployments need none and get `NotRequired`.
    pub async fn provision(
        &self,
        subdomain: &str,
        deployment_type: DeploymentType,
    ) -> AppResult<(SslStatus, Option<CertificatePaths>)> {
        if !deployment_type.requires_tls() {
            return Ok((SslStatus::NotRequired, None));
        }

        let domain = self.domain_for(subdomain);
        tracing::info!(domain = %domain, "Requesting certificate");

        match self.client.obtain_certificate(&domain).await {
            Ok(paths) => {
                tracing::info!(domain = %domain, "Certificate issued");
                Ok((SslStatus::Active, Some(paths)))
            }
            Err(e) => {
                tracing::error!(domain = %domain, error = %e, "Certificate issuance failed");
                Err(e)
            }
        }
    }
}
