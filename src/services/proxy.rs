use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::fs;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::services::artifact::write_atomic;
use crate::services::certificate::CertificatePaths;
use crate::services::process::{CommandSpec, ProcessRunner};

/// Everything needed to render one tool's virtual host
#[derive(Debug, Clone)]
pub struct SiteContext<'a> {
    pub subdomain: &'a str,
    pub tools_domain: &'a str,
    pub document_root: &'a Path,
    pub backend_url: &'a str,
    pub tool_id: Uuid,
    pub log_dir: &'a Path,
    pub acme_webroot: &'a Path,
    /// `None` renders a plain HTTP site
    pub certificate: Option<&'a CertificatePaths>,
}

impl SiteContext<'_> {
    pub fn server_name(&self) -> String {
        format!("{}.{}", self.subdomain, self.tools_domain)
    }
}

/// Render the proxy configuration for one subdomain.
///
/// With a certificate this is an HTTP vhost that redirects to HTTPS plus the
/// TLS vhost; without one the content is served over HTTP directly.
pub fn render_site_config(site: &SiteContext<'_>) -> String {
    let server_name = site.server_name();
    let mut out = String::new();

    let _ = writeln!(out, "# Managed by toolhost for tool {}", site.tool_id);
    let _ = writeln!(out, "# Do not edit: changes are overwritten on the next deploy");
    out.push('\n');

    match site.certificate {
        Some(cert) => {
            out.push_str("server {\n");
            out.push_str("    listen 80;\n");
            out.push_str("    listen [::]:80;\n");
            let _ = writeln!(out, "    server_name {};", server_name);
            push_acme_location(&mut out, site);
            out.push('\n');
            out.push_str("    location / {\n");
            out.push_str("        return 301 https://$host$request_uri;\n");
            out.push_str("    }\n");
            out.push_str("}\n\n");

            out.push_str("server {\n");
            out.push_str("    listen 443 ssl;\n");
            out.push_str("    listen [::]:443 ssl;\n");
            out.push_str("    http2 on;\n");
            let _ = writeln!(out, "    server_name {};", server_name);
            out.push('\n');
            let _ = writeln!(out, "    ssl_certificate {};", cert.certificate.display());
            let _ = writeln!(out, "    ssl_certificate_key {};", cert.private_key.display());
            out.push_str("    ssl_protocols TLSv1.2 TLSv1.3;\n");
            out.push_str("    ssl_prefer_server_ciphers off;\n");
            out.push_str("    ssl_session_cache shared:SSL:10m;\n");
            out.push_str("    add_header Strict-Transport-Security \"max-age=31536000; includeSubDomains\" always;\n");
            push_site_body(&mut out, site);
            out.push_str("}\n");
        }
        None => {
            out.push_str("server {\n");
            out.push_str("    listen 80;\n");
            out.push_str("    listen [::]:80;\n");
            let _ = writeln!(out, "    server_name {};", server_name);
            push_acme_location(&mut out, site);
            push_site_body(&mut out, site);
            out.push_str("}\n");
        }
    }

    out
}

fn push_acme_location(out: &mut String, site: &SiteContext<'_>) {
    out.push('\n');
    out.push_str("    location ^~ /.well-known/acme-challenge/ {\n");
    let _ = writeln!(out, "        root {};", site.acme_webroot.display());
    out.push_str("        default_type \"text/plain\";\n");
    out.push_str("    }\n");
}

fn push_site_body(out: &mut String, site: &SiteContext<'_>) {
    let log_prefix = site.log_dir.join(site.subdomain);

    out.push('\n');
    let _ = writeln!(out, "    root {};", site.document_root.display());
    out.push_str("    index index.html;\n");
    out.push('\n');
    let _ = writeln!(out, "    access_log {}.access.log;", log_prefix.display());
    let _ = writeln!(out, "    error_log {}.error.log;", log_prefix.display());
    out.push('\n');
    out.push_str("    add_header X-Frame-Options \"SAMEORIGIN\" always;\n");
    out.push_str("    add_header X-Content-Type-Options \"nosniff\" always;\n");
    out.push_str("    add_header Referrer-Policy \"strict-origin-when-cross-origin\" always;\n");
    out.push_str("    add_header X-XSS-Protection \"1; mode=block\" always;\n");
    out.push('\n');
    out.push_str("    gzip on;\n");
    out.push_str("    gzip_vary on;\n");
    out.push_str("    gzip_min_length 1024;\n");
    out.push_str("    gzip_types text/plain text/css application/json application/javascript text/xml application/xml image/svg+xml;\n");
    out.push('\n');
    out.push_str("    location ~* \\.(?:js|css|png|jpe?g|gif|ico|svg|woff2?)$ {\n");
    out.push_str("        expires 7d;\n");
    out.push_str("        add_header Cache-Control \"public, immutable\";\n");
    out.push_str("        try_files $uri =404;\n");
    out.push_str("    }\n");
    out.push('\n');
    out.push_str("    location /api/ {\n");
    let _ = writeln!(out, "        proxy_pass {}/api/;", site.backend_url.trim_end_matches('/'));
    out.push_str("        proxy_http_version 1.1;\n");
    out.push_str("        proxy_set_header Host $host;\n");
    out.push_str("        proxy_set_header X-Real-IP $remote_addr;\n");
    out.push_str("        proxy_set_header X-Forwarded-For $proxy_add_x_forwarded_for;\n");
    out.push_str("        proxy_set_header X-Forwarded-Proto $scheme;\n");
    let _ = writeln!(out, "        proxy_set_header X-Tool-Id {};", site.tool_id);
    out.push_str("        proxy_read_timeout 60s;\n");
    out.push_str("    }\n");
    out.push('\n');
    out.push_str("    location = /health {\n");
    out.push_str("        access_log off;\n");
    out.push_str("        default_type text/plain;\n");
    out.push_str("        return 200 \"healthy\\n\";\n");
    out.push_str("    }\n");
    out.push('\n');
    out.push_str("    location / {\n");
    out.push_str("        try_files $uri $uri/ /index.html;\n");
    out.push_str("    }\n");
}

/// Result of the proxy's syntax check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationReport {
    pub ok: bool,
    pub diagnostics: String,
}

/// Control surface of the shared reverse-proxy process
#[async_trait]
pub trait ProxyController: Send + Sync {
    async fn validate(&self) -> AppResult<ValidationReport>;
    async fn reload(&self) -> AppResult<()>;
}

/// nginx driven through its command line
pub struct NginxController {
    runner: Arc<dyn ProcessRunner>,
    binary: String,
    reload: CommandSpec,
    timeout: Duration,
}

impl NginxController {
    pub fn new(
        runner: Arc<dyn ProcessRunner>,
        binary: impl Into<String>,
        reload: CommandSpec,
        timeout: Duration,
    ) -> Self {
        Self {
            runner,
            binary: binary.into(),
            reload,
            timeout,
        }
    }
}

#[async_trait]
impl ProxyController for NginxController {
    async fn validate(&self) -> AppResult<ValidationReport> {
        let command = CommandSpec::new(self.binary.clone(), vec!["-t".to_string()]);
        let output = self.runner.run(&command, self.timeout).await?;

        Ok(ValidationReport {
            ok: output.success(),
            diagnostics: output.diagnostics(),
        })
    }

    async fn reload(&self) -> AppResult<()> {
        let output = self.runner.run(&self.reload, self.timeout).await?;
        if output.success() {
            Ok(())
        } else {
            Err(AppError::external(self.reload.display(), output.diagnostics()))
        }
    }
}

/// What occupied a subdomain's config slots before an apply
#[derive(Debug)]
struct Snapshot {
    available: Option<Vec<u8>>,
    enabled: Option<EnabledEntry>,
}

#[derive(Debug)]
enum EnabledEntry {
    Link(PathBuf),
    File(Vec<u8>),
}

/// Owns the per-subdomain `<subdomain>.conf` files and the shared reload surface
pub struct ProxyConfigManager {
    available_dir: PathBuf,
    enabled_dir: PathBuf,
    controller: Arc<dyn ProxyController>,
    lock: Mutex<()>,
}

impl ProxyConfigManager {
    pub fn new(
        available_dir: impl Into<PathBuf>,
        enabled_dir: impl Into<PathBuf>,
        controller: Arc<dyn ProxyController>,
    ) -> Self {
        Self {
            available_dir: available_dir.into(),
            enabled_dir: enabled_dir.into(),
            controller,
            lock: Mutex::new(()),
        }
    }

    pub fn available_path(&self, subdomain: &str) -> PathBuf {
        self.available_dir.join(format!("{}.conf", subdomain))
    }

    pub fn enabled_path(&self, subdomain: &str) -> PathBuf {
        self.enabled_dir.join(format!("{}.conf", subdomain))
    }

    /// Write the rendered config to the "available" location
    pub async fn install(&self, subdomain: &str, config: &str) -> AppResult<PathBuf> {
        let path = self.available_path(subdomain);
        write_atomic(&path, config.as_bytes()).await?;
        Ok(path)
    }

    /// Enable a subdomain's config. Re-activating is a no-op.
    pub async fn activate(&self, subdomain: &str) -> AppResult<()> {
        let source = self.available_path(subdomain);
        let target = self.enabled_path(subdomain);
        fs::create_dir_all(&self.enabled_dir).await?;

        if let Ok(existing) = fs::read_link(&target).await {
            if existing == source {
                return Ok(());
            }
        }
        if fs::symlink_metadata(&target).await.is_ok() {
            fs::remove_file(&target).await?;
        }

        link(&source, &target).await?;
        tracing::debug!(subdomain = %subdomain, "Proxy config enabled");
        Ok(())
    }

    pub async fn validate(&self) -> AppResult<ValidationReport> {
        self.controller.validate().await
    }

    pub async fn reload(&self) -> AppResult<()> {
        self.controller.reload().await
    }

    /// Install, enable, check and reload a subdomain's config as one step.
    ///
    /// Holds the process-wide proxy lock throughout. If the check fails or
    /// cannot run, the previous files are restored and no reload happens.
    pub async fn apply(&self, subdomain: &str, config: &str) -> AppResult<()> {
        let _guard = self.lock.lock().await;
        let snapshot = self.snapshot(subdomain).await?;

        if let Err(e) = self.stage(subdomain, config).await {
            self.restore(subdomain, &snapshot).await;
            return Err(e);
        }

        match self.controller.validate().await {
            Ok(report) if report.ok => {}
            Ok(report) => {
                tracing::warn!(
                    subdomain = %subdomain,
                    diagnostics = %report.diagnostics,
                    "Proxy config rejected"
                );
                self.restore(subdomain, &snapshot).await;
                return Err(AppError::external("proxy validation", report.diagnostics));
            }
            Err(e) => {
                self.restore(subdomain, &snapshot).await;
                return Err(e);
            }
        }

        if let Err(e) = self.controller.reload().await {
            tracing::error!(subdomain = %subdomain, error = %e, "Proxy reload failed");
            self.restore(subdomain, &snapshot).await;
            return Err(e);
        }

        tracing::info!(subdomain = %subdomain, "Proxy config applied");
        Ok(())
    }

    async fn stage(&self, subdomain: &str, config: &str) -> AppResult<()> {
        self.install(subdomain, config).await?;
        self.activate(subdomain).await
    }

    async fn snapshot(&self, subdomain: &str) -> AppResult<Snapshot> {
        let available = match fs::read(self.available_path(subdomain)).await {
            Ok(bytes) => Some(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => return Err(e.into()),
        };

        let target = self.enabled_path(subdomain);
        let enabled = match fs::symlink_metadata(&target).await {
            Ok(meta) if meta.file_type().is_symlink() => {
                Some(EnabledEntry::Link(fs::read_link(&target).await?))
            }
            Ok(_) => Some(EnabledEntry::File(fs::read(&target).await?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => return Err(e.into()),
        };

        Ok(Snapshot { available, enabled })
    }

    /// Put a snapshot back. Failures are logged; the original error wins.
    async fn restore(&self, subdomain: &str, snapshot: &Snapshot) {
        let available = self.available_path(subdomain);
        let result = match &snapshot.available {
            Some(bytes) => write_atomic(&available, bytes).await,
            None => remove_if_present(&available).await,
        };
        if let Err(e) = result {
            tracing::error!(subdomain = %subdomain, error = %e, "Failed to restore available proxy config");
        }

        let enabled = self.enabled_path(subdomain);
        let result = async {
            remove_if_present(&enabled).await?;
            match &snapshot.enabled {
                Some(EnabledEntry::Link(source)) => link(source, &enabled).await,
                Some(EnabledEntry::File(bytes)) => write_atomic(&enabled, bytes).await,
                None => Ok(()),
            }
        }
        .await;
        if let Err(e) = result {
            tracing::error!(subdomain = %subdomain, error = %e, "Failed to restore enabled proxy config");
        }
    }
}

async fn remove_if_present(path: &Path) -> AppResult<()> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[cfg(unix)]
async fn link(source: &Path, target: &Path) -> AppResult<()> {
    fs::symlink(source, target).await?;
    Ok(())
}

#[cfg(not(unix))]
async fn link(source: &Path, target: &Path) -> AppResult<()> {
    fs::copy(source, target).await?;
    Ok(())
}
