use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::json;

use toolhost::error::{AppError, AppResult};
use toolhost::models::Tool;
use toolhost::services::{
    ArtifactGenerator, CertificateClient, CertificatePaths, GeneratedArtifact, ProxyController,
    ValidationReport,
};
use toolhost::state::Backends;

/// Generator producing distinct content on every call
#[derive(Default)]
pub struct FakeGenerator {
    pub calls: AtomicUsize,
    pub fail: AtomicBool,
}

#[async_trait]
impl ArtifactGenerator for FakeGenerator {
    async fn generate(&self, tool: &Tool) -> AppResult<GeneratedArtifact> {
        let build = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail.load(Ordering::SeqCst) {
            return Err(AppError::external("artifact generator", "HTTP 500: boom"));
        }

        Ok(GeneratedArtifact {
            markup: format!("<!doctype html><h1>{} build {}</h1>", tool.name, build),
            behavior_script: format!("window.BUILD = {};", build),
            manifest: json!({ "features": { "build": build } }),
        })
    }
}

/// Proxy controller that can be told to reject the next configs
#[derive(Default)]
pub struct FakeProxy {
    pub reject: AtomicBool,
    /// Reject every validation after this many have passed
    pub reject_after: Mutex<Option<usize>>,
    pub fail_reload: AtomicBool,
    pub validations: AtomicUsize,
    pub reloads: AtomicUsize,
}

impl FakeProxy {
    pub fn reloads(&self) -> usize {
        self.reloads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProxyController for FakeProxy {
    async fn validate(&self) -> AppResult<ValidationReport> {
        let count = self.validations.fetch_add(1, Ordering::SeqCst) + 1;
        let over_limit = self
            .reject_after
            .lock()
            .unwrap()
            .is_some_and(|limit| count > limit);
        if self.reject.load(Ordering::SeqCst) || over_limit {
            return Ok(ValidationReport {
                ok: false,
                diagnostics: "nginx: [emerg] unknown directive \"sever_name\"".to_string(),
            });
        }
        Ok(ValidationReport {
            ok: true,
            diagnostics: "nginx: configuration file test is successful".to_string(),
        })
    }

    async fn reload(&self) -> AppResult<()> {
        if self.fail_reload.load(Ordering::SeqCst) {
            return Err(AppError::external("nginx -s reload", "no master process"));
        }
        self.reloads.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// ACME client that drops placeholder certificate files into the live dir
pub struct FakeCertificates {
    live_dir: PathBuf,
    pub fail: AtomicBool,
    pub requested: Mutex<Vec<String>>,
}

impl FakeCertificates {
    pub fn new(live_dir: &Path) -> Self {
        Self {
            live_dir: live_dir.to_path_buf(),
            fail: AtomicBool::new(false),
            requested: Mutex::new(Vec::new()),
        }
    }

    pub fn requested(&self) -> Vec<String> {
        self.requested.lock().unwrap().clone()
    }
}

#[async_trait]
impl CertificateClient for FakeCertificates {
    async fn obtain_certificate(&self, domain: &str) -> AppResult<CertificatePaths> {
        self.requested.lock().unwrap().push(domain.to_string());
        if self.fail.load(Ordering::SeqCst) {
            return Err(AppError::external(
                "certbot certonly",
                format!("Challenge failed for domain {}", domain),
            ));
        }

        let paths = CertificatePaths::for_domain(&self.live_dir, domain);
        std::fs::create_dir_all(self.live_dir.join(domain)).unwrap();
        std::fs::write(&paths.certificate, "CERT").unwrap();
        std::fs::write(&paths.private_key, "KEY").unwrap();
        Ok(paths)
    }
}

/// Handles on the fakes injected into a test app
#[derive(Clone)]
pub struct Fakes {
    pub generator: Arc<FakeGenerator>,
    pub proxy: Arc<FakeProxy>,
    pub certificates: Arc<FakeCertificates>,
}

impl Fakes {
    pub fn new(cert_live_dir: &Path) -> Self {
        Self {
            generator: Arc::new(FakeGenerator::default()),
            proxy: Arc::new(FakeProxy::default()),
            certificates: Arc::new(FakeCertificates::new(cert_live_dir)),
        }
    }

    pub fn backends(&self) -> Backends {
        Backends {
            generator: self.generator.clone(),
            proxy: self.proxy.clone(),
            certificates: self.certificates.clone(),
        }
    }
}
