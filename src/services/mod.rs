pub mod artifact;
pub mod auth;
pub mod certificate;
pub mod deployment;
pub mod health;
pub mod process;
pub mod proxy;
pub mod subdomain;

pub use artifact::{ArtifactGenerator, ArtifactWriter, GeneratedArtifact, HttpArtifactGenerator};
pub use auth::{AuthService, Claims};
pub use certificate::{CertbotClient, CertificateClient, CertificatePaths, CertificateProvisioner};
pub use deployment::{DeploymentService, SiteSettings, ToolLocks};
pub use health::{HealthMonitor, HealthSweep};
pub use process::{CommandSpec, ProcessOutput, ProcessRunner, TokioProcessRunner};
pub use proxy::{
    render_site_config, NginxController, ProxyConfigManager, ProxyController, SiteContext,
    ValidationReport,
};
pub use subdomain::{slugify, validate_subdomain, SubdomainAllocator};
