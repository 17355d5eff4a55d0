use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Output format for the tracing subscriber
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pretty" | "text" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            _ => Err(ConfigError::Invalid("LOG_FORMAT")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    // Database
    pub database_url: String,

    // JWT
    pub jwt_secret: String,
    pub jwt_expiration_hours: i64,

    // Server
    pub host: String,
    pub port: u16,
    pub log_format: LogFormat,

    // Publishing
    pub tools_domain: String,
    pub deploy_root: PathBuf,
    pub shared_assets_dir: PathBuf,
    pub backend_url: String,
    pub api_base_url: String,
    pub generator_url: String,
    pub generator_timeout_secs: u64,

    // Reverse proxy
    pub proxy_available_dir: PathBuf,
    pub proxy_enabled_dir: PathBuf,
    pub proxy_log_dir: PathBuf,
    pub proxy_binary: String,
    pub proxy_reload_command: String,
    pub proxy_timeout_secs: u64,

    // Certificates
    pub acme_binary: String,
    pub acme_email: String,
    pub acme_webroot: PathBuf,
    pub cert_live_dir: PathBuf,
    pub acme_timeout_secs: u64,

    // Health monitoring
    pub health_timeout_secs: u64,
    pub health_interval_secs: u64,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok(); // Load .env file if exists

        let tools_domain = var_or("TOOLS_DOMAIN", "tools.localhost");

        Ok(Self {
            // Database
            database_url: env::var("DATABASE_URL")
                .map_err(|_| ConfigError::Missing("DATABASE_URL"))?,

            // JWT
            jwt_secret: env::var("JWT_SECRET").map_err(|_| ConfigError::Missing("JWT_SECRET"))?,
            jwt_expiration_hours: parse_or("JWT_EXPIRATION_HOURS", 24)?,

            // Server
            host: var_or("HOST", "0.0.0.0"),
            port: parse_or("PORT", 3000)?,
            log_format: parse_or("LOG_FORMAT", LogFormat::Pretty)?,

            // Publishing
            deploy_root: var_or("DEPLOY_ROOT", "/var/www/tools").into(),
            shared_assets_dir: var_or("SHARED_ASSETS_DIR", "/var/www/shared").into(),
            backend_url: var_or("BACKEND_URL", "http://127.0.0.1:3000"),
            api_base_url: var_or("API_BASE_URL", "/api"),
            generator_url: var_or("ARTIFACT_GENERATOR_URL", "http://127.0.0.1:4000/generate"),
            generator_timeout_secs: parse_or("GENERATOR_TIMEOUT_SECS", 60)?,

            // Reverse proxy
            proxy_available_dir: var_or("PROXY_AVAILABLE_DIR", "/etc/nginx/sites-available").into(),
            proxy_enabled_dir: var_or("PROXY_ENABLED_DIR", "/etc/nginx/sites-enabled").into(),
            proxy_log_dir: var_or("PROXY_LOG_DIR", "/var/log/nginx").into(),
            proxy_binary: var_or("PROXY_BINARY", "nginx"),
            proxy_reload_command: var_or("PROXY_RELOAD_COMMAND", "nginx -s reload"),
            proxy_timeout_secs: parse_or("PROXY_TIMEOUT_SECS", 30)?,

            // Certificates
            acme_binary: var_or("ACME_BINARY", "certbot"),
            acme_email: env::var("ACME_EMAIL").unwrap_or_else(|_| format!("admin@{}", tools_domain)),
            acme_webroot: var_or("ACME_WEBROOT", "/var/www/acme").into(),
            cert_live_dir: var_or("CERT_LIVE_DIR", "/etc/letsencrypt/live").into(),
            acme_timeout_secs: parse_or("ACME_TIMEOUT_SECS", 180)?,

            // Health monitoring
            health_timeout_secs: parse_or("HEALTH_TIMEOUT_SECS", 10)?,
            health_interval_secs: parse_or("HEALTH_INTERVAL_SECS", 300)?,

            tools_domain,
        })
    }

    /// Get server address as "host:port"
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn proxy_timeout(&self) -> Duration {
        Duration::from_secs(self.proxy_timeout_secs)
    }

    pub fn acme_timeout(&self) -> Duration {
        Duration::from_secs(self.acme_timeout_secs)
    }

    pub fn health_timeout(&self) -> Duration {
        Duration::from_secs(self.health_timeout_secs)
    }

    pub fn generator_timeout(&self) -> Duration {
        Duration::from_secs(self.generator_timeout_secs)
    }
}

fn var_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parse_or<T: FromStr>(key: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(key) {
        Ok(raw) => raw.parse().map_err(|_| ConfigError::Invalid(key)),
        Err(_) => Ok(default),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    Missing(&'static str),

    #[error("Invalid environment variable: {0}")]
    Invalid(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_format_parsing() {
        assert_eq!("json".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert_eq!("Pretty".parse::<LogFormat>().unwrap(), LogFormat::Pretty);
        assert!("xml".parse::<LogFormat>().is_err());
    }
}
