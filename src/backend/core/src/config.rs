//! Configuration management.
//!
//! Values come from an optional file (path in `PORTCULLIS_CONFIG`) overlaid
//! by `PORTCULLIS__SECTION__KEY` environment variables.

use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::rbac::middleware::EnforcementMode;
use crate::rbac::models::DomainId;

const ENV_PREFIX: &str = "PORTCULLIS";

/// Environment variable naming an optional config file.
pub const CONFIG_PATH_ENV: &str = "PORTCULLIS_CONFIG";

/// Main application configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Identity directory connection
    pub directory: DirectoryConfig,

    /// Token validation
    #[serde(default)]
    pub auth: AuthConfig,

    /// Policy store and enforcement
    #[serde(default)]
    pub rbac: RbacConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// HTTP server host
    #[serde(default = "default_host")]
    pub host: String,

    /// HTTP server port
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DirectoryConfig {
    /// Base URL of the directory, e.g. `http://localhost:8000`
    pub endpoint: String,

    pub client_id: String,

    pub client_secret: String,

    /// Organization (tenant) the gateway serves
    pub organization: String,

    /// Application registered in the directory for this gateway
    pub application: String,

    /// Where the directory sends the browser after sign-in
    #[serde(default = "default_redirect_url")]
    pub redirect_url: String,

    /// Per-request timeout for directory calls
    #[serde(default = "default_directory_timeout_secs")]
    pub timeout_secs: u64,
}

impl DirectoryConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn tenant(&self) -> DomainId {
        DomainId::new(self.organization.as_str())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// JWT signing algorithm. `RS256` verifies with the directory certificate;
    /// `HS256` verifies with `jwt_secret`.
    #[serde(default = "default_jwt_algorithm")]
    pub jwt_algorithm: String,

    /// Shared secret for `HS256`
    pub jwt_secret: Option<String>,

    /// Certificate file tried first
    #[serde(default = "default_certificate_path")]
    pub certificate_path: PathBuf,

    /// Environment variable tried second
    #[serde(default = "default_certificate_env")]
    pub certificate_env: String,

    /// Where a downloaded certificate is cached
    #[serde(default = "default_certificate_cache_path")]
    pub certificate_cache_path: PathBuf,

    /// Clock skew tolerance in seconds
    #[serde(default = "default_leeway_secs")]
    pub leeway_secs: u64,

    /// Expected `aud` claim. Defaults to the directory client id.
    pub audience: Option<String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_algorithm: default_jwt_algorithm(),
            jwt_secret: None,
            certificate_path: default_certificate_path(),
            certificate_env: default_certificate_env(),
            certificate_cache_path: default_certificate_cache_path(),
            leeway_secs: default_leeway_secs(),
            audience: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RbacConfig {
    /// Route permissions or normalized path + method
    #[serde(default)]
    pub enforcement: EnforcementMode,

    /// Flat policy file, rewritten after every successful sync
    pub policy_file: Option<PathBuf>,

    /// Run a directory sync before accepting traffic
    #[serde(default = "default_sync_on_startup")]
    pub sync_on_startup: bool,

    /// Replacement for the built-in permission templates,
    /// role name to `resource:action` strings
    pub templates: Option<HashMap<String, Vec<String>>>,
}

impl Default for RbacConfig {
    fn default() -> Self {
        Self {
            enforcement: EnforcementMode::default(),
            policy_file: None,
            sync_on_startup: default_sync_on_startup(),
            templates: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ObservabilityConfig {
    /// OpenTelemetry OTLP endpoint
    pub otlp_endpoint: Option<String>,

    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default = "default_json_logging")]
    pub json_logging: bool,

    /// Install the Prometheus recorder and serve `/metrics`
    #[serde(default = "default_metrics_enabled")]
    pub metrics_enabled: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            otlp_endpoint: None,
            log_level: default_log_level(),
            json_logging: default_json_logging(),
            metrics_enabled: default_metrics_enabled(),
        }
    }
}

// Default value functions
fn default_host() -> String { "0.0.0.0".to_string() }
fn default_port() -> u16 { 9000 }
fn default_redirect_url() -> String { "http://localhost:9000/callback".to_string() }
fn default_directory_timeout_secs() -> u64 { 10 }
fn default_jwt_algorithm() -> String { "RS256".to_string() }
fn default_certificate_path() -> PathBuf { PathBuf::from("./token_jwt_key.pem") }
fn default_certificate_env() -> String { "CASDOOR_CERTIFICATE".to_string() }
fn default_certificate_cache_path() -> PathBuf { PathBuf::from("cert.pem") }
fn default_leeway_secs() -> u64 { 60 }
fn default_sync_on_startup() -> bool { true }
fn default_log_level() -> String { "info".to_string() }
fn default_json_logging() -> bool { true }
fn default_metrics_enabled() -> bool { true }

impl Config {
    /// Load configuration from environment and, when `PORTCULLIS_CONFIG` is
    /// set, the file it names.
    pub fn load() -> anyhow::Result<Self> {
        match std::env::var(CONFIG_PATH_ENV) {
            Ok(path) if !path.is_empty() => Self::from_file(&path),
            _ => {
                let config = config::Config::builder()
                    .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"))
                    .build()?;

                let cfg: Config = config.try_deserialize()?;
                Ok(cfg)
            }
        }
    }

    /// Load from a specific file path.
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let config = config::Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()?;

        let cfg: Config = config.try_deserialize()?;
        Ok(cfg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_file_with_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[directory]
endpoint = "http://localhost:8000"
client_id = "client"
client_secret = "secret"
organization = "acme"
application = "gateway"

[rbac]
enforcement = "path"

[rbac.templates]
auditor = ["users:read"]
"#
        )
        .unwrap();

        let cfg = Config::from_file(file.path().to_str().unwrap()).unwrap();
        assert_eq!(cfg.server.port, 9000);
        assert_eq!(cfg.directory.tenant(), DomainId::new("acme"));
        assert_eq!(cfg.directory.timeout(), Duration::from_secs(10));
        assert_eq!(cfg.auth.jwt_algorithm, "RS256");
        assert_eq!(cfg.auth.certificate_env, "CASDOOR_CERTIFICATE");
        assert_eq!(cfg.rbac.enforcement, EnforcementMode::Path);
        assert!(cfg.rbac.sync_on_startup);
        assert_eq!(
            cfg.rbac.templates.unwrap().get("auditor"),
            Some(&vec!["users:read".to_string()])
        );
    }
}
