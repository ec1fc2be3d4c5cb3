//! Signing certificate acquisition.
//!
//! Providers are tried in order and the first one that yields a PEM wins.
//! The default chain is: configured file, environment variable, cached
//! download, fresh download (written to the cache for the next start).

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::HttpDirectory;
use crate::config::AuthConfig;

#[derive(Debug, Error)]
pub enum CertificateError {
    #[error("Certificate source '{source_name}' unavailable: {reason}")]
    Unavailable { source_name: String, reason: String },

    #[error("No certificate source succeeded (tried: {0})")]
    Exhausted(String),
}

impl CertificateError {
    fn unavailable(source_name: impl Into<String>, reason: impl ToString) -> Self {
        Self::Unavailable {
            source_name: source_name.into(),
            reason: reason.to_string(),
        }
    }
}

/// One place a certificate may come from.
#[async_trait]
pub trait CertificateProvider: Send + Sync {
    fn name(&self) -> String;

    async fn load(&self) -> Result<String, CertificateError>;
}

/// PEM file on disk.
#[derive(Debug, Clone)]
pub struct FileCertificate {
    path: PathBuf,
}

impl FileCertificate {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl CertificateProvider for FileCertificate {
    fn name(&self) -> String {
        format!("file:{}", self.path.display())
    }

    async fn load(&self) -> Result<String, CertificateError> {
        let pem = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| CertificateError::unavailable(self.name(), e))?;
        non_empty(self.name(), pem)
    }
}

/// PEM held in an environment variable.
#[derive(Debug, Clone)]
pub struct EnvCertificate {
    var: String,
}

impl EnvCertificate {
    pub fn new(var: impl Into<String>) -> Self {
        Self { var: var.into() }
    }
}

#[async_trait]
impl CertificateProvider for EnvCertificate {
    fn name(&self) -> String {
        format!("env:{}", self.var)
    }

    async fn load(&self) -> Result<String, CertificateError> {
        let pem = std::env::var(&self.var).map_err(|e| CertificateError::unavailable(self.name(), e))?;
        non_empty(self.name(), pem)
    }
}

/// Downloaded from the directory and cached to a file.
#[derive(Debug, Clone)]
pub struct RemoteCertificate {
    directory: HttpDirectory,
    cache_path: PathBuf,
}

impl RemoteCertificate {
    pub fn new(directory: HttpDirectory, cache_path: impl Into<PathBuf>) -> Self {
        Self {
            directory,
            cache_path: cache_path.into(),
        }
    }
}

#[async_trait]
impl CertificateProvider for RemoteCertificate {
    fn name(&self) -> String {
        format!("remote:{}", self.directory.endpoint())
    }

    async fn load(&self) -> Result<String, CertificateError> {
        let pem = self
            .directory
            .fetch_certificate()
            .await
            .map_err(|e| CertificateError::unavailable(self.name(), e))?;
        let pem = non_empty(self.name(), pem)?;

        match tokio::fs::write(&self.cache_path, pem.as_bytes()).await {
            Ok(()) => info!(path = %self.cache_path.display(), "Certificate downloaded and cached"),
            Err(e) => warn!(
                path = %self.cache_path.display(),
                error = %e,
                "Failed to cache downloaded certificate"
            ),
        }
        Ok(pem)
    }
}

/// Ordered list of providers.
#[derive(Clone, Default)]
pub struct CertificateChain {
    providers: Vec<Arc<dyn CertificateProvider>>,
}

impl CertificateChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_provider(mut self, provider: impl CertificateProvider + 'static) -> Self {
        self.providers.push(Arc::new(provider));
        self
    }

    /// The standard chain for a gateway in front of `directory`.
    pub fn standard(auth: &AuthConfig, directory: HttpDirectory) -> Self {
        Self::new()
            .with_provider(FileCertificate::new(auth.certificate_path.clone()))
            .with_provider(EnvCertificate::new(auth.certificate_env.clone()))
            .with_provider(FileCertificate::new(auth.certificate_cache_path.clone()))
            .with_provider(RemoteCertificate::new(
                directory,
                auth.certificate_cache_path.clone(),
            ))
    }

    /// Try each provider in turn. Fails only when every provider failed.
    pub async fn resolve(&self) -> Result<String, CertificateError> {
        let mut tried = Vec::with_capacity(self.providers.len());
        for provider in &self.providers {
            match provider.load().await {
                Ok(pem) => {
                    info!(source = %provider.name(), "Certificate loaded");
                    return Ok(pem);
                }
                Err(e) => {
                    debug!(error = %e, "Certificate source skipped");
                    tried.push(provider.name());
                }
            }
        }
        Err(CertificateError::Exhausted(tried.join(", ")))
    }
}

impl std::fmt::Debug for CertificateChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<String> = self.providers.iter().map(|p| p.name()).collect();
        f.debug_struct("CertificateChain").field("providers", &names).finish()
    }
}

fn non_empty(source: String, pem: String) -> Result<String, CertificateError> {
    if pem.trim().is_empty() {
        Err(CertificateError::unavailable(source, "empty certificate"))
    } else {
        Ok(pem)
    }
}
