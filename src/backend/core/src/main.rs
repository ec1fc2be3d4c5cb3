//! Portcullis Server - Main entry point
//!
//! RBAC gateway in front of an external identity directory.

use std::sync::Arc;

use anyhow::Context;
use jsonwebtoken::Algorithm;
use tracing::{info, warn};

use portcullis_core::{
    api::{self, AppState},
    config::Config,
    directory::{CertificateChain, HttpDirectory, IdentityDirectory},
    middleware::{Authenticator, TokenConfig},
    observability,
    rbac::{DirectorySync, PermissionTemplates, PolicyEngine, PolicyFile, PolicyStore},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Load configuration
    let config = Config::load().context("Failed to load configuration")?;

    // Initialize observability
    observability::init("portcullis-server", &config.observability)?;
    let metrics = if config.observability.metrics_enabled {
        Some(observability::metrics::install_recorder()?)
    } else {
        None
    };

    info!(
        version = env!("CARGO_PKG_VERSION"),
        organization = %config.directory.organization,
        "Starting Portcullis Server"
    );

    let http_directory = HttpDirectory::new(&config.directory)?;
    let directory: Arc<dyn IdentityDirectory> = Arc::new(http_directory.clone());
    let tenant = config.directory.tenant();

    // Token verification
    let authenticator = Arc::new(Authenticator::new(
        token_config(&config, http_directory).await?,
        tenant.clone(),
        directory.clone(),
    )?);

    // Policy store, seeded from the last persisted policy
    let store = Arc::new(PolicyStore::new());
    let policy_file = config.rbac.policy_file.clone().map(PolicyFile::new);
    let mut restored = false;
    if let Some(file) = &policy_file {
        if let Some(set) = file.load().await? {
            store.replace_all(set)?;
            restored = true;
        }
    }

    let templates = match &config.rbac.templates {
        Some(raw) => PermissionTemplates::from_config(raw)?,
        None => PermissionTemplates::for_mode(config.rbac.enforcement),
    };

    let mut sync = DirectorySync::new(directory.clone(), store.clone(), tenant)
        .with_templates(templates)
        .with_timeout(config.directory.timeout());
    if let Some(file) = policy_file {
        sync = sync.with_policy_file(file);
    }
    let sync = Arc::new(sync);

    if config.rbac.sync_on_startup {
        match sync.sync().await {
            Ok(_) => {}
            Err(e) if restored => {
                warn!(error = %e, "Startup sync failed, enforcing the persisted policy");
            }
            Err(e) => return Err(e).context("Startup sync failed and no persisted policy exists"),
        }
    }

    // Create app state
    let app_state = AppState {
        directory,
        engine: Arc::new(PolicyEngine::new(store)),
        authenticator,
        sync,
        metrics,
        enforcement: config.rbac.enforcement,
        redirect_url: config.directory.redirect_url.clone(),
    };

    // Build router
    let app = api::build_router(app_state);

    // Start server
    let addr = format!("{}:{}", config.server.host, config.server.port);
    info!(address = %addr, enforcement = ?config.rbac.enforcement, "Starting HTTP server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Cleanup
    observability::shutdown();
    info!("Server shutdown complete");

    Ok(())
}

/// Verification key for the configured algorithm: the shared secret for
/// HMAC, otherwise the directory certificate.
async fn token_config(config: &Config, directory: HttpDirectory) -> anyhow::Result<TokenConfig> {
    let algorithm: Algorithm = config
        .auth
        .jwt_algorithm
        .parse()
        .with_context(|| format!("Unknown JWT algorithm '{}'", config.auth.jwt_algorithm))?;

    let builder = TokenConfig::builder()
        .leeway_secs(config.auth.leeway_secs)
        .audience(
            config
                .auth
                .audience
                .clone()
                .unwrap_or_else(|| config.directory.client_id.clone()),
        );

    let builder = match algorithm {
        Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512 => {
            let secret = config
                .auth
                .jwt_secret
                .clone()
                .context("auth.jwt_secret is required for HMAC algorithms")?;
            builder.hmac_secret(secret)
        }
        _ => {
            let pem = CertificateChain::standard(&config.auth, directory)
                .resolve()
                .await?;
            builder.rsa_certificate(pem)
        }
    };

    // Key setters pick a default algorithm, so the configured one goes last.
    Ok(builder.algorithm(algorithm).build())
}

/// Wait for shutdown signal.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
