//! PKCE Login Gateway
//!
//! Single-binary Rust service that:
//! 1. Sends the user agent to the authorization server with a PKCE challenge
//! 2. Exchanges the callback code and persists the credential
//! 3. Keeps the access token fresh and calls the resource API with it

mod config;
mod error;
mod metrics;
mod routes;

use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use pkce_auth::{CredentialStore, ResourceClient, Session};
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::routes::{AppState, build_router};

#[tokio::main]
async fn main() -> Result<()> {
    // JSON output, LOG_LEVEL then RUST_LOG, default info
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("starting pkce-login-gateway");

    // Recorder must exist before the auth core emits anything
    let prometheus_handle = metrics::install_recorder()?;

    let args: Vec<String> = std::env::args().collect();
    let cli_config_path = args
        .iter()
        .position(|a| a == "--config")
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str());

    let config_path = Config::resolve_path(cli_config_path);
    info!(path = %config_path.display(), "loading configuration");

    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    info!(
        listen_addr = %config.server.listen_addr,
        redirect_uri = %config.oauth.redirect_uri,
        token_endpoint = %config.oauth.token_endpoint,
        "configuration loaded"
    );

    let store = CredentialStore::load(config.storage.credentials_path.clone()).with_context(|| {
        format!(
            "failed to open credential store at {}",
            config.storage.credentials_path.display()
        )
    })?;
    if let Some(path) = store.path() {
        info!(path = %path.display(), empty = store.is_empty(), "credential store opened");
    }

    let http_client = reqwest::Client::builder()
        .timeout(config.api_timeout())
        .build()
        .context("failed to build HTTP client")?;

    let session = Arc::new(
        Session::new(config.oauth_config(), store, http_client)
            .context("invalid OAuth configuration")?,
    );
    info!(
        authenticated = session.is_authenticated(),
        scopes = %session.config().scope_param(),
        "session restored"
    );

    let resources = ResourceClient::new(
        session.clone(),
        config.api.base_url.clone(),
        config.api_timeout(),
    );

    let state = AppState {
        session,
        resources,
        prometheus: prometheus_handle,
        started_at: Instant::now(),
    };
    let app = build_router(state, config.server.max_connections);

    let listen_addr = config.server.listen_addr;
    let listener = TcpListener::bind(listen_addr)
        .await
        .with_context(|| format!("failed to bind to {listen_addr}"))?;
    info!(addr = %listen_addr, "accepting requests");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!("shutdown complete");
    Ok(())
}

/// Wait for SIGTERM or SIGINT for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for Ctrl+C");
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
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}
