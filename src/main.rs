mod auth;
mod config;
mod forge;
mod health;
mod http;
mod metrics;
mod release;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::auth::store::CredentialStore;
use crate::config::Config;
use crate::forge::github::GitHubBackend;
use crate::forge::ForgeBackend;
use crate::metrics::MetricsRegistry;

// ---------------------------------------------------------------------------
// Shared application state
// ---------------------------------------------------------------------------

/// Global state shared across all request handlers.
pub struct AppState {
    pub config: Arc<Config>,
    /// htpasswd-backed caller credentials, reloaded on change.
    pub credentials: Arc<CredentialStore>,
    /// Upstream API backend, built once at startup.
    pub forge: Arc<dyn ForgeBackend>,
    pub metrics: MetricsRegistry,
}

impl AppState {
    pub fn new(config: Config, forge: Arc<dyn ForgeBackend>) -> Self {
        let metrics = MetricsRegistry::new();
        let credentials = Arc::new(CredentialStore::new(
            config.passwd_path.clone(),
            metrics.metrics.credential_reloads_total.clone(),
        ));
        Self {
            config: Arc::new(config),
            credentials,
            forge,
            metrics,
        }
    }
}

// ---------------------------------------------------------------------------
// HTTP server (axum)
// ---------------------------------------------------------------------------

async fn run_http_server(state: Arc<AppState>) -> Result<()> {
    let listen_addr = state.config.listen_addr();
    let app = http::handler::create_router(state);

    let listener = tokio::net::TcpListener::bind(listen_addr)
        .await
        .with_context(|| format!("failed to bind HTTP listener on {listen_addr}"))?;

    tracing::info!(%listen_addr, "HTTP server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server error")?;

    Ok(())
}

// ---------------------------------------------------------------------------
// Graceful shutdown
// ---------------------------------------------------------------------------

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("received SIGINT"),
        () = terminate => tracing::info!("received SIGTERM"),
    }
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    // ---- Config ----
    let config = Config::parse();

    // ---- Tracing ----
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    config::validate_config(&config).context("invalid configuration")?;
    tracing::info!(?config, "starting assetgate");

    // ---- Forge backend ----
    let forge: Arc<dyn ForgeBackend> =
        Arc::new(GitHubBackend::new(&config).context("failed to initialise upstream client")?);
    tracing::info!(api_url = %config.github_api_url, "forge backend initialised");

    // ---- App state ----
    let state = Arc::new(AppState::new(config, forge));
    let credentials = state.credentials.status();
    tracing::info!(
        path = %state.credentials.path().display(),
        state = ?credentials.state,
        principals = credentials.principals,
        "credential store ready"
    );

    run_http_server(state).await?;

    tracing::info!("assetgate shut down cleanly");
    Ok(())
}
