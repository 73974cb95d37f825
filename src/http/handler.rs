//! Main axum router and HTTP request handlers for the asset proxy.
//!
//! Routes:
//! - `GET /`                                - Liveness probe (empty 200)
//! - `GET /{owner}/{repo}/{tag}/{asset}`    - Stream a release asset
//! - `GET /healthz`                         - Health check
//! - `GET /metrics`                         - Prometheus metrics

use std::sync::Arc;

use anyhow::Context as _;
use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use futures::TryStreamExt;
use tracing::{debug, error, info, instrument, warn};

use crate::auth::middleware::authenticate;
use crate::auth::namespace::authorize;
use crate::metrics::DownloadOutcome;
use crate::release::fetcher::{fetch_asset, AssetStream, FetchOutcome};
use crate::release::resolver::{is_valid_segment, resolve_asset};
use crate::AppState;

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

/// Build the axum [`Router`] with all HTTP routes and shared state.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(handle_root))
        .route("/healthz", get(handle_health))
        .route("/metrics", get(handle_metrics))
        .route(
            "/{owner}/{repo}/{tag}/{asset_name}",
            get(handle_release_asset),
        )
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// `GET /`
async fn handle_root() -> StatusCode {
    StatusCode::OK
}

/// `GET /{owner}/{repo}/{tag}/{asset_name}`
///
/// Authenticate, authorise against the `owner/repo` namespace, resolve the
/// asset and relay its bytes.  Each step runs only after the previous one
/// succeeded; the first failure decides the status code.
#[instrument(skip(state, headers), fields(%owner, %repo, %tag, asset = %asset_name))]
async fn handle_release_asset(
    State(state): State<Arc<AppState>>,
    Path((owner, repo, tag, asset_name)): Path<(String, String, String, String)>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let result = serve_release_asset(&state, &owner, &repo, &tag, &asset_name, &headers).await;
    let outcome = match &result {
        Ok(_) => DownloadOutcome::Streamed,
        Err(e) => e.outcome(),
    };
    state.metrics.metrics.record_download(outcome);
    result
}

async fn serve_release_asset(
    state: &AppState,
    owner: &str,
    repo: &str,
    tag: &str,
    asset_name: &str,
    headers: &HeaderMap,
) -> Result<Response, AppError> {
    // 1. Authenticate.
    let principal = authenticate(&state.credentials, headers).await?;

    // 2. Authorise.  Segments are checked first so a decoded `/` cannot
    //    move the namespace boundary.
    if ![owner, repo, tag, asset_name].into_iter().all(is_valid_segment) {
        debug!(%principal, "rejecting unusable path segment");
        return Err(AppError::NotFound);
    }
    if !authorize(&principal, owner, repo) {
        warn!(%principal, "principal not authorised for namespace");
        return Err(AppError::Forbidden);
    }

    // 3. Resolve.
    let forge = state.forge.as_ref();
    let Some(asset) = resolve_asset(forge, owner, repo, tag, asset_name).await? else {
        return Err(AppError::NotFound);
    };

    // 4. Fetch.
    match fetch_asset(forge, &asset, state.config.chunk_size).await? {
        FetchOutcome::Stream(stream) => {
            info!(%principal, asset_id = asset.id, hop = ?stream.hop, "streaming asset");
            stream_response(state, stream)
        }
        FetchOutcome::NotFound => Err(AppError::NotFound),
        FetchOutcome::Forbidden(status) => {
            debug!(%status, "refusing download");
            Err(AppError::Forbidden)
        }
    }
}

/// `GET /healthz`
async fn handle_health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    crate::health::health_report(&state.credentials, state.forge.as_ref()).await
}

/// `GET /metrics`
///
/// Returns Prometheus metrics collected by the proxy.
async fn handle_metrics(State(state): State<Arc<AppState>>) -> Result<Response, AppError> {
    state
        .metrics
        .metrics
        .observe_rate_limit(state.forge.rate_limit());
    let buf = state
        .metrics
        .encode()
        .map_err(|e| AppError::Internal(anyhow::anyhow!("metrics encoding failed: {e}")))?;

    Ok((
        StatusCode::OK,
        [(
            header::CONTENT_TYPE,
            "application/openmetrics-text; version=1.0.0; charset=utf-8",
        )],
        buf,
    )
        .into_response())
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

/// Relay the upstream stream as the response body without buffering it.
/// Dropping the body (client gone) drops the upstream response with it.
fn stream_response(state: &AppState, stream: AssetStream) -> Result<Response, AppError> {
    let streamed_bytes = state.metrics.metrics.streamed_bytes_total.clone();
    let body = stream.body.inspect_ok(move |chunk| {
        streamed_bytes.inc_by(chunk.len() as u64);
    });

    let mut builder = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, stream.content_type);
    if let Some(len) = stream.content_length {
        builder = builder.header(header::CONTENT_LENGTH, len);
    }
    let response = builder
        .body(Body::from_stream(body))
        .context("failed to build streaming response")?;
    Ok(response)
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Application-level error type that maps cleanly to HTTP responses.
#[derive(Debug)]
pub enum AppError {
    /// Missing, malformed or wrong basic-auth credentials.
    Unauthorized(String),
    /// Authenticated, but not for this namespace, or the upstream refused.
    Forbidden,
    NotFound,
    /// An unexpected internal error.
    Internal(anyhow::Error),
}

impl AppError {
    pub fn outcome(&self) -> DownloadOutcome {
        match self {
            AppError::Unauthorized(_) => DownloadOutcome::Unauthorized,
            AppError::Forbidden => DownloadOutcome::Forbidden,
            AppError::NotFound => DownloadOutcome::NotFound,
            AppError::Internal(_) => DownloadOutcome::Error,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            AppError::Unauthorized(msg) => (
                StatusCode::UNAUTHORIZED,
                [(header::WWW_AUTHENTICATE, "Basic realm=\"assetgate\"")],
                msg,
            )
                .into_response(),
            AppError::Forbidden => (StatusCode::FORBIDDEN, "Forbidden").into_response(),
            AppError::NotFound => (StatusCode::NOT_FOUND, "Not Found").into_response(),
            AppError::Internal(err) => {
                error!(error = %format!("{err:#}"), "internal server error");
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error").into_response()
            }
        }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err)
    }
}
