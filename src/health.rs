use std::sync::Arc;

use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;

use crate::auth::store::{CredentialStore, StoreState};
use crate::forge::ForgeBackend;

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub checks: HealthChecks,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Ok,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Serialize)]
pub struct HealthChecks {
    pub credentials: CheckResult,
    pub upstream: CheckResult,
}

#[derive(Debug, Serialize)]
pub struct CheckResult {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl CheckResult {
    fn healthy(detail: impl Into<String>) -> Self {
        Self {
            ok: true,
            detail: Some(detail.into()),
        }
    }

    fn unhealthy(detail: impl Into<String>) -> Self {
        Self {
            ok: false,
            detail: Some(detail.into()),
        }
    }
}

// ---------------------------------------------------------------------------
// Individual checks
// ---------------------------------------------------------------------------

async fn check_credentials(store: &Arc<CredentialStore>) -> CheckResult {
    let store = Arc::clone(store);
    let result = tokio::task::spawn_blocking(move || {
        let status = store.status();
        (status, store.path().display().to_string())
    })
    .await;

    match result {
        Ok((status, path)) => match status.state {
            StoreState::Loaded => {
                CheckResult::healthy(format!("{} principals loaded", status.principals))
            }
            StoreState::Missing => {
                CheckResult::unhealthy(format!("credential file {path} not found"))
            }
            StoreState::Uninitialized => {
                CheckResult::unhealthy(format!("credential file {path} could not be read"))
            }
        },
        Err(e) => CheckResult::unhealthy(format!("credential check task failed: {e}")),
    }
}

async fn check_upstream(forge: &dyn ForgeBackend) -> CheckResult {
    match forge.ping().await {
        Ok(()) => {
            let rate_limit = forge.rate_limit();
            if rate_limit.is_known() {
                CheckResult::healthy(format!("{} API calls remaining", rate_limit.remaining()))
            } else {
                CheckResult::healthy("reachable")
            }
        }
        Err(e) => CheckResult::unhealthy(format!("{e:#}")),
    }
}

// ---------------------------------------------------------------------------
// Aggregate status
// ---------------------------------------------------------------------------

fn aggregate_status(checks: &HealthChecks) -> HealthStatus {
    // Without the upstream nothing can be served; without credentials every
    // request is refused but the process itself is fine.
    if !checks.upstream.ok {
        HealthStatus::Unhealthy
    } else if !checks.credentials.ok {
        HealthStatus::Degraded
    } else {
        HealthStatus::Ok
    }
}

/// Run every check concurrently.  200 on Ok/Degraded, 503 on Unhealthy.
pub async fn health_report(
    credentials: &Arc<CredentialStore>,
    forge: &dyn ForgeBackend,
) -> (StatusCode, Json<HealthResponse>) {
    let (credentials, upstream) =
        tokio::join!(check_credentials(credentials), check_upstream(forge));

    let checks = HealthChecks {
        credentials,
        upstream,
    };
    let status = aggregate_status(&checks);
    let body = HealthResponse { status, checks };

    let http_status = match status {
        HealthStatus::Ok | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (http_status, Json(body))
}

#[cfg(test)]
mod tests {
    use httpmock::prelude::*;
    use prometheus_client::metrics::counter::Counter;

    use super::*;
    use crate::config::Config;
    use crate::forge::github::GitHubBackend;

    fn store_at(path: &std::path::Path) -> Arc<CredentialStore> {
        Arc::new(CredentialStore::new(path, Counter::default()))
    }

    #[tokio::test]
    async fn healthy_when_both_checks_pass() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/rate_limit");
                then.status(200)
                    .header("X-RateLimit-Remaining", "4999")
                    .json_body(serde_json::json!({"resources": {}}));
            })
            .await;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".passwd");
        std::fs::write(&path, "alice/demo:pw\nbob/other:pw\n").unwrap();

        let backend = GitHubBackend::new(&Config::for_tests(&server.base_url(), &path)).unwrap();
        let (status, Json(body)) = health_report(&store_at(&path), &backend).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.status, HealthStatus::Ok);
        assert_eq!(body.checks.credentials.detail.as_deref(), Some("2 principals loaded"));
        assert_eq!(
            body.checks.upstream.detail.as_deref(),
            Some("4999 API calls remaining")
        );
    }

    #[tokio::test]
    async fn missing_credentials_degrade() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/rate_limit");
                then.status(200).body("{}");
            })
            .await;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".passwd");

        let backend = GitHubBackend::new(&Config::for_tests(&server.base_url(), &path)).unwrap();
        let (status, Json(body)) = health_report(&store_at(&path), &backend).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.status, HealthStatus::Degraded);
        assert!(!body.checks.credentials.ok);
    }

    #[tokio::test]
    async fn upstream_failure_is_unhealthy() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/rate_limit");
                then.status(401);
            })
            .await;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".passwd");
        std::fs::write(&path, "alice/demo:pw\n").unwrap();

        let backend = GitHubBackend::new(&Config::for_tests(&server.base_url(), &path)).unwrap();
        let (status, Json(body)) = health_report(&store_at(&path), &backend).await;

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body.status, HealthStatus::Unhealthy);
        assert!(body.checks.credentials.ok);
        assert!(!body.checks.upstream.ok);
    }

    #[test]
    fn status_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&HealthStatus::Degraded).unwrap(),
            "\"degraded\""
        );
    }
}
