use std::sync::Arc;

use anyhow::Context as _;
use axum::http::{header, HeaderMap};
use base64::Engine as _;
use tracing::{debug, warn};

use super::store::CredentialStore;
use crate::http::handler::AppError;

/// Username/password pair carried by an HTTP Basic `Authorization` header.
#[derive(Clone, PartialEq, Eq)]
pub struct BasicCredentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for BasicCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BasicCredentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Decode an `Authorization: Basic ...` header.  Returns `None` when the
/// header is absent, uses another scheme, or is malformed.
pub fn parse_basic_auth(headers: &HeaderMap) -> Option<BasicCredentials> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, encoded) = value.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("basic") {
        return None;
    }
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(encoded.trim())
        .ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (username, password) = decoded.split_once(':')?;
    Some(BasicCredentials {
        username: username.to_string(),
        password: password.to_string(),
    })
}

/// Authenticate the caller against the credential store and return the
/// principal.  Hash checks run on the blocking pool.
pub async fn authenticate(
    store: &Arc<CredentialStore>,
    headers: &HeaderMap,
) -> Result<String, AppError> {
    let Some(credentials) = parse_basic_auth(headers) else {
        debug!("missing or malformed basic auth header");
        return Err(AppError::Unauthorized("authentication required".into()));
    };

    let store = Arc::clone(store);
    let BasicCredentials { username, password } = credentials;
    let (username, verified) = tokio::task::spawn_blocking(move || {
        let verified = store.verify(&username, &password);
        (username, verified)
    })
    .await
    .context("credential verification task failed")?;

    if verified {
        Ok(username)
    } else {
        warn!(principal = %username, "invalid credentials");
        Err(AppError::Unauthorized("invalid credentials".into()))
    }
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;
    use prometheus_client::metrics::counter::Counter;

    use super::*;

    fn headers_with(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_str(value).unwrap());
        headers
    }

    fn basic(user_pass: &str) -> HeaderMap {
        let encoded = base64::engine::general_purpose::STANDARD.encode(user_pass);
        headers_with(&format!("Basic {encoded}"))
    }

    // ── Header parsing ───────────────────────────────────────────────

    #[test]
    fn parses_basic_header() {
        let creds = parse_basic_auth(&basic("alice/demo:s3cret")).unwrap();
        assert_eq!(creds.username, "alice/demo");
        assert_eq!(creds.password, "s3cret");
    }

    #[test]
    fn password_may_contain_colons() {
        let creds = parse_basic_auth(&basic("alice/demo:a:b:c")).unwrap();
        assert_eq!(creds.password, "a:b:c");
    }

    #[test]
    fn scheme_is_case_insensitive() {
        let encoded = base64::engine::general_purpose::STANDARD.encode("u:p");
        assert!(parse_basic_auth(&headers_with(&format!("basic {encoded}"))).is_some());
    }

    #[test]
    fn rejects_missing_header() {
        assert!(parse_basic_auth(&HeaderMap::new()).is_none());
    }

    #[test]
    fn rejects_bearer_scheme() {
        assert!(parse_basic_auth(&headers_with("Bearer abc")).is_none());
    }

    #[test]
    fn rejects_invalid_base64() {
        assert!(parse_basic_auth(&headers_with("Basic !!!")).is_none());
    }

    #[test]
    fn rejects_payload_without_colon() {
        assert!(parse_basic_auth(&basic("nocolon")).is_none());
    }

    #[test]
    fn debug_redacts_password() {
        let creds = parse_basic_auth(&basic("alice/demo:s3cret")).unwrap();
        assert!(!format!("{creds:?}").contains("s3cret"));
    }

    // ── authenticate ─────────────────────────────────────────────────

    #[tokio::test]
    async fn authenticate_returns_principal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".passwd");
        std::fs::write(&path, "alice/demo:pw\n").unwrap();
        let store = Arc::new(CredentialStore::new(&path, Counter::default()));

        let principal = authenticate(&store, &basic("alice/demo:pw")).await.unwrap();
        assert_eq!(principal, "alice/demo");
    }

    #[tokio::test]
    async fn authenticate_rejects_wrong_password() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".passwd");
        std::fs::write(&path, "alice/demo:pw\n").unwrap();
        let store = Arc::new(CredentialStore::new(&path, Counter::default()));

        let err = authenticate(&store, &basic("alice/demo:bad")).await.unwrap_err();
        assert!(matches!(err, AppError::Unauthorized(_)));
    }

    #[tokio::test]
    async fn authenticate_rejects_missing_header() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(CredentialStore::new(
            dir.path().join(".passwd"),
            Counter::default(),
        ));

        let err = authenticate(&store, &HeaderMap::new()).await.unwrap_err();
        assert!(matches!(err, AppError::Unauthorized(_)));
    }
}
