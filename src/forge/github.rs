//! GitHub / GitHub Enterprise REST backend.

use anyhow::{anyhow, bail, Context, Result};
use reqwest::header::{ACCEPT, AUTHORIZATION};
use reqwest::{StatusCode, Url};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use super::rate_limit::RateLimitState;
use super::{Asset, AssetPage, ForgeBackend, Release, Repository};
use crate::config::Config;

const USER_AGENT: &str = concat!("assetgate/", env!("CARGO_PKG_VERSION"));
const API_ACCEPT: &str = "application/vnd.github.v3+json";
pub const OCTET_STREAM: &str = "application/octet-stream";

/// Assets requested per listing page (GitHub's maximum).
pub const ASSET_PAGE_SIZE: u32 = 100;

// ---------------------------------------------------------------------------
// Backend struct
// ---------------------------------------------------------------------------

pub struct GitHubBackend {
    api_url: Url,
    token: String,
    /// Client for metadata calls; follows redirects (renamed repositories).
    api_client: reqwest::Client,
    /// Client for asset bytes; never follows redirects.
    download_client: reqwest::Client,
    rate_limit: RateLimitState,
}

impl GitHubBackend {
    /// Build the backend and its HTTP clients.  Fails on an unusable API URL
    /// or TLS backend initialisation errors.
    pub fn new(config: &Config) -> Result<Self> {
        let api_url = Url::parse(&config.github_api_url)
            .with_context(|| format!("invalid GitHub API URL: {}", config.github_api_url))?;
        if api_url.cannot_be_a_base() {
            bail!("GitHub API URL cannot be used as a base: {api_url}");
        }

        let mut api_builder = reqwest::Client::builder().user_agent(USER_AGENT);
        let mut download_builder = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .redirect(reqwest::redirect::Policy::none());
        if let Some(timeout) = config.connect_timeout() {
            api_builder = api_builder.connect_timeout(timeout);
            download_builder = download_builder.connect_timeout(timeout);
        }

        Ok(Self {
            api_url,
            token: config.github_token.clone(),
            api_client: api_builder
                .build()
                .context("failed to build upstream API client")?,
            download_client: download_builder
                .build()
                .context("failed to build upstream download client")?,
            rate_limit: RateLimitState::new(),
        })
    }

    /// Append percent-encoded path segments to the API root.
    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.api_url.clone();
        url.path_segments_mut()
            .map_err(|()| anyhow!("GitHub API URL cannot be a base"))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn bearer(&self) -> String {
        format!("Bearer {}", self.token)
    }

    /// GET a JSON resource.  `Ok(None)` on 404, `Err` on any other failure.
    async fn get_json<T: DeserializeOwned>(&self, url: Url, what: &'static str) -> Result<Option<T>> {
        let resp = self
            .api_client
            .get(url)
            .header(AUTHORIZATION, self.bearer())
            .header(ACCEPT, API_ACCEPT)
            .send()
            .await
            .with_context(|| format!("upstream {what} request failed"))?;

        self.rate_limit.update_from_headers(resp.headers());

        let status = resp.status();
        if status == StatusCode::NOT_FOUND {
            debug!(what, "upstream reports no such resource");
            return Ok(None);
        }
        if !status.is_success() {
            warn!(what, %status, "upstream API returned non-success status");
            bail!("upstream {what} lookup returned {status}");
        }

        let body = resp
            .json::<T>()
            .await
            .with_context(|| format!("failed to parse upstream {what} response"))?;
        Ok(Some(body))
    }
}

fn split_repository(repository: &Repository) -> Result<(&str, &str)> {
    repository
        .owner_and_name()
        .ok_or_else(|| anyhow!("malformed repository name: {:?}", repository.full_name))
}

// ---------------------------------------------------------------------------
// Trait implementation
// ---------------------------------------------------------------------------

#[async_trait::async_trait]
impl ForgeBackend for GitHubBackend {
    async fn repository(&self, owner: &str, repo: &str) -> Result<Option<Repository>> {
        let url = self.endpoint(&["repos", owner, repo])?;
        self.get_json(url, "repository").await
    }

    async fn release_by_tag(
        &self,
        repository: &Repository,
        tag: &str,
    ) -> Result<Option<Release>> {
        let (owner, name) = split_repository(repository)?;
        let url = self.endpoint(&["repos", owner, name, "releases", "tags", tag])?;
        self.get_json(url, "release").await
    }

    async fn release_assets(
        &self,
        repository: &Repository,
        release: &Release,
        page: u32,
    ) -> Result<AssetPage> {
        let (owner, name) = split_repository(repository)?;
        let release_id = release.id.to_string();
        let mut url = self.endpoint(&["repos", owner, name, "releases", &release_id, "assets"])?;
        url.query_pairs_mut()
            .append_pair("per_page", &ASSET_PAGE_SIZE.to_string())
            .append_pair("page", &page.to_string());

        let assets: Vec<Asset> = self
            .get_json(url, "release assets")
            .await?
            .unwrap_or_default();
        let next_page = (assets.len() as u32 >= ASSET_PAGE_SIZE).then_some(page + 1);
        Ok(AssetPage { assets, next_page })
    }

    async fn asset(&self, repository: &Repository, asset_id: u64) -> Result<Option<Asset>> {
        let (owner, name) = split_repository(repository)?;
        let asset_id = asset_id.to_string();
        let url = self.endpoint(&["repos", owner, name, "releases", "assets", &asset_id])?;
        self.get_json(url, "asset").await
    }

    async fn open_asset(&self, asset: &Asset) -> Result<reqwest::Response> {
        let url = Url::parse(&asset.url)
            .with_context(|| format!("invalid asset URL: {}", asset.url))?;
        let resp = self
            .download_client
            .get(url)
            .header(AUTHORIZATION, self.bearer())
            .header(ACCEPT, OCTET_STREAM)
            .send()
            .await
            .context("upstream asset download request failed")?;
        self.rate_limit.update_from_headers(resp.headers());
        Ok(resp)
    }

    async fn open_anonymous(&self, url: Url) -> Result<reqwest::Response> {
        self.download_client
            .get(url)
            .header(ACCEPT, OCTET_STREAM)
            .send()
            .await
            .context("redirected asset download request failed")
    }

    async fn ping(&self) -> Result<()> {
        let url = self.endpoint(&["rate_limit"])?;
        let resp = self
            .api_client
            .get(url)
            .header(AUTHORIZATION, self.bearer())
            .header(ACCEPT, API_ACCEPT)
            .send()
            .await
            .context("upstream API unreachable")?;
        self.rate_limit.update_from_headers(resp.headers());
        let status = resp.status();
        if !status.is_success() {
            bail!("upstream API probe returned {status}");
        }
        Ok(())
    }

    fn rate_limit(&self) -> &RateLimitState {
        &self.rate_limit
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use httpmock::prelude::*;
    use serde_json::json;

    use super::*;

    fn backend_for(server: &MockServer) -> GitHubBackend {
        GitHubBackend::new(&Config::for_tests(&server.base_url(), "/nonexistent")).unwrap()
    }

    fn demo_repository() -> Repository {
        Repository {
            id: 1,
            full_name: "alice/demo".to_string(),
        }
    }

    fn no_authorization(req: &HttpMockRequest) -> bool {
        req.headers
            .as_ref()
            .map_or(true, |h| h.iter().all(|(k, _)| !k.eq_ignore_ascii_case("authorization")))
    }

    // ── Endpoint construction ───────────────────────────────────────────

    #[test]
    fn endpoint_percent_encodes_segments() {
        let config = Config::for_tests("https://api.github.com", "/nonexistent");
        let backend = GitHubBackend::new(&config).unwrap();
        let url = backend
            .endpoint(&["repos", "alice", "demo", "releases", "tags", "release/1.0"])
            .unwrap();
        assert_eq!(
            url.as_str(),
            "https://api.github.com/repos/alice/demo/releases/tags/release%2F1.0"
        );
    }

    #[test]
    fn endpoint_keeps_enterprise_prefix() {
        let config = Config::for_tests("https://ghe.example.com/api/v3/", "/nonexistent");
        let backend = GitHubBackend::new(&config).unwrap();
        let url = backend.endpoint(&["repos", "a", "b"]).unwrap();
        assert_eq!(url.as_str(), "https://ghe.example.com/api/v3/repos/a/b");
    }

    #[test]
    fn rejects_unparseable_api_url() {
        let config = Config::for_tests("not a url", "/nonexistent");
        assert!(GitHubBackend::new(&config).is_err());
    }

    // ── Metadata lookups ────────────────────────────────────────────────

    #[tokio::test]
    async fn repository_found_with_bearer_token() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/repos/alice/demo")
                    .header("authorization", "Bearer test-token")
                    .header("accept", API_ACCEPT);
                then.status(200)
                    .header("X-RateLimit-Remaining", "4999")
                    .json_body(json!({"id": 1, "full_name": "alice/demo", "private": true}));
            })
            .await;

        let backend = backend_for(&server);
        let repo = backend.repository("alice", "demo").await.unwrap();
        mock.assert_async().await;
        assert_eq!(repo, Some(demo_repository()));
        assert_eq!(backend.rate_limit().remaining(), 4999);
    }

    #[tokio::test]
    async fn repository_missing_is_none() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/repos/alice/nope");
                then.status(404).json_body(json!({"message": "Not Found"}));
            })
            .await;

        let backend = backend_for(&server);
        assert_eq!(backend.repository("alice", "nope").await.unwrap(), None);
    }

    #[tokio::test]
    async fn server_error_is_err() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/repos/alice/demo");
                then.status(401).json_body(json!({"message": "Bad credentials"}));
            })
            .await;

        let backend = backend_for(&server);
        assert!(backend.repository("alice", "demo").await.is_err());
    }

    #[tokio::test]
    async fn release_by_tag_uses_repository_full_name() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/repos/alice/demo/releases/tags/v1.0");
                then.status(200)
                    .json_body(json!({"id": 10, "tag_name": "v1.0", "assets": []}));
            })
            .await;

        let backend = backend_for(&server);
        let release = backend
            .release_by_tag(&demo_repository(), "v1.0")
            .await
            .unwrap();
        assert_eq!(
            release,
            Some(Release {
                id: 10,
                tag_name: "v1.0".to_string()
            })
        );
    }

    #[tokio::test]
    async fn asset_page_reports_continuation() {
        let server = MockServer::start_async().await;
        let full_page: Vec<_> = (0..ASSET_PAGE_SIZE)
            .map(|i| json!({"id": i, "name": format!("a{i}"), "url": "http://x"}))
            .collect();
        server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/repos/alice/demo/releases/10/assets")
                    .query_param("page", "1")
                    .query_param("per_page", "100");
                then.status(200).json_body(json!(full_page));
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/repos/alice/demo/releases/10/assets")
                    .query_param("page", "2");
                then.status(200)
                    .json_body(json!([{"id": 500, "name": "last.zip", "url": "http://x"}]));
            })
            .await;

        let backend = backend_for(&server);
        let release = Release {
            id: 10,
            tag_name: "v1.0".to_string(),
        };
        let first = backend
            .release_assets(&demo_repository(), &release, 1)
            .await
            .unwrap();
        assert_eq!(first.assets.len(), ASSET_PAGE_SIZE as usize);
        assert_eq!(first.next_page, Some(2));

        let second = backend
            .release_assets(&demo_repository(), &release, 2)
            .await
            .unwrap();
        assert_eq!(second.assets[0].name, "last.zip");
        assert_eq!(second.next_page, None);
    }

    // ── Raw downloads ───────────────────────────────────────────────────

    #[tokio::test]
    async fn open_asset_is_authenticated_and_does_not_follow_redirects() {
        let server = MockServer::start_async().await;
        let download = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/repos/alice/demo/releases/assets/7")
                    .header("authorization", "Bearer test-token")
                    .header("accept", OCTET_STREAM);
                then.status(302).header("location", "/storage/app.zip");
            })
            .await;
        let storage = server
            .mock_async(|when, then| {
                when.method(GET).path("/storage/app.zip");
                then.status(200).body("bytes");
            })
            .await;

        let backend = backend_for(&server);
        let asset = Asset {
            id: 7,
            name: "app.zip".to_string(),
            url: server.url("/repos/alice/demo/releases/assets/7"),
            content_type: None,
            size: 5,
        };
        let resp = backend.open_asset(&asset).await.unwrap();
        assert_eq!(resp.status(), StatusCode::FOUND);
        download.assert_async().await;
        storage.assert_hits_async(0).await;
    }

    #[tokio::test]
    async fn open_anonymous_sends_no_credentials() {
        let server = MockServer::start_async().await;
        let storage = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/storage/app.zip")
                    .matches(no_authorization);
                then.status(200).body("bytes");
            })
            .await;

        let backend = backend_for(&server);
        let url = Url::parse(&server.url("/storage/app.zip?sig=abc")).unwrap();
        let resp = backend.open_anonymous(url).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        storage.assert_async().await;
    }

    #[tokio::test]
    async fn ping_reports_probe_failure() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/rate_limit");
                then.status(401);
            })
            .await;

        let backend = backend_for(&server);
        assert!(backend.ping().await.is_err());
    }
}
