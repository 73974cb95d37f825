//! Upstream hosting API abstraction.
//!
//! The [`ForgeBackend`] trait covers everything the proxy needs from the
//! forge: metadata lookups for repositories, releases and assets, plus the
//! two raw GETs used to stream an asset.  Lookups return `Ok(None)` when the
//! upstream says the resource does not exist and reserve `Err` for transport
//! or protocol failures.

pub mod github;
pub mod rate_limit;

use anyhow::Result;
use serde::Deserialize;

use self::rate_limit::RateLimitState;

// ---------------------------------------------------------------------------
// Upstream resources
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Repository {
    pub id: u64,
    /// `owner/name` as the forge spells it.
    pub full_name: String,
}

impl Repository {
    /// Split `full_name` into owner and name.
    pub fn owner_and_name(&self) -> Option<(&str, &str)> {
        self.full_name.split_once('/')
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Release {
    pub id: u64,
    pub tag_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Asset {
    pub id: u64,
    pub name: String,
    /// API endpoint of the asset; requesting it with
    /// `Accept: application/octet-stream` yields the bytes.
    pub url: String,
    #[serde(default)]
    pub content_type: Option<String>,
    #[serde(default)]
    pub size: u64,
}

/// One page of a release's asset listing.
#[derive(Debug, Clone, Default)]
pub struct AssetPage {
    pub assets: Vec<Asset>,
    /// Page to request next, if the listing may continue.
    pub next_page: Option<u32>,
}

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

#[async_trait::async_trait]
pub trait ForgeBackend: Send + Sync {
    /// Look up a repository by owner and name.
    async fn repository(&self, owner: &str, repo: &str) -> Result<Option<Repository>>;

    /// Look up a release of `repository` by its tag.
    async fn release_by_tag(&self, repository: &Repository, tag: &str)
        -> Result<Option<Release>>;

    /// Fetch one page (1-based) of a release's assets.
    async fn release_assets(
        &self,
        repository: &Repository,
        release: &Release,
        page: u32,
    ) -> Result<AssetPage>;

    /// Fetch full asset metadata by id.
    async fn asset(&self, repository: &Repository, asset_id: u64) -> Result<Option<Asset>>;

    /// Authenticated GET of the asset's download endpoint.  Redirects are not
    /// followed and the body is left unread.
    async fn open_asset(&self, asset: &Asset) -> Result<reqwest::Response>;

    /// Anonymous GET of an arbitrary URL: no upstream credential and no
    /// `Content-Type` header.  Redirects are not followed.
    async fn open_anonymous(&self, url: reqwest::Url) -> Result<reqwest::Response>;

    /// Cheap authenticated probe used by the health check.
    async fn ping(&self) -> Result<()>;

    /// Rate-limit state observed on upstream responses.
    fn rate_limit(&self) -> &RateLimitState;
}
