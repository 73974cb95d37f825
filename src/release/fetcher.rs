//! Two-stage asset download.
//!
//! The asset endpoint is requested with the upstream credential and with
//! redirects disabled.  Forges answer with a redirect to a signed
//! object-storage URL; that single hop is followed with a fresh request that
//! carries neither the credential nor a `Content-Type` header, since the
//! storage backend authorises via the URL signature and rejects extra
//! credentials.  The response after the hop is final, whatever its status.

use anyhow::{anyhow, Context, Result};
use bytes::Bytes;
use futures::stream::{self, BoxStream, Stream, StreamExt};
use reqwest::header::{CONTENT_TYPE, LOCATION};
use reqwest::{StatusCode, Url};
use tracing::{debug, instrument, warn};

use crate::forge::github::OCTET_STREAM;
use crate::forge::{Asset, ForgeBackend};

/// Where in the download protocol a response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hop {
    /// Response of the authenticated request to the asset endpoint.
    Direct,
    /// Response of the anonymous request to the redirect target.  Terminal.
    AfterRedirect,
}

/// A successful download, ready to be relayed.
pub struct AssetStream {
    pub content_type: String,
    pub content_length: Option<u64>,
    pub hop: Hop,
    pub body: BoxStream<'static, Result<Bytes, reqwest::Error>>,
}

pub enum FetchOutcome {
    Stream(AssetStream),
    /// The final response was 404.
    NotFound,
    /// The final response was anything other than 200 or 404.
    Forbidden(StatusCode),
}

fn is_redirect(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::MOVED_PERMANENTLY
            | StatusCode::FOUND
            | StatusCode::SEE_OTHER
            | StatusCode::TEMPORARY_REDIRECT
            | StatusCode::PERMANENT_REDIRECT
    )
}

/// Resolve the `Location` header of `response` against its request URL.
fn redirect_target(response: &reqwest::Response) -> Result<Url> {
    let location = response
        .headers()
        .get(LOCATION)
        .ok_or_else(|| anyhow!("upstream redirect without a Location header"))?
        .to_str()
        .context("upstream Location header is not valid UTF-8")?;
    response
        .url()
        .join(location)
        .with_context(|| format!("invalid upstream redirect target: {location:?}"))
}

/// Download `asset`, following at most one redirect without credentials.
#[instrument(skip(forge, asset), fields(asset_id = asset.id, asset = %asset.name))]
pub async fn fetch_asset(
    forge: &dyn ForgeBackend,
    asset: &Asset,
    chunk_size: usize,
) -> Result<FetchOutcome> {
    debug!("starting asset download");
    let response = forge.open_asset(asset).await?;

    let (response, hop) = if is_redirect(response.status()) {
        let target = redirect_target(&response)?;
        debug!(
            status = %response.status(),
            host = target.host_str().unwrap_or_default(),
            path = target.path(),
            "following redirect without credentials"
        );
        drop(response);
        (forge.open_anonymous(target).await?, Hop::AfterRedirect)
    } else {
        (response, Hop::Direct)
    };

    let status = response.status();
    match status {
        StatusCode::OK => {
            let content_type = response
                .headers()
                .get(CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .unwrap_or(OCTET_STREAM)
                .to_string();
            let content_length = response.content_length();
            debug!(?hop, %content_type, ?content_length, "got stream");
            Ok(FetchOutcome::Stream(AssetStream {
                content_type,
                content_length,
                hop,
                body: rechunk(response.bytes_stream(), chunk_size).boxed(),
            }))
        }
        StatusCode::NOT_FOUND => {
            debug!(?hop, "asset bytes not found upstream");
            Ok(FetchOutcome::NotFound)
        }
        _ => {
            warn!(?hop, %status, "upstream refused asset download");
            Ok(FetchOutcome::Forbidden(status))
        }
    }
}

/// Split every item of `stream` into chunks of at most `chunk_size` bytes.
/// Splitting shares the underlying buffer; nothing is copied.
pub fn rechunk<S, E>(stream: S, chunk_size: usize) -> impl Stream<Item = Result<Bytes, E>>
where
    S: Stream<Item = Result<Bytes, E>>,
{
    let chunk_size = chunk_size.max(1);
    stream.flat_map(move |item| {
        let pieces = match item {
            Ok(mut bytes) => {
                let mut pieces = Vec::with_capacity(bytes.len().div_ceil(chunk_size));
                while bytes.len() > chunk_size {
                    pieces.push(Ok(bytes.split_to(chunk_size)));
                }
                if !bytes.is_empty() {
                    pieces.push(Ok(bytes));
                }
                pieces
            }
            Err(e) => vec![Err(e)],
        };
        stream::iter(pieces)
    })
}
