use anyhow::Result;
use tracing::{debug, instrument};

use crate::forge::{Asset, ForgeBackend};

/// Whether a path segment can safely be spliced into an upstream URL.
///
/// Empty and dot-only segments can never name a real repository, release or
/// asset, so they short-circuit to "not found".  A `/` can only arrive
/// percent-encoded; it would shift the `owner/repo` boundary, so it is
/// rejected as well.
pub fn is_valid_segment(segment: &str) -> bool {
    !(segment.is_empty()
        || segment == "."
        || segment == ".."
        || segment.contains('\0')
        || segment.contains('/'))
}

/// Resolve `owner/repo@tag:asset_name` to a downloadable asset.
///
/// Each lookup can end the search: no repository, no release for the tag, or
/// no asset with exactly that name all yield `Ok(None)`.  The release's asset
/// listing is fetched page by page and stops at the first match.
#[instrument(skip(forge), fields(%owner, %repo, %tag, asset = %asset_name))]
pub async fn resolve_asset(
    forge: &dyn ForgeBackend,
    owner: &str,
    repo: &str,
    tag: &str,
    asset_name: &str,
) -> Result<Option<Asset>> {
    if ![owner, repo, tag].into_iter().all(is_valid_segment) {
        debug!("rejecting unusable path segment");
        return Ok(None);
    }

    debug!("loading repository");
    let Some(repository) = forge.repository(owner, repo).await? else {
        debug!("repository not found");
        return Ok(None);
    };

    debug!("loading release");
    let Some(release) = forge.release_by_tag(&repository, tag).await? else {
        debug!("release not found");
        return Ok(None);
    };

    let mut page = 1;
    let asset_id = loop {
        let listing = forge.release_assets(&repository, &release, page).await?;
        if let Some(found) = listing.assets.iter().find(|a| a.name == asset_name) {
            break found.id;
        }
        match listing.next_page {
            Some(next) if !listing.assets.is_empty() => page = next,
            _ => {
                debug!(pages = page, "asset not found in release");
                return Ok(None);
            }
        }
    };

    debug!(asset_id, "asset located, loading metadata");
    forge.asset(&repository, asset_id).await
}
