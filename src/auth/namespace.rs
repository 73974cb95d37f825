//! Principal → namespace authorisation.
//!
//! A principal named `owner/repo` may download from that repository, and so
//! may any sub-identity below it (`owner/repo/ci`, `owner/repo/deploy`).

/// Render the namespace key for a repository.
pub fn namespace_key(owner: &str, repo: &str) -> String {
    format!("{owner}/{repo}")
}

/// Whether `principal` may access `owner/repo`.
pub fn authorize(principal: &str, owner: &str, repo: &str) -> bool {
    let key = namespace_key(owner, repo);
    match principal.strip_prefix(key.as_str()) {
        Some("") => true,
        Some(rest) => rest.starts_with('/'),
        None => false,
    }
}
