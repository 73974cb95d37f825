//! Authentication and authorisation subsystem.
//!
//! Callers authenticate with HTTP Basic credentials checked against a local
//! htpasswd file, then are authorised only for the `owner/repo` namespace
//! their principal names.

pub mod htpasswd;
pub mod middleware;
pub mod namespace;
pub mod store;
