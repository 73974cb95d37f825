//! Release asset lookup and download.
//!
//! [`resolver`] turns `owner/repo@tag:name` into an upstream [`Asset`]
//! handle; [`fetcher`] streams its bytes.
//!
//! [`Asset`]: crate::forge::Asset

pub mod fetcher;
pub mod resolver;
