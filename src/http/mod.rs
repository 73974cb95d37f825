//! HTTP layer for the release asset proxy.
//!
//! This module provides the axum-based HTTP server that authenticates
//! callers, authorises them against the requested repository namespace, and
//! relays release assets from the upstream forge.

pub mod handler;
