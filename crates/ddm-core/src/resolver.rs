//! Link resolver interface: the engine's collaborator that turns a
//! one-click-host URL into a direct, fetchable link.
//!
//! The engine only depends on this trait; it knows nothing about any
//! particular host's session cookies or auth flow, which the trait's
//! implementor owns entirely.

use std::collections::HashMap;

/// Result of resolving a one-click-host URL to something the segmented
/// fetcher can act on directly.
#[derive(Debug, Clone)]
pub struct ResolvedLink {
    pub direct_url: String,
    pub filename: Option<String>,
    pub size_bytes: Option<u64>,
    /// Minimal headers required to perform the GET (cookies, auth tokens).
    pub headers: HashMap<String, String>,
}

/// Implemented by whatever component fronts a specific one-click host.
/// `resolve` may block on network I/O; callers invoke it off the async
/// runtime via `spawn_blocking` or inside their own async wrapper.
pub trait LinkResolver: Send + Sync {
    fn resolve(&self, host_url: &str) -> anyhow::Result<ResolvedLink>;
}
