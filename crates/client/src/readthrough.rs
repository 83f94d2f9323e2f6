//! Read-through adapter from the transient HTTP cache to the permanent
//! store.
//!
//! On a transient miss, the permanent store is consulted only for requests
//! that explicitly opted in. Not all traffic should silently read from the
//! offline store, so the fallback is a per-request decision, never a
//! default.

use std::sync::Arc;

use url::Url;

use permacache_core::{CacheEngine, CachedResponse};

use crate::transient::TransientCache;

/// Per-request opt-in controlling permanent-cache fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermanentCachePolicy {
    /// Never read from the permanent store; a transient miss is a miss.
    /// Used by refresh paths that must refetch.
    IgnorePermanent,
    /// The permanent store is an acceptable fallback on a transient miss.
    UsePermanent,
}

/// Cache lookup front for the rendering surface: transient first, then the
/// permanently persisted store for opted-in requests.
pub struct ReadThroughCache {
    engine: Arc<CacheEngine>,
    transient: TransientCache,
}

impl ReadThroughCache {
    pub fn new(engine: Arc<CacheEngine>, transient_capacity: usize) -> Self {
        Self { engine, transient: TransientCache::new(transient_capacity) }
    }

    /// The transient layer, for the fetch path to populate on live
    /// responses.
    pub fn transient(&self) -> &TransientCache {
        &self.transient
    }

    /// Look up a response for a request URL.
    ///
    /// A transient hit is returned as-is. On a miss, requests with
    /// [`PermanentCachePolicy::UsePermanent`] fall through to the engine
    /// (resource-specific key first, then the image width-variant-less
    /// key); a permanent hit is promoted into the transient cache and
    /// returned as if it were a normal hit. Anything else is a true miss.
    pub async fn lookup(&self, url: &Url, policy: PermanentCachePolicy) -> Option<CachedResponse> {
        if let Some(hit) = self.transient.get(url.as_str()) {
            tracing::trace!(%url, "transient cache hit");
            return Some(hit);
        }

        if policy == PermanentCachePolicy::IgnorePermanent {
            return None;
        }

        let response = self.engine.cached_response(url).await?;
        tracing::debug!(%url, "permanent cache hit");
        self.transient.put(response.clone());
        Some(response)
    }
}
