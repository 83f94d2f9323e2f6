//! Bounded in-memory LRU of synthesized responses.
//!
//! Stand-in for the OS HTTP cache the rendering surface consults first.
//! Entries are keyed by canonical URL string; the oldest-used entry is
//! evicted when the cache is full.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use permacache_core::CachedResponse;

#[derive(Debug, Default)]
struct Inner {
    entries: HashMap<String, CachedResponse>,
    order: VecDeque<String>,
}

/// Transient response cache with LRU eviction.
#[derive(Debug)]
pub struct TransientCache {
    inner: Mutex<Inner>,
    capacity: usize,
}

impl TransientCache {
    /// Create a cache holding at most `capacity` entries.
    pub fn new(capacity: usize) -> Self {
        Self { inner: Mutex::new(Inner::default()), capacity: capacity.max(1) }
    }

    /// Look up a response, refreshing its recency on hit.
    pub fn get(&self, url: &str) -> Option<CachedResponse> {
        let mut inner = self.inner.lock().expect("transient cache poisoned");
        let response = inner.entries.get(url).cloned()?;
        inner.order.retain(|k| k != url);
        inner.order.push_back(url.to_string());
        Some(response)
    }

    /// Insert or refresh a response, evicting the least recently used
    /// entry if the cache is full.
    pub fn put(&self, response: CachedResponse) {
        let key = response.url.to_string();
        let mut inner = self.inner.lock().expect("transient cache poisoned");

        inner.order.retain(|k| k != &key);
        inner.entries.insert(key.clone(), response);
        inner.order.push_back(key);

        while inner.entries.len() > self.capacity {
            if let Some(evicted) = inner.order.pop_front() {
                inner.entries.remove(&evicted);
            }
        }
    }

    /// Drop every entry, e.g. after an article removal.
    pub fn clear(&self) {
        let mut inner = self.inner.lock().expect("transient cache poisoned");
        inner.entries.clear();
        inner.order.clear();
    }

    /// Number of cached responses.
    pub fn len(&self) -> usize {
        self.inner.lock().expect("transient cache poisoned").entries.len()
    }
}
