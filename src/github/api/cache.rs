use std::num::NonZeroUsize;
use std::sync::{Mutex, PoisonError};

use lru::LruCache;

/// Number of responses kept by the default cache.
pub const DEFAULT_CACHE_CAPACITY: usize = 500;

/// A response body together with the `ETag` GitHub has sent for it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CachedResponse {
    pub etag: String,
    pub body: String,
}

/// Bounded cache of GitHub API responses, keyed by the request path.
///
/// Cached entries are revalidated with `If-None-Match`, so a stale entry is never served;
/// a `304 Not Modified` answer just saves the transfer and the rate limit budget.
/// When the cache is full, the least recently used entry is evicted.
pub struct ResponseCache {
    entries: Mutex<LruCache<String, CachedResponse>>,
}

impl ResponseCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn get(&self, key: &str) -> Option<CachedResponse> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    pub fn insert(&self, key: String, response: CachedResponse) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .put(key, response);
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ResponseCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_CAPACITY)
    }
}
