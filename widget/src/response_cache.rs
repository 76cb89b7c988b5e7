// Short-lived cache of rendered responses, replayed verbatim together with
// their expiry time.
use crate::metrics_defs::{RESPONSE_CACHE_ENTRIES, RESPONSE_CACHE_HIT, RESPONSE_CACHE_MISS};
use bytes::Bytes;
use moka::sync::Cache;
use shared::{counter, gauge};
use std::time::{Duration, SystemTime};

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub host: String,
    /// Path including the query string.
    pub path: String,
}

impl CacheKey {
    pub fn new(host: &str, path: &str) -> Self {
        CacheKey {
            host: host.to_string(),
            path: path.to_string(),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum CachedBody {
    Json(serde_json::Value),
    Bytes(Bytes),
}

#[derive(Clone, Debug, PartialEq)]
pub struct CachedResponse {
    pub status: u16,
    pub content_type: String,
    pub body: CachedBody,
    pub expires_at: SystemTime,
}

impl CachedResponse {
    fn is_expired(&self, now: SystemTime) -> bool {
        self.expires_at <= now
    }
}

pub struct ResponseCache {
    cache: Cache<CacheKey, CachedResponse>,
    ttl: Duration,
}

impl ResponseCache {
    pub fn new(ttl: Duration, max_entries: u64) -> Self {
        let cache = Cache::builder()
            .max_capacity(max_entries)
            .time_to_live(ttl)
            .support_invalidation_closures()
            .build();

        ResponseCache { cache, ttl }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Expired entries read as missing and are dropped on the spot.
    pub fn get(&self, key: &CacheKey) -> Option<CachedResponse> {
        let hit = match self.cache.get(key) {
            Some(entry) if entry.is_expired(SystemTime::now()) => {
                self.cache.invalidate(key);
                None
            }
            other => other,
        };

        let metric_def = match hit {
            Some(_) => RESPONSE_CACHE_HIT,
            None => RESPONSE_CACHE_MISS,
        };
        counter!(metric_def).increment(1);
        hit
    }

    /// Stores a response, replacing any previous one, and returns its expiry.
    pub fn put(&self, key: CacheKey, status: u16, content_type: &str, body: CachedBody) -> SystemTime {
        let expires_at = SystemTime::now() + self.ttl;
        self.cache.insert(
            key,
            CachedResponse {
                status,
                content_type: content_type.to_string(),
                body,
                expires_at,
            },
        );
        expires_at
    }

    pub fn invalidate(&self, key: &CacheKey) {
        self.cache.invalidate(key);
    }

    /// Removes every expired entry regardless of access.
    pub fn sweep(&self) {
        let now = SystemTime::now();
        if let Err(err) = self
            .cache
            .invalidate_entries_if(move |_, entry| entry.is_expired(now))
        {
            tracing::warn!(error = %err, "response cache sweep failed");
        }
        self.cache.run_pending_tasks();
        gauge!(RESPONSE_CACHE_ENTRIES).set(self.cache.entry_count() as f64);
    }

    pub fn len(&self) -> u64 {
        self.cache.run_pending_tasks();
        self.cache.entry_count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
