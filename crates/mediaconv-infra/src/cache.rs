//! In-memory [`KeyValueCache`] backed by moka.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use mediaconv_core::KeyValueCache;
use moka::future::Cache;
use moka::Expiry;

const DEFAULT_MAX_CAPACITY: u64 = 100_000;

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    ttl: Duration,
}

/// Each entry expires after the TTL it was written with.
struct PerEntryTtl;

impl Expiry<String, Entry> for PerEntryTtl {
    fn expire_after_create(&self, _key: &String, entry: &Entry, _now: Instant) -> Option<Duration> {
        Some(entry.ttl)
    }

    fn expire_after_update(
        &self,
        _key: &String,
        entry: &Entry,
        _now: Instant,
        _current: Option<Duration>,
    ) -> Option<Duration> {
        Some(entry.ttl)
    }
}

#[derive(Clone)]
pub struct MokaCache {
    cache: Cache<String, Entry>,
}

impl MokaCache {
    pub fn new(max_capacity: u64) -> Self {
        let cache = Cache::builder()
            .max_capacity(max_capacity)
            .expire_after(PerEntryTtl)
            .build();
        Self { cache }
    }
}

impl Default for MokaCache {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CAPACITY)
    }
}

#[async_trait]
impl KeyValueCache for MokaCache {
    async fn get(&self, key: &str) -> Option<String> {
        self.cache.get(key).await.map(|entry| entry.value)
    }

    async fn put(&self, key: &str, value: String, ttl: Duration) {
        self.cache.insert(key.to_string(), Entry { value, ttl }).await;
    }

    async fn forget(&self, key: &str) {
        self.cache.invalidate(key).await;
    }
}
