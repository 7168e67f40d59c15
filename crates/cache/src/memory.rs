use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tokio::time::Instant;

use crate::store::Cache;

struct Entry<V> {
    value: V,
    expires_at: Instant,
}

/// In-memory TTL cache.
///
/// Expired entries are evicted lazily on read. Time goes through
/// `tokio::time`, so paused-clock tests advance expiry deterministically.
#[derive(Clone)]
pub struct InMemoryTtlCache<V> {
    name: &'static str,
    entries: Arc<RwLock<HashMap<String, Entry<V>>>>,
}

impl<V: Clone + Send + Sync + 'static> InMemoryTtlCache<V> {
    /// Creates a new empty cache. The name labels metrics and log lines.
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            entries: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Returns the number of entries, including not-yet-evicted expired ones.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Returns true if the cache holds no entries.
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Drops every expired entry.
    pub async fn purge_expired(&self) {
        let now = Instant::now();
        self.entries.write().await.retain(|_, e| e.expires_at > now);
    }
}

#[async_trait]
impl<V: Clone + Send + Sync + 'static> Cache<V> for InMemoryTtlCache<V> {
    async fn get(&self, key: &str) -> Option<V> {
        let now = Instant::now();

        {
            let entries = self.entries.read().await;
            match entries.get(key) {
                Some(entry) if entry.expires_at > now => {
                    metrics::counter!("cache_hits_total", "cache" => self.name).increment(1);
                    return Some(entry.value.clone());
                }
                Some(_) => {}
                None => {
                    metrics::counter!("cache_misses_total", "cache" => self.name).increment(1);
                    return None;
                }
            }
        }

        // Entry exists but expired: evict under the write lock.
        let mut entries = self.entries.write().await;
        if let Some(entry) = entries.get(key)
            && entry.expires_at <= now
        {
            entries.remove(key);
        }
        metrics::counter!("cache_misses_total", "cache" => self.name).increment(1);
        None
    }

    async fn set(&self, key: &str, value: V, ttl: Duration) {
        let entry = Entry {
            value,
            expires_at: Instant::now() + ttl,
        };
        self.entries.write().await.insert(key.to_string(), entry);
    }

    async fn remove(&self, key: &str) {
        self.entries.write().await.remove(key);
    }
}
