use std::time::Duration;

use async_trait::async_trait;

/// A key/value cache with per-entry time-to-live.
///
/// Implementations must be thread-safe; a networked backend (e.g. Redis)
/// sits behind the same interface as the in-memory one.
#[async_trait]
pub trait Cache<V: Clone + Send + Sync + 'static>: Send + Sync {
    /// Returns the cached value, or None on miss or expiry.
    async fn get(&self, key: &str) -> Option<V>;

    /// Stores a value that expires after `ttl`.
    async fn set(&self, key: &str, value: V, ttl: Duration);

    /// Invalidates the entry, if present.
    async fn remove(&self, key: &str);
}
