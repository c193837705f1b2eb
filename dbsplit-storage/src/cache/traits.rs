//! Cache backend traits and cacheable entity marker.
//!
//! This module defines the traits that must be implemented by cache backends
//! and entities that can be cached.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dbsplit_core::{DbSplitResult, Record};
use serde::{de::DeserializeOwned, Serialize};

/// Marker trait for types that can be cached.
///
/// Values are stored as serialized copies, so a cached entity never aliases
/// the instance it was read from.
pub trait CacheableEntity: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    /// The key this entity is cached under.
    fn cache_key(&self) -> String;
}

/// Cache backend trait for pluggable cache implementations.
///
/// Implementations are shared between tasks without external locking and
/// must handle their own internal synchronization.
///
/// # Expiry
///
/// A `ttl` passed to [`CacheBackend::put`] is fixed at insertion. Entries
/// past their expiry are reported as absent by `get` and `contains`.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Get a value from the cache.
    ///
    /// Returns the cached value and when it was cached, or None if not found.
    async fn get<T: CacheableEntity>(&self, key: &str)
        -> DbSplitResult<Option<(T, DateTime<Utc>)>>;

    /// Put a value into the cache, overwriting any previous entry.
    async fn put<T: CacheableEntity>(
        &self,
        key: &str,
        entity: &T,
        cached_at: DateTime<Utc>,
        ttl: Option<Duration>,
    ) -> DbSplitResult<()>;

    /// Whether a live entry exists for `key`.
    async fn contains(&self, key: &str) -> DbSplitResult<bool>;

    /// Delete an entry. Returns true if something was removed.
    async fn delete(&self, key: &str) -> DbSplitResult<bool>;

    /// Get cache statistics.
    async fn stats(&self) -> DbSplitResult<CacheStats>;
}

/// Statistics about cache usage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of cache hits.
    pub hits: u64,
    /// Number of cache misses.
    pub misses: u64,
    /// Number of entries currently in cache.
    pub entry_count: u64,
    /// Approximate memory usage in bytes.
    pub memory_bytes: u64,
    /// Number of entries dropped because they expired.
    pub evictions: u64,
}

impl CacheStats {
    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Expiry instant for an entry cached at `cached_at` with `ttl`.
pub(crate) fn expiry_for(
    cached_at: DateTime<Utc>,
    ttl: Option<Duration>,
) -> Option<DateTime<Utc>> {
    let ttl = ttl.filter(|ttl| !ttl.is_zero())?;
    chrono::Duration::from_std(ttl)
        .ok()
        .and_then(|ttl| cached_at.checked_add_signed(ttl))
}

impl CacheableEntity for Record {
    fn cache_key(&self) -> String {
        Record::cache_key_for(self.id)
    }
}
