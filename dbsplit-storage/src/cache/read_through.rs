//! Cache-aside read path.
//!
//! The cache is consulted first; on a miss the storage fetcher reads from the
//! data source selected by the caller's routing context, and the result is
//! copied into the cache. Cache faults never fail a read: an unreachable or
//! corrupt cache is treated as a miss and the store is read instead.
//!
//! Writes do not invalidate cached entries. A record updated after it was
//! cached keeps serving the cached copy until it expires (if a TTL is set)
//! or is removed explicitly with [`ReadThroughCache::invalidate`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use dbsplit_core::{DbSplitResult, Record, RecordId};

use super::read::CacheRead;
use super::traits::{CacheBackend, CacheableEntity};

/// Configuration for the read-through cache.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheConfig {
    /// TTL applied to entries at insertion. `None` keeps entries until they
    /// are removed explicitly.
    pub entry_ttl: Option<Duration>,
}

impl CacheConfig {
    /// Create a new cache config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the entry TTL.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.entry_ttl = Some(ttl);
        self
    }
}

/// Storage fetcher trait for retrieving entities from the underlying storage.
#[async_trait]
pub trait StorageFetcher<T: CacheableEntity>: Send + Sync {
    /// Fetch an entity from storage by ID.
    async fn fetch(&self, id: RecordId) -> DbSplitResult<Option<T>>;
}

/// Cache-aside reader over a [`CacheBackend`].
pub struct ReadThroughCache<C>
where
    C: CacheBackend,
{
    cache: Arc<C>,
    config: CacheConfig,
}

impl<C> ReadThroughCache<C>
where
    C: CacheBackend,
{
    /// Create a new read-through cache.
    pub fn new(cache: Arc<C>, config: CacheConfig) -> Self {
        Self { cache, config }
    }

    /// Create a new read-through cache with default configuration.
    pub fn with_defaults(cache: Arc<C>) -> Self {
        Self::new(cache, CacheConfig::default())
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn backend(&self) -> &C {
        &self.cache
    }

    /// Canonical cache key for an id.
    pub fn key_for(id: RecordId) -> String {
        Record::cache_key_for(id)
    }

    /// Get an entity from the cache, falling back to storage on miss.
    ///
    /// # Returns
    ///
    /// - `Ok(Some(read))` with `read.was_cache_hit()` telling where it came from
    /// - `Ok(None)` if storage has no such entity; nothing is cached
    /// - `Err(_)` only if the storage fetch itself failed
    pub async fn get<T, S>(&self, id: RecordId, storage: &S) -> DbSplitResult<Option<CacheRead<T>>>
    where
        T: CacheableEntity,
        S: StorageFetcher<T>,
    {
        let key = Self::key_for(id);

        match self.cache.get::<T>(&key).await {
            Ok(Some((entity, cached_at))) => {
                tracing::debug!(key = %key, "Cache hit");
                return Ok(Some(CacheRead::from_cache(entity, cached_at)));
            }
            Ok(None) => {
                tracing::debug!(key = %key, "Cache miss");
            }
            Err(err) => {
                tracing::warn!(
                    key = %key,
                    error = %err,
                    "Cache read failed, falling through to storage"
                );
            }
        }

        self.fetch_and_cache(id, &key, storage).await
    }

    /// Fetch from storage and update cache.
    async fn fetch_and_cache<T, S>(
        &self,
        id: RecordId,
        key: &str,
        storage: &S,
    ) -> DbSplitResult<Option<CacheRead<T>>>
    where
        T: CacheableEntity,
        S: StorageFetcher<T>,
    {
        let Some(entity) = storage.fetch(id).await? else {
            tracing::debug!(key = %key, "Not found in storage, nothing cached");
            return Ok(None);
        };

        if let Err(err) = self
            .cache
            .put(key, &entity, Utc::now(), self.config.entry_ttl)
            .await
        {
            tracing::warn!(
                key = %key,
                error = %err,
                "Cache populate failed, returning storage value"
            );
        }
        Ok(Some(CacheRead::from_storage(entity)))
    }

    /// Put an entity into the cache under its own key.
    pub async fn put<T: CacheableEntity>(&self, entity: &T) -> DbSplitResult<()> {
        self.cache
            .put(&entity.cache_key(), entity, Utc::now(), self.config.entry_ttl)
            .await
    }

    /// Remove the cached entry for an id.
    pub async fn invalidate(&self, id: RecordId) -> DbSplitResult<bool> {
        self.cache.delete(&Self::key_for(id)).await
    }
}

impl<C> Clone for ReadThroughCache<C>
where
    C: CacheBackend,
{
    fn clone(&self) -> Self {
        Self {
            cache: Arc::clone(&self.cache),
            config: self.config.clone(),
        }
    }
}
