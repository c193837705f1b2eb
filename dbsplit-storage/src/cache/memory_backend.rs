//! Process-local cache backend.
//!
//! Entries are stored serialized, so the cache never hands out a reference
//! that aliases a value held elsewhere. The backend can be switched to an
//! unavailable state to exercise fail-open reads.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dbsplit_core::{CacheError, DbSplitResult};

use super::traits::{expiry_for, CacheBackend, CacheStats, CacheableEntity};

#[derive(Debug, Clone)]
struct Entry {
    bytes: Vec<u8>,
    cached_at: DateTime<Utc>,
    expires_at: Option<DateTime<Utc>>,
}

impl Entry {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

#[derive(Debug, Default)]
struct Inner {
    entries: HashMap<String, Entry>,
    hits: u64,
    misses: u64,
    evictions: u64,
}

impl Inner {
    /// Drop `key` if it has expired. Returns the live entry, if any.
    fn live(&mut self, key: &str, now: DateTime<Utc>) -> Option<&Entry> {
        if self.entries.get(key).is_some_and(|e| e.is_expired(now)) {
            self.entries.remove(key);
            self.evictions += 1;
        }
        self.entries.get(key)
    }
}

/// In-memory [`CacheBackend`].
///
/// Uses tokio::sync::RwLock for safe async access.
#[derive(Debug)]
pub struct InMemoryCacheBackend {
    inner: tokio::sync::RwLock<Inner>,
    available: AtomicBool,
}

impl Default for InMemoryCacheBackend {
    fn default() -> Self {
        Self {
            inner: tokio::sync::RwLock::new(Inner::default()),
            available: AtomicBool::new(true),
        }
    }
}

impl InMemoryCacheBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate the cache going away (or coming back).
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    fn check_available(&self) -> DbSplitResult<()> {
        if self.is_available() {
            Ok(())
        } else {
            Err(CacheError::Unavailable {
                reason: "in-memory cache marked unavailable".to_string(),
            }
            .into())
        }
    }
}

#[async_trait]
impl CacheBackend for InMemoryCacheBackend {
    async fn get<T: CacheableEntity>(
        &self,
        key: &str,
    ) -> DbSplitResult<Option<(T, DateTime<Utc>)>> {
        self.check_available()?;
        let mut inner = self.inner.write().await;

        let Some(entry) = inner.live(key, Utc::now()).cloned() else {
            inner.misses += 1;
            return Ok(None);
        };

        match serde_json::from_slice::<T>(&entry.bytes) {
            Ok(value) => {
                inner.hits += 1;
                Ok(Some((value, entry.cached_at)))
            }
            Err(e) => {
                // Undecodable entries read as misses on the read path.
                inner.misses += 1;
                Err(CacheError::Serialization {
                    key: key.to_string(),
                    reason: e.to_string(),
                }
                .into())
            }
        }
    }

    async fn put<T: CacheableEntity>(
        &self,
        key: &str,
        entity: &T,
        cached_at: DateTime<Utc>,
        ttl: Option<Duration>,
    ) -> DbSplitResult<()> {
        self.check_available()?;
        let bytes = serde_json::to_vec(entity).map_err(|e| CacheError::Serialization {
            key: key.to_string(),
            reason: e.to_string(),
        })?;

        let entry = Entry {
            bytes,
            cached_at,
            expires_at: expiry_for(cached_at, ttl),
        };
        self.inner.write().await.entries.insert(key.to_string(), entry);
        Ok(())
    }

    async fn contains(&self, key: &str) -> DbSplitResult<bool> {
        self.check_available()?;
        let mut inner = self.inner.write().await;
        Ok(inner.live(key, Utc::now()).is_some())
    }

    async fn delete(&self, key: &str) -> DbSplitResult<bool> {
        self.check_available()?;
        Ok(self.inner.write().await.entries.remove(key).is_some())
    }

    async fn stats(&self) -> DbSplitResult<CacheStats> {
        self.check_available()?;
        let inner = self.inner.read().await;
        Ok(CacheStats {
            hits: inner.hits,
            misses: inner.misses,
            entry_count: inner.entries.len() as u64,
            memory_bytes: inner
                .entries
                .iter()
                .map(|(k, e)| (k.len() + e.bytes.len()) as u64)
                .sum(),
            evictions: inner.evictions,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dbsplit_core::{DbSplitError, Record};

    #[tokio::test]
    async fn test_put_and_get() -> DbSplitResult<()> {
        let backend = InMemoryCacheBackend::new();
        let cached_at = Utc::now();
        backend.put("1", &Record::new(1, "alice"), cached_at, None).await?;

        let cached = backend.get::<Record>("1").await?;
        assert_eq!(cached, Some((Record::new(1, "alice"), cached_at)));
        Ok(())
    }

    #[tokio::test]
    async fn test_overwrite_replaces_value() -> DbSplitResult<()> {
        let backend = InMemoryCacheBackend::new();
        backend.put("1", &Record::new(1, "old"), Utc::now(), None).await?;
        backend.put("1", &Record::new(1, "new"), Utc::now(), None).await?;

        let cached = backend.get::<Record>("1").await?;
        assert_eq!(cached.map(|(r, _)| r.name), Some("new".to_string()));
        assert_eq!(backend.stats().await?.entry_count, 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_expired_entry_is_evicted() -> DbSplitResult<()> {
        let backend = InMemoryCacheBackend::new();
        let long_ago = Utc::now() - chrono::Duration::seconds(60);
        backend
            .put("1", &Record::new(1, "alice"), long_ago, Some(Duration::from_secs(1)))
            .await?;

        assert!(!backend.contains("1").await?);
        assert!(backend.get::<Record>("1").await?.is_none());

        let stats = backend.stats().await?;
        assert_eq!(stats.evictions, 1);
        assert_eq!(stats.entry_count, 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_unavailable_backend_errors() {
        let backend = InMemoryCacheBackend::new();
        backend.set_available(false);

        let result = backend.get::<Record>("1").await;
        assert!(matches!(
            result,
            Err(DbSplitError::Cache(CacheError::Unavailable { .. }))
        ));
        assert!(backend
            .put("1", &Record::new(1, "x"), Utc::now(), None)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_corrupt_entry_is_serialization_error() -> DbSplitResult<()> {
        let backend = InMemoryCacheBackend::new();
        backend.put("1", &"not a record".to_string(), Utc::now(), None).await?;

        // String is CacheableEntity only in this test module.
        let result = backend.get::<Record>("1").await;
        assert!(matches!(
            result,
            Err(DbSplitError::Cache(CacheError::Serialization { .. }))
        ));

        let stats = backend.stats().await?;
        assert_eq!(stats.hits, 0);
        assert_eq!(stats.misses, 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_stats_fail_while_unavailable() -> DbSplitResult<()> {
        let backend = InMemoryCacheBackend::new();
        backend.put("1", &Record::new(1, "alice"), Utc::now(), None).await?;
        backend.set_available(false);

        assert!(matches!(
            backend.stats().await,
            Err(DbSplitError::Cache(CacheError::Unavailable { .. }))
        ));

        backend.set_available(true);
        assert_eq!(backend.stats().await?.entry_count, 1);
        Ok(())
    }

    impl CacheableEntity for String {
        fn cache_key(&self) -> String {
            self.clone()
        }
    }

    #[tokio::test]
    async fn test_stats_track_hits_and_misses() -> DbSplitResult<()> {
        let backend = InMemoryCacheBackend::new();
        backend.get::<Record>("1").await?;
        backend.put("1", &Record::new(1, "alice"), Utc::now(), None).await?;
        backend.get::<Record>("1").await?;
        backend.get::<Record>("1").await?;

        let stats = backend.stats().await?;
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits, 2);
        assert!(stats.memory_bytes > 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_delete() -> DbSplitResult<()> {
        let backend = InMemoryCacheBackend::new();
        backend.put("1", &Record::new(1, "alice"), Utc::now(), None).await?;
        assert!(backend.delete("1").await?);
        assert!(!backend.delete("1").await?);
        assert!(!backend.contains("1").await?);
        Ok(())
    }
}
