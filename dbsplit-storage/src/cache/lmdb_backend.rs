//! LMDB-backed cache implementation.
//!
//! Uses the heed crate (Rust bindings for LMDB) to provide a memory-mapped
//! key-value store that survives process restarts.
//!
//! # Value layout
//!
//! ```text
//! [cached_at: i64 LE millis][expires_at: i64 LE millis, 0 = never][json value]
//! ```
//!
//! # Thread Safety
//!
//! LMDB provides ACID transactions. The backend uses:
//! - Read transactions for `get` and `contains`
//! - Write transactions for `put`, `delete` and expired-entry removal
//! - Statistics are tracked under a lock

use std::path::Path;
use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dbsplit_core::{CacheError, DbSplitResult};
use heed::types::{Bytes, Str};
use heed::{Database, Env, EnvOpenOptions};

use super::traits::{expiry_for, CacheBackend, CacheStats, CacheableEntity};

const HEADER_LEN: usize = 16;

/// Error type for LMDB cache operations.
#[derive(Debug, thiserror::Error)]
pub enum LmdbCacheError {
    /// Failed to open or create the LMDB environment.
    #[error("Failed to open LMDB environment: {0}")]
    EnvOpen(String),

    /// Failed to open the database within the environment.
    #[error("Failed to open database: {0}")]
    DbOpen(String),

    /// Transaction error.
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// Stored bytes do not follow the value layout.
    #[error("Corrupt entry: {0}")]
    Corrupt(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<LmdbCacheError> for dbsplit_core::DbSplitError {
    fn from(e: LmdbCacheError) -> Self {
        CacheError::Backend {
            reason: e.to_string(),
        }
        .into()
    }
}

fn txn_err(e: heed::Error) -> LmdbCacheError {
    LmdbCacheError::Transaction(e.to_string())
}

/// Bytes an entry accounts for in `memory_bytes`.
fn entry_size(key: &str, value: &[u8]) -> u64 {
    (key.len() + value.len()) as u64
}

struct Decoded<'a> {
    cached_at: DateTime<Utc>,
    expires_at: Option<DateTime<Utc>>,
    json: &'a [u8],
}

impl Decoded<'_> {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

fn encode<T: CacheableEntity>(
    key: &str,
    entity: &T,
    cached_at: DateTime<Utc>,
    expires_at: Option<DateTime<Utc>>,
) -> DbSplitResult<Vec<u8>> {
    let json = serde_json::to_vec(entity).map_err(|e| CacheError::Serialization {
        key: key.to_string(),
        reason: e.to_string(),
    })?;
    let expires_millis = expires_at.map(|at| at.timestamp_millis()).unwrap_or(0);

    let mut bytes = Vec::with_capacity(HEADER_LEN + json.len());
    bytes.extend_from_slice(&cached_at.timestamp_millis().to_le_bytes());
    bytes.extend_from_slice(&expires_millis.to_le_bytes());
    bytes.extend_from_slice(&json);
    Ok(bytes)
}

fn decode(bytes: &[u8]) -> Result<Decoded<'_>, LmdbCacheError> {
    if bytes.len() < HEADER_LEN {
        return Err(LmdbCacheError::Corrupt(format!(
            "{} bytes is shorter than the header",
            bytes.len()
        )));
    }
    let millis = |range: std::ops::Range<usize>| -> Result<i64, LmdbCacheError> {
        let raw: [u8; 8] = bytes[range]
            .try_into()
            .map_err(|_| LmdbCacheError::Corrupt("invalid timestamp".into()))?;
        Ok(i64::from_le_bytes(raw))
    };

    let cached_millis = millis(0..8)?;
    let expires_millis = millis(8..16)?;
    let cached_at = DateTime::from_timestamp_millis(cached_millis).unwrap_or_else(Utc::now);
    let expires_at = match expires_millis {
        0 => None,
        ms => DateTime::from_timestamp_millis(ms),
    };
    Ok(Decoded {
        cached_at,
        expires_at,
        json: &bytes[HEADER_LEN..],
    })
}

/// LMDB-backed [`CacheBackend`].
///
/// # Example
///
/// ```ignore
/// use dbsplit_storage::cache::LmdbCacheBackend;
///
/// let backend = LmdbCacheBackend::new("/tmp/dbsplit-cache", 100)?;
/// backend.put("1", &record, Utc::now(), None).await?;
/// let cached = backend.get::<Record>("1").await?;
/// ```
pub struct LmdbCacheBackend {
    env: Env,
    db: Database<Str, Bytes>,
    stats: RwLock<CacheStats>,
}

impl std::fmt::Debug for LmdbCacheBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LmdbCacheBackend")
            .field("path", &self.env.path())
            .finish_non_exhaustive()
    }
}

impl LmdbCacheBackend {
    /// Create a new LMDB cache backend.
    ///
    /// # Arguments
    ///
    /// * `path` - Directory where LMDB files will be stored
    /// * `max_size_mb` - Maximum size of the database in megabytes
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The directory cannot be created
    /// - LMDB environment cannot be opened
    /// - Database cannot be created
    pub fn new<P: AsRef<Path>>(path: P, max_size_mb: usize) -> Result<Self, LmdbCacheError> {
        std::fs::create_dir_all(&path)?;

        // SAFETY: the environment is opened once per directory by this process.
        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(max_size_mb * 1024 * 1024)
                .max_dbs(1)
                .open(path.as_ref())
        }
        .map_err(|e| LmdbCacheError::EnvOpen(e.to_string()))?;

        let mut wtxn = env.write_txn().map_err(txn_err)?;
        let db: Database<Str, Bytes> = env
            .create_database(&mut wtxn, None)
            .map_err(|e| LmdbCacheError::DbOpen(e.to_string()))?;
        wtxn.commit().map_err(txn_err)?;

        let (entry_count, memory_bytes) = {
            let rtxn = env.read_txn().map_err(txn_err)?;
            let mut totals = (0u64, 0u64);
            for item in db.iter(&rtxn).map_err(txn_err)? {
                let (key, value) = item.map_err(txn_err)?;
                totals.0 += 1;
                totals.1 += entry_size(key, value);
            }
            totals
        };
        tracing::info!(
            path = %path.as_ref().display(),
            max_size_mb,
            entry_count,
            memory_bytes,
            "LMDB cache opened"
        );

        Ok(Self {
            env,
            db,
            stats: RwLock::new(CacheStats {
                entry_count,
                memory_bytes,
                ..CacheStats::default()
            }),
        })
    }

    fn with_stats(&self, f: impl FnOnce(&mut CacheStats)) {
        if let Ok(mut stats) = self.stats.write() {
            f(&mut stats);
        }
    }

    /// Delete `key`, returning the size of the removed entry.
    fn remove(&self, key: &str) -> Result<Option<u64>, LmdbCacheError> {
        let mut wtxn = self.env.write_txn().map_err(txn_err)?;
        let removed = self
            .db
            .get(&wtxn, key)
            .map_err(txn_err)?
            .map(|old| entry_size(key, old));
        if removed.is_some() {
            self.db.delete(&mut wtxn, key).map_err(txn_err)?;
        }
        wtxn.commit().map_err(txn_err)?;

        if let Some(size) = removed {
            self.with_stats(|s| {
                s.entry_count = s.entry_count.saturating_sub(1);
                s.memory_bytes = s.memory_bytes.saturating_sub(size);
            });
        }
        Ok(removed)
    }

    /// Remove an entry found expired by a reader.
    fn evict(&self, key: &str) -> Result<(), LmdbCacheError> {
        if self.remove(key)?.is_some() {
            self.with_stats(|s| s.evictions += 1);
        }
        Ok(())
    }
}

#[async_trait]
impl CacheBackend for LmdbCacheBackend {
    async fn get<T: CacheableEntity>(
        &self,
        key: &str,
    ) -> DbSplitResult<Option<(T, DateTime<Utc>)>> {
        let found = {
            let rtxn = self.env.read_txn().map_err(txn_err)?;
            match self.db.get(&rtxn, key).map_err(txn_err)? {
                None => None,
                Some(bytes) => {
                    let decoded = decode(bytes)?;
                    if decoded.is_expired(Utc::now()) {
                        Some(None)
                    } else {
                        let value: T = serde_json::from_slice(decoded.json).map_err(|e| {
                            CacheError::Serialization {
                                key: key.to_string(),
                                reason: e.to_string(),
                            }
                        })?;
                        Some(Some((value, decoded.cached_at)))
                    }
                }
            }
        };

        match found {
            Some(Some(hit)) => {
                self.with_stats(|s| s.hits += 1);
                Ok(Some(hit))
            }
            Some(None) => {
                self.evict(key)?;
                self.with_stats(|s| s.misses += 1);
                Ok(None)
            }
            None => {
                self.with_stats(|s| s.misses += 1);
                Ok(None)
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
        let bytes = encode(key, entity, cached_at, expiry_for(cached_at, ttl))?;

        let mut wtxn = self.env.write_txn().map_err(txn_err)?;
        let previous = self
            .db
            .get(&wtxn, key)
            .map_err(txn_err)?
            .map(|old| entry_size(key, old));
        self.db.put(&mut wtxn, key, &bytes).map_err(txn_err)?;
        wtxn.commit().map_err(txn_err)?;

        self.with_stats(|s| {
            match previous {
                Some(old) => s.memory_bytes = s.memory_bytes.saturating_sub(old),
                None => s.entry_count += 1,
            }
            s.memory_bytes += entry_size(key, &bytes);
        });
        Ok(())
    }

    async fn contains(&self, key: &str) -> DbSplitResult<bool> {
        let rtxn = self.env.read_txn().map_err(txn_err)?;
        match self.db.get(&rtxn, key).map_err(txn_err)? {
            Some(bytes) => Ok(!decode(bytes)?.is_expired(Utc::now())),
            None => Ok(false),
        }
    }

    async fn delete(&self, key: &str) -> DbSplitResult<bool> {
        Ok(self.remove(key)?.is_some())
    }

    async fn stats(&self) -> DbSplitResult<CacheStats> {
        // Entry count comes from the environment so a broken env surfaces here.
        let rtxn = self.env.read_txn().map_err(txn_err)?;
        let entry_count = self.db.len(&rtxn).map_err(txn_err)?;

        let mut stats = self.stats.read().map(|s| s.clone()).unwrap_or_default();
        stats.entry_count = entry_count;
        Ok(stats)
    }
}
