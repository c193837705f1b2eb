//! Cache-aside read path with pluggable backends.
//!
//! Reads check the cache first and fall back to the routed data source on a
//! miss, populating the cache with what was found. The cache is an
//! optimization only: any backend fault degrades to a storage read.
//!
//! Two backends are provided: [`InMemoryCacheBackend`] for a single process
//! and [`LmdbCacheBackend`] for a cache that survives restarts.
//!
//! # Example
//!
//! ```ignore
//! let cache = ReadThroughCache::new(Arc::new(InMemoryCacheBackend::new()), CacheConfig::new());
//! let read = cache.get::<Record, _>(id, &fetcher).await?;
//! if let Some(read) = read {
//!     tracing::debug!(hit = read.was_cache_hit(), "served record");
//! }
//! ```

pub mod lmdb_backend;
pub mod memory_backend;
pub mod read;
pub mod read_through;
pub mod traits;

pub use lmdb_backend::{LmdbCacheBackend, LmdbCacheError};
pub use memory_backend::InMemoryCacheBackend;
pub use read::CacheRead;
pub use read_through::{CacheConfig, ReadThroughCache, StorageFetcher};
pub use traits::{CacheBackend, CacheStats, CacheableEntity};
