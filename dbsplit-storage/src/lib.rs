//! dbsplit Storage - Routing and Cache-Aside Reads
//!
//! Task-scoped routing intent, resolution of routing keys to physical pools,
//! the data access contract, and the cache-aside read path that sits in
//! front of replica reads.

pub mod cache;
pub mod data_access;
pub mod routing;
pub mod service;

pub use cache::{
    CacheBackend, CacheConfig, CacheRead, CacheStats, CacheableEntity, InMemoryCacheBackend,
    LmdbCacheBackend, LmdbCacheError, ReadThroughCache, StorageFetcher,
};
pub use data_access::{DataAccess, InMemoryDataAccess, InMemoryDataSource};
pub use routing::{
    DataSourceResolver, DataSourceResolverBuilder, RoutingContext, RoutingInterceptor,
};
pub use service::RecordService;
