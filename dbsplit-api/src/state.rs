//! Shared application state for Axum routers.

use std::time::Instant;

use dbsplit_storage::{CacheBackend, DataAccess, RecordService};

/// Application-wide state shared across all routes.
///
/// Generic over the data access and cache backend so the same router serves
/// Postgres with LMDB in production and in-memory doubles in tests.
pub struct AppState<D, C>
where
    D: DataAccess,
    C: CacheBackend,
{
    /// Routed insert/select with the read cache in front of selects.
    pub records: RecordService<D, C>,
    pub start_time: Instant,
}

impl<D, C> AppState<D, C>
where
    D: DataAccess,
    C: CacheBackend,
{
    pub fn new(records: RecordService<D, C>) -> Self {
        Self {
            records,
            start_time: Instant::now(),
        }
    }
}

impl<D, C> Clone for AppState<D, C>
where
    D: DataAccess,
    C: CacheBackend,
{
    fn clone(&self) -> Self {
        Self {
            records: self.records.clone(),
            start_time: self.start_time,
        }
    }
}
