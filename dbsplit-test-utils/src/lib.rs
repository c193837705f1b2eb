//! dbsplit Test Utilities
//!
//! Centralized test infrastructure for the dbsplit workspace:
//! - Proptest generators for records, names and route declarations
//! - Recording and failing doubles for the data access and cache seams
//! - Fixtures wiring a `RecordService` over in-memory data sources
//! - Custom assertions for dbsplit error variants

// Re-export core types for convenience
pub use dbsplit_core::{
    operations, CacheError, DataSourceError, DbSplitError, DbSplitResult, InsertAck,
    OperationRoutes, Record, RecordId, RecordStatements, RoutingKey, Statement, StatementKind,
    ValidationError, WriteOutcome,
};
pub use dbsplit_storage::{
    CacheBackend, CacheConfig, CacheRead, CacheStats, CacheableEntity, DataAccess,
    DataSourceResolver, InMemoryCacheBackend, InMemoryDataAccess, InMemoryDataSource,
    ReadThroughCache, RecordService, RoutingContext, RoutingInterceptor,
};

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

// ============================================================================
// RECORDING DATA ACCESS
// ============================================================================

/// What a [`RecordingDataAccess`] saw for one statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Observation {
    pub kind: StatementKind,
    /// Routing key visible in the calling task when the statement ran.
    pub context_key: RoutingKey,
    /// Label of the data source the statement was executed against.
    pub source: RoutingKey,
}

/// [`DataAccess`] over in-memory sources that counts calls and records the
/// routing context each statement ran under.
///
/// An optional delay is awaited before the context is sampled, which forces
/// concurrent tasks to interleave.
#[derive(Debug, Default)]
pub struct RecordingDataAccess {
    inner: InMemoryDataAccess,
    observations: Mutex<Vec<Observation>>,
    reads: AtomicU64,
    writes: AtomicU64,
    delay: Option<Duration>,
}

impl RecordingDataAccess {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    /// Number of read statements executed.
    pub fn read_calls(&self) -> u64 {
        self.reads.load(Ordering::SeqCst)
    }

    /// Number of write statements executed.
    pub fn write_calls(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn observations(&self) -> Vec<Observation> {
        self.observations
            .lock()
            .map(|obs| obs.clone())
            .unwrap_or_default()
    }

    pub fn last_observation(&self) -> Option<Observation> {
        self.observations().last().copied()
    }

    pub fn reset(&self) {
        if let Ok(mut obs) = self.observations.lock() {
            obs.clear();
        }
        self.reads.store(0, Ordering::SeqCst);
        self.writes.store(0, Ordering::SeqCst);
    }

    async fn observe(&self, kind: StatementKind, source: RoutingKey) {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let observation = Observation {
            kind,
            context_key: RoutingContext::current(),
            source,
        };
        if let Ok(mut obs) = self.observations.lock() {
            obs.push(observation);
        }
    }
}

#[async_trait]
impl DataAccess for RecordingDataAccess {
    type Pool = Arc<InMemoryDataSource>;

    async fn write(
        &self,
        pool: &Self::Pool,
        statement: &Statement,
    ) -> DbSplitResult<WriteOutcome> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.observe(statement.kind, pool.label()).await;
        self.inner.write(pool, statement).await
    }

    async fn read(
        &self,
        pool: &Self::Pool,
        statement: &Statement,
    ) -> DbSplitResult<Option<Record>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.observe(statement.kind, pool.label()).await;
        self.inner.read(pool, statement).await
    }
}

// ============================================================================
// FAILING CACHE BACKEND
// ============================================================================

/// Cache backend whose reads and/or writes can be made to fail.
///
/// Backed by an [`InMemoryCacheBackend`] so that the non-failing half keeps
/// working. `contains` and `stats` follow the read switch, `delete` follows
/// the write switch.
#[derive(Debug, Default)]
pub struct FailingCacheBackend {
    inner: InMemoryCacheBackend,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    get_calls: AtomicU64,
    put_calls: AtomicU64,
}

impl FailingCacheBackend {
    /// Every operation fails.
    pub fn new() -> Self {
        let backend = Self::default();
        backend.set_fail_reads(true);
        backend.set_fail_writes(true);
        backend
    }

    /// Reads work, puts fail.
    pub fn failing_writes() -> Self {
        let backend = Self::default();
        backend.set_fail_writes(true);
        backend
    }

    /// Puts work, reads fail.
    pub fn failing_reads() -> Self {
        let backend = Self::default();
        backend.set_fail_reads(true);
        backend
    }

    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn get_calls(&self) -> u64 {
        self.get_calls.load(Ordering::SeqCst)
    }

    pub fn put_calls(&self) -> u64 {
        self.put_calls.load(Ordering::SeqCst)
    }

    /// The wrapped backend, bypassing the failure switches.
    pub fn inner(&self) -> &InMemoryCacheBackend {
        &self.inner
    }

    fn check(&self, flag: &AtomicBool, op: &str) -> DbSplitResult<()> {
        if flag.load(Ordering::SeqCst) {
            Err(CacheError::Unavailable {
                reason: format!("injected {} failure", op),
            }
            .into())
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl CacheBackend for FailingCacheBackend {
    async fn get<T: CacheableEntity>(
        &self,
        key: &str,
    ) -> DbSplitResult<Option<(T, DateTime<Utc>)>> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        self.check(&self.fail_reads, "get")?;
        self.inner.get(key).await
    }

    async fn put<T: CacheableEntity>(
        &self,
        key: &str,
        entity: &T,
        cached_at: DateTime<Utc>,
        ttl: Option<Duration>,
    ) -> DbSplitResult<()> {
        self.put_calls.fetch_add(1, Ordering::SeqCst);
        self.check(&self.fail_writes, "put")?;
        self.inner.put(key, entity, cached_at, ttl).await
    }

    async fn contains(&self, key: &str) -> DbSplitResult<bool> {
        self.check(&self.fail_reads, "contains")?;
        self.inner.contains(key).await
    }

    async fn delete(&self, key: &str) -> DbSplitResult<bool> {
        self.check(&self.fail_writes, "delete")?;
        self.inner.delete(key).await
    }

    async fn stats(&self) -> DbSplitResult<CacheStats> {
        self.check(&self.fail_reads, "stats")?;
        self.inner.stats().await
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for dbsplit types.

    use super::*;
    use proptest::prelude::*;

    /// Positive record ids.
    pub fn arb_record_id() -> impl Strategy<Value = RecordId> {
        1i64..1_000_000
    }

    /// Non-blank names that need no escaping in a query string.
    pub fn arb_record_name() -> impl Strategy<Value = String> {
        "[a-zA-Z0-9][a-zA-Z0-9_.-]{0,31}"
    }

    pub fn arb_record() -> impl Strategy<Value = Record> {
        (arb_record_id(), arb_record_name()).prop_map(|(id, name)| Record::new(id, name))
    }

    pub fn arb_routing_key() -> impl Strategy<Value = RoutingKey> {
        prop_oneof![Just(RoutingKey::Primary), Just(RoutingKey::Replica)]
    }

    /// A recognized route declaration and the key it names.
    pub fn arb_route_declaration() -> impl Strategy<Value = (String, RoutingKey)> {
        prop_oneof![
            Just(("primary".to_string(), RoutingKey::Primary)),
            Just(("masterDB".to_string(), RoutingKey::Primary)),
            Just(("MASTER".to_string(), RoutingKey::Primary)),
            Just(("master_db".to_string(), RoutingKey::Primary)),
            Just(("replica".to_string(), RoutingKey::Replica)),
            Just(("slaveDB".to_string(), RoutingKey::Replica)),
            Just(("Slave".to_string(), RoutingKey::Replica)),
            Just(("slave-db".to_string(), RoutingKey::Replica)),
        ]
    }

    /// Declarations that name no data source.
    pub fn arb_unknown_declaration() -> impl Strategy<Value = String> {
        "[a-z]{1,12}".prop_filter("must not name a data source", |s| {
            RoutingKey::from_declaration(s).is_err()
        })
    }

    /// A run of routing keys, e.g. for sequential-operation tests.
    pub fn arb_routing_sequence(max_len: usize) -> impl Strategy<Value = Vec<RoutingKey>> {
        prop::collection::vec(arb_routing_key(), 1..=max_len)
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-wired services over in-memory data sources.

    use super::*;

    /// A [`RecordService`] together with the doubles behind it.
    pub struct Harness<C: CacheBackend = InMemoryCacheBackend> {
        pub primary: Arc<InMemoryDataSource>,
        pub replica: Arc<InMemoryDataSource>,
        pub access: Arc<RecordingDataAccess>,
        pub cache: Arc<C>,
        pub service: RecordService<RecordingDataAccess, C>,
    }

    /// Build a harness from its parts.
    pub fn harness_with<C: CacheBackend>(
        primary: Arc<InMemoryDataSource>,
        replica: Arc<InMemoryDataSource>,
        access: RecordingDataAccess,
        routes: OperationRoutes,
        cache: Arc<C>,
        config: CacheConfig,
    ) -> DbSplitResult<Harness<C>> {
        let resolver = DataSourceResolver::builder()
            .default_key(routes.default_key())
            .register(RoutingKey::Primary, Arc::clone(&primary))
            .register(RoutingKey::Replica, Arc::clone(&replica))
            .build()?;
        let access = Arc::new(access);
        let service = RecordService::new(
            Arc::new(resolver),
            Arc::clone(&access),
            ReadThroughCache::new(Arc::clone(&cache), config),
            RoutingInterceptor::new(routes),
        );
        Ok(Harness {
            primary,
            replica,
            access,
            cache,
            service,
        })
    }

    /// One table registered under both keys, so reads on the replica route
    /// see writes made on the primary route.
    pub fn synchronized_harness() -> DbSplitResult<Harness> {
        let table = InMemoryDataSource::shared(RoutingKey::Primary);
        harness_with(
            Arc::clone(&table),
            table,
            RecordingDataAccess::new(),
            OperationRoutes::default(),
            Arc::new(InMemoryCacheBackend::new()),
            CacheConfig::default(),
        )
    }

    /// Separate primary and replica tables with default routes.
    pub fn split_harness() -> DbSplitResult<Harness> {
        split_harness_with_cache(Arc::new(InMemoryCacheBackend::new()))
    }

    pub fn split_harness_with_cache<C: CacheBackend>(cache: Arc<C>) -> DbSplitResult<Harness<C>> {
        harness_with(
            InMemoryDataSource::shared(RoutingKey::Primary),
            InMemoryDataSource::shared(RoutingKey::Replica),
            RecordingDataAccess::new(),
            OperationRoutes::default(),
            cache,
            CacheConfig::default(),
        )
    }

    /// Synchronized tables with a cache whose failure modes can be switched.
    pub fn synchronized_harness_with_failing_cache(
        cache: FailingCacheBackend,
    ) -> DbSplitResult<Harness<FailingCacheBackend>> {
        let table = InMemoryDataSource::shared(RoutingKey::Primary);
        harness_with(
            Arc::clone(&table),
            table,
            RecordingDataAccess::new(),
            OperationRoutes::default(),
            Arc::new(cache),
            CacheConfig::default(),
        )
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertion helpers for dbsplit error variants.

    use super::*;

    /// Assert that a result is a `DataSourceError::Unavailable` for `key`.
    #[track_caller]
    pub fn assert_data_source_unavailable<T: std::fmt::Debug>(
        result: &DbSplitResult<T>,
        key: RoutingKey,
    ) {
        match result {
            Err(DbSplitError::DataSource(DataSourceError::Unavailable { key: k, .. })) => {
                assert_eq!(*k, key, "Wrong data source in Unavailable error");
            }
            other => panic!("Expected {} unavailable, got: {:?}", key, other),
        }
    }

    /// Assert that a result is a `RequiredFieldMissing` validation error.
    #[track_caller]
    pub fn assert_missing_field<T: std::fmt::Debug>(result: &DbSplitResult<T>, field: &str) {
        match result {
            Err(DbSplitError::Validation(ValidationError::RequiredFieldMissing { field: f })) => {
                assert_eq!(f, field, "Wrong field in RequiredFieldMissing");
            }
            other => panic!("Expected missing field '{}', got: {:?}", field, other),
        }
    }

    #[track_caller]
    pub fn assert_cache_hit<T: std::fmt::Debug>(read: &CacheRead<T>) {
        assert!(read.was_cache_hit(), "Expected a cache hit, got: {:?}", read);
    }

    #[track_caller]
    pub fn assert_cache_miss<T: std::fmt::Debug>(read: &CacheRead<T>) {
        assert!(read.was_cache_miss(), "Expected a cache miss, got: {:?}", read);
    }
}

#[cfg(test)]
mod tests {
    use super::assertions::*;
    use super::fixtures::*;
    use super::*;

    #[tokio::test]
    async fn test_recording_access_sees_declared_routes() -> DbSplitResult<()> {
        let h = synchronized_harness()?;
        let ack = h.service.insert("alice").await?;
        h.service.select(ack.id).await?;

        let observed = h.access.observations();
        assert_eq!(observed.len(), 2);
        assert_eq!(observed[0].kind, StatementKind::Insert);
        assert_eq!(observed[0].context_key, RoutingKey::Primary);
        assert_eq!(observed[1].kind, StatementKind::SelectById);
        assert_eq!(observed[1].context_key, RoutingKey::Replica);
        Ok(())
    }

    #[tokio::test]
    async fn test_failing_writes_still_serve_reads() -> DbSplitResult<()> {
        let h = synchronized_harness_with_failing_cache(FailingCacheBackend::failing_writes())?;
        let ack = h.service.insert("bob").await?;

        let read = h.service.select_read(ack.id).await?.expect("exists");
        assert_cache_miss(&read);
        assert_eq!(h.cache.put_calls(), 1);
        assert_eq!(h.cache.inner().stats().await?.entry_count, 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_split_harness_replica_outage() -> DbSplitResult<()> {
        let h = split_harness()?;
        h.replica.set_available(false);
        let result = h.service.select(1).await;
        assert_data_source_unavailable(&result, RoutingKey::Replica);
        Ok(())
    }

    #[test]
    fn test_reset_clears_counters() {
        let access = RecordingDataAccess::new();
        access.writes.fetch_add(3, Ordering::SeqCst);
        access.reset();
        assert_eq!(access.write_calls(), 0);
        assert!(access.observations().is_empty());
    }
}
