//! Record operations routed between primary and replica.
//!
//! `insert` writes through whatever pool its route declaration resolves to
//! and never touches the cache. `select` goes through the cache-aside read
//! path; only misses reach the routed data source.

use std::sync::Arc;

use async_trait::async_trait;
use dbsplit_core::{
    operations, DataSourceError, DbSplitResult, InsertAck, Record, RecordId, RecordStatements,
    ValidationError,
};

use crate::cache::{CacheBackend, CacheRead, ReadThroughCache, StorageFetcher};
use crate::data_access::DataAccess;
use crate::routing::{DataSourceResolver, RoutingInterceptor};

/// Insert/select over a routed pair of data sources with a read cache.
pub struct RecordService<D, C>
where
    D: DataAccess,
    C: CacheBackend,
{
    resolver: Arc<DataSourceResolver<D::Pool>>,
    access: Arc<D>,
    cache: ReadThroughCache<C>,
    interceptor: RoutingInterceptor,
    statements: RecordStatements,
}

impl<D, C> RecordService<D, C>
where
    D: DataAccess,
    C: CacheBackend,
{
    pub fn new(
        resolver: Arc<DataSourceResolver<D::Pool>>,
        access: Arc<D>,
        cache: ReadThroughCache<C>,
        interceptor: RoutingInterceptor,
    ) -> Self {
        Self {
            resolver,
            access,
            cache,
            interceptor,
            statements: RecordStatements::default(),
        }
    }

    /// Use a table other than the default `users`.
    pub fn with_statements(mut self, statements: RecordStatements) -> Self {
        self.statements = statements;
        self
    }

    pub fn resolver(&self) -> &DataSourceResolver<D::Pool> {
        &self.resolver
    }

    pub fn cache(&self) -> &ReadThroughCache<C> {
        &self.cache
    }

    pub fn interceptor(&self) -> &RoutingInterceptor {
        &self.interceptor
    }

    pub fn statements(&self) -> &RecordStatements {
        &self.statements
    }

    /// Insert a new record and return its assigned id.
    pub async fn insert(&self, name: &str) -> DbSplitResult<InsertAck> {
        if name.trim().is_empty() {
            return Err(ValidationError::RequiredFieldMissing {
                field: "name".to_string(),
            }
            .into());
        }

        self.interceptor
            .run_operation(operations::INSERT, async {
                let statement = self.statements.insert(name);
                let (key, pool) = self.resolver.resolve_current_entry();
                tracing::debug!(routing_key = %key, "Executing insert");

                let outcome = self.access.write(pool, &statement).await?;
                let id = outcome
                    .last_insert_id
                    .ok_or_else(|| DataSourceError::MissingRow {
                        statement: statement.sql.clone(),
                    })?;
                Ok(InsertAck { id })
            })
            .await
    }

    /// Look a record up by id. `Ok(None)` means no such record.
    pub async fn select(&self, id: RecordId) -> DbSplitResult<Option<Record>> {
        Ok(self.select_read(id).await?.map(CacheRead::into_value))
    }

    /// Like [`RecordService::select`], keeping whether the cache served it.
    pub async fn select_read(&self, id: RecordId) -> DbSplitResult<Option<CacheRead<Record>>> {
        let fetcher = RoutedFetcher {
            resolver: &self.resolver,
            access: &*self.access,
            statements: &self.statements,
        };
        self.interceptor
            .run_operation(operations::SELECT, self.cache.get::<Record, _>(id, &fetcher))
            .await
    }
}

impl<D, C> Clone for RecordService<D, C>
where
    D: DataAccess,
    C: CacheBackend,
{
    fn clone(&self) -> Self {
        Self {
            resolver: Arc::clone(&self.resolver),
            access: Arc::clone(&self.access),
            cache: self.cache.clone(),
            interceptor: self.interceptor.clone(),
            statements: self.statements.clone(),
        }
    }
}

/// Reads from the pool selected by the caller's routing context.
struct RoutedFetcher<'a, D: DataAccess> {
    resolver: &'a DataSourceResolver<D::Pool>,
    access: &'a D,
    statements: &'a RecordStatements,
}

#[async_trait]
impl<'a, D: DataAccess> StorageFetcher<Record> for RoutedFetcher<'a, D> {
    async fn fetch(&self, id: RecordId) -> DbSplitResult<Option<Record>> {
        let (key, pool) = self.resolver.resolve_current_entry();
        tracing::debug!(routing_key = %key, id, "Cache miss, reading from data source");
        self.access.read(pool, &self.statements.select_by_id(id)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::InMemoryCacheBackend;
    use crate::data_access::{InMemoryDataAccess, InMemoryDataSource};
    use crate::routing::RoutingContext;
    use dbsplit_core::{DbSplitError, OperationRoutes, RoutingKey};

    type Service = RecordService<InMemoryDataAccess, InMemoryCacheBackend>;

    struct Fixture {
        primary: Arc<InMemoryDataSource>,
        replica: Arc<InMemoryDataSource>,
        cache: Arc<InMemoryCacheBackend>,
        service: Service,
    }

    fn fixture_with(
        primary: Arc<InMemoryDataSource>,
        replica: Arc<InMemoryDataSource>,
        routes: OperationRoutes,
    ) -> Fixture {
        let resolver = DataSourceResolver::builder()
            .register(RoutingKey::Primary, Arc::clone(&primary))
            .register(RoutingKey::Replica, Arc::clone(&replica))
            .build()
            .expect("primary registered");
        let cache = Arc::new(InMemoryCacheBackend::new());
        let service = RecordService::new(
            Arc::new(resolver),
            Arc::new(InMemoryDataAccess),
            ReadThroughCache::with_defaults(Arc::clone(&cache)),
            RoutingInterceptor::new(routes),
        );
        Fixture {
            primary,
            replica,
            cache,
            service,
        }
    }

    /// One table registered under both keys, so replica reads see writes.
    fn synchronized() -> Fixture {
        let table = InMemoryDataSource::shared(RoutingKey::Primary);
        fixture_with(Arc::clone(&table), table, OperationRoutes::default())
    }

    fn split() -> Fixture {
        fixture_with(
            InMemoryDataSource::shared(RoutingKey::Primary),
            InMemoryDataSource::shared(RoutingKey::Replica),
            OperationRoutes::default(),
        )
    }

    #[tokio::test]
    async fn test_insert_then_select() -> DbSplitResult<()> {
        let f = synchronized();
        let ack = f.service.insert("alice").await?;
        let record = f.service.select(ack.id).await?;
        assert_eq!(record, Some(Record::new(ack.id, "alice")));
        Ok(())
    }

    #[tokio::test]
    async fn test_insert_goes_to_primary_select_to_replica() -> DbSplitResult<()> {
        let f = split();
        f.replica.seed(&Record::new(1, "from-replica"))?;

        f.service.insert("bob").await?;
        let record = f.service.select(1).await?;

        assert_eq!(f.primary.write_count(), 1);
        assert_eq!(f.replica.write_count(), 0);
        assert_eq!(f.primary.read_count(), 0);
        assert_eq!(f.replica.read_count(), 1);
        assert_eq!(record.map(|r| r.name), Some("from-replica".to_string()));
        Ok(())
    }

    #[tokio::test]
    async fn test_select_routed_to_primary_when_configured() -> DbSplitResult<()> {
        let routes = OperationRoutes::default().with_route(operations::SELECT, RoutingKey::Primary);
        let f = fixture_with(
            InMemoryDataSource::shared(RoutingKey::Primary),
            InMemoryDataSource::shared(RoutingKey::Replica),
            routes,
        );
        let ack = f.service.insert("carol").await?;

        assert_eq!(f.service.select(ack.id).await?.map(|r| r.id), Some(ack.id));
        assert_eq!(f.replica.read_count(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_second_select_is_served_from_cache() -> DbSplitResult<()> {
        let f = synchronized();
        let ack = f.service.insert("dave").await?;

        let first = f.service.select_read(ack.id).await?.expect("exists");
        let second = f.service.select_read(ack.id).await?.expect("exists");

        assert!(first.was_cache_miss());
        assert!(second.was_cache_hit());
        assert_eq!(first.value(), second.value());
        assert_eq!(f.primary.read_count(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_insert_does_not_touch_cache() -> DbSplitResult<()> {
        let f = synchronized();
        f.service.insert("erin").await?;
        let stats = f.cache.stats().await?;
        assert_eq!(stats.entry_count, 0);
        assert_eq!(stats.hits + stats.misses, 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_not_found_is_none_and_uncached() -> DbSplitResult<()> {
        let f = synchronized();
        assert_eq!(f.service.select(999).await?, None);
        assert!(!f.cache.contains("999").await?);
        Ok(())
    }

    #[tokio::test]
    async fn test_empty_name_rejected() {
        let f = synchronized();
        let result = f.service.insert("  ").await;
        assert!(matches!(
            result,
            Err(DbSplitError::Validation(ValidationError::RequiredFieldMissing { .. }))
        ));
        assert_eq!(f.primary.write_count(), 0);
    }

    #[tokio::test]
    async fn test_cache_unavailable_fails_open() -> DbSplitResult<()> {
        let f = synchronized();
        let ack = f.service.insert("frank").await?;
        f.cache.set_available(false);

        assert_eq!(f.service.select(ack.id).await?, Some(Record::new(ack.id, "frank")));
        assert_eq!(f.service.select(ack.id).await?, Some(Record::new(ack.id, "frank")));
        assert_eq!(f.primary.read_count(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_replica_outage_propagates_and_restores_context() {
        let f = split();
        f.replica.set_available(false);

        RoutingContext::scope(Some(RoutingKey::Primary), async {
            let result = f.service.select(1).await;
            assert!(matches!(
                result,
                Err(DbSplitError::DataSource(DataSourceError::Unavailable {
                    key: RoutingKey::Replica,
                    ..
                }))
            ));
            assert_eq!(RoutingContext::get(), Some(RoutingKey::Primary));
        })
        .await;
    }

    #[tokio::test]
    async fn test_concurrent_selects_and_inserts_route_independently() -> DbSplitResult<()> {
        let f = split();
        for id in 1..=20 {
            f.replica.seed(&Record::new(id, format!("r{id}")))?;
        }

        let mut handles = Vec::new();
        for id in 1..=20 {
            let service = f.service.clone();
            handles.push(tokio::spawn(async move {
                service.insert(&format!("w{id}")).await?;
                service.select(id).await
            }));
        }
        for handle in handles {
            let record = handle.await.expect("task completed")?;
            assert!(record.is_some_and(|r| r.name.starts_with('r')));
        }

        assert_eq!(f.primary.write_count(), 20);
        assert_eq!(f.replica.write_count(), 0);
        assert_eq!(f.primary.read_count(), 0);
        Ok(())
    }
}
