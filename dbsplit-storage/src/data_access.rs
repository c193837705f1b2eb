//! Data access contract and an in-memory data source.
//!
//! The core only requires that reads and writes accept a pool that was
//! already chosen by the routing layer. SQL dialect, pooling and transaction
//! scope belong to the implementation.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use dbsplit_core::{
    DataSourceError, DbSplitResult, Record, RecordId, RoutingKey, SqlParam, Statement,
    StatementKind, WriteOutcome,
};

/// Executes parameterized statements against a resolved pool.
#[async_trait]
pub trait DataAccess: Send + Sync {
    /// Physical connection handle chosen by the resolver.
    type Pool: Send + Sync;

    /// Execute a write statement.
    async fn write(&self, pool: &Self::Pool, statement: &Statement)
        -> DbSplitResult<WriteOutcome>;

    /// Execute a single-record read. `Ok(None)` means no such record.
    async fn read(&self, pool: &Self::Pool, statement: &Statement)
        -> DbSplitResult<Option<Record>>;
}

// ============================================================================
// IN-MEMORY DATA SOURCE
// ============================================================================

/// A single in-memory table standing in for one physical database.
///
/// Register the same `Arc` under both routing keys to model a replica that is
/// always in sync with the primary.
#[derive(Debug)]
pub struct InMemoryDataSource {
    label: RoutingKey,
    rows: RwLock<BTreeMap<RecordId, String>>,
    next_id: AtomicI64,
    available: AtomicBool,
    reads: AtomicU64,
    writes: AtomicU64,
}

impl InMemoryDataSource {
    pub fn new(label: RoutingKey) -> Self {
        Self {
            label,
            rows: RwLock::new(BTreeMap::new()),
            next_id: AtomicI64::new(1),
            available: AtomicBool::new(true),
            reads: AtomicU64::new(0),
            writes: AtomicU64::new(0),
        }
    }

    pub fn shared(label: RoutingKey) -> Arc<Self> {
        Arc::new(Self::new(label))
    }

    pub fn label(&self) -> RoutingKey {
        self.label
    }

    /// Simulate the database going away (or coming back).
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    /// Number of reads served so far.
    pub fn read_count(&self) -> u64 {
        self.reads.load(Ordering::SeqCst)
    }

    /// Number of writes applied so far.
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn row_count(&self) -> usize {
        self.rows.read().map(|rows| rows.len()).unwrap_or(0)
    }

    /// Insert a row with a fixed id, bypassing statements (fixtures).
    pub fn seed(&self, record: &Record) -> DbSplitResult<()> {
        self.rows_mut()?.insert(record.id, record.name.clone());
        self.next_id.fetch_max(record.id.saturating_add(1), Ordering::SeqCst);
        Ok(())
    }

    pub fn insert_name(&self, name: &str) -> DbSplitResult<RecordId> {
        self.check_available()?;
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.rows_mut()?.insert(id, name.to_string());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(id)
    }

    pub fn get(&self, id: RecordId) -> DbSplitResult<Option<Record>> {
        self.check_available()?;
        self.reads.fetch_add(1, Ordering::SeqCst);
        let rows = self.rows.read().map_err(|_| self.poisoned())?;
        Ok(rows.get(&id).map(|name| Record::new(id, name.clone())))
    }

    fn check_available(&self) -> DbSplitResult<()> {
        if self.is_available() {
            Ok(())
        } else {
            Err(DataSourceError::Unavailable {
                key: self.label,
                reason: "data source is offline".to_string(),
            }
            .into())
        }
    }

    fn rows_mut(
        &self,
    ) -> DbSplitResult<std::sync::RwLockWriteGuard<'_, BTreeMap<RecordId, String>>> {
        self.rows.write().map_err(|_| self.poisoned())
    }

    fn poisoned(&self) -> dbsplit_core::DbSplitError {
        DataSourceError::QueryFailed {
            reason: format!("{} table lock poisoned", self.label),
        }
        .into()
    }
}

/// [`DataAccess`] over [`InMemoryDataSource`] pools.
#[derive(Debug, Clone, Copy, Default)]
pub struct InMemoryDataAccess;

#[async_trait]
impl DataAccess for InMemoryDataAccess {
    type Pool = Arc<InMemoryDataSource>;

    async fn write(
        &self,
        pool: &Self::Pool,
        statement: &Statement,
    ) -> DbSplitResult<WriteOutcome> {
        match (statement.kind, statement.param(0)) {
            (StatementKind::Insert, Some(SqlParam::Text(name))) => {
                let id = pool.insert_name(name)?;
                Ok(WriteOutcome {
                    rows_affected: 1,
                    last_insert_id: Some(id),
                })
            }
            _ => Err(unsupported(statement)),
        }
    }

    async fn read(
        &self,
        pool: &Self::Pool,
        statement: &Statement,
    ) -> DbSplitResult<Option<Record>> {
        match (statement.kind, statement.param(0)) {
            (StatementKind::SelectById, Some(SqlParam::Int(id))) => pool.get(*id),
            _ => Err(unsupported(statement)),
        }
    }
}

fn unsupported(statement: &Statement) -> dbsplit_core::DbSplitError {
    DataSourceError::QueryFailed {
        reason: format!("unsupported statement: {}", statement.sql),
    }
    .into()
}
