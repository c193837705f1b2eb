//! Database Connection Pool Module
//!
//! PostgreSQL connection pooling for the primary and the replica using
//! deadpool-postgres, and the [`DataAccess`] implementation that executes
//! record statements against whichever pool the resolver selected.

use crate::error::{ApiError, ApiResult};
use async_trait::async_trait;
use dbsplit_core::{
    ConfigError, DataSourceError, DbSplitError, DbSplitResult, Record, RecordStatements,
    RoutingKey, SqlParam, Statement, StatementKind, WriteOutcome,
};
use dbsplit_storage::{DataAccess, DataSourceResolver};
use deadpool_postgres::{
    Config, ManagerConfig, Pool, PoolConfig, RecyclingMethod, Runtime, Timeouts,
};
use std::time::Duration;
use tokio_postgres::types::ToSql;
use tokio_postgres::NoTls;

// ============================================================================
// CONNECTION POOL CONFIGURATION
// ============================================================================

/// Connection settings for one physical database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbConfig {
    /// PostgreSQL host
    pub host: String,
    /// PostgreSQL port
    pub port: u16,
    /// Database name
    pub dbname: String,
    /// Database user
    pub user: String,
    /// Database password
    pub password: String,
    /// Maximum pool size
    pub max_size: usize,
    /// Connection timeout
    pub timeout: Duration,
}

impl DbConfig {
    /// Defaults for the data source behind `key`.
    pub fn defaults_for(key: RoutingKey) -> Self {
        let (port, dbname) = match key {
            RoutingKey::Primary => (5432, "master_db"),
            RoutingKey::Replica => (5433, "slave_db"),
        };
        Self {
            host: "localhost".to_string(),
            port,
            dbname: dbname.to_string(),
            user: "postgres".to_string(),
            password: "".to_string(),
            max_size: 16,
            timeout: Duration::from_secs(30),
        }
    }

    /// Environment variable prefix for `key`, e.g. `DBSPLIT_REPLICA_`.
    pub fn env_prefix(key: RoutingKey) -> String {
        format!("DBSPLIT_{}_", key.as_str().to_uppercase())
    }

    /// Load the configuration for `key` from environment variables.
    ///
    /// Reads `HOST`, `PORT`, `NAME`, `USER`, `PASSWORD`, `POOL_SIZE` and
    /// `TIMEOUT` (seconds) under [`DbConfig::env_prefix`].
    pub fn from_env(key: RoutingKey) -> Self {
        Self::from_vars(key, |name| std::env::var(name).ok())
    }

    /// Like [`DbConfig::from_env`], reading values through `lookup`.
    pub fn from_vars(key: RoutingKey, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let prefix = Self::env_prefix(key);
        let var = |suffix: &str| lookup(&format!("{}{}", prefix, suffix));
        let defaults = Self::defaults_for(key);

        Self {
            host: var("HOST").unwrap_or(defaults.host),
            port: var("PORT")
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.port),
            dbname: var("NAME").unwrap_or(defaults.dbname),
            user: var("USER").unwrap_or(defaults.user),
            password: var("PASSWORD").unwrap_or_default(),
            max_size: var("POOL_SIZE")
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_size),
            timeout: var("TIMEOUT")
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.timeout),
        }
    }

    pub fn validate(&self) -> DbSplitResult<()> {
        if self.max_size == 0 {
            return Err(ConfigError::InvalidValue {
                field: format!("{}.pool_size", self.dbname),
                value: "0".to_string(),
                reason: "pool size must be at least 1".to_string(),
            }
            .into());
        }
        if self.host.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: format!("{}.host", self.dbname),
                value: self.host.clone(),
                reason: "host must not be empty".to_string(),
            }
            .into());
        }
        Ok(())
    }

    /// Create a connection pool from this configuration.
    ///
    /// Connections are established lazily on first use.
    pub fn create_pool(&self) -> ApiResult<Pool> {
        self.validate()?;

        let mut cfg = Config::new();
        cfg.host = Some(self.host.clone());
        cfg.port = Some(self.port);
        cfg.dbname = Some(self.dbname.clone());
        cfg.user = Some(self.user.clone());
        cfg.password = Some(self.password.clone());

        cfg.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });

        let mut pool_config = PoolConfig::new(self.max_size);
        pool_config.timeouts = Timeouts {
            wait: Some(self.timeout),
            create: Some(self.timeout),
            recycle: Some(self.timeout),
        };
        cfg.pool = Some(pool_config);

        let pool = cfg
            .create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| ApiError::database_error(format!("Failed to create pool: {}", e)))?;

        Ok(pool)
    }
}

// ============================================================================
// POSTGRES DATA ACCESS
// ============================================================================

/// A deadpool pool tagged with the routing key it was registered under.
#[derive(Clone)]
pub struct PgDataSource {
    key: RoutingKey,
    pool: Pool,
}

impl PgDataSource {
    pub fn new(key: RoutingKey, pool: Pool) -> Self {
        Self { key, pool }
    }

    pub fn from_config(key: RoutingKey, config: &DbConfig) -> ApiResult<Self> {
        Ok(Self::new(key, config.create_pool()?))
    }

    pub fn key(&self) -> RoutingKey {
        self.key
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    /// Get the current pool size for observability.
    pub fn pool_size(&self) -> usize {
        self.pool.status().size
    }

    async fn get_conn(&self) -> DbSplitResult<deadpool_postgres::Object> {
        self.pool.get().await.map_err(|e| {
            tracing::error!(routing_key = %self.key, error = ?e, "Connection pool error");
            DbSplitError::from(DataSourceError::Unavailable {
                key: self.key,
                reason: e.to_string(),
            })
        })
    }
}

impl std::fmt::Debug for PgDataSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgDataSource")
            .field("key", &self.key)
            .field("pool_size", &self.pool_size())
            .finish()
    }
}

/// [`DataAccess`] over deadpool-postgres pools.
#[derive(Debug, Clone, Copy, Default)]
pub struct PgDataAccess;

fn bind_params(params: &[SqlParam]) -> Vec<&(dyn ToSql + Sync)> {
    params
        .iter()
        .map(|param| match param {
            SqlParam::Int(value) => value as &(dyn ToSql + Sync),
            SqlParam::Text(value) => value as &(dyn ToSql + Sync),
        })
        .collect()
}

fn query_failed(err: tokio_postgres::Error) -> DbSplitError {
    tracing::error!("Database error: {:?}", err);
    DataSourceError::QueryFailed {
        reason: err.to_string(),
    }
    .into()
}

#[async_trait]
impl DataAccess for PgDataAccess {
    type Pool = PgDataSource;

    async fn write(
        &self,
        pool: &PgDataSource,
        statement: &Statement,
    ) -> DbSplitResult<WriteOutcome> {
        if statement.kind != StatementKind::Insert {
            return Err(DataSourceError::QueryFailed {
                reason: format!("not a write statement: {}", statement.sql),
            }
            .into());
        }

        let conn = pool.get_conn().await?;
        let params = bind_params(&statement.params);

        // INSERT ... RETURNING id
        let row = conn
            .query_opt(statement.sql.as_str(), &params)
            .await
            .map_err(query_failed)?
            .ok_or_else(|| DataSourceError::MissingRow {
                statement: statement.sql.clone(),
            })?;
        let id: i64 = row.try_get(0).map_err(query_failed)?;
        Ok(WriteOutcome {
            rows_affected: 1,
            last_insert_id: Some(id),
        })
    }

    async fn read(
        &self,
        pool: &PgDataSource,
        statement: &Statement,
    ) -> DbSplitResult<Option<Record>> {
        let conn = pool.get_conn().await?;
        let params = bind_params(&statement.params);

        let Some(row) = conn
            .query_opt(statement.sql.as_str(), &params)
            .await
            .map_err(query_failed)?
        else {
            return Ok(None);
        };

        Ok(Some(Record {
            id: row.try_get("id").map_err(query_failed)?,
            name: row.try_get("name").map_err(query_failed)?,
        }))
    }
}

/// Create the record table on every registered data source.
pub async fn ensure_schema(
    resolver: &DataSourceResolver<PgDataSource>,
    statements: &RecordStatements,
) -> ApiResult<()> {
    let ddl = statements.create_table();
    for key in resolver.registered_keys() {
        let source = resolver.resolve(key);
        let conn = source.pool().get().await?;
        conn.batch_execute(&ddl).await?;
        tracing::info!(routing_key = %key, table = statements.table(), "Schema ensured");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_per_source() {
        let primary = DbConfig::from_vars(RoutingKey::Primary, vars(&[]));
        let replica = DbConfig::from_vars(RoutingKey::Replica, vars(&[]));
        assert_eq!(primary.dbname, "master_db");
        assert_eq!(replica.dbname, "slave_db");
        assert_eq!(primary.timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_env_prefix() {
        assert_eq!(DbConfig::env_prefix(RoutingKey::Primary), "DBSPLIT_PRIMARY_");
        assert_eq!(DbConfig::env_prefix(RoutingKey::Replica), "DBSPLIT_REPLICA_");
    }

    #[test]
    fn test_overrides_read_with_prefix() {
        let config = DbConfig::from_vars(
            RoutingKey::Replica,
            vars(&[
                ("DBSPLIT_REPLICA_HOST", "replica.internal"),
                ("DBSPLIT_REPLICA_PORT", "6432"),
                ("DBSPLIT_REPLICA_POOL_SIZE", "4"),
                ("DBSPLIT_REPLICA_TIMEOUT", "5"),
                ("DBSPLIT_PRIMARY_HOST", "primary.internal"),
            ]),
        );
        assert_eq!(config.host, "replica.internal");
        assert_eq!(config.port, 6432);
        assert_eq!(config.max_size, 4);
        assert_eq!(config.timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_unparseable_port_keeps_default() {
        let config =
            DbConfig::from_vars(RoutingKey::Primary, vars(&[("DBSPLIT_PRIMARY_PORT", "x")]));
        assert_eq!(config.port, 5432);
    }

    #[test]
    fn test_zero_pool_size_rejected() {
        let config = DbConfig {
            max_size: 0,
            ..DbConfig::defaults_for(RoutingKey::Primary)
        };
        assert!(matches!(
            config.validate(),
            Err(DbSplitError::Config(ConfigError::InvalidValue { .. }))
        ));
    }

    #[tokio::test]
    async fn test_create_pool_is_lazy() -> ApiResult<()> {
        let source = PgDataSource::from_config(
            RoutingKey::Primary,
            &DbConfig::defaults_for(RoutingKey::Primary),
        )?;
        assert_eq!(source.key(), RoutingKey::Primary);
        assert_eq!(source.pool_size(), 0);
        Ok(())
    }

    #[test]
    fn test_bind_params_preserves_order() {
        let statement = RecordStatements::default().insert("alice");
        assert_eq!(bind_params(&statement.params).len(), 1);
    }
}
