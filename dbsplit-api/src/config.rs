//! API Configuration Module
//!
//! Route declarations, cache settings and server settings, loaded from
//! environment variables with defaults suitable for local development.
//! Per-database connection settings live in [`crate::db::DbConfig`].

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use dbsplit_core::{operations, ConfigError, DbSplitResult, OperationRoutes, RoutingKey};
use dbsplit_storage::CacheConfig;

fn env_lookup(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parse_key(field: &str, value: &str) -> DbSplitResult<RoutingKey> {
    RoutingKey::from_declaration(value).map_err(|_| {
        ConfigError::InvalidValue {
            field: field.to_string(),
            value: value.to_string(),
            reason: "expected primary or replica".to_string(),
        }
        .into()
    })
}

// ============================================================================
// ROUTING CONFIGURATION
// ============================================================================

/// Which data source each operation is declared against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoutingConfig {
    /// Used when no intent is set, and for undeclared operations.
    pub default_route: RoutingKey,
    pub insert_route: RoutingKey,
    pub select_route: RoutingKey,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            default_route: RoutingKey::Primary,
            insert_route: RoutingKey::Primary,
            select_route: RoutingKey::Replica,
        }
    }
}

impl RoutingConfig {
    /// Load route declarations from environment variables.
    ///
    /// - `DBSPLIT_DEFAULT_ROUTE` (default: primary)
    /// - `DBSPLIT_ROUTE_INSERT` (default: primary)
    /// - `DBSPLIT_ROUTE_SELECT` (default: replica)
    ///
    /// Legacy names such as `masterDB` and `slaveDB` are accepted.
    pub fn from_env() -> DbSplitResult<Self> {
        Self::from_vars(env_lookup)
    }

    pub fn from_vars(lookup: impl Fn(&str) -> Option<String>) -> DbSplitResult<Self> {
        let defaults = Self::default();
        let key = |name: &str, default: RoutingKey| match lookup(name) {
            Some(value) => parse_key(name, &value),
            None => Ok(default),
        };

        Ok(Self {
            default_route: key("DBSPLIT_DEFAULT_ROUTE", defaults.default_route)?,
            insert_route: key("DBSPLIT_ROUTE_INSERT", defaults.insert_route)?,
            select_route: key("DBSPLIT_ROUTE_SELECT", defaults.select_route)?,
        })
    }

    /// The route table consulted by the interceptor.
    pub fn operation_routes(&self) -> OperationRoutes {
        OperationRoutes::new(self.default_route)
            .with_route(operations::INSERT, self.insert_route)
            .with_route(operations::SELECT, self.select_route)
    }
}

// ============================================================================
// CACHE CONFIGURATION
// ============================================================================

/// Which cache backend serves the read path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheBackendKind {
    /// Memory-mapped LMDB store under `path`; survives restarts.
    Lmdb,
    /// Process-local map.
    Memory,
}

/// Cache settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheSettings {
    pub backend: CacheBackendKind,
    pub path: PathBuf,
    pub size_mb: usize,
    /// `None` keeps entries until they are removed explicitly.
    pub ttl: Option<Duration>,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            backend: CacheBackendKind::Lmdb,
            path: PathBuf::from("./data/cache"),
            size_mb: 100,
            ttl: None,
        }
    }
}

impl CacheSettings {
    /// Load cache settings from environment variables.
    ///
    /// - `DBSPLIT_CACHE_BACKEND`: `lmdb` or `memory` (default: lmdb)
    /// - `DBSPLIT_CACHE_PATH`: LMDB directory (default: ./data/cache)
    /// - `DBSPLIT_CACHE_SIZE_MB`: LMDB map size (default: 100)
    /// - `DBSPLIT_CACHE_TTL_SECS`: entry TTL, unset or 0 for none
    pub fn from_env() -> DbSplitResult<Self> {
        Self::from_vars(env_lookup)
    }

    pub fn from_vars(lookup: impl Fn(&str) -> Option<String>) -> DbSplitResult<Self> {
        let defaults = Self::default();

        let backend = match lookup("DBSPLIT_CACHE_BACKEND") {
            None => defaults.backend,
            Some(value) => match value.trim().to_lowercase().as_str() {
                "lmdb" => CacheBackendKind::Lmdb,
                "memory" => CacheBackendKind::Memory,
                _ => {
                    return Err(ConfigError::InvalidValue {
                        field: "DBSPLIT_CACHE_BACKEND".to_string(),
                        value: value.clone(),
                        reason: "expected lmdb or memory".to_string(),
                    }
                    .into())
                }
            },
        };

        let size_mb = match lookup("DBSPLIT_CACHE_SIZE_MB") {
            None => defaults.size_mb,
            Some(value) => match value.trim().parse::<usize>() {
                Ok(size) if size > 0 => size,
                _ => {
                    return Err(ConfigError::InvalidValue {
                        field: "DBSPLIT_CACHE_SIZE_MB".to_string(),
                        value,
                        reason: "expected a positive number of megabytes".to_string(),
                    }
                    .into())
                }
            },
        };

        let ttl = match lookup("DBSPLIT_CACHE_TTL_SECS") {
            None => None,
            Some(value) => match value.trim().parse::<u64>() {
                Ok(0) => None,
                Ok(secs) => Some(Duration::from_secs(secs)),
                Err(_) => {
                    return Err(ConfigError::InvalidValue {
                        field: "DBSPLIT_CACHE_TTL_SECS".to_string(),
                        value,
                        reason: "expected whole seconds".to_string(),
                    }
                    .into())
                }
            },
        };

        Ok(Self {
            backend,
            path: lookup("DBSPLIT_CACHE_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.path),
            size_mb,
            ttl,
        })
    }

    /// Read-path configuration for these settings.
    pub fn cache_config(&self) -> CacheConfig {
        match self.ttl {
            Some(ttl) => CacheConfig::new().with_ttl(ttl),
            None => CacheConfig::new(),
        }
    }
}

// ============================================================================
// SERVER CONFIGURATION
// ============================================================================

/// HTTP server settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiConfig {
    pub bind_addr: SocketAddr,
    /// Requests running longer than this are answered with 408.
    pub request_timeout: Duration,
}

impl ApiConfig {
    /// Load server settings from environment variables.
    ///
    /// - `DBSPLIT_API_BIND`: host to bind (default: 0.0.0.0)
    /// - `PORT` or `DBSPLIT_API_PORT`: port (default: 3000)
    /// - `DBSPLIT_REQUEST_TIMEOUT_SECS`: request timeout (default: 30)
    pub fn from_env() -> DbSplitResult<Self> {
        Self::from_vars(env_lookup)
    }

    pub fn from_vars(lookup: impl Fn(&str) -> Option<String>) -> DbSplitResult<Self> {
        let host = lookup("DBSPLIT_API_BIND").unwrap_or_else(|| "0.0.0.0".to_string());
        let port_str = lookup("PORT")
            .or_else(|| lookup("DBSPLIT_API_PORT"))
            .unwrap_or_else(|| "3000".to_string());
        let port = port_str.parse::<u16>().map_err(|_| ConfigError::InvalidValue {
            field: "PORT".to_string(),
            value: port_str.clone(),
            reason: "expected a port number".to_string(),
        })?;

        let addr = format!("{}:{}", host, port);
        let bind_addr = addr.parse::<SocketAddr>().map_err(|e| ConfigError::InvalidValue {
            field: "DBSPLIT_API_BIND".to_string(),
            value: addr.clone(),
            reason: e.to_string(),
        })?;

        let request_timeout = lookup("DBSPLIT_REQUEST_TIMEOUT_SECS")
            .and_then(|s| s.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(Duration::from_secs(30));

        Ok(Self {
            bind_addr,
            request_timeout,
        })
    }
}
