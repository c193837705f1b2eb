//! Error types for dbsplit operations

use crate::RoutingKey;
use thiserror::Error;

/// Routing declaration and resolution errors.
///
/// `InvalidDeclaration` and `UnknownRoutingKey` are recovered locally by the
/// interceptor and the resolver (fallback to the default key); they exist so
/// the fallback can be logged with a typed reason.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RoutingError {
    #[error("Invalid routing declaration: {declaration:?}")]
    InvalidDeclaration { declaration: String },

    #[error("No data source registered for routing key {key}")]
    UnknownRoutingKey { key: RoutingKey },

    #[error("No routing scope is active on the current task")]
    NoActiveScope,
}

/// Cache backend errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("Cache backend unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("Cache serialization failed for key {key}: {reason}")]
    Serialization { key: String, reason: String },

    #[error("Cache backend error: {reason}")]
    Backend { reason: String },
}

/// Physical data source errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DataSourceError {
    #[error("Data source {key} unavailable: {reason}")]
    Unavailable { key: RoutingKey, reason: String },

    #[error("Query failed: {reason}")]
    QueryFailed { reason: String },

    #[error("Statement returned no row: {statement}")]
    MissingRow { statement: String },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("No data source registered for default routing key {key}")]
    MissingDataSource { key: RoutingKey },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Validation errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Required field missing: {field}")]
    RequiredFieldMissing { field: String },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },
}

/// Master error type for all dbsplit errors.
#[derive(Debug, Clone, Error)]
pub enum DbSplitError {
    #[error("Routing error: {0}")]
    Routing(#[from] RoutingError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Data source error: {0}")]
    DataSource(#[from] DataSourceError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

impl DbSplitError {
    /// Returns true if the error came from the cache layer.
    pub fn is_cache(&self) -> bool {
        matches!(self, DbSplitError::Cache(_))
    }

    /// Returns true if the error came from a physical data source.
    pub fn is_data_source(&self) -> bool {
        matches!(self, DbSplitError::DataSource(_))
    }
}

/// Result type alias for dbsplit operations.
pub type DbSplitResult<T> = Result<T, DbSplitError>;

// =============================================================================
// TESTS
// =============================================================================
