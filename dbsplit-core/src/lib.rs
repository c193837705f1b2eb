//! dbsplit Core - Shared Types
//!
//! Routing keys, records, statements and the error taxonomy. Every other
//! crate in the workspace depends on this one; it carries no I/O.

pub mod entities;
pub mod error;
pub mod routing;

pub use entities::{
    InsertAck, Record, RecordId, RecordStatements, SqlParam, Statement, StatementKind,
    WriteOutcome,
};
pub use error::{
    CacheError, ConfigError, DataSourceError, DbSplitError, DbSplitResult, RoutingError,
    ValidationError,
};
pub use routing::{operations, OperationRoutes, RoutingKey};
