//! dbsplit API - HTTP Surface for Routed Record Access
//!
//! Exposes `GET /insert`, `GET /select` and `GET /health` over Axum. Inserts
//! run against the primary PostgreSQL pool, selects go through the read cache
//! and on a miss to the replica pool. Route declarations, pools and the cache
//! backend are configured from the environment.

pub mod config;
pub mod db;
pub mod error;
pub mod routes;
pub mod state;
pub mod telemetry;

pub use config::{ApiConfig, CacheBackendKind, CacheSettings, RoutingConfig};
pub use db::{ensure_schema, DbConfig, PgDataAccess, PgDataSource};
pub use error::{ApiError, ApiResult, ErrorCode};
pub use routes::create_router;
pub use state::AppState;
pub use telemetry::{init_tracing, LogFormat, TelemetryConfig};
