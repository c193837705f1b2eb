//! Health Check Endpoint
//!
//! `GET /health` reports the registered data sources and read cache
//! statistics. An unreachable cache only degrades the report; reads fail open,
//! so the service stays up.

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use dbsplit_core::RoutingKey;
use dbsplit_storage::{CacheBackend, DataAccess};
use serde::{Deserialize, Serialize};

use crate::state::AppState;

// ============================================================================
// TYPES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub version: String,
    pub uptime_seconds: u64,
    pub default_route: RoutingKey,
    pub data_sources: Vec<RoutingKey>,
    pub cache: CacheHealth,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheHealth {
    pub status: HealthStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entries: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hit_rate: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

// ============================================================================
// HANDLERS
// ============================================================================

/// GET /health
pub async fn health<D, C>(State(state): State<AppState<D, C>>) -> impl IntoResponse
where
    D: DataAccess + 'static,
    C: CacheBackend + 'static,
{
    let records = &state.records;

    let cache = match records.cache().backend().stats().await {
        Ok(stats) => CacheHealth {
            status: HealthStatus::Healthy,
            entries: Some(stats.entry_count),
            hit_rate: Some(stats.hit_rate()),
            error: None,
        },
        Err(e) => {
            tracing::warn!(error = %e, "Cache stats unavailable");
            CacheHealth {
                status: HealthStatus::Degraded,
                entries: None,
                hit_rate: None,
                error: Some("cache unavailable".to_string()),
            }
        }
    };

    let response = HealthResponse {
        status: cache.status,
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        default_route: records.resolver().default_key(),
        data_sources: records.resolver().registered_keys(),
        cache,
    };

    (StatusCode::OK, Json(response))
}

// ============================================================================
// ROUTER
// ============================================================================

pub fn create_router<D, C>() -> Router<AppState<D, C>>
where
    D: DataAccess + 'static,
    C: CacheBackend + 'static,
{
    Router::new().route("/health", get(health::<D, C>))
}
