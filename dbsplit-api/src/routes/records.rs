//! Record REST API Routes
//!
//! `GET /insert?name=..` writes through the route declared for inserts and
//! `GET /select?id=..` reads through the cache and the route declared for
//! selects.

use axum::{
    extract::{Query, State},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use dbsplit_core::{Record, RecordId};
use dbsplit_storage::{CacheBackend, DataAccess};
use serde::{Deserialize, Serialize};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

// ============================================================================
// REQUEST/RESPONSE TYPES
// ============================================================================

/// Query parameters for `GET /insert`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct InsertParams {
    pub name: Option<String>,
}

/// Query parameters for `GET /select`.
///
/// `id` is taken as text so a malformed value yields an `INVALID_FORMAT`
/// error body instead of a bare extractor rejection.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SelectParams {
    pub id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InsertResponse {
    pub status: String,
    pub id: RecordId,
}

impl InsertResponse {
    pub fn ok(id: RecordId) -> Self {
        Self {
            status: "OK".to_string(),
            id,
        }
    }
}

// ============================================================================
// HANDLERS
// ============================================================================

/// GET /insert - Insert a record on the write route
pub async fn insert_record<D, C>(
    State(state): State<AppState<D, C>>,
    Query(params): Query<InsertParams>,
) -> ApiResult<impl IntoResponse>
where
    D: DataAccess + 'static,
    C: CacheBackend + 'static,
{
    let name = params
        .name
        .filter(|name| !name.trim().is_empty())
        .ok_or_else(|| ApiError::missing_field("name"))?;

    let ack = state.records.insert(&name).await?;
    tracing::info!(id = ack.id, "Record inserted");

    Ok(Json(InsertResponse::ok(ack.id)))
}

/// GET /select - Look a record up by id
pub async fn select_record<D, C>(
    State(state): State<AppState<D, C>>,
    Query(params): Query<SelectParams>,
) -> ApiResult<Json<Record>>
where
    D: DataAccess + 'static,
    C: CacheBackend + 'static,
{
    let raw = params
        .id
        .filter(|id| !id.trim().is_empty())
        .ok_or_else(|| ApiError::missing_field("id"))?;
    let id: RecordId = raw
        .trim()
        .parse()
        .map_err(|_| ApiError::invalid_format("id", "an integer"))?;

    let read = state
        .records
        .select_read(id)
        .await?
        .ok_or_else(ApiError::record_not_found)?;
    tracing::debug!(id, cache_hit = read.was_cache_hit(), "Record selected");

    Ok(Json(read.into_value()))
}

// ============================================================================
// ROUTER SETUP
// ============================================================================

pub fn create_router<D, C>() -> Router<AppState<D, C>>
where
    D: DataAccess + 'static,
    C: CacheBackend + 'static,
{
    Router::new()
        .route("/insert", get(insert_record::<D, C>))
        .route("/select", get(select_record::<D, C>))
}
