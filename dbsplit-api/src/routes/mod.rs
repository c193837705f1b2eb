//! REST API Routes Module
//!
//! Record routes (`/insert`, `/select`) and the health check, assembled into
//! one router with request tracing and a request timeout.

pub mod health;
pub mod records;

use std::time::Duration;

use axum::http::StatusCode;
use axum::Router;
use dbsplit_storage::{CacheBackend, DataAccess};
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use crate::state::AppState;

pub use health::create_router as health_router;
pub use records::create_router as records_router;

/// Build the complete router.
///
/// # Middleware Order (outer to inner)
/// 1. Tracing - one span per request
/// 2. Timeout - answers 408 when a handler exceeds `request_timeout`
pub fn create_router<D, C>(state: AppState<D, C>, request_timeout: Option<Duration>) -> Router
where
    D: DataAccess + 'static,
    C: CacheBackend + 'static,
{
    let mut router = Router::new()
        .merge(records::create_router::<D, C>())
        .merge(health::create_router::<D, C>())
        .with_state(state);

    if let Some(timeout) = request_timeout {
        router = router.layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            timeout,
        ));
    }

    router.layer(TraceLayer::new_for_http())
}
