//! Router tests for the record and health endpoints.
//!
//! The router runs over in-memory data sources and caches, driven through
//! `tower::ServiceExt::oneshot`.

use std::sync::Arc;
use std::time::Duration;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use dbsplit_api::{create_router, AppState};
use dbsplit_storage::{CacheBackend, LmdbCacheBackend};
use dbsplit_test_utils::fixtures::{
    harness_with, split_harness, split_harness_with_cache, synchronized_harness,
    synchronized_harness_with_failing_cache, Harness,
};
use dbsplit_test_utils::{
    CacheConfig, DbSplitResult, FailingCacheBackend, InMemoryCacheBackend, InMemoryDataSource,
    OperationRoutes, Record, RecordingDataAccess, RoutingKey,
};
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;

fn app<C: CacheBackend + 'static>(harness: &Harness<C>) -> Router {
    create_router(
        AppState::new(harness.service.clone()),
        Some(Duration::from_secs(5)),
    )
}

async fn get(app: &Router, uri: &str) -> (StatusCode, Value) {
    let request = Request::builder()
        .uri(uri)
        .body(Body::empty())
        .expect("request builds");
    let response = app.clone().oneshot(request).await.expect("router is infallible");
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body readable");
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

#[tokio::test]
async fn test_insert_then_select_round_trip() -> DbSplitResult<()> {
    let harness = synchronized_harness()?;
    let app = app(&harness);

    let (status, body) = get(&app, "/insert?name=alice").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "OK");
    let id = body["id"].as_i64().expect("numeric id");

    let (status, body) = get(&app, &format!("/select?id={}", id)).await;
    assert_eq!(status, StatusCode::OK);
    let record: Record = serde_json::from_value(body).expect("record body");
    assert_eq!(record, Record::new(id, "alice"));
    Ok(())
}

#[tokio::test]
async fn test_insert_without_name_is_rejected() -> DbSplitResult<()> {
    let harness = synchronized_harness()?;
    let app = app(&harness);

    for uri in ["/insert", "/insert?name=", "/insert?name=%20%20"] {
        let (status, body) = get(&app, uri).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{}", uri);
        assert_eq!(body["code"], "MISSING_FIELD");
    }
    assert_eq!(harness.access.write_calls(), 0);
    Ok(())
}

#[tokio::test]
async fn test_select_id_validation() -> DbSplitResult<()> {
    let harness = synchronized_harness()?;
    let app = app(&harness);

    let (status, body) = get(&app, "/select").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "MISSING_FIELD");

    let (status, body) = get(&app, "/select?id=abc").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "INVALID_FORMAT");
    assert_eq!(harness.access.read_calls(), 0);
    Ok(())
}

#[tokio::test]
async fn test_select_unknown_id_is_not_found() -> DbSplitResult<()> {
    let harness = synchronized_harness()?;
    let app = app(&harness);

    let (status, body) = get(&app, "/select?id=404").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "RECORD_NOT_FOUND");
    assert_eq!(body["message"], "Record not found");
    assert!(!harness.cache.contains("404").await?);
    Ok(())
}

#[tokio::test]
async fn test_second_select_served_from_cache() -> DbSplitResult<()> {
    let harness = synchronized_harness()?;
    let app = app(&harness);

    let (_, body) = get(&app, "/insert?name=bob").await;
    let uri = format!("/select?id={}", body["id"]);

    let (_, first) = get(&app, &uri).await;
    let (_, second) = get(&app, &uri).await;

    assert_eq!(first, second);
    assert_eq!(harness.access.read_calls(), 1);
    Ok(())
}

#[tokio::test]
async fn test_routes_writes_to_primary_and_reads_to_replica() -> DbSplitResult<()> {
    let harness = split_harness()?;
    harness.replica.seed(&Record::new(7, "replicated"))?;
    let app = app(&harness);

    let (status, _) = get(&app, "/insert?name=carol").await;
    assert_eq!(status, StatusCode::OK);
    let (status, body) = get(&app, "/select?id=7").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["name"], "replicated");

    assert_eq!(harness.primary.write_count(), 1);
    assert_eq!(harness.replica.write_count(), 0);
    assert_eq!(harness.primary.read_count(), 0);
    assert_eq!(harness.replica.read_count(), 1);
    Ok(())
}

#[tokio::test]
async fn test_replica_outage_is_service_unavailable() -> DbSplitResult<()> {
    let harness = split_harness()?;
    harness.replica.set_available(false);
    let app = app(&harness);

    let (status, body) = get(&app, "/select?id=1").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["code"], "SERVICE_UNAVAILABLE");
    let message = body["message"].as_str().unwrap_or_default();
    assert!(!message.contains("replica"));
    Ok(())
}

#[tokio::test]
async fn test_cache_outage_fails_open() -> DbSplitResult<()> {
    let harness = synchronized_harness_with_failing_cache(FailingCacheBackend::new())?;
    let app = app(&harness);

    let (_, body) = get(&app, "/insert?name=dave").await;
    let uri = format!("/select?id={}", body["id"]);

    for _ in 0..2 {
        let (status, body) = get(&app, &uri).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["name"], "dave");
    }
    assert_eq!(harness.access.read_calls(), 2);
    Ok(())
}

#[tokio::test]
async fn test_health_reports_data_sources() -> DbSplitResult<()> {
    let harness = split_harness()?;
    let app = app(&harness);

    let (status, body) = get(&app, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["default_route"], "primary");
    assert_eq!(
        body["data_sources"],
        serde_json::json!([RoutingKey::Primary.as_str(), RoutingKey::Replica.as_str()])
    );
    assert_eq!(body["cache"]["entries"], 0);
    Ok(())
}

#[tokio::test]
async fn test_health_degraded_when_cache_down() -> DbSplitResult<()> {
    let harness = synchronized_harness_with_failing_cache(FailingCacheBackend::new())?;
    let app = app(&harness);

    let (status, body) = get(&app, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "degraded");
    assert_eq!(body["cache"]["status"], "degraded");
    Ok(())
}

#[tokio::test]
async fn test_health_degraded_when_memory_cache_unavailable() -> DbSplitResult<()> {
    let harness = synchronized_harness()?;
    harness.cache.set_available(false);
    let app = app(&harness);

    let (status, body) = get(&app, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "degraded");
    assert_eq!(body["cache"]["status"], "degraded");
    assert!(body["cache"].get("entries").is_none());

    harness.cache.set_available(true);
    let (_, body) = get(&app, "/health").await;
    assert_eq!(body["status"], "healthy");
    Ok(())
}

#[tokio::test]
async fn test_lmdb_cache_serves_repeat_selects() -> DbSplitResult<()> {
    let temp_dir = TempDir::new().expect("temp dir");
    let cache = Arc::new(LmdbCacheBackend::new(temp_dir.path(), 10)?);
    let harness = split_harness_with_cache(cache)?;
    harness.replica.seed(&Record::new(3, "on disk"))?;
    let app = app(&harness);

    let (_, first) = get(&app, "/select?id=3").await;
    let (status, second) = get(&app, "/select?id=3").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first, second);
    assert_eq!(second["name"], "on disk");
    assert_eq!(harness.access.read_calls(), 1);

    let (status, body) = get(&app, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["cache"]["entries"], 1);
    Ok(())
}

#[tokio::test]
async fn test_slow_handler_times_out_with_408() -> DbSplitResult<()> {
    let harness = harness_with(
        InMemoryDataSource::shared(RoutingKey::Primary),
        InMemoryDataSource::shared(RoutingKey::Replica),
        RecordingDataAccess::with_delay(Duration::from_millis(500)),
        OperationRoutes::default(),
        Arc::new(InMemoryCacheBackend::new()),
        CacheConfig::default(),
    )?;
    let app = create_router(
        AppState::new(harness.service.clone()),
        Some(Duration::from_millis(20)),
    );

    let (status, _) = get(&app, "/insert?name=slow").await;
    assert_eq!(status, StatusCode::REQUEST_TIMEOUT);

    let (status, _) = get(&app, "/health").await;
    assert_eq!(status, StatusCode::OK);
    Ok(())
}

#[tokio::test]
async fn test_concurrent_requests_route_independently() -> DbSplitResult<()> {
    let harness = split_harness()?;
    for id in 1..=10 {
        harness.replica.seed(&Record::new(id, format!("r{}", id)))?;
    }
    let app = Arc::new(app(&harness));

    let mut handles = Vec::new();
    for id in 1..=10 {
        let app = Arc::clone(&app);
        handles.push(tokio::spawn(async move {
            let (insert_status, _) = get(&app, &format!("/insert?name=w{}", id)).await;
            let (select_status, body) = get(&app, &format!("/select?id={}", id)).await;
            (insert_status, select_status, body)
        }));
    }
    for handle in handles {
        let (insert_status, select_status, body) = handle.await.expect("task completed");
        assert_eq!(insert_status, StatusCode::OK);
        assert_eq!(select_status, StatusCode::OK);
        assert!(body["name"].as_str().is_some_and(|name| name.starts_with('r')));
    }

    for observation in harness.access.observations() {
        assert_eq!(observation.context_key, observation.source);
    }
    assert_eq!(harness.primary.write_count(), 10);
    assert_eq!(harness.primary.read_count(), 0);
    Ok(())
}
