//! dbsplit API Server Entry Point
//!
//! Bootstraps configuration, builds the primary and replica pools, ensures
//! the record table exists on both, opens the read cache and starts the Axum
//! HTTP server.

use std::sync::Arc;

use axum::Router;
use dbsplit_core::{RecordStatements, RoutingKey};
use dbsplit_storage::{
    CacheBackend, DataSourceResolver, InMemoryCacheBackend, LmdbCacheBackend, ReadThroughCache,
    RecordService, RoutingInterceptor,
};

use dbsplit_api::{
    create_router, ensure_schema, init_tracing, ApiConfig, ApiError, ApiResult, AppState,
    CacheBackendKind, CacheSettings, DbConfig, PgDataAccess, PgDataSource, RoutingConfig,
    TelemetryConfig,
};

#[tokio::main]
async fn main() -> ApiResult<()> {
    let telemetry_config = TelemetryConfig::from_env();
    init_tracing(&telemetry_config)?;

    let routing_config = RoutingConfig::from_env()?;
    let cache_settings = CacheSettings::from_env()?;
    let api_config = ApiConfig::from_env()?;

    let mut builder = DataSourceResolver::builder().default_key(routing_config.default_route);
    for key in RoutingKey::ALL {
        let db_config = DbConfig::from_env(key);
        tracing::info!(
            routing_key = %key,
            host = %db_config.host,
            port = db_config.port,
            dbname = %db_config.dbname,
            pool_size = db_config.max_size,
            "Configuring data source"
        );
        builder = builder.register(key, PgDataSource::from_config(key, &db_config)?);
    }
    let resolver = Arc::new(builder.build()?);

    ensure_schema(&resolver, &RecordStatements::default()).await?;

    let interceptor = RoutingInterceptor::new(routing_config.operation_routes());

    let app = match cache_settings.backend {
        CacheBackendKind::Lmdb => {
            let backend = LmdbCacheBackend::new(&cache_settings.path, cache_settings.size_mb)
                .map_err(|e| ApiError::internal_error(format!("Failed to open cache: {}", e)))?;
            build_app(resolver, interceptor, backend, &cache_settings, &api_config)
        }
        CacheBackendKind::Memory => build_app(
            resolver,
            interceptor,
            InMemoryCacheBackend::new(),
            &cache_settings,
            &api_config,
        ),
    };

    let addr = api_config.bind_addr;
    tracing::info!(%addr, cache_backend = ?cache_settings.backend, "Starting dbsplit API server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| ApiError::internal_error(format!("Failed to bind {}: {}", addr, e)))?;

    let server = axum::serve(listener, app);
    tokio::select! {
        result = server => {
            result.map_err(|e| ApiError::internal_error(format!("Server error: {}", e)))?;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown signal received");
        }
    }

    Ok(())
}

fn build_app<C>(
    resolver: Arc<DataSourceResolver<PgDataSource>>,
    interceptor: RoutingInterceptor,
    backend: C,
    cache_settings: &CacheSettings,
    api_config: &ApiConfig,
) -> Router
where
    C: CacheBackend + 'static,
{
    let cache = ReadThroughCache::new(Arc::new(backend), cache_settings.cache_config());
    let records = RecordService::new(resolver, Arc::new(PgDataAccess), cache, interceptor);
    create_router(AppState::new(records), Some(api_config.request_timeout))
}
