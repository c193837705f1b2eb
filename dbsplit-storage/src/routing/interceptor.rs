//! Routing interceptor: runs an operation under its declared routing key.
//!
//! The declared key is installed in a fresh routing scope for the duration of
//! the operation; whatever the caller had in its own scope is visible again
//! once the operation finishes, whether it returned, failed or panicked.

use std::future::Future;

use dbsplit_core::{OperationRoutes, RoutingKey};

use super::context::RoutingContext;

/// Wraps operations with their route declarations.
#[derive(Debug, Clone, Default)]
pub struct RoutingInterceptor {
    routes: OperationRoutes,
}

impl RoutingInterceptor {
    pub fn new(routes: OperationRoutes) -> Self {
        Self { routes }
    }

    pub fn routes(&self) -> &OperationRoutes {
        &self.routes
    }

    /// Key used when a declaration is missing or malformed.
    pub fn default_key(&self) -> RoutingKey {
        self.routes.default_key()
    }

    /// The declared key for a named operation.
    pub fn route_for(&self, operation: &str) -> RoutingKey {
        self.routes.route_for(operation)
    }

    /// Run `future` under `key`.
    pub async fn run<F>(&self, key: RoutingKey, future: F) -> F::Output
    where
        F: Future,
    {
        let previous = RoutingContext::get();
        tracing::debug!(routing_key = %key, previous = ?previous, "Entering routing scope");

        let output = RoutingContext::scope(Some(key), future).await;

        tracing::debug!(
            routing_key = %key,
            restored = ?RoutingContext::get(),
            "Left routing scope"
        );
        output
    }

    /// Run a named operation under the key declared for it.
    pub async fn run_operation<F>(&self, operation: &str, future: F) -> F::Output
    where
        F: Future,
    {
        let key = self.route_for(operation);
        tracing::debug!(operation, routing_key = %key, "Routing operation");
        self.run(key, future).await
    }

    /// Run `future` under a textual declaration.
    ///
    /// A missing or malformed declaration never aborts the call: it is logged
    /// and the default key is used instead.
    pub async fn run_declared<F>(&self, declaration: Option<&str>, future: F) -> F::Output
    where
        F: Future,
    {
        let key = self.resolve_declaration(declaration);
        self.run(key, future).await
    }

    /// Run a synchronous operation under `key`.
    pub fn run_sync<F, R>(&self, key: RoutingKey, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        RoutingContext::sync_scope(Some(key), f)
    }

    /// Turn a textual declaration into a key, falling back to the default.
    pub fn resolve_declaration(&self, declaration: Option<&str>) -> RoutingKey {
        let fallback = self.default_key();
        match declaration {
            None => {
                tracing::warn!(fallback = %fallback, "Operation has no routing declaration");
                fallback
            }
            Some(text) => RoutingKey::from_declaration(text).unwrap_or_else(|err| {
                tracing::warn!(error = %err, fallback = %fallback, "Ignoring routing declaration");
                fallback
            }),
        }
    }
}
