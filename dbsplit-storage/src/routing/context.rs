//! Task-confined routing slot.
//!
//! Each task of control owns its own slot through a tokio task-local. Scopes
//! nest: entering a scope shadows the enclosing slot and leaving it (by
//! return, error, panic or drop) makes the enclosing slot visible again with
//! its value untouched. Spawned tasks do not inherit the slot.

use std::cell::Cell;
use std::future::Future;

use dbsplit_core::{DbSplitResult, RoutingError, RoutingKey};

tokio::task_local! {
    static ROUTING_SLOT: Cell<Option<RoutingKey>>;
}

/// Accessors for the routing slot of the calling task.
pub struct RoutingContext;

impl RoutingContext {
    /// The active routing key, or [`RoutingKey::default`] when unset or when
    /// called outside any routing scope.
    pub fn current() -> RoutingKey {
        Self::get().unwrap_or_default()
    }

    /// The explicitly stored key, if any.
    pub fn get() -> Option<RoutingKey> {
        ROUTING_SLOT.try_with(Cell::get).ok().flatten()
    }

    /// Whether a key is explicitly stored in the innermost scope.
    pub fn is_set() -> bool {
        Self::get().is_some()
    }

    /// Whether the calling task is inside a routing scope.
    pub fn in_scope() -> bool {
        ROUTING_SLOT.try_with(|_| ()).is_ok()
    }

    /// Store `key` in the innermost scope, returning the value it replaced.
    pub fn set(key: RoutingKey) -> DbSplitResult<Option<RoutingKey>> {
        ROUTING_SLOT
            .try_with(|slot| slot.replace(Some(key)))
            .map_err(|_| RoutingError::NoActiveScope.into())
    }

    /// Remove the stored key from the innermost scope, reverting to default.
    pub fn clear() -> Option<RoutingKey> {
        ROUTING_SLOT.try_with(Cell::take).ok().flatten()
    }

    /// Run `future` with a fresh slot holding `key`.
    pub async fn scope<F>(key: Option<RoutingKey>, future: F) -> F::Output
    where
        F: Future,
    {
        ROUTING_SLOT.scope(Cell::new(key), future).await
    }

    /// Run `f` synchronously with a fresh slot holding `key`.
    pub fn sync_scope<F, R>(key: Option<RoutingKey>, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        ROUTING_SLOT.sync_scope(Cell::new(key), f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outside_scope_defaults_to_primary() {
        assert!(!RoutingContext::in_scope());
        assert_eq!(RoutingContext::current(), RoutingKey::Primary);
        assert_eq!(RoutingContext::get(), None);
        assert_eq!(RoutingContext::clear(), None);
    }

    #[test]
    fn test_set_outside_scope_fails() {
        let result = RoutingContext::set(RoutingKey::Replica);
        assert!(matches!(
            result,
            Err(dbsplit_core::DbSplitError::Routing(RoutingError::NoActiveScope))
        ));
    }

    #[test]
    fn test_set_get_clear_within_scope() {
        RoutingContext::sync_scope(None, || {
            assert!(RoutingContext::in_scope());
            assert!(!RoutingContext::is_set());
            assert_eq!(RoutingContext::current(), RoutingKey::Primary);

            let replaced = RoutingContext::set(RoutingKey::Replica).ok().flatten();
            assert_eq!(replaced, None);
            assert_eq!(RoutingContext::current(), RoutingKey::Replica);

            assert_eq!(RoutingContext::clear(), Some(RoutingKey::Replica));
            assert_eq!(RoutingContext::current(), RoutingKey::Primary);
        });
    }

    #[test]
    fn test_nested_sync_scope_restores_outer() {
        RoutingContext::sync_scope(Some(RoutingKey::Replica), || {
            RoutingContext::sync_scope(Some(RoutingKey::Primary), || {
                assert_eq!(RoutingContext::current(), RoutingKey::Primary);
            });
            assert_eq!(RoutingContext::current(), RoutingKey::Replica);
        });
        assert!(!RoutingContext::in_scope());
    }

    #[test]
    fn test_inner_set_does_not_leak_to_outer() {
        RoutingContext::sync_scope(Some(RoutingKey::Primary), || {
            RoutingContext::sync_scope(None, || {
                let _ = RoutingContext::set(RoutingKey::Replica);
            });
            assert_eq!(RoutingContext::current(), RoutingKey::Primary);
        });
    }

    #[tokio::test]
    async fn test_async_scope_restores_after_await() {
        RoutingContext::scope(Some(RoutingKey::Replica), async {
            RoutingContext::scope(Some(RoutingKey::Primary), async {
                tokio::task::yield_now().await;
                assert_eq!(RoutingContext::current(), RoutingKey::Primary);
            })
            .await;
            assert_eq!(RoutingContext::current(), RoutingKey::Replica);
        })
        .await;
    }

    #[tokio::test]
    async fn test_spawned_task_does_not_inherit_slot() {
        let inherited = RoutingContext::scope(Some(RoutingKey::Replica), async {
            tokio::spawn(async { RoutingContext::get() }).await
        })
        .await;
        assert!(matches!(inherited, Ok(None)));
    }
}
