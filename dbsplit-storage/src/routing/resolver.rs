//! Data source resolution: routing key to physical pool.

use std::collections::BTreeMap;

use dbsplit_core::{ConfigError, DbSplitResult, RoutingError, RoutingKey};

use super::context::RoutingContext;

/// Immutable routing key → pool mapping, established at startup.
///
/// Resolution never fails: a key without a registered pool resolves to the
/// default pool and is logged as unexpected.
#[derive(Debug)]
pub struct DataSourceResolver<P> {
    default_key: RoutingKey,
    default_pool: P,
    others: BTreeMap<RoutingKey, P>,
}

/// Builder for [`DataSourceResolver`].
#[derive(Debug)]
pub struct DataSourceResolverBuilder<P> {
    default_key: RoutingKey,
    sources: BTreeMap<RoutingKey, P>,
}

impl<P> Default for DataSourceResolverBuilder<P> {
    fn default() -> Self {
        Self {
            default_key: RoutingKey::default(),
            sources: BTreeMap::new(),
        }
    }
}

impl<P> DataSourceResolverBuilder<P> {
    /// Register the pool for a routing key, replacing any earlier one.
    pub fn register(mut self, key: RoutingKey, pool: P) -> Self {
        self.sources.insert(key, pool);
        self
    }

    /// Key used when no intent is set or the intended key is unregistered.
    pub fn default_key(mut self, key: RoutingKey) -> Self {
        self.default_key = key;
        self
    }

    pub fn build(mut self) -> DbSplitResult<DataSourceResolver<P>> {
        let default_pool =
            self.sources
                .remove(&self.default_key)
                .ok_or(ConfigError::MissingDataSource {
                    key: self.default_key,
                })?;
        Ok(DataSourceResolver {
            default_key: self.default_key,
            default_pool,
            others: self.sources,
        })
    }
}

impl<P> DataSourceResolver<P> {
    pub fn builder() -> DataSourceResolverBuilder<P> {
        DataSourceResolverBuilder::default()
    }

    pub fn default_key(&self) -> RoutingKey {
        self.default_key
    }

    /// Registered keys, default first.
    pub fn registered_keys(&self) -> Vec<RoutingKey> {
        std::iter::once(self.default_key)
            .chain(self.others.keys().copied())
            .collect()
    }

    pub fn is_registered(&self, key: RoutingKey) -> bool {
        key == self.default_key || self.others.contains_key(&key)
    }

    /// The pool for `key`.
    pub fn resolve(&self, key: RoutingKey) -> &P {
        self.resolve_entry(key).1
    }

    /// The key actually used for `key`, together with its pool.
    pub fn resolve_entry(&self, key: RoutingKey) -> (RoutingKey, &P) {
        if key == self.default_key {
            return (key, &self.default_pool);
        }
        match self.others.get(&key) {
            Some(pool) => (key, pool),
            None => {
                let err = RoutingError::UnknownRoutingKey { key };
                tracing::warn!(
                    error = %err,
                    fallback = %self.default_key,
                    "Unexpected data source navigation"
                );
                (self.default_key, &self.default_pool)
            }
        }
    }

    /// Resolve a logical name such as `replica` or `slaveDB`.
    pub fn resolve_name(&self, name: &str) -> &P {
        match RoutingKey::from_declaration(name) {
            Ok(key) => self.resolve(key),
            Err(err) => {
                tracing::warn!(
                    error = %err,
                    fallback = %self.default_key,
                    "Unexpected data source navigation"
                );
                &self.default_pool
            }
        }
    }

    /// Resolve the key held by the calling task's routing context.
    pub fn resolve_current(&self) -> &P {
        self.resolve_current_entry().1
    }

    pub fn resolve_current_entry(&self) -> (RoutingKey, &P) {
        let intent = RoutingContext::get().unwrap_or(self.default_key);
        self.resolve_entry(intent)
    }
}
