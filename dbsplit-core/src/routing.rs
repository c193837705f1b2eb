//! Routing keys and per-operation route declarations

use crate::{ConfigError, DbSplitResult, RoutingError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Logical name of a physical data source.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoutingKey {
    /// Writable source of truth.
    #[default]
    Primary,
    /// Read-optimized copy, possibly lagging the primary.
    Replica,
}

impl RoutingKey {
    /// All routing keys, in declaration order.
    pub const ALL: [RoutingKey; 2] = [RoutingKey::Primary, RoutingKey::Replica];

    pub fn as_str(&self) -> &'static str {
        match self {
            RoutingKey::Primary => "primary",
            RoutingKey::Replica => "replica",
        }
    }

    /// Parse a route declaration, accepting the legacy `masterDB` / `slaveDB`
    /// names alongside `primary` / `replica`.
    pub fn from_declaration(declaration: &str) -> Result<Self, RoutingError> {
        let normalized: String = declaration
            .trim()
            .chars()
            .filter(|c| *c != '_' && *c != '-')
            .flat_map(char::to_lowercase)
            .collect();
        match normalized.as_str() {
            "primary" | "master" | "masterdb" | "writer" => Ok(RoutingKey::Primary),
            "replica" | "slave" | "slavedb" | "reader" => Ok(RoutingKey::Replica),
            _ => Err(RoutingError::InvalidDeclaration {
                declaration: declaration.to_string(),
            }),
        }
    }
}

impl fmt::Display for RoutingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for RoutingKey {
    type Err = RoutingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_declaration(s)
    }
}

/// Operation names with a built-in route declaration.
pub mod operations {
    pub const INSERT: &str = "insert";
    pub const SELECT: &str = "select";
}

/// Static table of route declarations, one per operation name.
///
/// Declarations are attached to operations here, at configuration time,
/// instead of being inferred from whether an operation reads or writes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationRoutes {
    default_key: RoutingKey,
    routes: HashMap<String, RoutingKey>,
}

impl Default for OperationRoutes {
    fn default() -> Self {
        Self::new(RoutingKey::default())
            .with_route(operations::INSERT, RoutingKey::Primary)
            .with_route(operations::SELECT, RoutingKey::Replica)
    }
}

impl OperationRoutes {
    /// Create an empty table; undeclared operations use `default_key`.
    pub fn new(default_key: RoutingKey) -> Self {
        Self {
            default_key,
            routes: HashMap::new(),
        }
    }

    /// Declare the routing key for an operation.
    pub fn with_route(mut self, operation: impl Into<String>, key: RoutingKey) -> Self {
        self.routes.insert(operation.into(), key);
        self
    }

    /// Declare a route from its textual form (e.g. an env var value).
    pub fn with_declared_route(
        self,
        operation: impl Into<String>,
        declaration: &str,
    ) -> DbSplitResult<Self> {
        let operation = operation.into();
        let key = RoutingKey::from_declaration(declaration).map_err(|_| {
            ConfigError::InvalidValue {
                field: format!("route.{}", operation),
                value: declaration.to_string(),
                reason: "expected primary or replica".to_string(),
            }
        })?;
        Ok(self.with_route(operation, key))
    }

    /// Key used for operations without a declaration.
    pub fn default_key(&self) -> RoutingKey {
        self.default_key
    }

    /// The declared key for an operation, if any.
    pub fn declared(&self, operation: &str) -> Option<RoutingKey> {
        self.routes.get(operation).copied()
    }

    /// The declared key for an operation, or the default key.
    pub fn route_for(&self, operation: &str) -> RoutingKey {
        self.declared(operation).unwrap_or(self.default_key)
    }
}
