//! Routing intent propagation.
//!
//! An operation declares which data source it wants ([`RoutingKey`]); the
//! [`RoutingInterceptor`] installs that intent in the task's
//! [`RoutingContext`] for the duration of the call, and the
//! [`DataSourceResolver`] turns the active intent into a physical pool.
//!
//! [`RoutingKey`]: dbsplit_core::RoutingKey

pub mod context;
pub mod interceptor;
pub mod resolver;

pub use context::RoutingContext;
pub use interceptor::RoutingInterceptor;
pub use resolver::{DataSourceResolver, DataSourceResolverBuilder};
