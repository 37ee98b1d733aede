//! lite-registry — a read-only mirror of the cluster's lane services.
//!
//! Watches Services labelled with `app` and `lane`, aggregates them into
//! an `{app → {lanes, port}}` table, and publishes it over HTTP. The
//! gateway polls `/v1/routes` to resolve lane-specific upstreams.

pub mod config;
pub mod http;
pub mod registry;

pub use config::RegistryConfig;
pub use registry::{RouteRegistry, ServiceInfo};
