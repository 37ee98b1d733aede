//! api-gateway — lane-aware reverse proxy.
//!
//! Incoming paths are matched longest-prefix-first against a YAML route
//! table, optionally rewritten, then dispatched to an upstream chosen by
//! the `x-lane` header: a lane the registry knows about maps to the
//! `{service}-{lane}` host, anything else falls back to the plain
//! service (prod).

pub mod config;
pub mod matcher;
pub mod proxy;
pub mod registry;
pub mod routes;

pub use config::GatewayConfig;
pub use matcher::Matcher;
pub use proxy::Gateway;
pub use registry::RegistryClient;
pub use routes::Route;
