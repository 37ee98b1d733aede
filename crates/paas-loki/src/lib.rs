//! paas-loki — historical log retrieval over the Loki HTTP API.
//!
//! Implements the `LogQuerier` port with `query_range` lookups: build
//! logs are selected by the kaniko job's pod-name prefix, app logs by
//! the `{app}-{lane}` pod-name prefix. Streams are merged and sorted by
//! timestamp before being returned as one string.

pub mod client;

pub use client::LokiClient;
