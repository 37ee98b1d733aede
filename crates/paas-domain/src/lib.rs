//! paas-domain — shared domain model for the lane-based PaaS control plane.
//!
//! Holds the five persisted entities (App, ImageRepo, Lane, Build, Release),
//! their status state machines, input validation, the semantic error type,
//! and the port traits that the storage, cluster, and log-query adapters
//! implement.
//!
//! # Entity relationships
//!
//! ```text
//! ImageRepo ←─(image_repo)── App ←─(app_name)── Release ──(lane)→ Lane
//!     ↑
//!     └─(image_repo)── Build
//! ```
//!
//! A Release is unique per (app, lane); its cluster resources share the
//! name `{app}-{lane}`.

pub mod error;
pub mod ports;
pub mod types;
pub mod validate;

pub use error::{Error, Result};
pub use types::*;
