//! paas-cluster — cluster-side engines of the control plane.
//!
//! Everything the control plane does against the workload cluster goes
//! through the [`ClusterApi`] trait: a typed, minimal mirror of the
//! resources the engines need (workloads, services, replica sets, pods,
//! jobs, route rules). Thin adapters binding the trait to a real cluster
//! SDK live outside this workspace; [`MemoryCluster`] provides an
//! in-process backend for tests and standalone runs.
//!
//! The three engines:
//!
//! - [`WorkloadDeployer`] — reconciles workload + lane service + base
//!   service from a Release/App pair and waits for the rollout, with
//!   fast-fail on crash-looping or unpullable pods.
//! - [`JobBuildExecutor`] — submits, cancels, and observes image-build
//!   jobs; streams job status events to a per-build callback.
//! - [`TrafficReconciler`] — recomputes the header-routed rule set for an
//!   app from its current releases.

pub mod api;
pub mod builder;
pub mod deployer;
pub mod memory;
pub mod model;
pub mod traffic;

pub use api::{ClusterApi, ClusterError, ClusterResult};
pub use builder::{BuildJobConfig, JobBuildExecutor, BUILD_ID_LABEL};
pub use deployer::WorkloadDeployer;
pub use memory::MemoryCluster;
pub use model::*;
pub use traffic::TrafficReconciler;
