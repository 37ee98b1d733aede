//! The `ClusterApi` seam between the engines and the workload cluster.

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::model::{
    JobEvent, JobSpec, Labels, PodInfo, ReplicaSetInfo, RouteRuleSet, ServiceEvent, ServiceSpec,
    Workload,
};

pub type ClusterResult<T> = Result<T, ClusterError>;

/// Errors surfaced by cluster backends.
#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("cluster api error: {0}")]
    Api(String),
}

/// Namespace-scoped view of the cluster. An adapter instance is bound to
/// one namespace; the engines never address namespaces directly.
///
/// Watch subscriptions are unbounded channels: the backend fans events
/// out to every open receiver and drops closed ones.
#[async_trait]
pub trait ClusterApi: Send + Sync {
    // ── Workloads ──────────────────────────────────────────────────
    async fn get_workload(&self, name: &str) -> ClusterResult<Option<Workload>>;
    async fn create_workload(&self, workload: &Workload) -> ClusterResult<()>;
    async fn update_workload(&self, workload: &Workload) -> ClusterResult<()>;
    /// Returns false when the workload did not exist.
    async fn delete_workload(&self, name: &str) -> ClusterResult<bool>;

    // ── Services ───────────────────────────────────────────────────
    async fn get_service(&self, name: &str) -> ClusterResult<Option<ServiceSpec>>;
    async fn create_service(&self, service: &ServiceSpec) -> ClusterResult<()>;
    async fn update_service(&self, service: &ServiceSpec) -> ClusterResult<()>;
    async fn delete_service(&self, name: &str) -> ClusterResult<bool>;
    async fn list_services(&self) -> ClusterResult<Vec<ServiceSpec>>;
    fn watch_services(&self) -> mpsc::UnboundedReceiver<ServiceEvent>;

    // ── Replica sets and pods ──────────────────────────────────────
    async fn list_replica_sets(&self, selector: &Labels) -> ClusterResult<Vec<ReplicaSetInfo>>;
    async fn list_pods(&self, selector: &Labels) -> ClusterResult<Vec<PodInfo>>;
    /// Concatenated container logs of pods carrying the given label.
    async fn pod_logs(&self, label_key: &str, label_value: &str) -> ClusterResult<String>;

    // ── Jobs ───────────────────────────────────────────────────────
    async fn create_job(&self, job: &JobSpec) -> ClusterResult<()>;
    async fn delete_job(&self, name: &str) -> ClusterResult<bool>;
    fn watch_jobs(&self) -> mpsc::UnboundedReceiver<JobEvent>;

    // ── Route rules ────────────────────────────────────────────────
    async fn get_route_rules(&self, app_name: &str) -> ClusterResult<Option<RouteRuleSet>>;
    async fn upsert_route_rules(&self, rules: &RouteRuleSet) -> ClusterResult<()>;
    async fn delete_route_rules(&self, app_name: &str) -> ClusterResult<bool>;
}
