//! Typed mirror of the cluster resources the engines drive.
//!
//! Only the fields the control plane reads or writes are modelled; the
//! adapter translating to the real cluster API fills in the rest.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Label sets; ordered so selectors serialize deterministically.
pub type Labels = BTreeMap<String, String>;

/// Label key carrying the app name on workloads, pods, and services.
pub const APP_LABEL: &str = "app";
/// Label key carrying the lane on workloads, pods, and services.
pub const LANE_LABEL: &str = "lane";
/// Label key linking pods to the replica set that owns them.
pub const POD_TEMPLATE_HASH_LABEL: &str = "pod-template-hash";

// ── Pod template ──────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvVar {
    pub name: String,
    pub value: String,
}

/// Bulk env sources, applied in declaration order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "name", rename_all = "snake_case")]
pub enum EnvFromSource {
    Secret(String),
    ConfigMap(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeMount {
    pub name: String,
    pub mount_path: String,
    pub read_only: bool,
}

/// A secret-backed volume; `items` maps secret keys to file paths.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Volume {
    pub name: String,
    pub secret_name: String,
    pub items: Vec<(String, String)>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Container {
    pub name: String,
    pub image: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub command: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<EnvVar>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env_from: Vec<EnvFromSource>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volume_mounts: Vec<VolumeMount>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RestartPolicy {
    #[default]
    Always,
    Never,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PodTemplate {
    pub labels: Labels,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_account: Option<String>,
    #[serde(default)]
    pub restart_policy: RestartPolicy,
    pub containers: Vec<Container>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<Volume>,
}

// ── Workload ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionKind {
    Progressing,
    Available,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkloadCondition {
    pub kind: ConditionKind,
    pub status: bool,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkloadStatus {
    pub observed_generation: u64,
    pub updated_replicas: u32,
    pub available_replicas: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<WorkloadCondition>,
}

/// The replicated-pods resource (deployment analogue).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workload {
    pub name: String,
    pub labels: Labels,
    pub selector: Labels,
    pub replicas: u32,
    pub revision_history_limit: u32,
    pub template: PodTemplate,
    /// Spec generation, bumped by the cluster on every spec change.
    #[serde(default)]
    pub generation: u64,
    #[serde(default)]
    pub status: WorkloadStatus,
}

// ── Service ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServicePort {
    pub port: u16,
    pub target_port: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceSpec {
    pub name: String,
    pub labels: Labels,
    pub selector: Labels,
    pub ports: Vec<ServicePort>,
}

/// Change notification from the service watcher. The registry rebuilds
/// from a full listing on every event, so the payload is the name only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceEvent {
    Added(String),
    Updated(String),
    Deleted(String),
}

// ── Replica sets and pods ─────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicaSetInfo {
    pub name: String,
    pub labels: Labels,
    /// Rollout revision, parsed from the revision annotation; absent for
    /// replica sets the controller has not stamped yet.
    pub revision: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaitingState {
    pub reason: String,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerStatus {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub waiting: Option<WaitingState>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PodInfo {
    pub name: String,
    pub labels: Labels,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub container_statuses: Vec<ContainerStatus>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub init_container_statuses: Vec<ContainerStatus>,
}

impl PodInfo {
    /// True when every label in `selector` is present with the same value.
    pub fn matches(&self, selector: &Labels) -> bool {
        selector
            .iter()
            .all(|(k, v)| self.labels.get(k).is_some_and(|have| have == v))
    }
}

// ── Jobs ──────────────────────────────────────────────────────────

/// Spec for a run-to-completion job (image builds).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSpec {
    pub name: String,
    pub labels: Labels,
    pub backoff_limit: u32,
    pub ttl_seconds_after_finished: u32,
    pub template: PodTemplate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobConditionKind {
    Complete,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobCondition {
    pub kind: JobConditionKind,
    pub status: bool,
    #[serde(default)]
    pub message: String,
}

/// Observed state of a job, delivered on every change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobState {
    pub name: String,
    pub labels: Labels,
    /// Number of actively running pods.
    pub active: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<JobCondition>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobEvent {
    pub job: JobState,
}

// ── Route rules ───────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderMatch {
    pub name: String,
    pub exact: String,
}

/// One routing clause. `match_header: None` is the default clause and
/// must come last.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteRule {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub match_header: Option<HeaderMatch>,
    pub destination_host: String,
}

/// The per-app routing resource (virtual-service analogue).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteRuleSet {
    pub app_name: String,
    pub hosts: Vec<String>,
    pub rules: Vec<RouteRule>,
    /// Concurrency token, preserved across updates.
    #[serde(default)]
    pub resource_version: u64,
}
