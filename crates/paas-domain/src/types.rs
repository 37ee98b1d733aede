//! Persisted entities and their status state machines.
//!
//! All types are serialized to/from JSON for storage and for the HTTP
//! surface. Maps use `BTreeMap` so serialized output and injected env
//! ordering are deterministic.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The reserved default lane. Created on startup, never deletable.
pub const DEFAULT_LANE: &str = "prod";

// ── App ───────────────────────────────────────────────────────────

/// Logical workload identity. An App maps to no cluster resource by
/// itself; Releases instantiate it per lane.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct App {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Name of the ImageRepo this app builds from, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_repo: Option<String>,
    /// Container port. 0 means a headless worker: no service, no route rules.
    #[serde(default)]
    pub port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_account: Option<String>,
    /// Container command override (argv tokens, in order).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub command: Vec<String>,
    /// Secret names whose keys become env vars, in order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env_from_secrets: Vec<String>,
    /// ConfigMap names whose keys become env vars, in order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env_from_config_maps: Vec<String>,
    /// Explicit env overrides.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub envs: BTreeMap<String, String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ── ImageRepo ─────────────────────────────────────────────────────

/// Reusable build configuration, decoupled from the runtime App.
/// Several apps may share one (e.g. a worker reusing the main image).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageRepo {
    pub name: String,
    /// Image reference prefix, e.g. `harbor.local/inner-bot/agent-service`.
    pub registry: String,
    /// Git repository URL (https:// or git:// only).
    pub git_repo: String,
    /// Build context sub-directory within the repository.
    #[serde(default)]
    pub context_dir: String,
    /// Dockerfile path relative to the context dir; empty means `Dockerfile`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dockerfile: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ImageRepo {
    /// Full image reference `registry:tag`.
    pub fn full_image_ref(&self, tag: &str) -> String {
        format!("{}:{}", self.registry, tag)
    }
}

// ── Lane ──────────────────────────────────────────────────────────

/// A deployment slice (`prod`, `staging`, `feature-x`, …).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lane {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Lane {
    pub fn is_default(&self) -> bool {
        self.name == DEFAULT_LANE
    }
}

// ── Build ─────────────────────────────────────────────────────────

/// Build lifecycle: `pending → running → (succeeded | failed | cancelled)`.
/// Terminal states never transition again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl BuildStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            BuildStatus::Succeeded | BuildStatus::Failed | BuildStatus::Cancelled
        )
    }
}

/// One image-build attempt against an ImageRepo, mirrored by a cluster Job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Build {
    pub id: String,
    pub image_repo: String,
    /// Branch, tag, or commit.
    pub git_ref: String,
    /// Full image reference including tag.
    pub image_tag: String,
    pub status: BuildStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_name: Option<String>,
    /// Last log snapshot; holds the submission error when submission fails.
    #[serde(default)]
    pub log: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Build {
    pub fn can_cancel(&self) -> bool {
        matches!(self.status, BuildStatus::Pending | BuildStatus::Running)
    }
}

// ── Release ───────────────────────────────────────────────────────

/// Release lifecycle: `pending → (deployed | failed)`. A failed release
/// stays persisted so the caller can retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReleaseStatus {
    Pending,
    Deployed,
    Failed,
}

/// One deployment of an App on a Lane. Unique per (app_name, lane);
/// the cluster workload and service share the name `{app}-{lane}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Release {
    pub id: String,
    pub app_name: String,
    pub lane: String,
    /// Full image reference including tag; may be empty for apps without
    /// an ImageRepo (the deployer rejects it if the workload needs one).
    #[serde(default)]
    pub image: String,
    pub replicas: u32,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub envs: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    pub status: ReleaseStatus,
    /// Name of the workload/service pair, always `{app}-{lane}`.
    #[serde(default)]
    pub deploy_name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Release {
    /// The cluster resource name shared by workload and lane service.
    pub fn resource_name(&self) -> String {
        format!("{}-{}", self.app_name, self.lane)
    }
}
