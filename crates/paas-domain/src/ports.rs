//! Port traits: the seams through which the control plane reaches
//! storage, the cluster, and the log backend. Implementations are
//! swappable; tests use hand-written fakes.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::types::{App, Build, BuildStatus, ImageRepo, Lane, Release};

// ── Repositories ──────────────────────────────────────────────────

#[async_trait]
pub trait AppRepository: Send + Sync {
    async fn save(&self, app: &App) -> Result<()>;
    async fn find_by_name(&self, name: &str) -> Result<App>;
    async fn find_all(&self) -> Result<Vec<App>>;
    async fn update(&self, app: &App) -> Result<()>;
    async fn delete(&self, name: &str) -> Result<()>;
}

#[async_trait]
pub trait ImageRepoRepository: Send + Sync {
    async fn save(&self, repo: &ImageRepo) -> Result<()>;
    async fn find_by_name(&self, name: &str) -> Result<ImageRepo>;
    async fn find_all(&self) -> Result<Vec<ImageRepo>>;
    async fn update(&self, repo: &ImageRepo) -> Result<()>;
    async fn delete(&self, name: &str) -> Result<()>;
}

#[async_trait]
pub trait LaneRepository: Send + Sync {
    async fn save(&self, lane: &Lane) -> Result<()>;
    async fn find_by_name(&self, name: &str) -> Result<Lane>;
    async fn find_all(&self) -> Result<Vec<Lane>>;
    async fn delete(&self, name: &str) -> Result<()>;
}

#[async_trait]
pub trait BuildRepository: Send + Sync {
    async fn save(&self, build: &Build) -> Result<()>;
    async fn find_by_id(&self, id: &str) -> Result<Build>;
    async fn find_by_image_repo(&self, image_repo: &str) -> Result<Vec<Build>>;
    /// Most recent build with status `succeeded`, or NotFound.
    async fn find_latest_successful(&self, image_repo: &str) -> Result<Build>;
    async fn update(&self, build: &Build) -> Result<()>;
}

#[async_trait]
pub trait ReleaseRepository: Send + Sync {
    async fn save(&self, release: &Release) -> Result<()>;
    async fn find_by_id(&self, id: &str) -> Result<Release>;
    async fn find_by_app_and_lane(&self, app_name: &str, lane: &str) -> Result<Release>;
    /// List releases, optionally filtered by app and/or lane.
    async fn find_all(&self, app_name: Option<&str>, lane: Option<&str>) -> Result<Vec<Release>>;
    async fn find_by_lane(&self, lane: &str) -> Result<Vec<Release>>;
    async fn update(&self, release: &Release) -> Result<()>;
    async fn delete(&self, id: &str) -> Result<()>;
}

// ── Cluster-side engines ──────────────────────────────────────────

/// Translates a Release + App into cluster workload/service resources and
/// blocks until the rollout is observed healthy or provably failing.
#[async_trait]
pub trait Deployer: Send + Sync {
    async fn deploy(&self, release: &Release, app: &App) -> Result<()>;
    async fn delete(&self, release: &Release) -> Result<()>;
}

/// Invoked by the job watcher whenever a build's job changes state.
pub type BuildStatusCallback =
    Arc<dyn Fn(String, BuildStatus, String) -> BoxFuture + Send + Sync>;

pub type BoxFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Drives the lifecycle of image-build jobs on the cluster.
#[async_trait]
pub trait BuildExecutor: Send + Sync {
    /// Create the build job; returns the job name. The image repo supplies
    /// the git context the job clones.
    async fn submit(&self, build: &Build, repo: &ImageRepo) -> Result<String>;
    /// Delete the job backing a build.
    async fn cancel(&self, job_name: &str) -> Result<()>;
    /// Live container logs of the build's pod, empty when no pod exists.
    async fn get_logs(&self, build_id: &str) -> Result<String>;
}

/// Queries historical logs from a Loki-compatible backend.
#[async_trait]
pub trait LogQuerier: Send + Sync {
    async fn query_build_logs(
        &self,
        namespace: &str,
        build_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<String>;

    #[allow(clippy::too_many_arguments)]
    async fn query_app_logs(
        &self,
        namespace: &str,
        app_name: &str,
        lane: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        limit: u32,
    ) -> Result<String>;
}

/// Maintains one header-routed rule set per App: `x-lane: <lane>` steers
/// to `{app}-{lane}`, everything else falls through to `{app}-prod`.
#[async_trait]
pub trait RouteRuleReconciler: Send + Sync {
    async fn reconcile(&self, app_name: &str, releases: &[Release]) -> Result<()>;
    /// Remove the rule set; absent is not an error.
    async fn delete(&self, app_name: &str) -> Result<()>;
}
