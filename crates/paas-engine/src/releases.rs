//! Release orchestrator — "app X should run at version Y on lane L".
//!
//! Deploy completes (or provably fails) before the release row is
//! persisted with its terminal status; the route-rule reconcile runs
//! after persistence and never fails the operation.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use serde::Deserialize;
use tracing::warn;
use uuid::Uuid;

use paas_domain::error::Result;
use paas_domain::ports::{
    AppRepository, Deployer, ImageRepoRepository, LaneRepository, ReleaseRepository,
    RouteRuleReconciler,
};
use paas_domain::types::{App, Release, ReleaseStatus, DEFAULT_LANE};

pub struct ReleaseService {
    apps: Arc<dyn AppRepository>,
    image_repos: Arc<dyn ImageRepoRepository>,
    lanes: Arc<dyn LaneRepository>,
    releases: Arc<dyn ReleaseRepository>,
    deployer: Option<Arc<dyn Deployer>>,
    route_rules: Option<Arc<dyn RouteRuleReconciler>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateReleaseRequest {
    pub app_name: String,
    #[serde(default)]
    pub lane: String,
    /// Tag part only; the full reference comes from the app's image repo.
    #[serde(default)]
    pub image_tag: String,
    #[serde(default)]
    pub replicas: u32,
    #[serde(default)]
    pub envs: BTreeMap<String, String>,
    #[serde(default)]
    pub version: Option<String>,
}

impl ReleaseService {
    pub fn new(
        apps: Arc<dyn AppRepository>,
        image_repos: Arc<dyn ImageRepoRepository>,
        lanes: Arc<dyn LaneRepository>,
        releases: Arc<dyn ReleaseRepository>,
        deployer: Option<Arc<dyn Deployer>>,
        route_rules: Option<Arc<dyn RouteRuleReconciler>>,
    ) -> Self {
        Self {
            apps,
            image_repos,
            lanes,
            releases,
            deployer,
            route_rules,
        }
    }

    /// Idempotent on (app, lane): a second call mutates the existing
    /// release in place and keeps its id.
    pub async fn create_or_update(&self, req: CreateReleaseRequest) -> Result<Release> {
        let app = self.apps.find_by_name(&req.app_name).await?;

        // Full image reference via app → image repo.
        let image = match &app.image_repo {
            Some(repo_name) => {
                let repo = self.image_repos.find_by_name(repo_name).await?;
                repo.full_image_ref(&req.image_tag)
            }
            None => String::new(),
        };

        let lane = if req.lane.is_empty() {
            DEFAULT_LANE.to_string()
        } else {
            req.lane.clone()
        };
        self.lanes.find_by_name(&lane).await?;

        let replicas = req.replicas.max(1);

        let existing = match self.releases.find_by_app_and_lane(&req.app_name, &lane).await {
            Ok(release) => Some(release),
            Err(err) if err.is_not_found() => None,
            Err(err) => return Err(err),
        };

        let now = Utc::now();
        let is_update = existing.is_some();
        let mut release = match existing {
            Some(mut release) => {
                release.image = image;
                release.replicas = replicas;
                release.envs = req.envs;
                release.version = req.version;
                release.updated_at = now;
                release
            }
            None => Release {
                id: Uuid::new_v4().to_string(),
                app_name: req.app_name.clone(),
                lane: lane.clone(),
                image,
                replicas,
                envs: req.envs,
                version: req.version,
                status: ReleaseStatus::Pending,
                deploy_name: String::new(),
                created_at: now,
                updated_at: now,
            },
        };
        release.deploy_name = release.resource_name();
        release.status = ReleaseStatus::Pending;

        // Apply to the cluster. The outcome lands on the persisted row;
        // the deploy error itself is not surfaced.
        release.status = match &self.deployer {
            Some(deployer) => match deployer.deploy(&release, &app).await {
                Ok(()) => ReleaseStatus::Deployed,
                Err(err) => {
                    warn!(app = %release.app_name, lane = %release.lane, error = %err, "deploy failed");
                    ReleaseStatus::Failed
                }
            },
            None => ReleaseStatus::Deployed,
        };

        if is_update {
            self.releases.update(&release).await?;
        } else {
            self.releases.save(&release).await?;
        }

        self.reconcile_routes(&app).await;

        Ok(release)
    }

    pub async fn get(&self, id: &str) -> Result<Release> {
        self.releases.find_by_id(id).await
    }

    pub async fn list(&self, app_name: Option<&str>, lane: Option<&str>) -> Result<Vec<Release>> {
        self.releases.find_all(app_name, lane).await
    }

    /// Re-release by id: app and lane are pinned to the existing row.
    pub async fn update(&self, id: &str, mut req: CreateReleaseRequest) -> Result<Release> {
        let release = self.releases.find_by_id(id).await?;
        req.app_name = release.app_name;
        req.lane = release.lane;
        self.create_or_update(req).await
    }

    pub async fn delete_by_app_and_lane(&self, app_name: &str, lane: &str) -> Result<()> {
        let release = self.releases.find_by_app_and_lane(app_name, lane).await?;
        self.delete_release(release).await
    }

    pub async fn delete(&self, id: &str) -> Result<()> {
        let release = self.releases.find_by_id(id).await?;
        self.delete_release(release).await
    }

    /// Cluster-side delete failures are logged, not fatal: the row must
    /// remain deletable so a broken release can always be cleared.
    async fn delete_release(&self, release: Release) -> Result<()> {
        if let Some(deployer) = &self.deployer {
            if let Err(err) = deployer.delete(&release).await {
                warn!(release_id = %release.id, error = %err, "failed to delete cluster resources");
            }
        }

        self.releases.delete(&release.id).await?;

        if let Ok(app) = self.apps.find_by_name(&release.app_name).await {
            self.reconcile_routes(&app).await;
        }
        Ok(())
    }

    /// Recompute the app's route rules from its remaining releases.
    /// Workers (port 0) never get rules; an app with no releases left
    /// loses its rule set. Errors are logged and swallowed — the
    /// workload itself is already applied.
    async fn reconcile_routes(&self, app: &App) {
        let Some(reconciler) = &self.route_rules else {
            return;
        };
        if app.port == 0 {
            return;
        }

        let releases = match self.releases.find_all(Some(&app.name), None).await {
            Ok(releases) => releases,
            Err(err) => {
                warn!(app = %app.name, error = %err, "failed to list releases for route reconcile");
                return;
            }
        };

        let result = if releases.is_empty() {
            reconciler.delete(&app.name).await
        } else {
            reconciler.reconcile(&app.name, &releases).await
        };
        if let Err(err) = result {
            warn!(app = %app.name, error = %err, "failed to reconcile route rules");
        }
    }
}
