//! Build engine — submits, observes, and controls image builds.
//!
//! Builds are owned by an ImageRepo. Status flows in from the job
//! watcher via [`BuildEngine::on_status_change`]; terminal states are
//! monotonic, so a late cluster event can never clobber a cancel.

use std::sync::Arc;

use chrono::{Duration, Utc};
use serde::Deserialize;
use tracing::{error, warn};
use uuid::Uuid;

use paas_domain::error::{Error, Result};
use paas_domain::ports::{
    BuildExecutor, BuildRepository, BuildStatusCallback, ImageRepoRepository, LogQuerier,
};
use paas_domain::types::{Build, BuildStatus};
use paas_domain::validate;

pub struct BuildEngine {
    image_repos: Arc<dyn ImageRepoRepository>,
    builds: Arc<dyn BuildRepository>,
    executor: Option<Arc<dyn BuildExecutor>>,
    log_querier: Option<Arc<dyn LogQuerier>>,
    /// Namespace the build jobs run in; scopes historical log queries.
    build_namespace: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct CreateBuildRequest {
    #[serde(default)]
    pub git_ref: String,
    #[serde(default)]
    pub image_tag: Option<String>,
}

impl BuildEngine {
    pub fn new(
        image_repos: Arc<dyn ImageRepoRepository>,
        builds: Arc<dyn BuildRepository>,
        executor: Option<Arc<dyn BuildExecutor>>,
        log_querier: Option<Arc<dyn LogQuerier>>,
        build_namespace: &str,
    ) -> Self {
        Self {
            image_repos,
            builds,
            executor,
            log_querier,
            build_namespace: build_namespace.to_string(),
        }
    }

    /// Create a build for an image repo and hand it to the executor.
    /// A submission failure is recorded on the build (`failed`, error in
    /// `log`), not returned as an error.
    pub async fn create_build(&self, image_repo: &str, req: CreateBuildRequest) -> Result<Build> {
        validate::git_ref(&req.git_ref)?;
        let repo = self.image_repos.find_by_name(image_repo).await?;

        let git_ref = if req.git_ref.is_empty() {
            "main".to_string()
        } else {
            req.git_ref
        };
        let tag = req.image_tag.unwrap_or_else(|| git_ref.clone());

        let now = Utc::now();
        let mut build = Build {
            id: Uuid::new_v4().to_string(),
            image_repo: repo.name.clone(),
            git_ref,
            image_tag: repo.full_image_ref(&tag),
            status: BuildStatus::Pending,
            job_name: None,
            log: String::new(),
            created_at: now,
            updated_at: now,
        };
        self.builds.save(&build).await?;

        if let Some(executor) = &self.executor {
            match executor.submit(&build, &repo).await {
                Ok(job_name) => {
                    build.job_name = Some(job_name);
                    build.status = BuildStatus::Running;
                }
                Err(err) => {
                    build.status = BuildStatus::Failed;
                    build.log = err.to_string();
                }
            }
            build.updated_at = Utc::now();
            self.builds.update(&build).await?;
        }

        Ok(build)
    }

    pub async fn get(&self, id: &str) -> Result<Build> {
        self.builds.find_by_id(id).await
    }

    /// Fetch a build, scoped to one image repo: a build belonging to a
    /// different repo reads as absent.
    pub async fn get_for_repo(&self, image_repo: &str, id: &str) -> Result<Build> {
        let build = self.builds.find_by_id(id).await?;
        if build.image_repo != image_repo {
            return Err(Error::not_found(format!("build {id:?}")));
        }
        Ok(build)
    }

    pub async fn list(&self, image_repo: &str) -> Result<Vec<Build>> {
        self.image_repos.find_by_name(image_repo).await?;
        self.builds.find_by_image_repo(image_repo).await
    }

    pub async fn latest_successful(&self, image_repo: &str) -> Result<Build> {
        self.image_repos.find_by_name(image_repo).await?;
        self.builds.find_latest_successful(image_repo).await
    }

    /// Cancel a build. Only pending and running builds can be cancelled;
    /// a cluster-side delete failure propagates without a status change.
    pub async fn cancel(&self, image_repo: &str, id: &str) -> Result<()> {
        let mut build = self.get_for_repo(image_repo, id).await?;
        if !build.can_cancel() {
            return Err(Error::CannotCancel(format!(
                "build {id:?} is already {:?}",
                build.status
            )));
        }
        if let (Some(executor), Some(job_name)) = (&self.executor, &build.job_name) {
            executor.cancel(job_name).await?;
        }
        build.status = BuildStatus::Cancelled;
        build.updated_at = Utc::now();
        self.builds.update(&build).await
    }

    /// Three-tier log retrieval: live pod logs, then the historical log
    /// backend, then the persisted snapshot. Backend errors fall through.
    pub async fn get_logs(&self, image_repo: &str, id: &str) -> Result<String> {
        let build = self.get_for_repo(image_repo, id).await?;

        // No pod exists yet for a pending build.
        if build.status == BuildStatus::Pending {
            return Ok(String::new());
        }

        if let Some(executor) = &self.executor {
            match executor.get_logs(&build.id).await {
                Ok(logs) if !logs.is_empty() => return Ok(logs),
                Ok(_) => {}
                Err(err) => {
                    warn!(build_id = %build.id, error = %err, "failed to get pod logs, trying log backend");
                }
            }
        }

        if let Some(querier) = &self.log_querier {
            let start = build.created_at - Duration::minutes(1);
            let end = build.updated_at + Duration::minutes(5);
            match querier
                .query_build_logs(&self.build_namespace, &build.id, start, end)
                .await
            {
                Ok(logs) if !logs.is_empty() => return Ok(logs),
                Ok(_) => {}
                Err(err) => {
                    warn!(build_id = %build.id, error = %err, "failed to query log backend, falling back to stored log");
                }
            }
        }

        Ok(build.log)
    }

    /// Job-watcher callback. Terminal states are never overwritten.
    pub async fn on_status_change(&self, build_id: &str, status: BuildStatus, log: String) {
        let mut build = match self.builds.find_by_id(build_id).await {
            Ok(build) => build,
            Err(err) => {
                error!(build_id, error = %err, "status change for unknown build");
                return;
            }
        };
        if build.status.is_terminal() {
            return;
        }
        build.status = status;
        build.log = log;
        build.updated_at = Utc::now();
        if let Err(err) = self.builds.update(&build).await {
            error!(build_id, error = %err, "failed to persist build status change");
        }
    }
}

/// Adapt an engine into the callback shape the job watcher consumes.
pub fn status_callback(engine: Arc<BuildEngine>) -> BuildStatusCallback {
    Arc::new(move |build_id, status, log| {
        let engine = engine.clone();
        Box::pin(async move {
            engine.on_status_change(&build_id, status, log).await;
        })
    })
}
