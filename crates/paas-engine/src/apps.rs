//! App service — CRUD over the logical workload identities.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use serde::Deserialize;

use paas_domain::error::{Error, Result};
use paas_domain::ports::{AppRepository, ImageRepoRepository, ReleaseRepository};
use paas_domain::types::App;
use paas_domain::validate;

pub struct AppService {
    apps: Arc<dyn AppRepository>,
    image_repos: Arc<dyn ImageRepoRepository>,
    releases: Arc<dyn ReleaseRepository>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CreateAppRequest {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub image_repo: Option<String>,
    #[serde(default)]
    pub port: u16,
    #[serde(default)]
    pub service_account: Option<String>,
    #[serde(default)]
    pub command: Vec<String>,
    #[serde(default)]
    pub env_from_secrets: Vec<String>,
    #[serde(default)]
    pub env_from_config_maps: Vec<String>,
    #[serde(default)]
    pub envs: BTreeMap<String, String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateAppRequest {
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub image_repo: Option<String>,
    #[serde(default)]
    pub port: u16,
    #[serde(default)]
    pub service_account: Option<String>,
    #[serde(default)]
    pub command: Vec<String>,
    #[serde(default)]
    pub env_from_secrets: Vec<String>,
    #[serde(default)]
    pub env_from_config_maps: Vec<String>,
    #[serde(default)]
    pub envs: BTreeMap<String, String>,
}

impl AppService {
    pub fn new(
        apps: Arc<dyn AppRepository>,
        image_repos: Arc<dyn ImageRepoRepository>,
        releases: Arc<dyn ReleaseRepository>,
    ) -> Self {
        Self {
            apps,
            image_repos,
            releases,
        }
    }

    pub async fn create(&self, req: CreateAppRequest) -> Result<App> {
        validate::resource_name(&req.name)?;
        self.check_image_repo(req.image_repo.as_deref()).await?;

        let now = Utc::now();
        let app = App {
            name: req.name,
            description: req.description,
            image_repo: req.image_repo,
            port: req.port,
            service_account: req.service_account,
            command: req.command,
            env_from_secrets: req.env_from_secrets,
            env_from_config_maps: req.env_from_config_maps,
            envs: req.envs,
            created_at: now,
            updated_at: now,
        };
        self.apps.save(&app).await?;
        Ok(app)
    }

    pub async fn get(&self, name: &str) -> Result<App> {
        self.apps.find_by_name(name).await
    }

    pub async fn list(&self) -> Result<Vec<App>> {
        self.apps.find_all().await
    }

    pub async fn update(&self, name: &str, req: UpdateAppRequest) -> Result<App> {
        let mut app = self.apps.find_by_name(name).await?;
        self.check_image_repo(req.image_repo.as_deref()).await?;

        app.description = req.description;
        app.image_repo = req.image_repo;
        app.port = req.port;
        app.service_account = req.service_account;
        app.command = req.command;
        app.env_from_secrets = req.env_from_secrets;
        app.env_from_config_maps = req.env_from_config_maps;
        app.envs = req.envs;
        app.updated_at = Utc::now();
        self.apps.update(&app).await?;
        Ok(app)
    }

    /// Delete an app. Blocked while any release still references it.
    pub async fn delete(&self, name: &str) -> Result<()> {
        self.apps.find_by_name(name).await?;
        let releases = self.releases.find_all(Some(name), None).await?;
        if !releases.is_empty() {
            return Err(Error::CannotDelete(format!(
                "app {name:?} still has {} release(s)",
                releases.len()
            )));
        }
        self.apps.delete(name).await
    }

    async fn check_image_repo(&self, image_repo: Option<&str>) -> Result<()> {
        if let Some(repo) = image_repo {
            self.image_repos.find_by_name(repo).await?;
        }
        Ok(())
    }
}
