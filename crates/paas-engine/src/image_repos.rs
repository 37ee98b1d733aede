//! Image-repo service — reusable build configurations.

use std::sync::Arc;

use chrono::Utc;
use serde::Deserialize;

use paas_domain::error::{Error, Result};
use paas_domain::ports::{AppRepository, ImageRepoRepository};
use paas_domain::types::ImageRepo;
use paas_domain::validate;

pub struct ImageRepoService {
    image_repos: Arc<dyn ImageRepoRepository>,
    apps: Arc<dyn AppRepository>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CreateImageRepoRequest {
    pub name: String,
    pub registry: String,
    pub git_repo: String,
    #[serde(default)]
    pub context_dir: String,
    #[serde(default)]
    pub dockerfile: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateImageRepoRequest {
    pub registry: String,
    pub git_repo: String,
    #[serde(default)]
    pub context_dir: String,
    #[serde(default)]
    pub dockerfile: Option<String>,
}

fn validate_fields(
    registry: &str,
    git_repo: &str,
    context_dir: &str,
    dockerfile: Option<&str>,
) -> Result<()> {
    if registry.is_empty() {
        return Err(Error::invalid_input("registry is required"));
    }
    validate::git_repo(git_repo)?;
    validate::context_dir(context_dir)?;
    if let Some(dockerfile) = dockerfile {
        // Same traversal rules as the context dir.
        validate::context_dir(dockerfile)?;
    }
    Ok(())
}

impl ImageRepoService {
    pub fn new(image_repos: Arc<dyn ImageRepoRepository>, apps: Arc<dyn AppRepository>) -> Self {
        Self { image_repos, apps }
    }

    pub async fn create(&self, req: CreateImageRepoRequest) -> Result<ImageRepo> {
        validate::resource_name(&req.name)?;
        validate_fields(
            &req.registry,
            &req.git_repo,
            &req.context_dir,
            req.dockerfile.as_deref(),
        )?;

        let now = Utc::now();
        let repo = ImageRepo {
            name: req.name,
            registry: req.registry,
            git_repo: req.git_repo,
            context_dir: req.context_dir,
            dockerfile: req.dockerfile,
            created_at: now,
            updated_at: now,
        };
        self.image_repos.save(&repo).await?;
        Ok(repo)
    }

    pub async fn get(&self, name: &str) -> Result<ImageRepo> {
        self.image_repos.find_by_name(name).await
    }

    pub async fn list(&self) -> Result<Vec<ImageRepo>> {
        self.image_repos.find_all().await
    }

    pub async fn update(&self, name: &str, req: UpdateImageRepoRequest) -> Result<ImageRepo> {
        let mut repo = self.image_repos.find_by_name(name).await?;
        validate_fields(
            &req.registry,
            &req.git_repo,
            &req.context_dir,
            req.dockerfile.as_deref(),
        )?;

        repo.registry = req.registry;
        repo.git_repo = req.git_repo;
        repo.context_dir = req.context_dir;
        repo.dockerfile = req.dockerfile;
        repo.updated_at = Utc::now();
        self.image_repos.update(&repo).await?;
        Ok(repo)
    }

    /// Delete an image repo unless an app still points at it.
    pub async fn delete(&self, name: &str) -> Result<()> {
        self.image_repos.find_by_name(name).await?;
        let apps = self.apps.find_all().await?;
        if let Some(app) = apps
            .iter()
            .find(|app| app.image_repo.as_deref() == Some(name))
        {
            return Err(Error::CannotDelete(format!(
                "image repo {name:?} is referenced by app {:?}",
                app.name
            )));
        }
        self.image_repos.delete(name).await
    }
}
