//! `PaasStore` — redb-backed implementation of the repository ports.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use redb::{Database, ReadableTable, TableDefinition};
use tracing::debug;

use paas_domain::error::{Error, Result};
use paas_domain::ports::{
    AppRepository, BuildRepository, ImageRepoRepository, LaneRepository, ReleaseRepository,
};
use paas_domain::types::{App, Build, BuildStatus, ImageRepo, Lane, Release};

use crate::tables::{APPS, BUILDS, IMAGE_REPOS, LANES, RELEASES, RELEASE_INDEX};

fn storage_err(e: impl std::fmt::Display) -> Error {
    Error::Internal(format!("storage: {e}"))
}

/// Index key for the (app, lane) unique constraint.
fn release_key(app_name: &str, lane: &str) -> String {
    format!("{app_name}:{lane}")
}

/// Thread-safe store backed by redb. Implements all repository ports.
#[derive(Clone)]
pub struct PaasStore {
    db: Arc<Database>,
}

impl PaasStore {
    /// Open (or create) a persistent store at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        let db = Database::create(path).map_err(storage_err)?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory store (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(storage_err)?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        Ok(store)
    }

    /// Opening a table in a write transaction creates it if absent.
    fn ensure_tables(&self) -> Result<()> {
        let txn = self.db.begin_write().map_err(storage_err)?;
        txn.open_table(APPS).map_err(storage_err)?;
        txn.open_table(IMAGE_REPOS).map_err(storage_err)?;
        txn.open_table(LANES).map_err(storage_err)?;
        txn.open_table(BUILDS).map_err(storage_err)?;
        txn.open_table(RELEASES).map_err(storage_err)?;
        txn.open_table(RELEASE_INDEX).map_err(storage_err)?;
        txn.commit().map_err(storage_err)?;
        Ok(())
    }

    // ── Generic row helpers ────────────────────────────────────────

    fn put<T: serde::Serialize>(
        &self,
        table: TableDefinition<&str, &[u8]>,
        key: &str,
        value: &T,
    ) -> Result<()> {
        let bytes = serde_json::to_vec(value).map_err(storage_err)?;
        let txn = self.db.begin_write().map_err(storage_err)?;
        {
            let mut t = txn.open_table(table).map_err(storage_err)?;
            t.insert(key, bytes.as_slice()).map_err(storage_err)?;
        }
        txn.commit().map_err(storage_err)?;
        Ok(())
    }

    /// Insert only if the key is free; `what` names the entity for errors.
    fn put_new<T: serde::Serialize>(
        &self,
        table: TableDefinition<&str, &[u8]>,
        key: &str,
        what: &str,
        value: &T,
    ) -> Result<()> {
        let bytes = serde_json::to_vec(value).map_err(storage_err)?;
        let txn = self.db.begin_write().map_err(storage_err)?;
        {
            let mut t = txn.open_table(table).map_err(storage_err)?;
            if t.get(key).map_err(storage_err)?.is_some() {
                return Err(Error::already_exists(what));
            }
            t.insert(key, bytes.as_slice()).map_err(storage_err)?;
        }
        txn.commit().map_err(storage_err)?;
        Ok(())
    }

    fn get<T: serde::de::DeserializeOwned>(
        &self,
        table: TableDefinition<&str, &[u8]>,
        key: &str,
    ) -> Result<Option<T>> {
        let txn = self.db.begin_read().map_err(storage_err)?;
        let t = txn.open_table(table).map_err(storage_err)?;
        match t.get(key).map_err(storage_err)? {
            Some(guard) => {
                let value = serde_json::from_slice(guard.value()).map_err(storage_err)?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    /// All rows in key order (redb iterates sorted by key).
    fn list<T: serde::de::DeserializeOwned>(
        &self,
        table: TableDefinition<&str, &[u8]>,
    ) -> Result<Vec<T>> {
        let txn = self.db.begin_read().map_err(storage_err)?;
        let t = txn.open_table(table).map_err(storage_err)?;
        let mut out = Vec::new();
        for entry in t.iter().map_err(storage_err)? {
            let (_, value) = entry.map_err(storage_err)?;
            out.push(serde_json::from_slice(value.value()).map_err(storage_err)?);
        }
        Ok(out)
    }

    fn remove(&self, table: TableDefinition<&str, &[u8]>, key: &str) -> Result<bool> {
        let txn = self.db.begin_write().map_err(storage_err)?;
        let existed;
        {
            let mut t = txn.open_table(table).map_err(storage_err)?;
            existed = t.remove(key).map_err(storage_err)?.is_some();
        }
        txn.commit().map_err(storage_err)?;
        Ok(existed)
    }
}

// ── Apps ──────────────────────────────────────────────────────────

#[async_trait]
impl AppRepository for PaasStore {
    async fn save(&self, app: &App) -> Result<()> {
        self.put_new(APPS, &app.name, &format!("app {:?}", app.name), app)
    }

    async fn find_by_name(&self, name: &str) -> Result<App> {
        self.get(APPS, name)?
            .ok_or_else(|| Error::not_found(format!("app {name:?}")))
    }

    async fn find_all(&self) -> Result<Vec<App>> {
        self.list(APPS)
    }

    async fn update(&self, app: &App) -> Result<()> {
        if self.get::<App>(APPS, &app.name)?.is_none() {
            return Err(Error::not_found(format!("app {:?}", app.name)));
        }
        self.put(APPS, &app.name, app)
    }

    async fn delete(&self, name: &str) -> Result<()> {
        if !self.remove(APPS, name)? {
            return Err(Error::not_found(format!("app {name:?}")));
        }
        Ok(())
    }
}

// ── Image repos ───────────────────────────────────────────────────

#[async_trait]
impl ImageRepoRepository for PaasStore {
    async fn save(&self, repo: &ImageRepo) -> Result<()> {
        self.put_new(
            IMAGE_REPOS,
            &repo.name,
            &format!("image repo {:?}", repo.name),
            repo,
        )
    }

    async fn find_by_name(&self, name: &str) -> Result<ImageRepo> {
        self.get(IMAGE_REPOS, name)?
            .ok_or_else(|| Error::not_found(format!("image repo {name:?}")))
    }

    async fn find_all(&self) -> Result<Vec<ImageRepo>> {
        self.list(IMAGE_REPOS)
    }

    async fn update(&self, repo: &ImageRepo) -> Result<()> {
        if self.get::<ImageRepo>(IMAGE_REPOS, &repo.name)?.is_none() {
            return Err(Error::not_found(format!("image repo {:?}", repo.name)));
        }
        self.put(IMAGE_REPOS, &repo.name, repo)
    }

    async fn delete(&self, name: &str) -> Result<()> {
        if !self.remove(IMAGE_REPOS, name)? {
            return Err(Error::not_found(format!("image repo {name:?}")));
        }
        Ok(())
    }
}

// ── Lanes ─────────────────────────────────────────────────────────

#[async_trait]
impl LaneRepository for PaasStore {
    async fn save(&self, lane: &Lane) -> Result<()> {
        self.put_new(LANES, &lane.name, &format!("lane {:?}", lane.name), lane)
    }

    async fn find_by_name(&self, name: &str) -> Result<Lane> {
        self.get(LANES, name)?
            .ok_or_else(|| Error::not_found(format!("lane {name:?}")))
    }

    async fn find_all(&self) -> Result<Vec<Lane>> {
        self.list(LANES)
    }

    async fn delete(&self, name: &str) -> Result<()> {
        if !self.remove(LANES, name)? {
            return Err(Error::not_found(format!("lane {name:?}")));
        }
        Ok(())
    }
}

// ── Builds ────────────────────────────────────────────────────────

#[async_trait]
impl BuildRepository for PaasStore {
    async fn save(&self, build: &Build) -> Result<()> {
        self.put_new(BUILDS, &build.id, &format!("build {:?}", build.id), build)
    }

    async fn find_by_id(&self, id: &str) -> Result<Build> {
        self.get(BUILDS, id)?
            .ok_or_else(|| Error::not_found(format!("build {id:?}")))
    }

    async fn find_by_image_repo(&self, image_repo: &str) -> Result<Vec<Build>> {
        let mut builds: Vec<Build> = self.list(BUILDS)?;
        builds.retain(|b| b.image_repo == image_repo);
        // Newest first.
        builds.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(builds)
    }

    async fn find_latest_successful(&self, image_repo: &str) -> Result<Build> {
        let builds = self.find_by_image_repo(image_repo).await?;
        builds
            .into_iter()
            .find(|b| b.status == BuildStatus::Succeeded)
            .ok_or_else(|| {
                Error::not_found(format!("successful build for image repo {image_repo:?}"))
            })
    }

    async fn update(&self, build: &Build) -> Result<()> {
        if self.get::<Build>(BUILDS, &build.id)?.is_none() {
            return Err(Error::not_found(format!("build {:?}", build.id)));
        }
        self.put(BUILDS, &build.id, build)
    }
}

// ── Releases ──────────────────────────────────────────────────────

#[async_trait]
impl ReleaseRepository for PaasStore {
    /// Insert a release, claiming the (app, lane) slot. A second insert
    /// for the same slot fails with AlreadyExists — the store plays the
    /// role of the unique composite index.
    async fn save(&self, release: &Release) -> Result<()> {
        let bytes = serde_json::to_vec(release).map_err(storage_err)?;
        let index_key = release_key(&release.app_name, &release.lane);
        let txn = self.db.begin_write().map_err(storage_err)?;
        {
            let mut index = txn.open_table(RELEASE_INDEX).map_err(storage_err)?;
            match index.get(index_key.as_str()).map_err(storage_err)? {
                Some(existing) if existing.value() != release.id => {
                    return Err(Error::already_exists(format!(
                        "release for app {:?} on lane {:?}",
                        release.app_name, release.lane
                    )));
                }
                _ => {}
            }
            index
                .insert(index_key.as_str(), release.id.as_str())
                .map_err(storage_err)?;
            let mut rows = txn.open_table(RELEASES).map_err(storage_err)?;
            rows.insert(release.id.as_str(), bytes.as_slice())
                .map_err(storage_err)?;
        }
        txn.commit().map_err(storage_err)?;
        debug!(id = %release.id, app = %release.app_name, lane = %release.lane, "release stored");
        Ok(())
    }

    async fn find_by_id(&self, id: &str) -> Result<Release> {
        self.get(RELEASES, id)?
            .ok_or_else(|| Error::not_found(format!("release {id:?}")))
    }

    async fn find_by_app_and_lane(&self, app_name: &str, lane: &str) -> Result<Release> {
        let key = release_key(app_name, lane);
        let id: Option<String> = {
            let txn = self.db.begin_read().map_err(storage_err)?;
            let index = txn.open_table(RELEASE_INDEX).map_err(storage_err)?;
            index
                .get(key.as_str())
                .map_err(storage_err)?
                .map(|g| g.value().to_string())
        };
        match id {
            Some(id) => ReleaseRepository::find_by_id(self, &id).await,
            None => Err(Error::not_found(format!(
                "release for app {app_name:?} on lane {lane:?}"
            ))),
        }
    }

    async fn find_all(&self, app_name: Option<&str>, lane: Option<&str>) -> Result<Vec<Release>> {
        let mut releases: Vec<Release> = self.list(RELEASES)?;
        if let Some(app) = app_name {
            releases.retain(|r| r.app_name == app);
        }
        if let Some(lane) = lane {
            releases.retain(|r| r.lane == lane);
        }
        releases.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(releases)
    }

    async fn find_by_lane(&self, lane: &str) -> Result<Vec<Release>> {
        ReleaseRepository::find_all(self, None, Some(lane)).await
    }

    async fn update(&self, release: &Release) -> Result<()> {
        // Route through save: the index check tolerates the row's own id
        // and rejects a clash with a different release.
        if self.get::<Release>(RELEASES, &release.id)?.is_none() {
            return Err(Error::not_found(format!("release {:?}", release.id)));
        }
        ReleaseRepository::save(self, release).await
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let release = ReleaseRepository::find_by_id(self, id).await?;
        let index_key = release_key(&release.app_name, &release.lane);
        let txn = self.db.begin_write().map_err(storage_err)?;
        {
            let mut rows = txn.open_table(RELEASES).map_err(storage_err)?;
            rows.remove(id).map_err(storage_err)?;
            let mut index = txn.open_table(RELEASE_INDEX).map_err(storage_err)?;
            // Only clear the slot if it still points at this release.
            let points_here = index
                .get(index_key.as_str())
                .map_err(storage_err)?
                .map(|g| g.value() == id)
                .unwrap_or(false);
            if points_here {
                index.remove(index_key.as_str()).map_err(storage_err)?;
            }
        }
        txn.commit().map_err(storage_err)?;
        Ok(())
    }
}
