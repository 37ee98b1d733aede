//! Lane service — deployment slices, with `prod` as the protected default.

use std::sync::Arc;

use chrono::Utc;
use serde::Deserialize;

use paas_domain::error::{Error, Result};
use paas_domain::ports::{LaneRepository, ReleaseRepository};
use paas_domain::types::{Lane, DEFAULT_LANE};
use paas_domain::validate;

pub struct LaneService {
    lanes: Arc<dyn LaneRepository>,
    releases: Arc<dyn ReleaseRepository>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CreateLaneRequest {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

impl LaneService {
    pub fn new(lanes: Arc<dyn LaneRepository>, releases: Arc<dyn ReleaseRepository>) -> Self {
        Self { lanes, releases }
    }

    /// Create the `prod` lane on startup. Idempotent.
    pub async fn ensure_default_lane(&self) -> Result<()> {
        match self.lanes.find_by_name(DEFAULT_LANE).await {
            Ok(_) => Ok(()),
            Err(err) if err.is_not_found() => {
                let now = Utc::now();
                self.lanes
                    .save(&Lane {
                        name: DEFAULT_LANE.to_string(),
                        description: "Default production lane".to_string(),
                        created_at: now,
                        updated_at: now,
                    })
                    .await
            }
            Err(err) => Err(err),
        }
    }

    pub async fn create(&self, req: CreateLaneRequest) -> Result<Lane> {
        validate::resource_name(&req.name)?;
        let now = Utc::now();
        let lane = Lane {
            name: req.name,
            description: req.description,
            created_at: now,
            updated_at: now,
        };
        self.lanes.save(&lane).await?;
        Ok(lane)
    }

    pub async fn get(&self, name: &str) -> Result<Lane> {
        self.lanes.find_by_name(name).await
    }

    pub async fn list(&self) -> Result<Vec<Lane>> {
        self.lanes.find_all().await
    }

    /// Delete a lane. `prod` is never removable; occupied lanes are not
    /// removable either.
    pub async fn delete(&self, name: &str) -> Result<()> {
        let lane = self.lanes.find_by_name(name).await?;
        if lane.is_default() {
            return Err(Error::CannotDelete(
                "the default lane cannot be deleted".to_string(),
            ));
        }
        let releases = self.releases.find_by_lane(name).await?;
        if !releases.is_empty() {
            return Err(Error::CannotDelete(format!(
                "lane {name:?} still has {} release(s)",
                releases.len()
            )));
        }
        self.lanes.delete(name).await
    }
}
