//! Runtime log service — queries app pod logs from the log backend.

use std::sync::Arc;

use chrono::{Duration, Utc};

use paas_domain::error::{Error, Result};
use paas_domain::ports::{AppRepository, LogQuerier};

const DEFAULT_LIMIT: u32 = 1000;
const MAX_LIMIT: u32 = 5000;

pub struct LogService {
    apps: Arc<dyn AppRepository>,
    log_querier: Arc<dyn LogQuerier>,
    deploy_namespace: String,
}

impl LogService {
    pub fn new(
        apps: Arc<dyn AppRepository>,
        log_querier: Arc<dyn LogQuerier>,
        deploy_namespace: &str,
    ) -> Self {
        Self {
            apps,
            log_querier,
            deploy_namespace: deploy_namespace.to_string(),
        }
    }

    /// Query runtime logs. `since` is a duration string (`1h`, `30m`);
    /// `limit` is clamped to [1, 5000] with 1000 as the zero default.
    pub async fn app_logs(&self, app_name: &str, lane: &str, since: &str, limit: u32) -> Result<String> {
        self.apps.find_by_name(app_name).await?;

        let since = humantime::parse_duration(since)
            .map_err(|e| Error::invalid_input(format!("invalid since {since:?}: {e}")))?;
        if since.is_zero() {
            return Err(Error::invalid_input("since must be positive"));
        }
        let since = Duration::from_std(since)
            .map_err(|e| Error::invalid_input(format!("since out of range: {e}")))?;

        let limit = match limit {
            0 => DEFAULT_LIMIT,
            n => n.min(MAX_LIMIT),
        };

        let end = Utc::now();
        let start = end - since;
        self.log_querier
            .query_app_logs(&self.deploy_namespace, app_name, lane, start, end, limit)
            .await
    }
}
