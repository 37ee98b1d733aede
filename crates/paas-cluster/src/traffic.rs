//! Traffic-route reconciler — one header-routed rule set per app.
//!
//! Requests carrying `x-lane: <lane>` are steered to `{app}-{lane}`;
//! anything else falls through to `{app}-prod`, which is always the last
//! clause.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use paas_domain::error::{Error, Result};
use paas_domain::ports::RouteRuleReconciler;
use paas_domain::types::{Release, DEFAULT_LANE};

use crate::api::ClusterApi;
use crate::model::{HeaderMatch, RouteRule, RouteRuleSet};

/// Request header carrying the target lane.
pub const LANE_HEADER: &str = "x-lane";

pub struct TrafficReconciler {
    api: Arc<dyn ClusterApi>,
}

impl TrafficReconciler {
    pub fn new(api: Arc<dyn ClusterApi>) -> Self {
        Self { api }
    }
}

/// Compute the rule list for an app from its current releases: one
/// exact-match clause per non-prod lane, then the default clause.
fn build_rules(app_name: &str, releases: &[Release]) -> Vec<RouteRule> {
    let mut rules: Vec<RouteRule> = releases
        .iter()
        .filter(|release| release.lane != DEFAULT_LANE)
        .map(|release| RouteRule {
            match_header: Some(HeaderMatch {
                name: LANE_HEADER.to_string(),
                exact: release.lane.clone(),
            }),
            destination_host: format!("{app_name}-{}", release.lane),
        })
        .collect();

    rules.push(RouteRule {
        match_header: None,
        destination_host: format!("{app_name}-{DEFAULT_LANE}"),
    });
    rules
}

#[async_trait]
impl RouteRuleReconciler for TrafficReconciler {
    async fn reconcile(&self, app_name: &str, releases: &[Release]) -> Result<()> {
        let existing = self
            .api
            .get_route_rules(app_name)
            .await
            .map_err(|e| Error::internal(format!("get route rules for {app_name}: {e}")))?;

        let rules = RouteRuleSet {
            app_name: app_name.to_string(),
            hosts: vec![app_name.to_string()],
            rules: build_rules(app_name, releases),
            resource_version: existing.map(|r| r.resource_version).unwrap_or(0),
        };

        self.api
            .upsert_route_rules(&rules)
            .await
            .map_err(|e| Error::internal(format!("upsert route rules for {app_name}: {e}")))?;
        debug!(app = app_name, clauses = rules.rules.len(), "route rules reconciled");
        Ok(())
    }

    async fn delete(&self, app_name: &str) -> Result<()> {
        // Absent rule sets are fine; delete is idempotent.
        self.api
            .delete_route_rules(app_name)
            .await
            .map_err(|e| Error::internal(format!("delete route rules for {app_name}: {e}")))?;
        Ok(())
    }
}
