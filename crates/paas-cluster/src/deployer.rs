//! Deployment engine — reconciles workload, lane service, and base
//! service from a Release/App pair, then waits for the rollout.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use paas_domain::error::{Error, Result};
use paas_domain::ports::Deployer;
use paas_domain::types::{App, Release, DEFAULT_LANE};

use crate::api::ClusterApi;
use crate::model::{
    ConditionKind, Container, EnvFromSource, EnvVar, Labels, PodTemplate, ServicePort, ServiceSpec,
    Workload, APP_LABEL, LANE_LABEL, POD_TEMPLATE_HASH_LABEL,
};

const ROLLOUT_TIMEOUT: Duration = Duration::from_secs(5 * 60);
const ROLLOUT_INTERVAL: Duration = Duration::from_secs(3);

/// How many superseded replica sets the cluster keeps around.
const REVISION_HISTORY_LIMIT: u32 = 2;

/// Reconciles cluster resources for releases and blocks until the
/// rollout is healthy or provably failing.
pub struct WorkloadDeployer {
    api: Arc<dyn ClusterApi>,
    poll_interval: Duration,
    rollout_timeout: Duration,
}

impl WorkloadDeployer {
    pub fn new(api: Arc<dyn ClusterApi>) -> Self {
        Self {
            api,
            poll_interval: ROLLOUT_INTERVAL,
            rollout_timeout: ROLLOUT_TIMEOUT,
        }
    }

    /// Override the rollout polling cadence (tests).
    pub fn with_timing(mut self, poll_interval: Duration, rollout_timeout: Duration) -> Self {
        self.poll_interval = poll_interval;
        self.rollout_timeout = rollout_timeout;
        self
    }

    async fn apply_workload(&self, release: &Release, app: &App) -> Result<()> {
        let desired = desired_workload(release, app);
        let existing = self
            .api
            .get_workload(&desired.name)
            .await
            .map_err(|e| Error::internal(format!("apply workload: {e}")))?;
        let result = match existing {
            Some(_) => self.api.update_workload(&desired).await,
            None => self.api.create_workload(&desired).await,
        };
        result.map_err(|e| Error::internal(format!("apply workload: {e}")))
    }

    async fn apply_service(&self, desired: &ServiceSpec) -> Result<()> {
        let existing = self
            .api
            .get_service(&desired.name)
            .await
            .map_err(|e| Error::internal(format!("apply service: {e}")))?;
        let result = match existing {
            Some(_) => self.api.update_service(desired).await,
            None => self.api.create_service(desired).await,
        };
        result.map_err(|e| Error::internal(format!("apply service: {e}")))
    }

    async fn wait_for_rollout(&self, name: &str) -> Result<()> {
        match tokio::time::timeout(self.rollout_timeout, self.poll_rollout(name)).await {
            Ok(result) => result,
            Err(_) => Err(Error::internal(format!(
                "workload {name} rollout timed out after {:?}",
                self.rollout_timeout
            ))),
        }
    }

    async fn poll_rollout(&self, name: &str) -> Result<()> {
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;

            let workload = self
                .api
                .get_workload(name)
                .await
                .map_err(|e| Error::internal(format!("get workload {name}: {e}")))?
                .ok_or_else(|| Error::internal(format!("workload {name} disappeared")))?;

            // A false Progressing condition means the rollout is wedged.
            for cond in &workload.status.conditions {
                if cond.kind == ConditionKind::Progressing && !cond.status {
                    return Err(Error::internal(format!(
                        "workload {name} is not progressing: {}",
                        cond.message
                    )));
                }
            }

            if let Some(reason) = self.detect_pod_failure(&workload).await {
                return Err(Error::internal(format!("workload {name} failed: {reason}")));
            }

            let status = &workload.status;
            if status.observed_generation >= workload.generation
                && status.updated_replicas == workload.replicas
                && status.available_replicas == workload.replicas
            {
                info!(name, "workload rollout complete");
                return Ok(());
            }
        }
    }

    /// Check the newest replica set's pods for unrecoverable waiting
    /// states, so a hopeless rollout fails in seconds instead of at the
    /// timeout. Pods of older replica sets are ignored.
    async fn detect_pod_failure(&self, workload: &Workload) -> Option<String> {
        let latest_hash = self.latest_replica_set_hash(workload).await?;

        let mut selector = workload.selector.clone();
        selector.insert(POD_TEMPLATE_HASH_LABEL.to_string(), latest_hash);

        let pods = match self.api.list_pods(&selector).await {
            Ok(pods) => pods,
            Err(e) => {
                warn!(error = %e, "failed to list pods for crash detection");
                return None;
            }
        };

        for pod in &pods {
            for cs in &pod.container_statuses {
                let Some(waiting) = &cs.waiting else { continue };
                match waiting.reason.as_str() {
                    "CrashLoopBackOff" => {
                        return Some(format!(
                            "pod {} is in CrashLoopBackOff: {}",
                            pod.name, waiting.message
                        ));
                    }
                    "ImagePullBackOff" => {
                        return Some(format!(
                            "pod {} failed to pull image: {}",
                            pod.name, waiting.message
                        ));
                    }
                    _ => {}
                }
            }
            for cs in &pod.init_container_statuses {
                if let Some(waiting) = &cs.waiting {
                    if waiting.reason == "CrashLoopBackOff" {
                        return Some(format!(
                            "pod {} init container is in CrashLoopBackOff: {}",
                            pod.name, waiting.message
                        ));
                    }
                }
            }
        }
        None
    }

    /// Pod-template hash of the replica set with the highest revision.
    async fn latest_replica_set_hash(&self, workload: &Workload) -> Option<String> {
        let replica_sets = match self.api.list_replica_sets(&workload.selector).await {
            Ok(rs) => rs,
            Err(e) => {
                warn!(error = %e, "failed to list replica sets for hash lookup");
                return None;
            }
        };

        replica_sets
            .iter()
            .filter_map(|rs| Some((rs.revision?, rs)))
            .max_by_key(|(revision, _)| *revision)
            .and_then(|(_, rs)| rs.labels.get(POD_TEMPLATE_HASH_LABEL).cloned())
    }
}

#[async_trait]
impl Deployer for WorkloadDeployer {
    async fn deploy(&self, release: &Release, app: &App) -> Result<()> {
        if release.image.is_empty() {
            return Err(Error::invalid_input(format!(
                "release for app {:?} has no image",
                release.app_name
            )));
        }

        self.apply_workload(release, app).await?;

        if app.port > 0 {
            self.apply_service(&lane_service(release, app)).await?;
            self.apply_service(&base_service(release, app)).await?;
        }

        self.wait_for_rollout(&release.resource_name()).await
    }

    /// Remove the workload and the lane service. The base service stays:
    /// it is lane-agnostic and other lanes may still be running.
    async fn delete(&self, release: &Release) -> Result<()> {
        let name = release.resource_name();
        self.api
            .delete_workload(&name)
            .await
            .map_err(|e| Error::internal(format!("delete workload {name}: {e}")))?;
        self.api
            .delete_service(&name)
            .await
            .map_err(|e| Error::internal(format!("delete service {name}: {e}")))?;
        Ok(())
    }
}

// ── Desired state ─────────────────────────────────────────────────

fn release_labels(release: &Release) -> Labels {
    let mut labels = Labels::new();
    labels.insert(APP_LABEL.to_string(), release.app_name.clone());
    labels.insert(LANE_LABEL.to_string(), release.lane.clone());
    labels
}

/// Explicit env of the container: app envs overlaid by release envs,
/// plus `VERSION` when the release carries one.
fn merged_envs(release: &Release, app: &App) -> Vec<EnvVar> {
    let mut merged: BTreeMap<String, String> = app.envs.clone();
    for (k, v) in &release.envs {
        merged.insert(k.clone(), v.clone());
    }
    if let Some(version) = &release.version {
        if !version.is_empty() {
            merged.insert("VERSION".to_string(), version.clone());
        }
    }
    merged
        .into_iter()
        .map(|(name, value)| EnvVar { name, value })
        .collect()
}

fn env_from_sources(app: &App) -> Vec<EnvFromSource> {
    app.env_from_secrets
        .iter()
        .cloned()
        .map(EnvFromSource::Secret)
        .chain(
            app.env_from_config_maps
                .iter()
                .cloned()
                .map(EnvFromSource::ConfigMap),
        )
        .collect()
}

fn desired_workload(release: &Release, app: &App) -> Workload {
    let labels = release_labels(release);

    let container = Container {
        name: app.name.clone(),
        image: release.image.clone(),
        command: app.command.clone(),
        args: Vec::new(),
        port: (app.port > 0).then_some(app.port),
        env: merged_envs(release, app),
        env_from: env_from_sources(app),
        volume_mounts: Vec::new(),
    };

    Workload {
        name: release.resource_name(),
        labels: labels.clone(),
        selector: labels.clone(),
        replicas: release.replicas,
        revision_history_limit: REVISION_HISTORY_LIMIT,
        template: PodTemplate {
            labels,
            service_account: app.service_account.clone(),
            restart_policy: Default::default(),
            containers: vec![container],
            volumes: Vec::new(),
        },
        generation: 0,
        status: Default::default(),
    }
}

/// Per-lane service `{app}-{lane}`, selecting on both labels.
fn lane_service(release: &Release, app: &App) -> ServiceSpec {
    let labels = release_labels(release);
    ServiceSpec {
        name: release.resource_name(),
        labels: labels.clone(),
        selector: labels,
        ports: vec![ServicePort {
            port: app.port,
            target_port: app.port,
        }],
    }
}

/// Lane-agnostic service `{app}`, pinned to prod pods. The traffic
/// router overrides it per request; without the router it is the
/// fallback target.
fn base_service(release: &Release, app: &App) -> ServiceSpec {
    let mut labels = Labels::new();
    labels.insert(APP_LABEL.to_string(), release.app_name.clone());

    let mut selector = labels.clone();
    selector.insert(LANE_LABEL.to_string(), DEFAULT_LANE.to_string());

    ServiceSpec {
        name: release.app_name.clone(),
        labels,
        selector,
        ports: vec![ServicePort {
            port: app.port,
            target_port: app.port,
        }],
    }
}
