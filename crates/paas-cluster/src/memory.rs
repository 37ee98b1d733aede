//! In-memory cluster backend.
//!
//! Backs the engines in tests and in standalone runs where no external
//! cluster adapter is linked in. Workloads are marked healthy as soon as
//! they are applied (`auto_ready`, on by default); tests flip it off and
//! inject statuses, replica sets, pods, and job events directly.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::debug;

use crate::api::{ClusterApi, ClusterError, ClusterResult};
use crate::model::{
    JobEvent, JobSpec, JobState, Labels, PodInfo, ReplicaSetInfo, RouteRuleSet, ServiceEvent,
    ServiceSpec, Workload, WorkloadStatus,
};

#[derive(Default)]
struct Inner {
    workloads: BTreeMap<String, Workload>,
    services: BTreeMap<String, ServiceSpec>,
    jobs: BTreeMap<String, JobState>,
    replica_sets: Vec<ReplicaSetInfo>,
    pods: Vec<PodInfo>,
    route_rules: BTreeMap<String, RouteRuleSet>,
    /// Pod logs keyed by `label_key=label_value`.
    pod_logs: BTreeMap<String, String>,
    service_watchers: Vec<mpsc::UnboundedSender<ServiceEvent>>,
    job_watchers: Vec<mpsc::UnboundedSender<JobEvent>>,
    auto_ready: bool,
    fail_next_job_create: Option<String>,
}

/// In-process `ClusterApi` backend. `Clone` shares the same state.
#[derive(Clone)]
pub struct MemoryCluster {
    inner: Arc<Mutex<Inner>>,
}

impl Default for MemoryCluster {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryCluster {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                auto_ready: true,
                ..Inner::default()
            })),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().expect("cluster state lock")
    }

    fn ready_status(workload: &Workload) -> WorkloadStatus {
        WorkloadStatus {
            observed_generation: workload.generation,
            updated_replicas: workload.replicas,
            available_replicas: workload.replicas,
            conditions: Vec::new(),
        }
    }

    // ── Test knobs ─────────────────────────────────────────────────

    /// When false, applied workloads keep whatever status was injected.
    pub fn set_auto_ready(&self, auto_ready: bool) {
        self.lock().auto_ready = auto_ready;
    }

    pub fn set_workload_status(&self, name: &str, status: WorkloadStatus) {
        if let Some(w) = self.lock().workloads.get_mut(name) {
            w.status = status;
        }
    }

    pub fn add_replica_set(&self, rs: ReplicaSetInfo) {
        self.lock().replica_sets.push(rs);
    }

    pub fn add_pod(&self, pod: PodInfo) {
        self.lock().pods.push(pod);
    }

    pub fn set_pod_logs(&self, label_key: &str, label_value: &str, logs: &str) {
        self.lock()
            .pod_logs
            .insert(format!("{label_key}={label_value}"), logs.to_string());
    }

    /// Fail the next `create_job` call with the given message.
    pub fn fail_next_job_create(&self, message: &str) {
        self.lock().fail_next_job_create = Some(message.to_string());
    }

    /// Deliver a job state change to every open job watcher.
    pub fn push_job_update(&self, job: JobState) {
        let mut inner = self.lock();
        inner.jobs.insert(job.name.clone(), job.clone());
        inner
            .job_watchers
            .retain(|tx| tx.send(JobEvent { job: job.clone() }).is_ok());
    }

    pub fn job(&self, name: &str) -> Option<JobState> {
        self.lock().jobs.get(name).cloned()
    }

    pub fn route_rules(&self, app_name: &str) -> Option<RouteRuleSet> {
        self.lock().route_rules.get(app_name).cloned()
    }

    fn notify_services(inner: &mut Inner, event: ServiceEvent) {
        inner
            .service_watchers
            .retain(|tx| tx.send(event.clone()).is_ok());
    }
}

#[async_trait]
impl ClusterApi for MemoryCluster {
    async fn get_workload(&self, name: &str) -> ClusterResult<Option<Workload>> {
        Ok(self.lock().workloads.get(name).cloned())
    }

    async fn create_workload(&self, workload: &Workload) -> ClusterResult<()> {
        let mut inner = self.lock();
        if inner.workloads.contains_key(&workload.name) {
            return Err(ClusterError::Conflict(format!(
                "workload {:?} already exists",
                workload.name
            )));
        }
        let mut stored = workload.clone();
        stored.generation = 1;
        if inner.auto_ready {
            stored.status = Self::ready_status(&stored);
        }
        debug!(name = %stored.name, "workload created");
        inner.workloads.insert(stored.name.clone(), stored);
        Ok(())
    }

    async fn update_workload(&self, workload: &Workload) -> ClusterResult<()> {
        let mut inner = self.lock();
        let auto_ready = inner.auto_ready;
        let Some(existing) = inner.workloads.get_mut(&workload.name) else {
            return Err(ClusterError::NotFound(format!(
                "workload {:?}",
                workload.name
            )));
        };
        let generation = existing.generation + 1;
        let previous_status = existing.status.clone();
        *existing = workload.clone();
        existing.generation = generation;
        existing.status = if auto_ready {
            Self::ready_status(existing)
        } else {
            previous_status
        };
        Ok(())
    }

    async fn delete_workload(&self, name: &str) -> ClusterResult<bool> {
        Ok(self.lock().workloads.remove(name).is_some())
    }

    async fn get_service(&self, name: &str) -> ClusterResult<Option<ServiceSpec>> {
        Ok(self.lock().services.get(name).cloned())
    }

    async fn create_service(&self, service: &ServiceSpec) -> ClusterResult<()> {
        let mut inner = self.lock();
        if inner.services.contains_key(&service.name) {
            return Err(ClusterError::Conflict(format!(
                "service {:?} already exists",
                service.name
            )));
        }
        inner.services.insert(service.name.clone(), service.clone());
        Self::notify_services(&mut inner, ServiceEvent::Added(service.name.clone()));
        Ok(())
    }

    async fn update_service(&self, service: &ServiceSpec) -> ClusterResult<()> {
        let mut inner = self.lock();
        if !inner.services.contains_key(&service.name) {
            return Err(ClusterError::NotFound(format!("service {:?}", service.name)));
        }
        inner.services.insert(service.name.clone(), service.clone());
        Self::notify_services(&mut inner, ServiceEvent::Updated(service.name.clone()));
        Ok(())
    }

    async fn delete_service(&self, name: &str) -> ClusterResult<bool> {
        let mut inner = self.lock();
        let existed = inner.services.remove(name).is_some();
        if existed {
            Self::notify_services(&mut inner, ServiceEvent::Deleted(name.to_string()));
        }
        Ok(existed)
    }

    async fn list_services(&self) -> ClusterResult<Vec<ServiceSpec>> {
        Ok(self.lock().services.values().cloned().collect())
    }

    fn watch_services(&self) -> mpsc::UnboundedReceiver<ServiceEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.lock().service_watchers.push(tx);
        rx
    }

    async fn list_replica_sets(&self, selector: &Labels) -> ClusterResult<Vec<ReplicaSetInfo>> {
        Ok(self
            .lock()
            .replica_sets
            .iter()
            .filter(|rs| {
                selector
                    .iter()
                    .all(|(k, v)| rs.labels.get(k).is_some_and(|have| have == v))
            })
            .cloned()
            .collect())
    }

    async fn list_pods(&self, selector: &Labels) -> ClusterResult<Vec<PodInfo>> {
        Ok(self
            .lock()
            .pods
            .iter()
            .filter(|pod| pod.matches(selector))
            .cloned()
            .collect())
    }

    async fn pod_logs(&self, label_key: &str, label_value: &str) -> ClusterResult<String> {
        Ok(self
            .lock()
            .pod_logs
            .get(&format!("{label_key}={label_value}"))
            .cloned()
            .unwrap_or_default())
    }

    async fn create_job(&self, job: &JobSpec) -> ClusterResult<()> {
        let mut inner = self.lock();
        if let Some(message) = inner.fail_next_job_create.take() {
            return Err(ClusterError::Api(message));
        }
        if inner.jobs.contains_key(&job.name) {
            return Err(ClusterError::Conflict(format!(
                "job {:?} already exists",
                job.name
            )));
        }
        inner.jobs.insert(
            job.name.clone(),
            JobState {
                name: job.name.clone(),
                labels: job.labels.clone(),
                active: 0,
                conditions: Vec::new(),
            },
        );
        Ok(())
    }

    async fn delete_job(&self, name: &str) -> ClusterResult<bool> {
        Ok(self.lock().jobs.remove(name).is_some())
    }

    fn watch_jobs(&self) -> mpsc::UnboundedReceiver<JobEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.lock().job_watchers.push(tx);
        rx
    }

    async fn get_route_rules(&self, app_name: &str) -> ClusterResult<Option<RouteRuleSet>> {
        Ok(self.lock().route_rules.get(app_name).cloned())
    }

    async fn upsert_route_rules(&self, rules: &RouteRuleSet) -> ClusterResult<()> {
        let mut inner = self.lock();
        let mut stored = rules.clone();
        stored.resource_version = inner
            .route_rules
            .get(&rules.app_name)
            .map(|existing| existing.resource_version + 1)
            .unwrap_or(1);
        inner.route_rules.insert(rules.app_name.clone(), stored);
        Ok(())
    }

    async fn delete_route_rules(&self, app_name: &str) -> ClusterResult<bool> {
        Ok(self.lock().route_rules.remove(app_name).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::PodTemplate;

    fn workload(name: &str, replicas: u32) -> Workload {
        Workload {
            name: name.into(),
            labels: Labels::new(),
            selector: Labels::new(),
            replicas,
            revision_history_limit: 2,
            template: PodTemplate::default(),
            generation: 0,
            status: WorkloadStatus::default(),
        }
    }

    #[tokio::test]
    async fn workload_generation_advances_on_update() {
        let cluster = MemoryCluster::new();
        cluster.create_workload(&workload("w", 1)).await.unwrap();
        let first = cluster.get_workload("w").await.unwrap().unwrap();
        assert_eq!(first.generation, 1);

        cluster.update_workload(&workload("w", 3)).await.unwrap();
        let second = cluster.get_workload("w").await.unwrap().unwrap();
        assert_eq!(second.generation, 2);
        // auto_ready keeps the status in step with the spec.
        assert_eq!(second.status.observed_generation, 2);
        assert_eq!(second.status.available_replicas, 3);
    }

    #[tokio::test]
    async fn duplicate_workload_create_conflicts() {
        let cluster = MemoryCluster::new();
        cluster.create_workload(&workload("w", 1)).await.unwrap();
        let err = cluster.create_workload(&workload("w", 1)).await.unwrap_err();
        assert!(matches!(err, ClusterError::Conflict(_)));
    }

    #[tokio::test]
    async fn service_events_reach_watchers() {
        let cluster = MemoryCluster::new();
        let mut events = cluster.watch_services();

        let svc = ServiceSpec {
            name: "myapp-prod".into(),
            labels: Labels::new(),
            selector: Labels::new(),
            ports: Vec::new(),
        };
        cluster.create_service(&svc).await.unwrap();
        cluster.update_service(&svc).await.unwrap();
        cluster.delete_service("myapp-prod").await.unwrap();

        assert_eq!(
            events.recv().await,
            Some(ServiceEvent::Added("myapp-prod".into()))
        );
        assert_eq!(
            events.recv().await,
            Some(ServiceEvent::Updated("myapp-prod".into()))
        );
        assert_eq!(
            events.recv().await,
            Some(ServiceEvent::Deleted("myapp-prod".into()))
        );
    }

    #[tokio::test]
    async fn route_rule_versions_bump_on_upsert() {
        let cluster = MemoryCluster::new();
        let rules = RouteRuleSet {
            app_name: "myapp".into(),
            hosts: vec!["myapp".into()],
            rules: Vec::new(),
            resource_version: 0,
        };
        cluster.upsert_route_rules(&rules).await.unwrap();
        assert_eq!(cluster.route_rules("myapp").unwrap().resource_version, 1);
        cluster.upsert_route_rules(&rules).await.unwrap();
        assert_eq!(cluster.route_rules("myapp").unwrap().resource_version, 2);
    }
}
