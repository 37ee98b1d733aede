//! The service-discovery cache.
//!
//! Subscribes to service events, then rebuilds the whole table from the
//! current listing on every event after the initial sync. Full rebuilds
//! keep the aggregation trivially correct; the table is small.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{info, warn};

use paas_cluster::{ClusterApi, ServiceSpec, APP_LABEL, LANE_LABEL};

/// One routing-table entry: the lanes an app runs on and its port.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceInfo {
    pub lanes: Vec<String>,
    pub port: u16,
}

struct Table {
    services: BTreeMap<String, ServiceInfo>,
    updated_at: DateTime<Utc>,
}

/// Informer-backed cache of the `{app → {lanes, port}}` mapping.
pub struct RouteRegistry {
    api: Arc<dyn ClusterApi>,
    table: RwLock<Table>,
    ready: AtomicBool,
}

impl RouteRegistry {
    pub fn new(api: Arc<dyn ClusterApi>) -> Self {
        Self {
            api,
            table: RwLock::new(Table {
                services: BTreeMap::new(),
                updated_at: Utc::now(),
            }),
            ready: AtomicBool::new(false),
        }
    }

    /// True once the initial sync has completed.
    pub fn ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    /// Deep copy of the whole table; callers never observe later
    /// mutations through it.
    pub fn snapshot(&self) -> BTreeMap<String, ServiceInfo> {
        self.table.read().expect("registry lock").services.clone()
    }

    pub fn get(&self, app: &str) -> Option<ServiceInfo> {
        self.table
            .read()
            .expect("registry lock")
            .services
            .get(app)
            .cloned()
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.table.read().expect("registry lock").updated_at
    }

    /// Watch services and keep the table current. Blocks until shutdown
    /// flips or the event stream closes. Events arriving before the
    /// initial sync completes are ignored; the first rebuild runs
    /// synchronously after sync.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        // Subscribe before the initial list so no event can fall between.
        let mut events = self.api.watch_services();

        if !self.rebuild().await {
            warn!("initial cache sync failed, registry stays unready");
            return;
        }
        self.ready.store(true, Ordering::Release);
        info!("cache synced, ready to serve");

        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                event = events.recv() => {
                    if event.is_none() {
                        break;
                    }
                    // Payload is irrelevant: always rebuild from the listing.
                    self.rebuild().await;
                }
            }
        }
    }

    /// Rebuild the table from the current service listing. A list error
    /// leaves the previous snapshot intact. Returns success.
    async fn rebuild(&self) -> bool {
        let services = match self.api.list_services().await {
            Ok(services) => services,
            Err(err) => {
                warn!(error = %err, "failed to list services");
                return false;
            }
        };

        let mut result: BTreeMap<String, ServiceInfo> = BTreeMap::new();
        for svc in &services {
            let Some((app, lane)) = contributing_labels(svc) else {
                continue;
            };
            let port = svc.ports.first().map(|p| p.port).unwrap_or(0);

            let info = result.entry(app.to_string()).or_default();
            info.lanes.push(lane.to_string());
            // First observed port wins, but a real port replaces 0.
            if info.port == 0 {
                info.port = port;
            }
        }
        for info in result.values_mut() {
            info.lanes.sort();
        }

        let mut table = self.table.write().expect("registry lock");
        table.services = result;
        table.updated_at = Utc::now();
        true
    }
}

/// A service contributes only when both labels are present and non-empty.
fn contributing_labels(svc: &ServiceSpec) -> Option<(&str, &str)> {
    let app = svc.labels.get(APP_LABEL).filter(|v| !v.is_empty())?;
    let lane = svc.labels.get(LANE_LABEL).filter(|v| !v.is_empty())?;
    Some((app, lane))
}
