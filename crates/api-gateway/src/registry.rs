//! Polling client for the lite-registry routing table.
//!
//! The gateway pulls the snapshot on an interval instead of subscribing:
//! stale reads are fine because lane resolution falls back to prod for
//! any lane the table does not confirm.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

use serde::Deserialize;
use tokio::sync::watch;
use tracing::{debug, warn};

const POLL_TIMEOUT: Duration = Duration::from_secs(5);

/// Mirror of lite-registry's per-service entry.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServiceInfo {
    pub lanes: Vec<String>,
    pub port: u16,
}

#[derive(Deserialize)]
struct RoutesPayload {
    services: HashMap<String, ServiceInfo>,
}

/// Caches the registry's `{app → {lanes, port}}` table.
pub struct RegistryClient {
    registry_url: String,
    http: reqwest::Client,
    services: RwLock<HashMap<String, ServiceInfo>>,
}

impl RegistryClient {
    pub fn new(registry_url: &str) -> Self {
        Self {
            registry_url: registry_url.trim_end_matches('/').to_string(),
            http: reqwest::Client::builder()
                .timeout(POLL_TIMEOUT)
                .build()
                .expect("registry http client"),
            services: RwLock::new(HashMap::new()),
        }
    }

    /// Fetch the snapshot once. Failures keep the previous table.
    pub async fn poll(&self) {
        let url = format!("{}/v1/routes", self.registry_url);
        let response = match self.http.get(&url).send().await {
            Ok(response) => response,
            Err(err) => {
                warn!(error = %err, "registry poll failed");
                return;
            }
        };
        if !response.status().is_success() {
            warn!(status = %response.status(), "registry poll non-200");
            return;
        }
        let payload: RoutesPayload = match response.json().await {
            Ok(payload) => payload,
            Err(err) => {
                warn!(error = %err, "registry poll decode failed");
                return;
            }
        };

        let count = payload.services.len();
        *self.services.write().expect("registry table lock") = payload.services;
        debug!(services = count, "registry poll success");
    }

    /// Poll immediately, then on the given interval until shutdown.
    pub async fn run(&self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        self.poll().await;
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await; // consume the immediate first tick
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = ticker.tick() => self.poll().await,
            }
        }
    }

    /// Pick the upstream host and port for a service + lane.
    ///
    /// Lane-specific hosts (`{service}-{lane}`) are only used when the
    /// registry confirms the lane; everything else silently falls back
    /// to the plain service name, i.e. prod. The registry port wins
    /// over the route's declared port when known.
    pub fn resolve(&self, service: &str, lane: &str, default_port: u16) -> (String, u16) {
        let table = self.services.read().expect("registry table lock");
        let info = table.get(service);

        let port = match info {
            Some(info) if info.port > 0 => info.port,
            _ => default_port,
        };

        let host = if !lane.is_empty()
            && lane != "prod"
            && info.is_some_and(|info| info.lanes.iter().any(|l| l == lane))
        {
            format!("{service}-{lane}")
        } else {
            service.to_string()
        };

        (host, port)
    }
}
